// ============================================================================
// src/demo/echo_server.rs - Socket Echo Server Demo
// Demonstrates listener/accept, per-connection threads and child processes
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::demo::DemoResult;
use crate::error::{ErrorContext, KernelResult};
use crate::fs::fcb::Fid;
use crate::kernel::Kernel;
use crate::net::port::Port;
use crate::net::socket::ShutdownMode;
use crate::syscall;
use crate::task::thread::Tid;

/// Echo server statistics
pub struct EchoStats {
    /// Total connections
    pub connections: AtomicU64,
    /// Total bytes echoed
    pub bytes_echoed: AtomicU64,
    /// Errors
    pub errors: AtomicU64,
}

impl EchoStats {
    pub const fn new() -> Self {
        EchoStats {
            connections: AtomicU64::new(0),
            bytes_echoed: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }
}

impl Default for EchoStats {
    fn default() -> Self {
        Self::new()
    }
}

static STATS: EchoStats = EchoStats::new();

/// Echo server configuration
#[derive(Clone, Debug)]
pub struct EchoConfig {
    /// Port to listen on
    pub port: Port,
    /// Number of client processes
    pub clients: usize,
    /// Messages each client sends
    pub messages: Vec<String>,
    /// Echo prefix
    pub prefix: Option<String>,
    /// Connect timeout
    pub connect_timeout: Duration,
}

impl Default for EchoConfig {
    fn default() -> Self {
        EchoConfig {
            port: Port::new(777),
            clients: 3,
            messages: vec![
                String::from("Hello, ExoRust!"),
                String::from("Testing pipe-backed sockets"),
            ],
            prefix: Some(String::from("[ECHO] ")),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// 接続ごとのスレッド本体: EOF まで読み、プレフィックス付きで書き戻す
fn serve_connection(conn: Fid, prefix: &str) -> KernelResult<u64> {
    let mut buf = [0u8; 512];
    let mut echoed = 0u64;
    loop {
        let n = syscall::read(conn, &mut buf)?;
        if n == 0 {
            break;
        }
        let mut response = prefix.as_bytes().to_vec();
        response.extend_from_slice(&buf[..n]);
        syscall::write_all(conn, &response)?;
        echoed += response.len() as u64;
    }
    syscall::close(conn)?;
    Ok(echoed)
}

/// `clients` 回 Accept し、接続ごとにスレッドを起こす
fn accept_loop(listener: Fid, clients: usize, prefix: String) -> KernelResult<()> {
    let mut workers: Vec<Tid> = Vec::with_capacity(clients);
    for id in 0..clients {
        let conn = syscall::accept(listener)?;
        STATS.connections.fetch_add(1, Ordering::Relaxed);
        log::info!("[ECHO] connection {} accepted", id + 1);

        let prefix = prefix.clone();
        let worker = syscall::create_thread(
            Box::new(move |_: &[u8]| match serve_connection(conn, &prefix) {
                Ok(bytes) => {
                    STATS.bytes_echoed.fetch_add(bytes, Ordering::Relaxed);
                    0
                }
                Err(e) => {
                    STATS.errors.fetch_add(1, Ordering::Relaxed);
                    log::warn!("[ECHO] connection failed: {}", e);
                    e.status()
                }
            }),
            b"",
        )?;
        workers.push(worker);
    }
    for worker in workers {
        syscall::thread_join(worker)?;
    }
    Ok(())
}

/// 応答をちょうど `len` バイト読む
fn read_exact(fid: Fid, len: usize) -> KernelResult<Vec<u8>> {
    let mut response = vec![0u8; len];
    let mut filled = 0;
    while filled < len {
        let n = syscall::read(fid, &mut response[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    response.truncate(filled);
    Ok(response)
}

/// クライアントプロセス本体。不一致の応答数を返す。
fn client(config: &EchoConfig, id: u8) -> KernelResult<i32> {
    let sock = syscall::socket(None)?;
    syscall::connect(sock, config.port, Some(config.connect_timeout))?;

    let prefix = config.prefix.as_deref().unwrap_or("");
    let mut mismatches = 0;
    for message in &config.messages {
        let message = format!("{} (client {})", message, id);
        syscall::write_all(sock, message.as_bytes())?;
        let expected = format!("{}{}", prefix, message);
        let response = read_exact(sock, expected.len())?;
        if response != expected.as_bytes() {
            mismatches += 1;
        }
        log::info!(
            "[ECHO] client {}: '{}'",
            id,
            String::from_utf8_lossy(&response)
        );
    }

    // 書き込み側を閉じるとサーバは EOF を観測して接続を閉じる
    syscall::shutdown(sock, ShutdownMode::WRITE)?;
    let mut buf = [0u8; 1];
    if syscall::read(sock, &mut buf)? != 0 {
        mismatches += 1;
    }
    syscall::close(sock)?;
    Ok(mismatches)
}

/// init プロセス本体
fn init_process(config: EchoConfig) -> KernelResult<i32> {
    let listener = syscall::socket(Some(config.port))?;
    syscall::listen(listener)?;
    log::info!("[ECHO] Server listening on port {}", config.port.as_u16());

    for id in 0..config.clients {
        let config = config.clone();
        syscall::spawn(
            Box::new(move |args: &[u8]| {
                let id = args.first().copied().unwrap_or_default();
                client(&config, id).unwrap_or_else(|e| {
                    log::warn!("[ECHO] client {} failed: {}", id, e);
                    e.status()
                })
            }),
            &[id as u8 + 1],
        )?;
    }

    // クライアントは接続要求を出して Accept を待つ。
    // 先に生成しておくことで、子が受け付け済みの接続を継承しない。
    let clients = config.clients;
    let prefix = config.prefix.clone().unwrap_or_default();
    let server = syscall::create_thread(
        Box::new(move |_: &[u8]| match accept_loop(listener, clients, prefix) {
            Ok(()) => 0,
            Err(e) => e.status(),
        }),
        b"",
    )?;

    let mut failures = 0;
    for _ in 0..config.clients {
        let (pid, status) = syscall::wait_child(None)?;
        log::info!("[ECHO] client pid {} exited with {}", pid.as_u64(), status);
        if status != 0 {
            failures += 1;
        }
    }
    if syscall::thread_join(server)? != 0 {
        failures += 1;
    }
    syscall::close(listener)?;
    Ok(failures)
}

/// Run echo server demo
pub fn run(kernel: &Arc<Kernel>, config: EchoConfig) -> DemoResult {
    log::info!("================================================================================");
    log::info!("                    ExoRust Socket Echo Server Demo");
    log::info!("================================================================================");

    let init = kernel.boot(
        Box::new(move |_: &[u8]| {
            init_process(config).unwrap_or_else(|e| {
                log::error!("[ECHO] init failed: {}", e);
                e.status()
            })
        }),
        b"",
    );
    let status = match init
        .context("boot init")
        .and_then(|pid| kernel.wait_exit(pid).context("wait for init"))
    {
        Ok(status) => status,
        Err(e) => return DemoResult::Error(e.to_string()),
    };

    log::info!(
        "[ECHO] connections={} bytes_echoed={} errors={}",
        STATS.connections.load(Ordering::Relaxed),
        STATS.bytes_echoed.load(Ordering::Relaxed),
        STATS.errors.load(Ordering::Relaxed)
    );
    if status == 0 {
        DemoResult::Success
    } else {
        DemoResult::Error(format!("echo demo finished with status {}", status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KernelConfig;

    #[test]
    fn test_echo_demo_round_trip() {
        let kernel = Kernel::new(KernelConfig::default());
        let config = EchoConfig {
            clients: 2,
            ..EchoConfig::default()
        };
        assert!(matches!(run(&kernel, config), DemoResult::Success));
        let stats = kernel.stats();
        assert_eq!(stats.sockets, 0);
        assert_eq!(stats.pipes, 0);
        assert_eq!(stats.listeners, 0);
    }
}
