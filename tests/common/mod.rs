// ============================================================================
// tests/common/mod.rs - 統合テスト共通ヘルパー
// ============================================================================

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use rany_ipc::config::KernelConfig;
use rany_ipc::kernel::Kernel;

/// init プロセスとして `body` を実行し、その戻り値を返す
///
/// `body` がパニックした場合はここでパニックする。
pub fn run_in_kernel<T, F>(kernel: &Arc<Kernel>, body: F) -> T
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    let pid = kernel
        .boot(
            Box::new(move |_: &[u8]| {
                let _ = tx.send(body());
                0
            }),
            b"",
        )
        .expect("boot");
    kernel.wait_exit(pid).expect("wait_exit");
    rx.recv().expect("init task panicked")
}

/// 既定構成のカーネルで実行する
pub fn run<T, F>(body: F) -> T
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    run_in_kernel(&Kernel::new(KernelConfig::default()), body)
}

/// 条件が成り立つまでポーリングする（最大 2 秒）
pub fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    cond()
}
