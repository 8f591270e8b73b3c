// ============================================================================
// src/kernel.rs - カーネル状態とホスト側ハンドル
// ============================================================================
//!
//! パイプ・ソケット・ディスクリプタ・プロセス・スレッドのすべてのレコードは
//! 一つの `KernelState` にまとめられ、単一のモニタロックで保護される。
//!
//! レコードはアリーナに置かれ、再利用されないハンドルで参照される。
//! 解放済みのレコードはルックアップの失敗として観測される。

use std::sync::Arc;

use lazy_static::lazy_static;

use crate::config::KernelConfig;
use crate::error::KernelResult;
use crate::fs::fcb::{FcbId, FileControlBlock};
use crate::ipc::pipe::{PipeBuffer, PipeId};
#[cfg(feature = "stats")]
use crate::ipc::pipe::PipeStats;
use crate::net::port::PortMap;
use crate::net::socket::{ConnectionRequest, RequestId, SocketControlBlock, SocketId};
use crate::sync::{Arena, CondVar, Monitor, MonitorGuard};
use crate::task::Caller;
use crate::task::process::{self, Pid, ProcessControlBlock};
use crate::task::scheduler;
use crate::task::thread::{self, Task, ThreadRecord, Tid};

/// モニタで保護されるカーネル全体の状態
pub struct KernelState {
    pub(crate) config: KernelConfig,
    pub(crate) pipes: Arena<PipeId, PipeBuffer>,
    pub(crate) sockets: Arena<SocketId, SocketControlBlock>,
    pub(crate) requests: Arena<RequestId, ConnectionRequest>,
    pub(crate) ports: PortMap,
    pub(crate) files: Arena<FcbId, FileControlBlock>,
    pub(crate) processes: Arena<Pid, ProcessControlBlock>,
    pub(crate) threads: Arena<Tid, ThreadRecord>,
    /// いずれかのプロセスが終了した（ホスト側の待機用）
    pub(crate) process_exit: CondVar,
    #[cfg(feature = "stats")]
    pub(crate) pipe_stats: PipeStats,
}

impl KernelState {
    fn new(config: KernelConfig) -> Self {
        Self {
            config,
            pipes: Arena::new(),
            sockets: Arena::new(),
            requests: Arena::new(),
            ports: PortMap::new(),
            files: Arena::new(),
            processes: Arena::new(),
            threads: Arena::new(),
            process_exit: CondVar::new(),
            #[cfg(feature = "stats")]
            pipe_stats: PipeStats::default(),
        }
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }
}

/// モニタ内部にいる間のカーネル状態
pub type KernelGuard<'a> = MonitorGuard<'a, KernelState>;

/// 生存レコード数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KernelStats {
    pub processes: usize,
    pub threads: usize,
    /// Join で待機中のスレッド
    pub joiners: usize,
    /// 終了済みで未回収のスレッド
    pub unjoined_exits: usize,
    pub files: usize,
    pub pipes: usize,
    pub sockets: usize,
    pub listeners: usize,
    pub pending_requests: usize,
}

/// カーネル
pub struct Kernel {
    monitor: Monitor<KernelState>,
}

impl Kernel {
    pub fn new(config: KernelConfig) -> Arc<Self> {
        Arc::new(Self {
            monitor: Monitor::new(KernelState::new(config)),
        })
    }

    /// モニタに入る
    pub fn enter(&self) -> KernelGuard<'_> {
        self.monitor.enter()
    }

    /// init プロセスを起動する
    pub fn boot(self: &Arc<Self>, init: Task, args: &[u8]) -> KernelResult<Pid> {
        let pid = self.spawn_process(None, init, args)?;
        log::info!("kernel booted: init is pid {}", pid.as_u64());
        Ok(pid)
    }

    /// ホストスレッドからプロセスの終了を待つ
    pub fn wait_exit(&self, pid: Pid) -> KernelResult<i32> {
        let mut g = self.enter();
        process::wait_exit(&mut g, pid)
    }

    pub fn stats(&self) -> KernelStats {
        let g = self.enter();
        KernelStats {
            processes: g.processes.len(),
            threads: g.threads.len(),
            joiners: thread::blocked_joiners(&g),
            unjoined_exits: thread::unjoined_exits(&g),
            files: g.files.len(),
            pipes: g.pipes.len(),
            sockets: g.sockets.len(),
            listeners: g.ports.len(),
            pending_requests: g.requests.len(),
        }
    }

    /// パイプの累積統計
    #[cfg(feature = "stats")]
    pub fn pipe_stats(&self) -> PipeStats {
        self.enter().pipe_stats
    }

    /// プロセスのスレッド集合の大きさ
    pub fn thread_set_len(&self, pid: Pid) -> KernelResult<usize> {
        thread::thread_set_len(&self.enter(), pid)
    }

    /// スレッドを作成して実行可能にする
    pub(crate) fn create_thread(self: &Arc<Self>, pid: Pid, task: Task, args: &[u8]) -> KernelResult<Tid> {
        let tid = thread::create(&mut self.enter(), pid, task, args)?;
        self.start(Caller { pid, tid })?;
        Ok(tid)
    }

    /// プロセスを作成してメインスレッドを実行可能にする
    pub(crate) fn spawn_process(
        self: &Arc<Self>,
        parent: Option<Pid>,
        task: Task,
        args: &[u8],
    ) -> KernelResult<Pid> {
        let (pid, tid) = process::spawn(&mut self.enter(), parent, task, args)?;
        self.start(Caller { pid, tid })?;
        Ok(pid)
    }

    /// ビークルを起動する。失敗したスレッドは終了値 -1 で Exit させる。
    fn start(self: &Arc<Self>, caller: Caller) -> KernelResult<()> {
        scheduler::wakeup(self, caller).inspect_err(|_| self.exit_thread(caller, -1))
    }

    /// Exit の帳簿処理（呼び出し元はこの後ビークルへ戻る）
    pub(crate) fn exit_thread(&self, caller: Caller, exitval: i32) {
        thread::exit(&mut self.enter(), caller, exitval);
    }
}

lazy_static! {
    /// 既定のカーネル
    static ref KERNEL: Arc<Kernel> = Kernel::new(KernelConfig::default());
}

/// 既定のカーネルを返す（初回呼び出し時に作成される）
pub fn global() -> Arc<Kernel> {
    Arc::clone(&KERNEL)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_kernel_is_empty() {
        let kernel = Kernel::new(KernelConfig::default());
        assert_eq!(kernel.stats(), KernelStats::default());
        assert_eq!(kernel.enter().config().max_fileid, 16);
    }

    #[test]
    fn test_boot_and_wait_exit() {
        let kernel = Kernel::new(KernelConfig::default());
        let init = kernel
            .boot(Box::new(|args: &[u8]| args.iter().map(|b| *b as i32).sum::<i32>()), &[1, 2, 3])
            .unwrap();
        assert_eq!(init, Pid::INIT);
        assert_eq!(kernel.wait_exit(init), Ok(6));

        let stats = kernel.stats();
        assert_eq!(stats.threads, 0);
        assert_eq!(stats.files, 0);
        // ゾンビは残る
        assert_eq!(stats.processes, 1);
    }

    #[test]
    fn test_panicking_task_exits_with_failure() {
        let kernel = Kernel::new(KernelConfig::default());
        let init = kernel.boot(Box::new(|_: &[u8]| panic!("boom")), b"").unwrap();
        assert_eq!(kernel.wait_exit(init), Ok(-1));
    }

    #[test]
    fn test_global_is_shared() {
        assert!(Arc::ptr_eq(&global(), &global()));
    }
}
