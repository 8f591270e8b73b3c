//! スレッドライフサイクル (Thread Lifecycle)
//!
//! スレッドレコードの生成・Join・Detach・Exit。
//!
//! レコードは次のいずれかの時点でちょうど一度だけ解放される:
//! - デタッチ済みのスレッドが Exit したとき
//! - 終了済みスレッドを待っていた最後の Join が戻るとき
//! - 所有プロセスの終了処理
//!
//! Join 中のスレッドがいる間にデタッチされると、待機者は全員
//! AlreadyDetached で戻る（待機者数はデタッチ時に 0 へ戻される）。

use crate::error::{KernelResult, ProcessError, ThreadError};
use crate::kernel::{KernelGuard, KernelState};
use crate::sync::{ArenaKey, CondVar};
use crate::task::Caller;
use crate::task::process::{self, Pid, ProcessState};

/// スレッドID (Newtype)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub struct Tid(u64);

impl Tid {
    /// 「スレッドなし」
    pub const NONE: Self = Self(0);

    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl ArenaKey for Tid {
    fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

/// スレッド本体。引数バイト列を受け取り終了値を返す。
pub type Task = Box<dyn FnOnce(&[u8]) -> i32 + Send + 'static>;

/// スレッドレコード
pub struct ThreadRecord {
    owner: Pid,
    /// 起動時に取り出される
    task: Option<Task>,
    /// 生成時にコピーされた引数
    args: Vec<u8>,
    exitval: i32,
    exited: bool,
    detached: bool,
    /// Join で待機中のスレッド数
    joiners: usize,
    exit_cv: CondVar,
}

/// 呼び出し元プロセスに属する生存レコードを引く
fn record_of(state: &mut KernelState, pid: Pid, tid: Tid) -> KernelResult<&mut ThreadRecord> {
    state
        .threads
        .get_mut(tid)
        .filter(|record| record.owner == pid)
        .ok_or_else(|| ThreadError::InvalidThread.into())
}

/// レコードを解放し、プロセスのスレッド集合から外す
fn reclaim(state: &mut KernelState, tid: Tid) {
    if let Some(record) = state.threads.remove(tid) {
        if let Some(pcb) = state.processes.get_mut(record.owner) {
            pcb.threads.remove(&tid);
        }
        log::trace!("thread {} reclaimed", tid.as_u64());
    }
}

/// レコードを作成してプロセスへ登録する（ビークルの起動は呼び出し元）
///
/// プロセスの最初のスレッドがメインスレッドになる。
pub(crate) fn create(state: &mut KernelState, pid: Pid, task: Task, args: &[u8]) -> KernelResult<Tid> {
    match state.processes.get(pid) {
        Some(pcb) if pcb.state == ProcessState::Alive => {}
        _ => return Err(ProcessError::NoSuchProcess.into()),
    }
    let tid = state.threads.insert(ThreadRecord {
        owner: pid,
        task: Some(task),
        args: args.to_vec(),
        exitval: 0,
        exited: false,
        detached: false,
        joiners: 0,
        exit_cv: CondVar::new(),
    });
    if let Some(pcb) = state.processes.get_mut(pid) {
        pcb.threads.insert(tid);
        pcb.thread_count += 1;
        if pcb.main_thread == Tid::NONE {
            pcb.main_thread = tid;
        }
    }
    Ok(tid)
}

/// ビークル起動時に本体と引数を取り出す
pub(crate) fn take_start(state: &mut KernelState, tid: Tid) -> Option<(Task, Vec<u8>)> {
    let record = state.threads.get_mut(tid)?;
    let task = record.task.take()?;
    Some((task, std::mem::take(&mut record.args)))
}

/// `ThreadJoin(tid)`: 対象の終了を待ち、終了値を返す
pub fn join(g: &mut KernelGuard<'_>, caller: Caller, tid: Tid) -> KernelResult<i32> {
    let record = record_of(g, caller.pid, tid)?;
    if tid == caller.tid {
        return Err(ThreadError::SelfJoin.into());
    }
    if record.detached {
        return Err(ThreadError::AlreadyDetached.into());
    }
    record.joiners += 1;
    let exit_cv = record.exit_cv.clone();

    loop {
        let Some(record) = g.threads.get_mut(tid) else {
            return Err(ThreadError::AlreadyDetached.into());
        };
        if record.detached {
            record.joiners = record.joiners.saturating_sub(1);
            return Err(ThreadError::AlreadyDetached.into());
        }
        if record.exited {
            let exitval = record.exitval;
            record.joiners -= 1;
            if record.joiners == 0 {
                reclaim(g, tid);
            }
            return Ok(exitval);
        }
        exit_cv.wait(g);
    }
}

/// `ThreadDetach(tid)`
///
/// 既にデタッチ済みなら何もしない。
pub fn detach(state: &mut KernelState, pid: Pid, tid: Tid) -> KernelResult<()> {
    let record = record_of(state, pid, tid)?;
    if record.exited {
        return Err(ThreadError::AlreadyExited.into());
    }
    if record.detached {
        return Ok(());
    }
    record.detached = true;
    record.joiners = 0;
    record.exit_cv.broadcast();
    log::debug!("pid {}: thread {} detached", pid.as_u64(), tid.as_u64());
    Ok(())
}

/// `ThreadExit(exitval)` の帳簿処理
///
/// 最後の生存スレッドならプロセスの終了処理まで行う。
pub(crate) fn exit(state: &mut KernelState, caller: Caller, exitval: i32) {
    let Some(record) = state.threads.get_mut(caller.tid) else {
        return;
    };
    if record.exited {
        return;
    }
    record.exitval = exitval;
    record.exited = true;
    record.task = None;
    record.exit_cv.broadcast();
    if record.detached {
        reclaim(state, caller.tid);
    }

    let Some(pcb) = state.processes.get_mut(caller.pid) else {
        return;
    };
    if pcb.main_thread == caller.tid {
        pcb.exitval = exitval;
    }
    pcb.thread_count = pcb.thread_count.saturating_sub(1);
    if pcb.thread_count == 0 {
        process::finalize(state, caller.pid);
    }
}

/// Join で待機中のスレッド数（全レコードの合計）
pub(crate) fn blocked_joiners(state: &KernelState) -> usize {
    state.threads.values().map(|record| record.joiners).sum()
}

/// 終了済みで Join を待っているレコード数
pub(crate) fn unjoined_exits(state: &KernelState) -> usize {
    state
        .threads
        .values()
        .filter(|record| record.exited && !record.detached)
        .count()
}

/// プロセスのスレッド集合の大きさ（解放待ちの終了済みレコードを含む）
pub fn thread_set_len(state: &KernelState, pid: Pid) -> KernelResult<usize> {
    state
        .processes
        .get(pid)
        .map(|pcb| pcb.threads.len())
        .ok_or_else(|| ProcessError::NoSuchProcess.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KernelConfig;
    use crate::error::KernelError;
    use crate::kernel::Kernel;

    fn noop() -> Task {
        Box::new(|_: &[u8]| 0)
    }

    /// ビークルを起動せずにレコードだけ作る
    fn setup() -> (std::sync::Arc<Kernel>, Caller) {
        let kernel = Kernel::new(KernelConfig::default());
        let caller = {
            let mut g = kernel.enter();
            let pid = process::create_record(&mut g, None).unwrap();
            let tid = create(&mut g, pid, noop(), b"").unwrap();
            Caller { pid, tid }
        };
        (kernel, caller)
    }

    #[test]
    fn test_first_thread_is_main() {
        let (kernel, caller) = setup();
        let g = kernel.enter();
        assert_eq!(g.processes.get(caller.pid).unwrap().main_thread, caller.tid);
    }

    #[test]
    fn test_args_are_copied() {
        let (kernel, caller) = setup();
        let mut g = kernel.enter();
        let mut args = vec![1u8, 2, 3];
        let tid = create(&mut g, caller.pid, noop(), &args).unwrap();
        args[0] = 9;
        let (_, copied) = take_start(&mut g, tid).unwrap();
        assert_eq!(copied, vec![1, 2, 3]);
        // 二度目は何も取り出せない
        assert!(take_start(&mut g, tid).is_none());
    }

    #[test]
    fn test_self_join_rejected() {
        let (kernel, caller) = setup();
        let mut g = kernel.enter();
        assert_eq!(
            join(&mut g, caller, caller.tid),
            Err(KernelError::Thread(ThreadError::SelfJoin))
        );
    }

    #[test]
    fn test_join_foreign_or_missing_thread() {
        let (kernel, caller) = setup();
        let mut g = kernel.enter();
        let other = process::create_record(&mut g, None).unwrap();
        let foreign = create(&mut g, other, noop(), b"").unwrap();
        assert_eq!(
            join(&mut g, caller, foreign),
            Err(KernelError::Thread(ThreadError::InvalidThread))
        );
        assert_eq!(
            join(&mut g, caller, Tid::from_raw(999)),
            Err(KernelError::Thread(ThreadError::InvalidThread))
        );
    }

    #[test]
    fn test_join_after_exit_reclaims() {
        let (kernel, caller) = setup();
        let mut g = kernel.enter();
        let tid = create(&mut g, caller.pid, noop(), b"").unwrap();
        exit(&mut g, Caller { pid: caller.pid, tid }, 42);
        assert_eq!(join(&mut g, caller, tid), Ok(42));
        assert!(!g.threads.contains(tid));
        assert_eq!(
            join(&mut g, caller, tid),
            Err(KernelError::Thread(ThreadError::InvalidThread))
        );
    }

    #[test]
    fn test_detach_then_exit_reclaims() {
        let (kernel, caller) = setup();
        let mut g = kernel.enter();
        let before = thread_set_len(&g, caller.pid).unwrap();
        let tid = create(&mut g, caller.pid, noop(), b"").unwrap();
        detach(&mut g, caller.pid, tid).unwrap();
        // 二度目のデタッチは成功扱い
        detach(&mut g, caller.pid, tid).unwrap();
        assert_eq!(
            join(&mut g, caller, tid),
            Err(KernelError::Thread(ThreadError::AlreadyDetached))
        );
        exit(&mut g, Caller { pid: caller.pid, tid }, 0);
        assert_eq!(thread_set_len(&g, caller.pid).unwrap(), before);
    }

    #[test]
    fn test_detach_exited_thread_fails() {
        let (kernel, caller) = setup();
        let mut g = kernel.enter();
        let tid = create(&mut g, caller.pid, noop(), b"").unwrap();
        exit(&mut g, Caller { pid: caller.pid, tid }, 1);
        assert_eq!(
            detach(&mut g, caller.pid, tid),
            Err(KernelError::Thread(ThreadError::AlreadyExited))
        );
    }

    #[test]
    fn test_last_exit_finalizes_process() {
        let (kernel, caller) = setup();
        let mut g = kernel.enter();
        exit(&mut g, caller, 7);
        let pcb = g.processes.get(caller.pid).unwrap();
        assert_eq!(pcb.state, ProcessState::Zombie);
        assert_eq!(pcb.exitval, 7);
        assert!(g.threads.is_empty());
    }
}
