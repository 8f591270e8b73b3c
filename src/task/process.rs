//! プロセス管理 (Process Management)
//!
//! プロセス制御ブロック (PCB) とプロセスのライフサイクル。
//!
//! - プロセスの終了値はメインスレッドの終了値
//! - 最後のスレッドが終了するとプロセスはゾンビになり、親が回収するまで残る
//! - 親より先に残された子は init に引き取られる

use std::collections::VecDeque;

use hashbrown::HashSet;

use crate::error::{KernelResult, ProcessError};
use crate::fs::fcb::{self, FcbId};
use crate::kernel::{KernelGuard, KernelState};
use crate::sync::{ArenaKey, CondVar};
use crate::task::thread::{self, Task, Tid};

/// プロセスID (Newtype)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub struct Pid(u64);

impl Pid {
    /// 「親なし」
    pub const NONE: Self = Self(0);
    /// 最初に起動されるプロセス
    pub const INIT: Self = Self(1);

    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl ArenaKey for Pid {
    fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

/// プロセス状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// 実行中のスレッドがある
    Alive,
    /// 終了済み、親の回収待ち
    Zombie,
}

/// プロセス制御ブロック
pub struct ProcessControlBlock {
    pub(crate) parent: Option<Pid>,
    pub(crate) state: ProcessState,
    pub(crate) main_thread: Tid,
    /// 未解放のスレッドレコード
    pub(crate) threads: HashSet<Tid>,
    /// 生存スレッド数
    pub(crate) thread_count: usize,
    pub(crate) exitval: i32,
    /// ディスクリプタテーブル
    pub(crate) fidt: Vec<Option<FcbId>>,
    pub(crate) children: Vec<Pid>,
    /// 終了して回収を待つ子（終了順）
    pub(crate) exited: VecDeque<Pid>,
    pub(crate) child_exit: CondVar,
}

impl ProcessControlBlock {
    fn new(parent: Option<Pid>, fileids: usize) -> Self {
        Self {
            parent,
            state: ProcessState::Alive,
            main_thread: Tid::NONE,
            threads: HashSet::new(),
            thread_count: 0,
            exitval: 0,
            fidt: vec![None; fileids],
            children: Vec::new(),
            exited: VecDeque::new(),
            child_exit: CondVar::new(),
        }
    }
}

/// 空の PCB を作成する（スレッドはまだない）
pub(crate) fn create_record(state: &mut KernelState, parent: Option<Pid>) -> KernelResult<Pid> {
    if state.processes.len() >= state.config.max_processes {
        return Err(ProcessError::ProcessTableFull.into());
    }
    let pcb = ProcessControlBlock::new(parent, state.config.max_fileid);
    let pid = state.processes.insert(pcb);
    if let Some(parent) = parent.and_then(|p| state.processes.get_mut(p)) {
        parent.children.push(pid);
    }
    Ok(pid)
}

/// 子プロセスを作成し、メインスレッドのレコードを登録する
///
/// 子は親のディスクリプタをすべて引き継ぐ。ビークルの起動は呼び出し元が行う。
pub(crate) fn spawn(
    state: &mut KernelState,
    parent: Option<Pid>,
    task: Task,
    args: &[u8],
) -> KernelResult<(Pid, Tid)> {
    if let Some(parent) = parent {
        if state.processes.get(parent).map(|p| p.state) != Some(ProcessState::Alive) {
            return Err(ProcessError::NoSuchProcess.into());
        }
    }
    let pid = create_record(state, parent)?;
    if let Some(parent) = parent {
        fcb::inherit(state, parent, pid);
    }
    let tid = thread::create(state, pid, task, args)?;
    log::debug!(
        "process {} created (parent {})",
        pid.as_u64(),
        parent.unwrap_or(Pid::NONE).as_u64()
    );
    Ok((pid, tid))
}

/// プロセスの終了処理（最後のスレッドの Exit から呼ばれる）
pub(crate) fn finalize(state: &mut KernelState, pid: Pid) {
    fcb::close_all(state, pid);

    let Some(pcb) = state.processes.get_mut(pid) else {
        return;
    };
    pcb.state = ProcessState::Zombie;
    let parent = pcb.parent;
    let exitval = pcb.exitval;
    let threads: Vec<Tid> = pcb.threads.drain().collect();
    let children = std::mem::take(&mut pcb.children);
    let unreaped: Vec<Pid> = pcb.exited.drain(..).collect();

    for tid in threads {
        state.threads.remove(tid);
    }

    // 孤児は init が引き取る（init 自身が終了していれば親なし）
    let adopter = Some(Pid::INIT).filter(|init| {
        *init != pid
            && state
                .processes
                .get(*init)
                .is_some_and(|p| p.state == ProcessState::Alive)
    });
    for child in &children {
        if let Some(pcb) = state.processes.get_mut(*child) {
            pcb.parent = adopter;
        }
    }
    if let Some(init) = adopter.and_then(|p| state.processes.get_mut(p)) {
        init.children.extend(children);
        if !unreaped.is_empty() {
            init.exited.extend(unreaped);
            init.child_exit.broadcast();
        }
    }

    if let Some(parent) = parent.and_then(|p| state.processes.get_mut(p)) {
        parent.exited.push_back(pid);
        parent.child_exit.broadcast();
    }
    state.process_exit.broadcast();
    log::info!("process {} exited with status {}", pid.as_u64(), exitval);
}

/// ゾンビの子を回収して終了値を返す
fn reap(state: &mut KernelState, parent: Pid, child: Pid) -> i32 {
    if let Some(pcb) = state.processes.get_mut(parent) {
        pcb.children.retain(|c| *c != child);
        pcb.exited.retain(|c| *c != child);
    }
    state
        .processes
        .remove(child)
        .map_or(0, |zombie| zombie.exitval)
}

/// `WaitChild(target)`: 子の終了を待って回収する
///
/// `target` が `None` なら最も早く終了した子を回収する。
pub fn wait_child(g: &mut KernelGuard<'_>, pid: Pid, target: Option<Pid>) -> KernelResult<(Pid, i32)> {
    loop {
        let pcb = g.processes.get(pid).ok_or(ProcessError::NoSuchProcess)?;
        let ready = match target {
            Some(child) => {
                if !pcb.children.contains(&child) {
                    return Err(ProcessError::NoChildren.into());
                }
                pcb.exited.contains(&child).then_some(child)
            }
            None => {
                if pcb.children.is_empty() {
                    return Err(ProcessError::NoChildren.into());
                }
                pcb.exited.front().copied()
            }
        };
        if let Some(child) = ready {
            let status = reap(g, pid, child);
            log::debug!("pid {}: reaped child {}", pid.as_u64(), child.as_u64());
            return Ok((child, status));
        }
        let child_exit = pcb.child_exit.clone();
        child_exit.wait(g);
    }
}

/// ホスト側からプロセスの終了を待つ（回収はしない）
pub fn wait_exit(g: &mut KernelGuard<'_>, pid: Pid) -> KernelResult<i32> {
    loop {
        let pcb = g.processes.get(pid).ok_or(ProcessError::NoSuchProcess)?;
        if pcb.state == ProcessState::Zombie {
            return Ok(pcb.exitval);
        }
        let process_exit = g.process_exit.clone();
        process_exit.wait(g);
    }
}

/// 親プロセスID（親がなければ `Pid::NONE`）
pub fn getppid(state: &KernelState, pid: Pid) -> KernelResult<Pid> {
    state
        .processes
        .get(pid)
        .map(|pcb| pcb.parent.unwrap_or(Pid::NONE))
        .ok_or_else(|| ProcessError::NoSuchProcess.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KernelConfig;
    use crate::error::KernelError;
    use crate::ipc::pipe;
    use crate::kernel::Kernel;
    use crate::task::Caller;

    fn noop() -> Task {
        Box::new(|_: &[u8]| 0)
    }

    #[test]
    fn test_process_table_limit() {
        let kernel = Kernel::new(KernelConfig::new().with_max_processes(2));
        let mut g = kernel.enter();
        assert_eq!(create_record(&mut g, None), Ok(Pid::INIT));
        assert!(create_record(&mut g, Some(Pid::INIT)).is_ok());
        assert_eq!(
            create_record(&mut g, Some(Pid::INIT)),
            Err(KernelError::Process(ProcessError::ProcessTableFull))
        );
    }

    #[test]
    fn test_spawn_inherits_descriptors() {
        let kernel = Kernel::new(KernelConfig::default());
        let mut g = kernel.enter();
        let (init, _) = spawn(&mut g, None, noop(), b"").unwrap();
        let fds = pipe::open(&mut g, init).unwrap();
        let (child, _) = spawn(&mut g, Some(init), noop(), b"").unwrap();
        assert_eq!(getppid(&g, child), Ok(init));
        assert_eq!(getppid(&g, init), Ok(Pid::NONE));

        // 親が閉じても子の参照で書き込み端は生きている
        fcb::close(&mut g, init, fds.write).unwrap();
        assert_eq!(fcb::write(&mut g, child, fds.write, b"hi").unwrap(), 2);
    }

    #[test]
    fn test_wait_child_without_children() {
        let kernel = Kernel::new(KernelConfig::default());
        let mut g = kernel.enter();
        let (init, _) = spawn(&mut g, None, noop(), b"").unwrap();
        assert_eq!(
            wait_child(&mut g, init, None),
            Err(KernelError::Process(ProcessError::NoChildren))
        );
    }

    #[test]
    fn test_exit_status_and_reap() {
        let kernel = Kernel::new(KernelConfig::default());
        let mut g = kernel.enter();
        let (init, _) = spawn(&mut g, None, noop(), b"").unwrap();
        let (child, main) = spawn(&mut g, Some(init), noop(), b"").unwrap();
        thread::exit(&mut g, Caller { pid: child, tid: main }, 5);

        assert_eq!(wait_exit(&mut g, child), Ok(5));
        assert_eq!(wait_child(&mut g, init, Some(child)), Ok((child, 5)));
        assert!(!g.processes.contains(child));
    }

    #[test]
    fn test_orphans_are_adopted_by_init() {
        let kernel = Kernel::new(KernelConfig::default());
        let mut g = kernel.enter();
        let (init, _) = spawn(&mut g, None, noop(), b"").unwrap();
        let (middle, middle_main) = spawn(&mut g, Some(init), noop(), b"").unwrap();
        let (leaf, leaf_main) = spawn(&mut g, Some(middle), noop(), b"").unwrap();

        // 回収されないまま親が終了した子も init へ
        thread::exit(&mut g, Caller { pid: leaf, tid: leaf_main }, 3);
        thread::exit(&mut g, Caller { pid: middle, tid: middle_main }, 2);

        assert_eq!(getppid(&g, leaf), Ok(init));
        let mut reaped = vec![
            wait_child(&mut g, init, None).unwrap(),
            wait_child(&mut g, init, None).unwrap(),
        ];
        reaped.sort();
        assert_eq!(reaped, vec![(middle, 2), (leaf, 3)]);
    }
}
