// ============================================================================
// src/syscall/mod.rs - System Call Interface
// ============================================================================
//!
//! # システムコールインターフェース
//!
//! カーネルスレッド内から呼び出す関数群。呼び出し元のプロセスとスレッドは
//! スケジューラの CURRENT から解決されるため、カーネルスレッド以外から
//! 呼ぶと `ThreadError::NotKernelThread` で失敗する。
//!
//! ## 設計原則
//! - 関数呼び出しベースのシステムコール（トラップ不要）
//! - すべての失敗は `KernelResult` で呼び出し元に返す
//! - `thread_exit` だけは戻らない

use std::time::Duration;

use crate::error::KernelResult;
use crate::fs::fcb::{self, Fid};
use crate::ipc::pipe::{self, PipeFds};
use crate::net::port::Port;
use crate::net::socket::{self, ShutdownMode};
use crate::task::process::{self, Pid};
use crate::task::scheduler;
use crate::task::thread::{self, Task, Tid};

// ============================================================================
// ファイルディスクリプタ
// ============================================================================

/// `Pipe()`
pub fn pipe() -> KernelResult<PipeFds> {
    let current = scheduler::current()?;
    pipe::open(&mut current.kernel.enter(), current.caller.pid)
}

/// `Read(fid, buf)`（0 は EOF）
pub fn read(fid: Fid, buf: &mut [u8]) -> KernelResult<usize> {
    let current = scheduler::current()?;
    fcb::read(&mut current.kernel.enter(), current.caller.pid, fid, buf)
}

/// `Write(fid, data)`（短い書き込みは成功）
pub fn write(fid: Fid, data: &[u8]) -> KernelResult<usize> {
    let current = scheduler::current()?;
    fcb::write(&mut current.kernel.enter(), current.caller.pid, fid, data)
}

/// `data` をすべて書き込むまで `write` を繰り返す
pub fn write_all(fid: Fid, mut data: &[u8]) -> KernelResult<()> {
    while !data.is_empty() {
        let written = write(fid, data)?;
        data = &data[written..];
    }
    Ok(())
}

/// `Close(fid)`
pub fn close(fid: Fid) -> KernelResult<()> {
    let current = scheduler::current()?;
    fcb::close(&mut current.kernel.enter(), current.caller.pid, fid)
}

/// `Dup2(oldfid, newfid)`
pub fn dup2(oldfid: Fid, newfid: Fid) -> KernelResult<()> {
    let current = scheduler::current()?;
    fcb::dup2(&mut current.kernel.enter(), current.caller.pid, oldfid, newfid)
}

// ============================================================================
// ソケット
// ============================================================================

/// `Socket(port)`
pub fn socket(port: Option<Port>) -> KernelResult<Fid> {
    let current = scheduler::current()?;
    socket::socket(&mut current.kernel.enter(), current.caller.pid, port)
}

/// `Listen(fid)`
pub fn listen(fid: Fid) -> KernelResult<()> {
    let current = scheduler::current()?;
    socket::listen(&mut current.kernel.enter(), current.caller.pid, fid)
}

/// `Accept(fid)`
pub fn accept(fid: Fid) -> KernelResult<Fid> {
    let current = scheduler::current()?;
    socket::accept(&mut current.kernel.enter(), current.caller.pid, fid)
}

/// `Connect(fid, port, timeout)`（`None` は無期限）
pub fn connect(fid: Fid, port: Port, timeout: Option<Duration>) -> KernelResult<()> {
    let current = scheduler::current()?;
    socket::connect(&mut current.kernel.enter(), current.caller.pid, fid, port, timeout)
}

/// `ShutDown(fid, mode)`
pub fn shutdown(fid: Fid, mode: ShutdownMode) -> KernelResult<()> {
    let current = scheduler::current()?;
    socket::shutdown(&mut current.kernel.enter(), current.caller.pid, fid, mode)
}

// ============================================================================
// スレッド
// ============================================================================

/// `CreateThread(task, args)`
pub fn create_thread(task: Task, args: &[u8]) -> KernelResult<Tid> {
    let current = scheduler::current()?;
    current.kernel.create_thread(current.caller.pid, task, args)
}

/// `ThreadSelf()`
pub fn thread_self() -> KernelResult<Tid> {
    Ok(scheduler::current()?.caller.tid)
}

/// `ThreadJoin(tid)`
pub fn thread_join(tid: Tid) -> KernelResult<i32> {
    let current = scheduler::current()?;
    thread::join(&mut current.kernel.enter(), current.caller, tid)
}

/// `ThreadDetach(tid)`
pub fn thread_detach(tid: Tid) -> KernelResult<()> {
    let current = scheduler::current()?;
    thread::detach(&mut current.kernel.enter(), current.caller.pid, tid)
}

/// `ThreadExit(exitval)`
///
/// # Panics
/// カーネルスレッド以外から呼ばれた場合。
pub fn thread_exit(exitval: i32) -> ! {
    match scheduler::current() {
        Ok(current) => {
            current.kernel.exit_thread(current.caller, exitval);
            drop(current);
            scheduler::terminate()
        }
        Err(e) => panic!("thread_exit: {}", e),
    }
}

// ============================================================================
// プロセス
// ============================================================================

/// `Exec(task, args)`: 子プロセスを作成する（ディスクリプタは継承される）
pub fn spawn(task: Task, args: &[u8]) -> KernelResult<Pid> {
    let current = scheduler::current()?;
    current
        .kernel
        .spawn_process(Some(current.caller.pid), task, args)
}

/// `WaitChild(pid)`: 子の終了を待って回収し、(pid, 終了値) を返す
pub fn wait_child(target: Option<Pid>) -> KernelResult<(Pid, i32)> {
    let current = scheduler::current()?;
    process::wait_child(&mut current.kernel.enter(), current.caller.pid, target)
}

/// `GetPid()`
pub fn get_pid() -> KernelResult<Pid> {
    Ok(scheduler::current()?.caller.pid)
}

/// `GetPPid()`（親がなければ `Pid::NONE`）
pub fn get_ppid() -> KernelResult<Pid> {
    let current = scheduler::current()?;
    process::getppid(&current.kernel.enter(), current.caller.pid)
}
