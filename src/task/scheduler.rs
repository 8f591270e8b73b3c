// ============================================================================
// src/task/scheduler.rs - スレッドビークル
//
// カーネルスレッドはホスト OS スレッド上で実行される。
// ビークルは本体を実行し、戻り値で Exit し、終了後に回収される。
// 実行中のカーネルスレッドはスレッドローカルの CURRENT で自分を特定する。
// ============================================================================

use std::any::Any;
use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use super::Caller;
use super::thread;
use crate::error::{KernelResult, ThreadError};
use crate::kernel::Kernel;

/// 実行中のカーネルスレッド
#[derive(Clone)]
pub struct CurrentThread {
    pub kernel: Arc<Kernel>,
    pub caller: Caller,
}

thread_local! {
    static CURRENT: RefCell<Option<CurrentThread>> = const { RefCell::new(None) };
}

/// 呼び出し元のカーネルスレッド
pub fn current() -> KernelResult<CurrentThread> {
    CURRENT
        .with(|current| current.borrow().clone())
        .ok_or_else(|| ThreadError::NotKernelThread.into())
}

/// `ThreadExit` がビークルまで巻き戻すときのペイロード
pub(crate) struct ThreadTerminated;

/// 帳簿処理を終えたスレッドをビークルまで巻き戻す
///
/// パニックフックは呼ばれない。
pub(crate) fn terminate() -> ! {
    panic::resume_unwind(Box::new(ThreadTerminated))
}

/// 新しいスレッドを実行可能にする（ビークルを起動する）
pub(crate) fn wakeup(kernel: &Arc<Kernel>, caller: Caller) -> KernelResult<()> {
    let kernel = Arc::clone(kernel);
    std::thread::Builder::new()
        .name(format!("kthread-{}.{}", caller.pid.as_u64(), caller.tid.as_u64()))
        .spawn(move || run_vehicle(kernel, caller))
        .map(drop)
        .map_err(|e| {
            log::error!(
                "pid {}: failed to start thread {}: {}",
                caller.pid.as_u64(),
                caller.tid.as_u64(),
                e
            );
            ThreadError::SpawnFailed.into()
        })
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("<non-string panic>")
}

fn run_vehicle(kernel: Arc<Kernel>, caller: Caller) {
    let start = {
        let mut g = kernel.enter();
        thread::take_start(&mut g, caller.tid)
    };
    let Some((task, args)) = start else {
        return;
    };

    CURRENT.with(|current| {
        *current.borrow_mut() = Some(CurrentThread {
            kernel: Arc::clone(&kernel),
            caller,
        })
    });

    match panic::catch_unwind(AssertUnwindSafe(|| task(&args))) {
        Ok(exitval) => kernel.exit_thread(caller, exitval),
        // ThreadExit 済み
        Err(payload) if payload.is::<ThreadTerminated>() => {}
        Err(payload) => {
            log::error!(
                "pid {}: thread {} panicked: {}",
                caller.pid.as_u64(),
                caller.tid.as_u64(),
                panic_message(&*payload)
            );
            kernel.exit_thread(caller, -1);
        }
    }

    CURRENT.with(|current| current.borrow_mut().take());
}
