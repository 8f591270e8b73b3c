// ============================================================================
// src/task/mod.rs - プロセスとスレッド
// ============================================================================

pub mod process;
pub mod scheduler;
pub mod thread;

pub use process::{Pid, ProcessState};
pub use scheduler::{CurrentThread, current};
pub use thread::{Task, Tid};

/// 呼び出し元（プロセスとスレッドの組）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub pid: Pid,
    pub tid: Tid,
}
