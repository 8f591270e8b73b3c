// ============================================================================
// src/ipc/mod.rs - プロセス間通信
// ============================================================================

pub mod pipe;

pub use pipe::{PipeBuffer, PipeEnd, PipeFds, PipeId};
