// ============================================================================
// src/fs/mod.rs - ディスクリプタ層
// ============================================================================

pub mod fcb;

pub use fcb::{FcbId, Fid, FileControlBlock, StreamObject};
