// ============================================================================
// src/io/mod.rs - ホスト側 I/O
// ============================================================================

pub mod log;
