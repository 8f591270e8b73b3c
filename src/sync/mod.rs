// ============================================================================
// src/sync/mod.rs - 同期プリミティブ
// カーネルモニタ（単一ロック + 待機理由ごとの条件変数）とレコードアリーナ
// ============================================================================

pub mod arena;
pub mod monitor;

pub use arena::{Arena, ArenaKey};
pub use monitor::{CondVar, Monitor, MonitorGuard, WaitOutcome};
