// ============================================================================
// src/net/mod.rs - ソケット層
// パイプ対で構成するローカルストリームソケットとポート登録表
// ============================================================================

pub mod port;
pub mod socket;

pub use port::{Port, PortMap};
pub use socket::{ShutdownMode, SocketControlBlock, SocketId, SocketType};
