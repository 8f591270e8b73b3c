// ============================================================================
// src/lib.rs - rany_ipc
// 教育用カーネルのモニタコア: 有界パイプ、パイプ上のソケット、スレッドライフサイクル
// ============================================================================
//!
//! すべてのカーネル状態は単一のモニタ (`Kernel`) に置かれ、
//! カーネルスレッドは `syscall` モジュールの関数で操作する。
//!
//! ```no_run
//! use rany_ipc::config::KernelConfig;
//! use rany_ipc::kernel::Kernel;
//! use rany_ipc::syscall;
//!
//! let kernel = Kernel::new(KernelConfig::default());
//! let init = kernel
//!     .boot(
//!         Box::new(|_: &[u8]| {
//!             let fds = syscall::pipe().unwrap();
//!             syscall::write(fds.write, b"hi").unwrap();
//!             0
//!         }),
//!         b"",
//!     )
//!     .unwrap();
//! assert_eq!(kernel.wait_exit(init), Ok(0));
//! ```

pub mod config;
pub mod demo;
pub mod error;
pub mod fs;
pub mod io;
pub mod ipc;
pub mod kernel;
pub mod net;
pub mod sync;
pub mod syscall;
pub mod task;

pub use config::KernelConfig;
pub use error::{KernelError, KernelResult};
pub use kernel::{Kernel, KernelStats};
