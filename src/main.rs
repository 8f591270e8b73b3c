// ============================================================================
// src/main.rs - rany_ipc demo
// ============================================================================

use std::process::ExitCode;

use rany_ipc::demo::{self, DemoResult};
use rany_ipc::io;
use rany_ipc::kernel;

fn main() -> ExitCode {
    if let Err(e) = io::log::init() {
        eprintln!("logger init failed: {}", e);
    }
    log::info!("rany_ipc v{} - Booting...", env!("CARGO_PKG_VERSION"));

    let name = std::env::args().nth(1).unwrap_or_else(|| String::from("echo"));
    if name == "list" {
        demo::list_demos();
        return ExitCode::SUCCESS;
    }

    let kernel = kernel::global();
    match demo::run_demo(&kernel, &name) {
        DemoResult::Success => {
            log::info!("[OK] demo '{}' finished", name);
            ExitCode::SUCCESS
        }
        DemoResult::Error(e) => {
            log::error!("demo '{}' failed: {}", name, e);
            ExitCode::FAILURE
        }
    }
}
