// ============================================================================
// src/demo/mod.rs - Demo Applications
// ============================================================================

pub mod echo_server;

use std::sync::Arc;

use crate::kernel::Kernel;

/// Demo result
#[derive(Debug)]
pub enum DemoResult {
    Success,
    Error(String),
}

/// List available demos
pub fn list_demos() {
    log::info!("Available Demos:");
    log::info!("  1. echo_server  - socket echo server with client processes [Ready]");
}

/// Run demo by name
pub fn run_demo(kernel: &Arc<Kernel>, name: &str) -> DemoResult {
    match name {
        "echo" | "echo_server" => echo_server::run(kernel, echo_server::EchoConfig::default()),
        _ => DemoResult::Error(format!("Unknown demo: {}", name)),
    }
}
