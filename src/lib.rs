#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![warn(rustdoc::invalid_rust_codeblocks)]

//! # Worker Task Engine
//!
//! Offloads CPU-bound parsing and mesh building from the calling thread onto
//! bounded pools of background execution contexts, and moves large numeric
//! buffers across that boundary without copying them.
//!
//! ## Key Modules
//!
//! * `task_management` - Task type registry, context pools, global admission
//!   and the worker side protocol
//! * `transport` - Layered message envelopes (data, geometry, materials, mesh)
//! * `director` - Multi-pool orchestration with bounded per pool queues
//! * `config` - Serde configuration of the manager and the director
//! * `core` - Shared state primitives
//!
//! ## Architecture
//!
//! The engine separates:
//! * Coordination on the calling side (`TaskManager`, `WorkerPoolDirector`)
//! * Execution contexts (threads natively, Web Workers on wasm, or inline)
//! * The wire format every message uses (`Envelope`)
//!
//! ## Usage
//!
//! ```ignore
//! fn main() {
//!     worker_task_engine::run();
//! }
//! ```
//!
//! For web applications:
//!
//! ```ignore
//! // Called from JavaScript
//! #[wasm_bindgen]
//! pub fn start() {
//!     worker_task_engine::run_web();
//! }
//! ```

#[cfg(target_family = "wasm")]
use wasm_bindgen::prelude::wasm_bindgen;

use log::{error, info};

pub mod config;
pub mod core;
pub mod demo;
pub mod director;
pub mod error;
pub mod task_management;
pub mod transport;

pub use config::{DirectorConfig, LoggingConfig, TaskManagerConfig};
pub use director::{PoolDefinition, PoolState, RunInstruction, WorkerPoolDirector};
pub use error::{DirectorError, TaskError, TransportError};
pub use task_management::{Pending, TaskManager};

/// Runs the demo workload natively, logging to stdout.
///
/// The log level is read from `RUST_LOG`.
#[cfg(not(target_family = "wasm"))]
pub fn run() {
    let mut log_builder = env_logger::Builder::new();
    log_builder
        .target(env_logger::Target::Stdout)
        .parse_env("RUST_LOG")
        .init();

    info!("Logger initialized");
    run_demo(false);
}

/// Runs the demo workload in the browser, logging to the console.
///
/// Web Workers cannot be waited on from the main thread, so every pool runs
/// inline.
#[cfg(target_family = "wasm")]
#[wasm_bindgen]
pub fn run_web() {
    std::panic::set_hook(Box::new(console_error_panic_hook::hook));
    console_log::init_with_level(log::Level::Info).expect("Couldn't initialize logger");

    info!("Logger initialized");
    run_demo(true);
}

fn run_demo(force_fallback: bool) {
    match demo::run_demo(force_fallback) {
        Ok(report) => info!(
            "Demo finished: echo returned {}, {} mesh(es) with {} vertices parsed",
            report.echo_value, report.mesh_count, report.vertex_count
        ),
        Err(err) => error!("Demo failed: {}", err),
    }
}
