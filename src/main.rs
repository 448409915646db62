//! # Worker Task Engine Entry Point
//!
//! Native entry point. Calls into the library's `run()` function, which runs
//! the demo workload on background threads.
//!
//! For web applications, see the `run_web()` function in the library.
//!
//! ## Usage
//!
//! ```bash
//! RUST_LOG=info cargo run --release
//! ```

fn main() {
    #[cfg(not(target_family = "wasm"))]
    worker_task_engine::run();
}
