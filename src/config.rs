//! # Configuration
//!
//! Serde-backed configuration for the [`TaskManager`](crate::TaskManager) and
//! the [`WorkerPoolDirector`](crate::WorkerPoolDirector).
//!
//! Every field has a default, so a partial JSON document is enough:
//!
//! ```ignore
//! let config = TaskManagerConfig::from_json_str(r#"{ "maxParallelExecutions": 2 }"#)?;
//! assert_eq!(config.max_parallel_executions, 2);
//! ```
//!
//! The logging flags only control diagnostic output. They never change
//! scheduling behavior.

use serde::{Deserialize, Serialize};

/// Default global admission ceiling of the task manager.
pub const DEFAULT_MAX_PARALLEL_EXECUTIONS: usize = 4;

/// Default number of contexts created for a task type.
pub const DEFAULT_MAXIMUM_WORKER_COUNT: usize = 4;

/// Default ceiling on the number of workers a single director pool may own.
pub const MAX_WEB_WORKER: usize = 16;

/// Default ceiling on the number of instructions waiting in a director pool.
pub const MAX_QUEUE_SIZE: usize = 2048;

/// Diagnostic output switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LoggingConfig {
    /// Emit lifecycle information (registration, pool creation, disposal).
    pub enabled: bool,
    /// Additionally emit per-message routing details.
    pub debug: bool,
}

/// Configuration of a [`TaskManager`](crate::TaskManager).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TaskManagerConfig {
    /// Global number of invocations that may be dispatched at the same time.
    pub max_parallel_executions: usize,
    /// Upper bound on contexts per task type. `None` uses the platform
    /// parallelism.
    pub worker_ceiling: Option<usize>,
    /// Run every task type inline, even those registered without fallback.
    pub force_fallback: bool,
    /// Legacy single switch, equivalent to `logging.enabled`.
    pub verbose: bool,
    /// Diagnostic output switches.
    pub logging: LoggingConfig,
}

impl Default for TaskManagerConfig {
    fn default() -> Self {
        Self {
            max_parallel_executions: DEFAULT_MAX_PARALLEL_EXECUTIONS,
            worker_ceiling: None,
            force_fallback: false,
            verbose: false,
            logging: LoggingConfig::default(),
        }
    }
}

impl TaskManagerConfig {
    /// Parses a configuration from JSON, filling absent fields with defaults.
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Whether lifecycle logging is enabled.
    pub fn logging_enabled(&self) -> bool {
        self.verbose || self.logging.enabled
    }

    /// Whether per-message logging is enabled.
    pub fn logging_debug(&self) -> bool {
        self.logging_enabled() && self.logging.debug
    }

    /// The effective per-type context ceiling, never below one.
    pub fn effective_worker_ceiling(&self) -> usize {
        self.worker_ceiling
            .unwrap_or_else(platform_parallelism)
            .max(1)
    }
}

/// Configuration of a [`WorkerPoolDirector`](crate::WorkerPoolDirector).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DirectorConfig {
    /// Ceiling applied on top of every pool's own worker maximum.
    pub max_web_worker: usize,
    /// Ceiling on queued (not yet dispatched) instructions per pool. Values
    /// below one are treated as one.
    pub max_queue_size: usize,
    /// Run every pool inline.
    pub force_fallback: bool,
    /// Diagnostic output switches.
    pub logging: LoggingConfig,
}

impl Default for DirectorConfig {
    fn default() -> Self {
        Self {
            max_web_worker: MAX_WEB_WORKER,
            max_queue_size: MAX_QUEUE_SIZE,
            force_fallback: false,
            logging: LoggingConfig::default(),
        }
    }
}

impl DirectorConfig {
    /// Parses a configuration from JSON, filling absent fields with defaults.
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

cfg_if::cfg_if! {
    if #[cfg(target_family = "wasm")] {
        /// Browsers do not expose a reliable core count to wasm threads.
        pub fn platform_parallelism() -> usize {
            4
        }
    } else {
        /// Number of hardware threads reported by the operating system.
        pub fn platform_parallelism() -> usize {
            std::thread::available_parallelism()
                .map(|count| count.get())
                .unwrap_or(1)
        }
    }
}
