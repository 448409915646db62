//! # Error Types
//!
//! Errors are split by the layer that raises them:
//!
//! * [`TransportError`] - envelope encoding/decoding and material resolution
//! * [`TaskError`] - registration, initialization and execution of task types
//! * [`DirectorError`] - admission into the multi-pool director
//!
//! Registration problems are always returned synchronously from the call that
//! caused them. Initialization and execution problems arrive through the
//! [`Pending`](crate::task_management::Pending) future of the affected call.

use thiserror::Error;

use crate::transport::ElementKind;

/// Errors raised while packaging, decoding or reconstructing envelopes.
#[derive(Debug, Error)]
pub enum TransportError {
    /// A buffer length is not a multiple of the fixed stride of its attribute.
    #[error("attribute `{name}` holds {len} elements, which is not a multiple of its stride {stride}")]
    StrideMismatch {
        /// Attribute name
        name: String,
        /// Number of elements in the buffer
        len: usize,
        /// Expected element stride
        stride: usize,
    },

    /// `main.buffers` points at a transferable slot that was not sent.
    #[error("buffer `{name}` references transferable slot {slot}, but only {available} were sent")]
    MissingTransferable {
        /// Buffer name
        name: String,
        /// Referenced slot
        slot: usize,
        /// Number of transferables received
        available: usize,
    },

    /// An index buffer holds floating point values.
    #[error("index buffers must hold unsigned integers, got {0:?}")]
    InvalidIndexKind(ElementKind),

    /// The envelope carries a different type discriminator than expected.
    #[error("expected a `{expected}` envelope, received `{found}`")]
    UnexpectedType {
        /// Expected discriminator
        expected: String,
        /// Received discriminator
        found: String,
    },

    /// A required parameter is absent from `main.params`.
    #[error("envelope parameter `{0}` is missing")]
    MissingParam(String),

    /// A material referenced by name is not known to the material cache.
    #[error("material `{0}` is not present in the material cache")]
    UnknownMaterial(String),

    /// The progress value is not a finite number.
    #[error("progress must be a finite number, got {0}")]
    InvalidProgress(f32),

    /// The JSON-safe part of an envelope could not be (de)serialized.
    #[error("failed to (de)serialize envelope: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised by the task manager and by worker code.
#[derive(Debug, Error)]
pub enum TaskError {
    /// The task type was never registered.
    #[error("task type `{0}` is not registered")]
    UnknownTaskType(String),

    /// The task type is registered but its pool has not finished initializing.
    #[error("task type `{0}` is not initialized")]
    NotInitialized(String),

    /// Dependency resolution, worker lookup, context spawning or worker
    /// initialization failed.
    #[error("initialization of task type `{task_type}` failed: {reason}")]
    Initialization {
        /// Affected task type
        task_type: String,
        /// Human readable cause
        reason: String,
    },

    /// An execution context reported an error for one invocation.
    #[error("execution of task type `{task_type}` failed: {message}")]
    Execution {
        /// Affected task type
        task_type: String,
        /// Message posted by the execution context
        message: String,
    },

    /// Raised by worker code to abort the current message.
    #[error("{0}")]
    Worker(String),

    /// The owning manager or director was disposed before completion.
    #[error("the task manager was disposed before the request completed")]
    Disposed,

    /// An envelope could not be encoded or decoded.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl TaskError {
    /// Convenience constructor for errors raised inside worker functions.
    pub fn worker(message: impl Into<String>) -> Self {
        TaskError::Worker(message.into())
    }
}

/// Errors raised synchronously by the worker-pool director.
#[derive(Debug, Error)]
pub enum DirectorError {
    /// No pool was registered under this name.
    #[error("no worker pool is registered for `{0}`")]
    UnknownPool(String),

    /// A pool with this name already exists.
    #[error("a worker pool is already registered for `{0}`")]
    DuplicatePool(String),

    /// The pool's instruction queue reached its configured ceiling.
    #[error("instruction queue of pool `{pool}` is full ({capacity} queued)")]
    QueueFull {
        /// Pool name
        pool: String,
        /// Configured ceiling
        capacity: usize,
    },

    /// The run instruction could not be packaged.
    #[error(transparent)]
    Transport(#[from] TransportError),
}
