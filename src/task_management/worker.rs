//! # Worker Side
//!
//! Code that runs inside an execution context.
//!
//! A [`TaskWorker`] receives every message posted to its context through
//! [`TaskWorker::com_routing`]. The default routing answers the protocol:
//!
//! ```text
//! init     ──► TaskWorker::init     ──► initComplete
//! execute  ──► TaskWorker::execute  ──► intermediate* , execComplete
//! ```
//!
//! Workers post back through the [`WorkerScope`] handed to every call. A
//! returned `Err` or a panic is turned into an `error` message by the
//! [`WorkerRuntime`], so one failing message never takes the context down.

use std::{
    any::Any,
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use log::warn;

use super::task_type::ResolvedDependencies;
use crate::{
    error::TaskError,
    transport::{cmd, DataTransport, Envelope, Transport},
};

/// Identifies the context a message was posted from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContextOrigin {
    /// Task type (or director pool) owning the context
    pub task_type: String,
    /// Index of the context inside its pool
    pub slot: usize,
    /// Pool generation the context was created for
    pub generation: u64,
}

/// Receives messages posted by a worker.
pub trait MessageSink: Send + Sync {
    /// Handles one message from the context identified by `origin`.
    fn receive(&self, origin: &ContextOrigin, envelope: Envelope);
}

/// Receives the `intermediate` messages of one invocation.
pub type IntermediateCallback = Arc<dyn Fn(Envelope) + Send + Sync>;

/// The worker's view of its execution context.
pub struct WorkerScope {
    origin: ContextOrigin,
    sink: Arc<dyn MessageSink>,
    dependencies: Arc<ResolvedDependencies>,
    init_config: Option<DataTransport>,
}

impl WorkerScope {
    /// Creates a scope posting to `sink`.
    pub fn new(
        origin: ContextOrigin,
        sink: Arc<dyn MessageSink>,
        dependencies: Arc<ResolvedDependencies>,
    ) -> Self {
        Self {
            origin,
            sink,
            dependencies,
            init_config: None,
        }
    }

    /// Posts a packaged envelope to the owning side.
    pub fn post_message(&self, envelope: Envelope) {
        self.sink.receive(&self.origin, envelope);
    }

    /// Packages and posts any envelope layer.
    pub fn post(&self, transport: impl Transport) -> Result<(), TaskError> {
        self.post_message(transport.into_envelope()?);
        Ok(())
    }

    /// Posts an `error` message for invocation `id`.
    pub fn post_error(&self, id: u64, message: &str) {
        let mut error = DataTransport::new(cmd::ERROR, id);
        if let Err(err) = error.set_param("message", message) {
            warn!("Failed to encode error message: {}", err);
            return;
        }
        if let Err(err) = self.post(error) {
            warn!("Failed to post error message: {}", err);
        }
    }

    /// Index of this context inside its pool.
    pub fn worker_id(&self) -> usize {
        self.origin.slot
    }

    /// Task type the context belongs to.
    pub fn task_type(&self) -> &str {
        &self.origin.task_type
    }

    /// Dependency fragments loaded for the task type.
    pub fn dependencies(&self) -> &ResolvedDependencies {
        &self.dependencies
    }

    /// Configuration received with the last `init` message.
    pub fn init_config(&self) -> Option<&DataTransport> {
        self.init_config.as_ref()
    }
}

/// Work running inside an execution context.
pub trait TaskWorker: Send {
    /// Prepares the worker. Called once per context before any execution.
    ///
    /// # Arguments
    /// * `scope` - Posting handle of the context
    /// * `id` - Worker id assigned by the owner
    /// * `config` - Configuration passed to the initialization call
    fn init(
        &mut self,
        _scope: &mut WorkerScope,
        _id: u64,
        _config: &DataTransport,
    ) -> Result<(), TaskError> {
        Ok(())
    }

    /// Runs one invocation.
    ///
    /// Must post an `execComplete` message carrying `id` when done, and may
    /// post `intermediate` messages before that.
    fn execute(
        &mut self,
        scope: &mut WorkerScope,
        id: u64,
        config: DataTransport,
    ) -> Result<(), TaskError>;

    /// Entry point for every message posted to the context.
    fn com_routing(&mut self, scope: &mut WorkerScope, envelope: Envelope) -> Result<(), TaskError> {
        route_default(self, scope, envelope)
    }
}

/// Protocol routing shared by every worker.
///
/// `init` calls [`TaskWorker::init`] and answers with `initComplete`;
/// `execute` calls [`TaskWorker::execute`]. Other commands are ignored.
pub fn route_default<W: TaskWorker + ?Sized>(
    worker: &mut W,
    scope: &mut WorkerScope,
    envelope: Envelope,
) -> Result<(), TaskError> {
    let id = envelope.id();
    let command = envelope.cmd().to_string();
    match command.as_str() {
        cmd::INIT => {
            let config = DataTransport::from_envelope(envelope)?;
            worker.init(scope, id, &config)?;
            scope.init_config = Some(config);
            scope.post_message(Envelope::command(cmd::INIT_COMPLETE, id));
            Ok(())
        }
        cmd::EXECUTE => {
            let config = DataTransport::from_envelope(envelope)?;
            worker.execute(scope, id, config)
        }
        other => {
            warn!(
                "Worker of `{}` ignores unknown command `{}`",
                scope.task_type(),
                other
            );
            Ok(())
        }
    }
}

/// Initialization function of a function-backed worker.
pub type InitFunction =
    Arc<dyn Fn(&mut WorkerScope, u64, &DataTransport) -> Result<(), TaskError> + Send + Sync>;

/// Execution function of a function-backed worker.
pub type ExecuteFunction =
    Arc<dyn Fn(&mut WorkerScope, u64, DataTransport) -> Result<(), TaskError> + Send + Sync>;

/// Message routing function replacing [`route_default`].
pub type ComRoutingFunction =
    Arc<dyn Fn(&mut WorkerScope, Envelope) -> Result<(), TaskError> + Send + Sync>;

/// Creates a fresh worker instance for one context.
pub type WorkerFactory = Arc<dyn Fn() -> Box<dyn TaskWorker> + Send + Sync>;

/// Wraps a closure as an [`InitFunction`].
pub fn init_fn<F>(f: F) -> InitFunction
where
    F: Fn(&mut WorkerScope, u64, &DataTransport) -> Result<(), TaskError> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Wraps a closure as an [`ExecuteFunction`].
pub fn execute_fn<F>(f: F) -> ExecuteFunction
where
    F: Fn(&mut WorkerScope, u64, DataTransport) -> Result<(), TaskError> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Wraps a closure as a [`ComRoutingFunction`].
pub fn com_routing_fn<F>(f: F) -> ComRoutingFunction
where
    F: Fn(&mut WorkerScope, Envelope) -> Result<(), TaskError> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// The functions of a task type registered in inline mode.
#[derive(Clone)]
pub struct WorkerFunctions {
    /// Optional initialization
    pub init: Option<InitFunction>,
    /// Execution
    pub execute: ExecuteFunction,
    /// Optional custom routing
    pub com_routing: Option<ComRoutingFunction>,
}

impl WorkerFunctions {
    /// Functions with only an execution function.
    pub fn new(execute: ExecuteFunction) -> Self {
        Self {
            init: None,
            execute,
            com_routing: None,
        }
    }

    /// Adds an initialization function.
    pub fn with_init(mut self, init: InitFunction) -> Self {
        self.init = Some(init);
        self
    }

    /// Adds a routing function.
    pub fn with_com_routing(mut self, com_routing: ComRoutingFunction) -> Self {
        self.com_routing = Some(com_routing);
        self
    }
}

impl fmt::Debug for WorkerFunctions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerFunctions")
            .field("init", &self.init.is_some())
            .field("com_routing", &self.com_routing.is_some())
            .finish_non_exhaustive()
    }
}

/// A [`TaskWorker`] backed by [`WorkerFunctions`].
pub struct FnWorker {
    functions: WorkerFunctions,
}

impl FnWorker {
    /// Creates the worker.
    pub fn new(functions: WorkerFunctions) -> Self {
        Self { functions }
    }
}

impl TaskWorker for FnWorker {
    fn init(
        &mut self,
        scope: &mut WorkerScope,
        id: u64,
        config: &DataTransport,
    ) -> Result<(), TaskError> {
        match &self.functions.init {
            Some(init) => init(scope, id, config),
            None => Ok(()),
        }
    }

    fn execute(
        &mut self,
        scope: &mut WorkerScope,
        id: u64,
        config: DataTransport,
    ) -> Result<(), TaskError> {
        (self.functions.execute)(scope, id, config)
    }

    fn com_routing(&mut self, scope: &mut WorkerScope, envelope: Envelope) -> Result<(), TaskError> {
        match self.functions.com_routing.clone() {
            Some(routing) => routing(scope, envelope),
            None => route_default(self, scope, envelope),
        }
    }
}

/// A worker together with its scope, driven by an execution context.
pub struct WorkerRuntime {
    worker: Box<dyn TaskWorker>,
    scope: WorkerScope,
}

impl WorkerRuntime {
    /// Creates the runtime.
    pub fn new(worker: Box<dyn TaskWorker>, scope: WorkerScope) -> Self {
        Self { worker, scope }
    }

    /// Routes one message to the worker.
    ///
    /// Errors and panics are reported as an `error` message carrying the id of
    /// the failing message.
    pub fn handle(&mut self, envelope: Envelope) {
        let id = envelope.id();
        let worker = &mut self.worker;
        let scope = &mut self.scope;

        let message = match panic::catch_unwind(AssertUnwindSafe(|| {
            worker.com_routing(scope, envelope)
        })) {
            Ok(Ok(())) => return,
            Ok(Err(err)) => err.to_string(),
            Err(payload) => panic_message(payload),
        };

        warn!(
            "Worker {} of `{}` failed on message {}: {}",
            self.scope.worker_id(),
            self.scope.task_type(),
            id,
            message
        );
        self.scope.post_error(id, &message);
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "worker panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        messages: Mutex<Vec<Envelope>>,
    }

    impl MessageSink for Recorder {
        fn receive(&self, _origin: &ContextOrigin, envelope: Envelope) {
            self.messages.lock().unwrap().push(envelope);
        }
    }

    fn runtime(functions: WorkerFunctions) -> (WorkerRuntime, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let scope = WorkerScope::new(
            ContextOrigin {
                task_type: "test".into(),
                slot: 0,
                generation: 1,
            },
            recorder.clone(),
            Arc::default(),
        );
        (
            WorkerRuntime::new(Box::new(FnWorker::new(functions)), scope),
            recorder,
        )
    }

    fn doubler() -> ExecuteFunction {
        execute_fn(|scope, id, config| {
            let value: i64 = config.param_as("value")?;
            let mut reply = DataTransport::new(cmd::EXEC_COMPLETE, id);
            reply.set_param("value", value * 2)?;
            scope.post(reply)
        })
    }

    #[test]
    fn init_is_answered_with_init_complete() {
        let (mut runtime, recorder) = runtime(WorkerFunctions::new(doubler()));
        runtime.handle(Envelope::command(cmd::INIT, 3));

        let messages = recorder.messages.lock().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].cmd(), cmd::INIT_COMPLETE);
        assert_eq!(messages[0].id(), 3);
    }

    #[test]
    fn execute_reaches_the_function() {
        let (mut runtime, recorder) = runtime(WorkerFunctions::new(doubler()));
        let mut config = DataTransport::new(cmd::EXECUTE, 8);
        config.set_param("value", 21).unwrap();
        runtime.handle(config.into_envelope().unwrap());

        let messages = recorder.messages.lock().unwrap();
        assert_eq!(messages[0].cmd(), cmd::EXEC_COMPLETE);
        assert_eq!(messages[0].param("value"), Some(&serde_json::json!(42)));
    }

    #[test]
    fn returned_error_becomes_error_message() {
        let (mut runtime, recorder) = runtime(WorkerFunctions::new(doubler()));
        runtime.handle(Envelope::command(cmd::EXECUTE, 5));

        let messages = recorder.messages.lock().unwrap();
        assert_eq!(messages[0].cmd(), cmd::ERROR);
        assert_eq!(messages[0].id(), 5);
        assert!(messages[0].param("message").is_some());
    }

    #[test]
    fn panic_becomes_error_message() {
        let functions = WorkerFunctions::new(execute_fn(|_, _, _| panic!("exploded")));
        let (mut runtime, recorder) = runtime(functions);
        runtime.handle(Envelope::command(cmd::EXECUTE, 2));
        runtime.handle(Envelope::command(cmd::INIT, 0));

        let messages = recorder.messages.lock().unwrap();
        assert_eq!(messages[0].param("message"), Some(&serde_json::json!("exploded")));
        assert_eq!(messages[1].cmd(), cmd::INIT_COMPLETE);
    }

    #[test]
    fn init_function_sees_config() {
        let functions = WorkerFunctions::new(doubler()).with_init(init_fn(|scope, _, config| {
            assert_eq!(scope.task_type(), "test");
            if config.param("fail").is_some() {
                return Err(TaskError::worker("refused"));
            }
            Ok(())
        }));
        let (mut runtime, recorder) = runtime(functions);

        let mut config = DataTransport::new(cmd::INIT, 0);
        config.set_param("fail", true).unwrap();
        runtime.handle(config.into_envelope().unwrap());

        let messages = recorder.messages.lock().unwrap();
        assert_eq!(messages[0].cmd(), cmd::ERROR);
        assert_eq!(messages[0].param("message"), Some(&serde_json::json!("refused")));
    }

    #[test]
    fn custom_routing_replaces_default() {
        let functions = WorkerFunctions::new(doubler()).with_com_routing(com_routing_fn(
            |scope, envelope| {
                scope.post_message(Envelope::command("pong", envelope.id()));
                Ok(())
            },
        ));
        let (mut runtime, recorder) = runtime(functions);
        runtime.handle(Envelope::command("ping", 4));

        assert_eq!(recorder.messages.lock().unwrap()[0].cmd(), "pong");
    }
}
