//! # Task Management System
//!
//! Runs named task types on bounded pools of execution contexts and admits
//! execution requests under a global concurrency limit.
//!
//! ## Architecture Overview
//!
//! - `TaskManager`: Owns the registry of task types and the global FIFO queue
//! - `TaskTypeDefinition`: Per type work functions (or worker module URL),
//!   dependencies and the pool of contexts with its idle subset
//! - `ExecutionContext`: A thread backed or inline place work is posted to
//! - `TaskWorker`: The code running inside a context
//! - `Pending`: The future handed to callers of `init_task_type` and
//!   `enqueue_for_execution`
//!
//! ## Lifecycle
//! 1. A task type is registered with functions (`register_task_type`) or a
//!    worker module URL (`register_task_type_module`)
//! 2. `init_task_type` loads dependencies once, creates the contexts and posts
//!    `init` to each of them. The type is usable once every context answered
//!    with `initComplete`
//! 3. `enqueue_for_execution` queues a request and runs a dispatch cycle
//! 4. A context posts zero or more `intermediate` messages and then
//!    `execComplete` (or `error`). The request settles, the context becomes
//!    idle and the next dispatch cycle runs
//! 5. `dispose` terminates every context and rejects everything pending
//!
//! ## Dispatch
//! The queue is scanned front to back. An entry is dispatched when fewer than
//! `max_parallel_executions` requests are running and its type has an idle
//! context. Entries that cannot be dispatched keep their relative order.
//!
//! ## Platform Notes
//! - **Native**: every context is an OS thread
//! - **Web**: every context is a Web Worker spawned through `wasm_thread`
//! - **Fallback**: a single inline context runs work on the posting thread,
//!   so results are available before `enqueue_for_execution` returns
//!
//! ## Example Usage
//! ```ignore
//! let manager = TaskManager::new(TaskManagerConfig::default());
//! manager.register_task_type("echo", None, execute_fn(echo), None, false, Vec::new());
//! pollster::block_on(manager.init_task_type("echo", DataTransport::new(cmd::INIT, 0))?)?;
//!
//! let mut request = DataTransport::new(cmd::EXECUTE, 0);
//! request.set_param("value", 21)?;
//! let reply = pollster::block_on(manager.enqueue_for_execution("echo", request)?)?;
//! ```

pub mod context;
pub(crate) mod deferred;
pub mod pending;
pub mod task_type;
pub mod worker;

use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};

use log::{debug, info, warn};

use crate::{
    config::{TaskManagerConfig, DEFAULT_MAXIMUM_WORKER_COUNT},
    core::{MtResource, MtWeak},
    error::TaskError,
    transport::{cmd, Envelope, Transport},
};
use context::{create_context, ExecutionContext};
use deferred::Deferred;
use task_type::{InFlight, PendingInit, TaskTypeDefinition, TypeStatus, WorkerSource};

pub use context::{InlineContext, ThreadContext};
pub use pending::{pending, Pending, Resolver};
pub use task_type::{DependencyDescription, PoolSnapshot, ResolvedDependencies};
pub use worker::{
    com_routing_fn, execute_fn, init_fn, route_default, ComRoutingFunction, ContextOrigin,
    ExecuteFunction, FnWorker, InitFunction, IntermediateCallback, MessageSink, TaskWorker,
    WorkerFactory, WorkerFunctions, WorkerRuntime, WorkerScope,
};

/// An execution request waiting for an idle context.
struct StoredExecution {
    task_type: String,
    execution_id: u64,
    envelope: Envelope,
    resolver: Resolver<Envelope>,
    on_intermediate: Option<IntermediateCallback>,
}

/// Main side state shared with the message sink.
pub(crate) struct ManagerState {
    config: TaskManagerConfig,
    max_parallel_executions: usize,
    actual_execution_count: usize,
    task_types: HashMap<String, TaskTypeDefinition>,
    stored_executions: VecDeque<StoredExecution>,
    worker_modules: HashMap<String, WorkerFactory>,
    next_execution_id: u64,
}

/// Work decided under the lock and carried out without it.
struct InitPlan {
    task_type: String,
    generation: u64,
    count: usize,
    inline: bool,
    factory: WorkerFactory,
    dependencies: DependencyPlan,
}

/// Outcome of the locked first step of an initialization.
enum InitStart {
    /// Nothing to build, the result is already settled or attached
    Settled(Pending<()>),
    /// Contexts have to be built
    Build(InitPlan, Pending<()>),
}

enum DependencyPlan {
    Cached(Arc<ResolvedDependencies>),
    Load(Vec<DependencyDescription>),
}

/// Coordinates task types, their context pools and the execution queue.
///
/// All methods take `&self`; the manager can be shared between threads by
/// reference. Dropping the manager without [`dispose`](Self::dispose) stops
/// its contexts but leaves pending requests to resolve as
/// [`TaskError::Disposed`].
pub struct TaskManager {
    state: MtResource<ManagerState>,
    sink: Arc<dyn MessageSink>,
}

/// Routes messages posted by contexts back into the manager state.
struct ManagerSink {
    state: MtWeak<ManagerState>,
}

impl MessageSink for ManagerSink {
    fn receive(&self, origin: &ContextOrigin, envelope: Envelope) {
        let Some(state) = self.state.upgrade() else {
            return;
        };
        let mut deferred = Deferred::new();
        state.get_mut().handle_message(origin, envelope, &mut deferred);
        deferred.run();
    }
}

impl TaskManager {
    /// Creates a manager with no task types.
    pub fn new(config: TaskManagerConfig) -> Self {
        if config.logging_enabled() {
            info!(
                "Task manager created (max parallel executions: {}, worker ceiling: {}, fallback forced: {})",
                config.max_parallel_executions,
                config.effective_worker_ceiling(),
                config.force_fallback
            );
        }

        let state = MtResource::new(ManagerState {
            max_parallel_executions: config.max_parallel_executions.max(1),
            config,
            actual_execution_count: 0,
            task_types: HashMap::new(),
            stored_executions: VecDeque::new(),
            worker_modules: HashMap::new(),
            next_execution_id: 1,
        });
        let sink = Arc::new(ManagerSink {
            state: state.downgrade(),
        });

        Self { state, sink }
    }

    /// Registers a task type backed by functions.
    ///
    /// # Arguments
    /// * `task_type` - Unique name of the type
    /// * `init` - Optional per context initialization
    /// * `execute` - Per request work
    /// * `com_routing` - Optional replacement of the default message routing
    /// * `fallback` - Run on a single inline context instead of threads
    /// * `dependencies` - Fragments loaded once at initialization
    ///
    /// # Returns
    /// `false` if the type is already registered; nothing is changed then
    pub fn register_task_type(
        &self,
        task_type: &str,
        init: Option<InitFunction>,
        execute: ExecuteFunction,
        com_routing: Option<ComRoutingFunction>,
        fallback: bool,
        dependencies: Vec<DependencyDescription>,
    ) -> bool {
        let functions = WorkerFunctions {
            init,
            execute,
            com_routing,
        };
        self.register(
            task_type,
            fallback,
            WorkerSource::Functions(functions),
            dependencies,
        )
    }

    /// Registers a task type whose worker is looked up by URL at
    /// initialization, see [`register_worker_module`](Self::register_worker_module).
    ///
    /// # Returns
    /// `false` if the type is already registered
    pub fn register_task_type_module(&self, task_type: &str, worker_module_url: &str) -> bool {
        self.register(
            task_type,
            false,
            WorkerSource::Module(worker_module_url.to_string()),
            Vec::new(),
        )
    }

    fn register(
        &self,
        task_type: &str,
        fallback: bool,
        source: WorkerSource,
        dependencies: Vec<DependencyDescription>,
    ) -> bool {
        let mut state = self.state.get_mut();
        if state.task_types.contains_key(task_type) {
            if state.config.logging_enabled() {
                warn!("Task type `{}` is already registered", task_type);
            }
            return false;
        }

        let maximum_count =
            DEFAULT_MAXIMUM_WORKER_COUNT.min(state.config.effective_worker_ceiling());
        let definition =
            TaskTypeDefinition::new(task_type, fallback, source, dependencies, maximum_count);
        state.task_types.insert(task_type.to_string(), definition);

        if state.config.logging_enabled() {
            info!("Registered task type `{}` (fallback: {})", task_type, fallback);
        }
        true
    }

    /// Adds a statically linked worker entry point under `url`.
    ///
    /// Replaces an earlier module with the same URL.
    pub fn register_worker_module(
        &self,
        url: &str,
        factory: impl Fn() -> Box<dyn TaskWorker> + Send + Sync + 'static,
    ) {
        let mut state = self.state.get_mut();
        if state.config.logging_enabled() {
            info!("Registered worker module `{}`", url);
        }
        state.worker_modules.insert(url.to_string(), Arc::new(factory));
    }

    /// Sets the pool bound of a type that has not been initialized yet.
    ///
    /// The value is clamped into `1..=worker_ceiling`.
    ///
    /// # Returns
    /// `false` for unknown or already initialized types
    pub fn set_maximum_count(&self, task_type: &str, maximum_count: usize) -> bool {
        let mut state = self.state.get_mut();
        let ceiling = state.config.effective_worker_ceiling();
        match state.task_types.get_mut(task_type) {
            Some(definition) if definition.status == TypeStatus::Registered => {
                definition.workers.maximum_count = maximum_count.clamp(1, ceiling);
                true
            }
            _ => false,
        }
    }

    /// Creates the contexts of a task type and initializes them with `config`.
    ///
    /// Calling this for a type that is initialized, or being initialized,
    /// returns a future that settles together with the first call.
    ///
    /// # Errors
    /// [`TaskError::UnknownTaskType`] synchronously. The returned future
    /// rejects with [`TaskError::Initialization`] when a dependency fails to
    /// load, the worker module is unknown, a context cannot be created or a
    /// worker reports an error during `init`; the type is left uninitialized.
    pub fn init_task_type(
        &self,
        task_type: &str,
        config: impl Transport,
    ) -> Result<Pending<()>, TaskError> {
        let mut init = config.into_envelope()?;
        init.main.cmd = cmd::INIT.to_string();

        let (plan, pending) = match self.state.get_mut().plan_init(task_type)? {
            InitStart::Settled(pending) => return Ok(pending),
            InitStart::Build(plan, pending) => (plan, pending),
        };

        let built = Self::build_contexts(&plan, &self.sink);

        let mut deferred = Deferred::new();
        self.state
            .get_mut()
            .finish_init(plan, built, init, &mut deferred);
        deferred.run();
        Ok(pending)
    }

    /// Loads dependencies and creates the contexts. Runs without the lock
    /// since both call into user code.
    fn build_contexts(
        plan: &InitPlan,
        sink: &Arc<dyn MessageSink>,
    ) -> Result<(Arc<ResolvedDependencies>, Vec<Arc<dyn ExecutionContext>>), String> {
        let dependencies = match &plan.dependencies {
            DependencyPlan::Cached(resolved) => resolved.clone(),
            DependencyPlan::Load(descriptions) => Arc::new(
                ResolvedDependencies::load(descriptions).map_err(|(name, reason)| {
                    format!("dependency `{}` failed to load: {}", name, reason)
                })?,
            ),
        };

        let mut contexts = Vec::with_capacity(plan.count);
        for slot in 0..plan.count {
            let origin = ContextOrigin {
                task_type: plan.task_type.clone(),
                slot,
                generation: plan.generation,
            };
            match create_context(
                origin,
                plan.inline,
                (plan.factory)(),
                sink.clone(),
                dependencies.clone(),
            ) {
                Ok(context) => contexts.push(context),
                Err(err) => {
                    contexts.iter().for_each(|context| context.terminate());
                    return Err(err.to_string());
                }
            }
        }
        Ok((dependencies, contexts))
    }

    /// Queues one request for an initialized task type.
    ///
    /// The envelope's command and id are overwritten; its buffers are moved
    /// to the context.
    pub fn enqueue_for_execution(
        &self,
        task_type: &str,
        config: impl Transport,
    ) -> Result<Pending<Envelope>, TaskError> {
        self.enqueue_for_execution_with(task_type, config, None)
    }

    /// Like [`enqueue_for_execution`](Self::enqueue_for_execution), with a
    /// callback receiving every `intermediate` message of the request.
    ///
    /// The callback runs on whichever thread delivered the message, never
    /// while the manager is locked.
    pub fn enqueue_for_execution_with(
        &self,
        task_type: &str,
        config: impl Transport,
        on_intermediate: Option<IntermediateCallback>,
    ) -> Result<Pending<Envelope>, TaskError> {
        let mut envelope = config.into_envelope()?;
        let mut deferred = Deferred::new();

        let pending = {
            let mut state = self.state.get_mut();
            match state.task_types.get(task_type) {
                None => return Err(TaskError::UnknownTaskType(task_type.to_string())),
                Some(definition) if definition.status != TypeStatus::Initialized => {
                    return Err(TaskError::NotInitialized(task_type.to_string()))
                }
                Some(_) => {}
            }

            let execution_id = state.next_execution_id;
            state.next_execution_id += 1;
            envelope.main.cmd = cmd::EXECUTE.to_string();
            envelope.main.id = execution_id;

            let (resolver, pending) = pending();
            state.stored_executions.push_back(StoredExecution {
                task_type: task_type.to_string(),
                execution_id,
                envelope,
                resolver,
                on_intermediate,
            });
            if state.config.logging_debug() {
                debug!(
                    "Queued execution {} of `{}` ({} queued)",
                    execution_id,
                    task_type,
                    state.stored_executions.len()
                );
            }
            state.dispatch(&mut deferred);
            pending
        };

        deferred.run();
        Ok(pending)
    }

    /// Sets the global admission ceiling, never below one.
    ///
    /// Takes effect on the next dispatch cycle.
    pub fn set_max_parallel_executions(&self, max_parallel_executions: usize) {
        self.state.get_mut().max_parallel_executions = max_parallel_executions.max(1);
    }

    /// Terminates every context, rejects every queued and running request and
    /// every pending initialization with [`TaskError::Disposed`], and clears
    /// the registry. Calling it again does nothing.
    pub fn dispose(&self) -> &Self {
        let mut deferred = Deferred::new();
        {
            let mut state = self.state.get_mut();
            let logging = state.config.logging_enabled();

            for execution in state.stored_executions.drain(..) {
                deferred.notify(move || execution.resolver.reject(TaskError::Disposed));
            }

            for (task_type, definition) in state.task_types.drain() {
                for (_, in_flight) in definition.in_flight {
                    deferred.notify(move || in_flight.resolver.reject(TaskError::Disposed));
                }
                if let Some(init) = definition.pending_init {
                    for resolver in init.resolvers {
                        deferred.notify(move || resolver.reject(TaskError::Disposed));
                    }
                }
                for context in definition.workers.instances {
                    deferred.terminate(context);
                }
                if logging {
                    info!("Disposed task type `{}`", task_type);
                }
            }

            state.worker_modules.clear();
            state.actual_execution_count = 0;
        }
        deferred.run();
        self
    }

    /// Whether `task_type` is registered.
    pub fn is_task_type_registered(&self, task_type: &str) -> bool {
        self.state.get().task_types.contains_key(task_type)
    }

    /// Whether `task_type` finished initialization.
    pub fn is_task_type_initialized(&self, task_type: &str) -> bool {
        self.state
            .get()
            .task_types
            .get(task_type)
            .is_some_and(|definition| definition.status == TypeStatus::Initialized)
    }

    /// Pool counters of `task_type`.
    pub fn pool_snapshot(&self, task_type: &str) -> Option<PoolSnapshot> {
        self.state
            .get()
            .task_types
            .get(task_type)
            .map(TaskTypeDefinition::snapshot)
    }

    /// Requests currently assigned to a context.
    pub fn actual_execution_count(&self) -> usize {
        self.state.get().actual_execution_count
    }

    /// Requests waiting for a context.
    pub fn queued_execution_count(&self) -> usize {
        self.state.get().stored_executions.len()
    }

    /// The global admission ceiling.
    pub fn max_parallel_executions(&self) -> usize {
        self.state.get().max_parallel_executions
    }

    /// Whether task types without fallback get background contexts.
    pub fn supports_background_execution(&self) -> bool {
        !self.state.get().config.force_fallback
    }
}

impl ManagerState {
    /// Decides what an initialization call has to do and marks the type as
    /// initializing when contexts have to be built.
    fn plan_init(&mut self, task_type: &str) -> Result<InitStart, TaskError> {
        let force_fallback = self.config.force_fallback;
        let logging = self.config.logging_enabled();
        let definition = self
            .task_types
            .get_mut(task_type)
            .ok_or_else(|| TaskError::UnknownTaskType(task_type.to_string()))?;

        match definition.status {
            TypeStatus::Initialized => return Ok(InitStart::Settled(Pending::resolved(()))),
            TypeStatus::Initializing => {
                let (resolver, pending) = pending();
                match definition.pending_init.as_mut() {
                    Some(init) => init.resolvers.push(resolver),
                    None => resolver.resolve(()),
                }
                return Ok(InitStart::Settled(pending));
            }
            TypeStatus::Registered => {}
        }

        let factory: WorkerFactory = match &definition.source {
            WorkerSource::Functions(functions) => {
                let functions = functions.clone();
                Arc::new(move || Box::new(FnWorker::new(functions.clone())) as Box<dyn TaskWorker>)
            }
            WorkerSource::Module(url) => match self.worker_modules.get(url) {
                Some(factory) => factory.clone(),
                None => {
                    return Ok(InitStart::Settled(Pending::rejected(
                        TaskError::Initialization {
                            task_type: task_type.to_string(),
                            reason: format!("no worker module is registered for `{}`", url),
                        },
                    )));
                }
            },
        };

        let inline = definition.fallback || force_fallback;
        let count = if inline {
            1
        } else {
            definition.workers.maximum_count
        };
        let dependencies = match &definition.resolved_dependencies {
            Some(resolved) => DependencyPlan::Cached(resolved.clone()),
            None => DependencyPlan::Load(definition.dependencies.clone()),
        };

        let (resolver, pending) = pending();
        definition.status = TypeStatus::Initializing;
        definition.generation += 1;
        definition.pending_init = Some(PendingInit {
            remaining: count,
            resolvers: vec![resolver],
        });

        if logging {
            info!(
                "Initializing task type `{}` with {} {} context(s)",
                task_type,
                count,
                if inline { "inline" } else { "thread" }
            );
        }

        Ok(InitStart::Build(
            InitPlan {
                task_type: task_type.to_string(),
                generation: definition.generation,
                count,
                inline,
                factory,
                dependencies,
            },
            pending,
        ))
    }

    /// Installs built contexts and posts `init`, or fails the initialization.
    fn finish_init(
        &mut self,
        plan: InitPlan,
        built: Result<(Arc<ResolvedDependencies>, Vec<Arc<dyn ExecutionContext>>), String>,
        init: Envelope,
        deferred: &mut Deferred,
    ) {
        let definition = match self.task_types.get_mut(&plan.task_type) {
            Some(definition)
                if definition.generation == plan.generation
                    && definition.status == TypeStatus::Initializing =>
            {
                definition
            }
            _ => {
                if let Ok((_, contexts)) = built {
                    contexts.into_iter().for_each(|context| deferred.terminate(context));
                }
                return;
            }
        };

        match built {
            Ok((dependencies, contexts)) => {
                definition.resolved_dependencies = Some(dependencies);
                for (slot, context) in contexts.iter().enumerate() {
                    let mut message = init.clone();
                    message.main.id = slot as u64;
                    deferred.post(context.clone(), message);
                }
                definition.workers.instances = contexts;
            }
            Err(reason) => {
                warn!(
                    "Initialization of task type `{}` failed: {}",
                    plan.task_type, reason
                );
                fail_init(definition, &reason, deferred);
            }
        }
    }

    fn handle_message(&mut self, origin: &ContextOrigin, envelope: Envelope, deferred: &mut Deferred) {
        let logging = self.config.logging_enabled();
        let logging_debug = self.config.logging_debug();

        let Some(definition) = self.task_types.get_mut(&origin.task_type) else {
            if logging_debug {
                debug!("Dropping `{}` from unknown task type `{}`", envelope.cmd(), origin.task_type);
            }
            return;
        };
        if definition.generation != origin.generation {
            if logging_debug {
                debug!("Dropping stale `{}` from `{}`", envelope.cmd(), origin.task_type);
            }
            return;
        }

        if logging_debug {
            debug!(
                "Context {} of `{}` posted `{}` for id {}",
                origin.slot,
                origin.task_type,
                envelope.cmd(),
                envelope.id()
            );
        }

        let mut freed = false;
        let command = envelope.cmd().to_string();
        match command.as_str() {
            cmd::INIT_COMPLETE => {
                let Some(init) = definition.pending_init.as_mut() else {
                    return;
                };
                init.remaining = init.remaining.saturating_sub(1);
                let finished = init.remaining == 0;
                definition.release(origin.slot);

                if finished {
                    definition.status = TypeStatus::Initialized;
                    if let Some(init) = definition.pending_init.take() {
                        for resolver in init.resolvers {
                            deferred.notify(move || resolver.resolve(()));
                        }
                    }
                    if logging {
                        info!("Task type `{}` is initialized", origin.task_type);
                    }
                }
            }
            cmd::INTERMEDIATE => {
                if let Some(in_flight) = definition.in_flight.get(&origin.slot) {
                    if in_flight.execution_id == envelope.id() {
                        if let Some(callback) = in_flight.on_intermediate.clone() {
                            deferred.notify(move || callback(envelope));
                        }
                    }
                }
            }
            cmd::EXEC_COMPLETE => {
                if let Some(in_flight) = take_in_flight(definition, origin.slot, envelope.id()) {
                    if logging_debug {
                        debug!(
                            "Execution {} of `{}` completed in {:?}",
                            in_flight.execution_id,
                            origin.task_type,
                            in_flight.started.elapsed()
                        );
                    }
                    deferred.notify(move || in_flight.resolver.resolve(envelope));
                    definition.release(origin.slot);
                    freed = true;
                }
            }
            cmd::ERROR => {
                let message = envelope
                    .param("message")
                    .and_then(|value| value.as_str())
                    .unwrap_or("unknown error")
                    .to_string();

                if definition.status == TypeStatus::Initializing {
                    warn!(
                        "Context {} of `{}` failed during initialization: {}",
                        origin.slot, origin.task_type, message
                    );
                    fail_init(definition, &message, deferred);
                } else if let Some(in_flight) =
                    take_in_flight(definition, origin.slot, envelope.id())
                {
                    warn!(
                        "Execution {} of `{}` failed: {}",
                        in_flight.execution_id, origin.task_type, message
                    );
                    let task_type = origin.task_type.clone();
                    deferred.notify(move || {
                        in_flight
                            .resolver
                            .reject(TaskError::Execution { task_type, message })
                    });
                    definition.release(origin.slot);
                    freed = true;
                }
            }
            other => {
                if logging_debug {
                    debug!("Ignoring `{}` from `{}`", other, origin.task_type);
                }
            }
        }

        if freed {
            self.actual_execution_count = self.actual_execution_count.saturating_sub(1);
            self.dispatch(deferred);
        }
    }

    /// One dispatch cycle over the queue.
    fn dispatch(&mut self, deferred: &mut Deferred) {
        let mut remaining = VecDeque::with_capacity(self.stored_executions.len());

        while let Some(execution) = self.stored_executions.pop_front() {
            if self.actual_execution_count >= self.max_parallel_executions {
                remaining.push_back(execution);
                remaining.extend(self.stored_executions.drain(..));
                break;
            }

            let Some(definition) = self.task_types.get_mut(&execution.task_type) else {
                let task_type = execution.task_type;
                deferred.notify(move || {
                    execution
                        .resolver
                        .reject(TaskError::UnknownTaskType(task_type))
                });
                continue;
            };

            match definition.take_available() {
                Some((slot, context)) => {
                    if self.config.logging_debug() {
                        debug!(
                            "Dispatching execution {} of `{}` to context {}",
                            execution.execution_id, execution.task_type, slot
                        );
                    }
                    definition.in_flight.insert(
                        slot,
                        InFlight {
                            execution_id: execution.execution_id,
                            resolver: execution.resolver,
                            on_intermediate: execution.on_intermediate,
                            started: web_time::Instant::now(),
                        },
                    );
                    self.actual_execution_count += 1;
                    deferred.post(context, execution.envelope);
                }
                None => remaining.push_back(execution),
            }
        }

        self.stored_executions = remaining;
    }
}

fn take_in_flight(
    definition: &mut TaskTypeDefinition,
    slot: usize,
    execution_id: u64,
) -> Option<InFlight> {
    match definition.in_flight.get(&slot) {
        Some(in_flight) if in_flight.execution_id == execution_id => {
            definition.in_flight.remove(&slot)
        }
        Some(in_flight) => {
            warn!(
                "Context {} of `{}` answered id {} while running {}",
                slot, definition.task_type, execution_id, in_flight.execution_id
            );
            None
        }
        None => None,
    }
}

/// Rejects a pending initialization and returns the type to `Registered`.
fn fail_init(definition: &mut TaskTypeDefinition, reason: &str, deferred: &mut Deferred) {
    for context in definition.reset_pool() {
        deferred.terminate(context);
    }
    if let Some(init) = definition.pending_init.take() {
        for resolver in init.resolvers {
            let error = TaskError::Initialization {
                task_type: definition.task_type.clone(),
                reason: reason.to_string(),
            };
            deferred.notify(move || resolver.reject(error));
        }
    }
}
