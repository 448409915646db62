//! # Worker-Pool Director
//!
//! Runs several named pools side by side, each with its own bounded
//! instruction queue and its own lazily grown set of workers.
//!
//! ## Pool Lifecycle
//! ```text
//! Idle ──enqueue──► Running ──queue empty──► Draining ──last completion──► TornDown
//!                      ▲                                                      │
//!                      └──────────────────────enqueue─────────────────────────┘
//! ```
//!
//! A pool that reaches `TornDown` terminates its workers and drops its queue;
//! its definition stays registered. When the last active pool tears down, the
//! director's queue-complete callback fires exactly once.
//!
//! ## Limits
//! - Workers per pool: `min(pool max_workers, max_web_worker)`, one for
//!   fallback pools
//! - Queued instructions per pool: `max_queue_size`, at least one. Enqueueing
//!   beyond it fails with [`DirectorError::QueueFull`]
//!
//! Every new worker receives `init` (id `0`, the pool's init configuration)
//! and gets its first `execute` only after answering with `initComplete`. A
//! worker answering `init` with `error` is terminated; once a pool has no
//! worker left its queued runs reject with [`TaskError::Initialization`].
//! Run ids start at `1`.

pub mod pool;

use std::{collections::HashMap, sync::Arc};

use log::{debug, error, info, warn};

use crate::{
    config::DirectorConfig,
    core::{MtResource, MtWeak},
    error::{DirectorError, TaskError},
    task_management::{
        context::{create_context, ExecutionContext},
        deferred::Deferred,
        pending, ContextOrigin, MessageSink, Pending, WorkerFactory,
    },
    transport::{cmd, Envelope, Transport},
};
use pool::{ActivePool, PoolEntry, QueuedRun};

pub use pool::{PoolDefinition, PoolState, RunInstruction};

/// Called when no pool has work left.
pub type QueueCompleteCallback = Arc<dyn Fn() + Send + Sync>;

pub(crate) struct DirectorState {
    config: DirectorConfig,
    entries: HashMap<String, PoolEntry>,
    on_queue_complete: Option<QueueCompleteCallback>,
    next_run_id: u64,
}

/// Workers to create for one pool, decided under the lock.
struct Growth {
    pool: String,
    generation: u64,
    slots: Vec<usize>,
    inline: bool,
    factory: WorkerFactory,
    init: Envelope,
}

/// Orchestrates multiple worker pools.
pub struct WorkerPoolDirector {
    state: MtResource<DirectorState>,
    sink: Arc<dyn MessageSink>,
}

struct DirectorSink {
    state: MtWeak<DirectorState>,
}

impl MessageSink for DirectorSink {
    fn receive(&self, origin: &ContextOrigin, envelope: Envelope) {
        let Some(state) = self.state.upgrade() else {
            return;
        };
        let mut deferred = Deferred::new();
        state.get_mut().handle_message(origin, envelope, &mut deferred);
        deferred.run();
    }
}

impl WorkerPoolDirector {
    /// Creates a director without pools.
    pub fn new(config: DirectorConfig) -> Self {
        let state = MtResource::new(DirectorState {
            config,
            entries: HashMap::new(),
            on_queue_complete: None,
            next_run_id: 1,
        });
        let sink = Arc::new(DirectorSink {
            state: state.downgrade(),
        });
        Self { state, sink }
    }

    /// Registers a pool under `name`.
    pub fn register_pool(&self, name: &str, definition: PoolDefinition) -> Result<(), DirectorError> {
        let mut state = self.state.get_mut();
        if state.entries.contains_key(name) {
            return Err(DirectorError::DuplicatePool(name.to_string()));
        }
        if state.config.logging.enabled {
            info!(
                "Registered pool `{}` (max workers: {}, fallback: {})",
                name, definition.max_workers, definition.fallback
            );
        }
        state
            .entries
            .insert(name.to_string(), PoolEntry::new(definition));
        Ok(())
    }

    /// Sets the callback fired when the last active pool tears down.
    pub fn set_on_queue_complete(&self, callback: impl Fn() + Send + Sync + 'static) {
        self.state.get_mut().on_queue_complete = Some(Arc::new(callback));
    }

    /// Queues one instruction, creating workers as needed.
    ///
    /// # Errors
    /// [`DirectorError::UnknownPool`] and [`DirectorError::QueueFull`]
    /// synchronously. The returned future rejects with
    /// [`TaskError::Execution`] when the worker reports an error and with
    /// [`TaskError::Disposed`] on [`tear_down`](Self::tear_down).
    pub fn enqueue_for_run(
        &self,
        pool: &str,
        instruction: RunInstruction,
    ) -> Result<Pending<Envelope>, DirectorError> {
        let mut deferred = Deferred::new();
        let (pending, growth) = self
            .state
            .get_mut()
            .admit(pool, instruction, &mut deferred)?;

        if let Some(growth) = growth {
            let built = self.build_workers(&growth);
            self.state
                .get_mut()
                .install_workers(growth, built, &mut deferred);
        }

        deferred.run();
        Ok(pending)
    }

    /// Creates the reserved workers. Runs without the lock since worker
    /// factories are user code.
    fn build_workers(
        &self,
        growth: &Growth,
    ) -> Vec<(usize, Result<Arc<dyn ExecutionContext>, TaskError>)> {
        growth
            .slots
            .iter()
            .map(|&slot| {
                let origin = ContextOrigin {
                    task_type: growth.pool.clone(),
                    slot,
                    generation: growth.generation,
                };
                let context = create_context(
                    origin,
                    growth.inline,
                    (growth.factory)(),
                    self.sink.clone(),
                    Arc::default(),
                );
                (slot, context)
            })
            .collect()
    }

    /// Current state of a pool.
    pub fn pool_state(&self, pool: &str) -> Option<PoolState> {
        self.state.get().entries.get(pool).map(|entry| entry.state)
    }

    /// Whether any pool has queued or running instructions.
    pub fn is_running(&self) -> bool {
        self.state.get().any_active()
    }

    /// Terminates every worker, rejects every queued and running instruction
    /// with [`TaskError::Disposed`] and removes all pools.
    ///
    /// The queue-complete callback does not fire.
    pub fn tear_down(&self) {
        let mut deferred = Deferred::new();
        {
            let mut state = self.state.get_mut();
            let logging = state.config.logging.enabled;
            for (name, entry) in state.entries.drain() {
                if let Some(active) = entry.active {
                    reject_all(active, &mut deferred);
                }
                if logging {
                    info!("Tore down pool `{}`", name);
                }
            }
        }
        deferred.run();
    }
}

fn reject_all(active: ActivePool, deferred: &mut Deferred) {
    for run in active.queue {
        deferred.notify(move || run.resolver.reject(TaskError::Disposed));
    }
    for worker in active.workers.into_values() {
        if let Some(run) = worker.running {
            deferred.notify(move || run.resolver.reject(TaskError::Disposed));
        }
        if let Some(context) = worker.context {
            deferred.terminate(context);
        }
    }
}

impl DirectorState {
    fn any_active(&self) -> bool {
        self.entries.values().any(|entry| entry.active.is_some())
    }

    fn max_workers(&self, entry: &PoolEntry) -> usize {
        if entry.definition.fallback || self.config.force_fallback {
            1
        } else {
            entry
                .definition
                .max_workers
                .min(self.config.max_web_worker)
                .max(1)
        }
    }

    /// Queues the instruction and dispatches to idle workers.
    fn admit(
        &mut self,
        pool: &str,
        instruction: RunInstruction,
        deferred: &mut Deferred,
    ) -> Result<(Pending<Envelope>, Option<Growth>), DirectorError> {
        let max_queue_size = self.config.max_queue_size.max(1);
        let logging = self.config.logging;

        let max_workers = match self.entries.get(pool) {
            Some(entry) => self.max_workers(entry),
            None => return Err(DirectorError::UnknownPool(pool.to_string())),
        };
        let run_id = self.next_run_id;

        let entry = self
            .entries
            .get_mut(pool)
            .ok_or_else(|| DirectorError::UnknownPool(pool.to_string()))?;

        if entry.active.is_none() {
            entry.generation += 1;
            if logging.enabled {
                info!("Starting pool `{}` (generation {})", pool, entry.generation);
            }
        }
        let generation = entry.generation;
        let active = entry.active.get_or_insert_with(ActivePool::default);

        if active.queue.len() >= max_queue_size {
            warn!(
                "Queue of pool `{}` is full ({} instructions), rejecting instruction",
                pool, max_queue_size
            );
            if active.workers.is_empty() && active.queue.is_empty() {
                entry.active = None;
            }
            return Err(DirectorError::QueueFull {
                pool: pool.to_string(),
                capacity: max_queue_size,
            });
        }

        self.next_run_id += 1;
        let mut envelope = instruction.envelope;
        envelope.main.cmd = cmd::EXECUTE.to_string();
        envelope.main.id = run_id;

        let (resolver, pending) = pending();
        active.queue.push_back(QueuedRun {
            run_id,
            envelope,
            resolver,
            on_intermediate: instruction.on_intermediate,
        });
        if logging.debug {
            debug!(
                "Queued run {} in pool `{}` ({} queued)",
                run_id,
                pool,
                active.queue.len()
            );
        }

        for (context, message) in active.dispatch() {
            deferred.post(context, message);
        }

        let slots = active.reserve_growth(max_workers);
        entry.state = active.state();

        let growth = if slots.is_empty() {
            None
        } else {
            let init = match &entry.definition.init_config {
                Some(config) => {
                    let mut config = config.duplicate(false);
                    config.set_cmd(cmd::INIT).set_id(0);
                    config.into_envelope()?
                }
                None => Envelope::command(cmd::INIT, 0),
            };
            Some(Growth {
                pool: pool.to_string(),
                generation,
                slots,
                inline: entry.definition.fallback || self.config.force_fallback,
                factory: entry.definition.factory.clone(),
                init,
            })
        };

        Ok((pending, growth))
    }

    /// Installs freshly built workers, posts `init` to each and dispatches.
    fn install_workers(
        &mut self,
        growth: Growth,
        built: Vec<(usize, Result<Arc<dyn ExecutionContext>, TaskError>)>,
        deferred: &mut Deferred,
    ) {
        let was_active = self.any_active();
        let logging = self.config.logging;

        let entry = match self.entries.get_mut(&growth.pool) {
            Some(entry) if entry.generation == growth.generation && entry.active.is_some() => {
                entry
            }
            _ => {
                for (_, context) in built {
                    if let Ok(context) = context {
                        deferred.terminate(context);
                    }
                }
                return;
            }
        };
        let Some(pool) = entry.active.as_mut() else {
            return;
        };

        for (slot, context) in built {
            match context {
                Ok(context) => {
                    deferred.post(context.clone(), growth.init.clone());
                    if let Some(worker) = pool.workers.get_mut(&slot) {
                        worker.context = Some(context);
                    }
                    if logging.debug {
                        debug!("Pool `{}` started worker {}", growth.pool, slot);
                    }
                }
                Err(err) => {
                    error!("Pool `{}` failed to start worker {}: {}", growth.pool, slot, err);
                    pool.workers.remove(&slot);
                }
            }
        }

        if pool.workers.is_empty() {
            reject_queued(
                pool,
                &growth.pool,
                &format!("no worker of pool `{}` could be started", growth.pool),
                deferred,
            );
        }

        for (context, message) in pool.dispatch() {
            deferred.post(context, message);
        }

        settle_state(entry, &growth.pool, logging.enabled, deferred);
        self.notify_if_complete(was_active, deferred);
    }

    fn handle_message(&mut self, origin: &ContextOrigin, envelope: Envelope, deferred: &mut Deferred) {
        let was_active = self.any_active();
        let logging = self.config.logging;

        let Some(entry) = self.entries.get_mut(&origin.task_type) else {
            return;
        };
        if entry.generation != origin.generation {
            return;
        }
        let Some(pool) = entry.active.as_mut() else {
            return;
        };
        let Some(initialized) = pool.workers.get(&origin.slot).map(|w| w.initialized) else {
            return;
        };

        let command = envelope.cmd().to_string();
        if command == cmd::ERROR && !initialized {
            let message = error_message(&envelope);
            error!(
                "Worker {} of pool `{}` failed to initialize: {}",
                origin.slot, origin.task_type, message
            );
            if let Some(context) = pool.workers.remove(&origin.slot).and_then(|w| w.context) {
                deferred.terminate(context);
            }
            if pool.workers.is_empty() {
                reject_queued(pool, &origin.task_type, &message, deferred);
            }
            settle_state(entry, &origin.task_type, logging.enabled, deferred);
            self.notify_if_complete(was_active, deferred);
            return;
        }

        let Some(worker) = pool.workers.get_mut(&origin.slot) else {
            return;
        };
        let matches_run = worker
            .running
            .as_ref()
            .is_some_and(|run| run.run_id == envelope.id());

        match command.as_str() {
            cmd::INIT_COMPLETE => {
                worker.initialized = true;
                if logging.debug {
                    debug!("Worker {} of pool `{}` initialized", origin.slot, origin.task_type);
                }
            }
            cmd::INTERMEDIATE => {
                if let Some(callback) = worker
                    .running
                    .as_ref()
                    .filter(|_| matches_run)
                    .and_then(|run| run.on_intermediate.clone())
                {
                    deferred.notify(move || callback(envelope));
                }
                return;
            }
            cmd::EXEC_COMPLETE if matches_run => {
                if let Some(run) = worker.running.take() {
                    deferred.notify(move || run.resolver.resolve(envelope));
                }
            }
            cmd::ERROR => {
                let message = error_message(&envelope);
                if !matches_run {
                    error!(
                        "Worker {} of pool `{}` reported an error for id {}: {}",
                        origin.slot,
                        origin.task_type,
                        envelope.id(),
                        message
                    );
                    return;
                }
                if let Some(run) = worker.running.take() {
                    let task_type = origin.task_type.clone();
                    deferred.notify(move || {
                        run.resolver
                            .reject(TaskError::Execution { task_type, message })
                    });
                }
            }
            other => {
                if logging.debug {
                    debug!(
                        "Ignoring `{}` (id {}) from pool `{}`",
                        other,
                        envelope.id(),
                        origin.task_type
                    );
                }
                return;
            }
        }

        for (context, message) in pool.dispatch() {
            deferred.post(context, message);
        }
        settle_state(entry, &origin.task_type, logging.enabled, deferred);
        self.notify_if_complete(was_active, deferred);
    }

    fn notify_if_complete(&self, was_active: bool, deferred: &mut Deferred) {
        if was_active && !self.any_active() {
            if self.config.logging.enabled {
                info!("All pools completed their queues");
            }
            if let Some(callback) = self.on_queue_complete.clone() {
                deferred.notify(move || callback());
            }
        }
    }
}

fn error_message(envelope: &Envelope) -> String {
    envelope
        .param("message")
        .and_then(|value| value.as_str())
        .unwrap_or("unknown error")
        .to_string()
}

/// Rejects every queued run of a pool that has no worker left.
fn reject_queued(active: &mut ActivePool, pool: &str, reason: &str, deferred: &mut Deferred) {
    for run in active.queue.drain(..) {
        let error = TaskError::Initialization {
            task_type: pool.to_string(),
            reason: reason.to_string(),
        };
        deferred.notify(move || run.resolver.reject(error));
    }
}

/// Updates the pool state and tears the pool down once it has no work.
fn settle_state(entry: &mut PoolEntry, name: &str, logging: bool, deferred: &mut Deferred) {
    let Some(active) = entry.active.as_ref() else {
        return;
    };
    entry.state = active.state();
    if entry.state != PoolState::TornDown {
        return;
    }

    if let Some(active) = entry.active.take() {
        for worker in active.workers.into_values() {
            if let Some(context) = worker.context {
                deferred.terminate(context);
            }
        }
    }
    if logging {
        info!("Pool `{}` drained and tore down", name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        task_management::{execute_fn, init_fn, WorkerFunctions},
        transport::DataTransport,
    };
    use futures::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn inline_director() -> WorkerPoolDirector {
        WorkerPoolDirector::new(DirectorConfig {
            force_fallback: true,
            ..Default::default()
        })
    }

    fn echo_pool() -> PoolDefinition {
        PoolDefinition::from_functions(WorkerFunctions::new(execute_fn(|scope, id, _| {
            scope.post_message(Envelope::command(cmd::EXEC_COMPLETE, id));
            Ok(())
        })))
    }

    fn run() -> RunInstruction {
        RunInstruction::new(DataTransport::new(cmd::EXECUTE, 0)).unwrap()
    }

    #[test]
    fn duplicate_and_unknown_pools() {
        let director = inline_director();
        director.register_pool("obj", echo_pool()).unwrap();
        assert!(matches!(
            director.register_pool("obj", echo_pool()),
            Err(DirectorError::DuplicatePool(_))
        ));
        assert!(matches!(
            director.enqueue_for_run("stl", run()),
            Err(DirectorError::UnknownPool(_))
        ));
        assert_eq!(director.pool_state("obj"), Some(PoolState::Idle));
    }

    #[test]
    fn inline_pool_runs_and_tears_down() {
        let director = inline_director();
        let completed = Arc::new(AtomicUsize::new(0));
        let counter = completed.clone();
        director.set_on_queue_complete(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        director.register_pool("obj", echo_pool()).unwrap();

        let reply = director
            .enqueue_for_run("obj", run())
            .unwrap()
            .now_or_never()
            .unwrap()
            .unwrap();
        assert_eq!(reply.id(), 1);
        assert_eq!(director.pool_state("obj"), Some(PoolState::TornDown));
        assert!(!director.is_running());
        assert_eq!(completed.load(Ordering::SeqCst), 1);

        let _pending = director.enqueue_for_run("obj", run()).unwrap();
        assert_eq!(completed.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn refused_init_rejects_queued_runs() {
        let director = inline_director();
        let executed = Arc::new(AtomicUsize::new(0));
        let counter = executed.clone();
        director
            .register_pool(
                "obj",
                PoolDefinition::from_functions(
                    WorkerFunctions::new(execute_fn(move |scope, id, _| {
                        counter.fetch_add(1, Ordering::SeqCst);
                        scope.post_message(Envelope::command(cmd::EXEC_COMPLETE, id));
                        Ok(())
                    }))
                    .with_init(init_fn(|_, _, _| Err(TaskError::worker("init refused")))),
                ),
            )
            .unwrap();

        let result = director
            .enqueue_for_run("obj", run())
            .unwrap()
            .now_or_never()
            .unwrap();
        assert!(matches!(
            result,
            Err(TaskError::Initialization { ref reason, .. }) if reason.contains("init refused")
        ));
        assert_eq!(executed.load(Ordering::SeqCst), 0);
        assert_eq!(director.pool_state("obj"), Some(PoolState::TornDown));
        assert!(!director.is_running());
    }

    #[test]
    fn zero_queue_size_still_admits_one_instruction() {
        let director = WorkerPoolDirector::new(DirectorConfig {
            force_fallback: true,
            max_queue_size: 0,
            ..Default::default()
        });
        director.register_pool("obj", echo_pool()).unwrap();

        let reply = director
            .enqueue_for_run("obj", run())
            .unwrap()
            .now_or_never()
            .unwrap()
            .unwrap();
        assert_eq!(reply.id(), 1);
    }

    #[test]
    fn worker_errors_reject_only_their_run() {
        let director = inline_director();
        director
            .register_pool(
                "fail",
                PoolDefinition::from_functions(WorkerFunctions::new(execute_fn(|_, _, _| {
                    Err(TaskError::worker("bad input"))
                }))),
            )
            .unwrap();

        let result = director
            .enqueue_for_run("fail", run())
            .unwrap()
            .now_or_never()
            .unwrap();
        assert!(matches!(
            result,
            Err(TaskError::Execution { ref message, .. }) if message == "bad input"
        ));
    }
}
