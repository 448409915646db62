//! Pool definitions, run instructions and per pool bookkeeping.

use std::{
    collections::{BTreeMap, VecDeque},
    sync::Arc,
};

use crate::{
    error::TransportError,
    task_management::{
        context::ExecutionContext, FnWorker, IntermediateCallback, Resolver, TaskWorker,
        WorkerFactory, WorkerFunctions,
    },
    transport::{DataTransport, Envelope, Transport},
};

/// Lifecycle of one director pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolState {
    /// Registered, nothing queued, no workers
    Idle,
    /// Instructions are waiting for a worker
    Running,
    /// Queue is empty, instructions are still running
    Draining,
    /// Queue and workers are gone; the next instruction starts over
    TornDown,
}

impl PoolState {
    /// Whether the pool owns workers or queued work.
    pub fn is_active(self) -> bool {
        matches!(self, PoolState::Running | PoolState::Draining)
    }
}

/// How the workers of one pool are built.
#[derive(Clone)]
pub struct PoolDefinition {
    pub(crate) factory: WorkerFactory,
    pub(crate) max_workers: usize,
    pub(crate) fallback: bool,
    pub(crate) init_config: Option<DataTransport>,
}

impl PoolDefinition {
    /// A pool running function-backed workers.
    pub fn from_functions(functions: WorkerFunctions) -> Self {
        Self::from_factory(move || Box::new(FnWorker::new(functions.clone())) as Box<dyn TaskWorker>)
    }

    /// A pool running workers created by `factory`.
    pub fn from_factory(factory: impl Fn() -> Box<dyn TaskWorker> + Send + Sync + 'static) -> Self {
        Self {
            factory: Arc::new(factory),
            max_workers: 1,
            fallback: false,
            init_config: None,
        }
    }

    /// Upper bound of workers, further clamped by the director.
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.max(1);
        self
    }

    /// Run on one inline worker.
    pub fn with_fallback(mut self, fallback: bool) -> Self {
        self.fallback = fallback;
        self
    }

    /// Configuration sent with `init` to every new worker.
    pub fn with_init_config(mut self, init_config: DataTransport) -> Self {
        self.init_config = Some(init_config);
        self
    }
}

/// One unit of work for a director pool.
pub struct RunInstruction {
    pub(crate) envelope: Envelope,
    pub(crate) on_intermediate: Option<IntermediateCallback>,
}

impl RunInstruction {
    /// Packages `config` as the `execute` message.
    pub fn new(config: impl Transport) -> Result<Self, TransportError> {
        Ok(Self {
            envelope: config.into_envelope()?,
            on_intermediate: None,
        })
    }

    /// Receives every `intermediate` message of this instruction.
    pub fn with_intermediate(mut self, callback: impl Fn(Envelope) + Send + Sync + 'static) -> Self {
        self.on_intermediate = Some(Arc::new(callback));
        self
    }
}

pub(crate) struct QueuedRun {
    pub run_id: u64,
    pub envelope: Envelope,
    pub resolver: Resolver<Envelope>,
    pub on_intermediate: Option<IntermediateCallback>,
}

pub(crate) struct RunningRun {
    pub run_id: u64,
    pub resolver: Resolver<Envelope>,
    pub on_intermediate: Option<IntermediateCallback>,
}

/// A worker slot; `context` is `None` while the worker is being created and
/// `initialized` stays false until it answers `init` with `initComplete`.
#[derive(Default)]
pub(crate) struct PoolWorker {
    pub context: Option<Arc<dyn ExecutionContext>>,
    pub initialized: bool,
    pub running: Option<RunningRun>,
}

/// Workers and queue of a pool that has work.
#[derive(Default)]
pub(crate) struct ActivePool {
    pub workers: BTreeMap<usize, PoolWorker>,
    pub queue: VecDeque<QueuedRun>,
    pub next_slot: usize,
}

impl ActivePool {
    pub fn running_count(&self) -> usize {
        self.workers.values().filter(|w| w.running.is_some()).count()
    }

    /// Idle workers plus workers still being created or initialized.
    fn spare_count(&self) -> usize {
        self.workers.values().filter(|w| w.running.is_none()).count()
    }

    /// Reserves slots for the workers needed to serve the queue.
    pub fn reserve_growth(&mut self, max_workers: usize) -> Vec<usize> {
        let needed = self.queue.len().saturating_sub(self.spare_count());
        let room = max_workers.saturating_sub(self.workers.len());
        (0..needed.min(room))
            .map(|_| {
                let slot = self.next_slot;
                self.next_slot += 1;
                self.workers.insert(slot, PoolWorker::default());
                slot
            })
            .collect()
    }

    /// Hands queued runs to idle, initialized workers.
    ///
    /// # Returns
    /// `(context, message)` pairs to post
    pub fn dispatch(&mut self) -> Vec<(Arc<dyn ExecutionContext>, Envelope)> {
        let mut posts = Vec::new();
        for worker in self.workers.values_mut() {
            if self.queue.is_empty() {
                break;
            }
            let Some(context) = worker.context.as_ref() else {
                continue;
            };
            if !worker.initialized || worker.running.is_some() {
                continue;
            }
            if let Some(run) = self.queue.pop_front() {
                worker.running = Some(RunningRun {
                    run_id: run.run_id,
                    resolver: run.resolver,
                    on_intermediate: run.on_intermediate,
                });
                posts.push((context.clone(), run.envelope));
            }
        }
        posts
    }

    pub fn state(&self) -> PoolState {
        if !self.queue.is_empty() {
            PoolState::Running
        } else if self.running_count() > 0 {
            PoolState::Draining
        } else {
            PoolState::TornDown
        }
    }
}

/// A registered pool.
pub(crate) struct PoolEntry {
    pub definition: PoolDefinition,
    pub active: Option<ActivePool>,
    pub state: PoolState,
    pub generation: u64,
}

impl PoolEntry {
    pub fn new(definition: PoolDefinition) -> Self {
        Self {
            definition,
            active: None,
            state: PoolState::Idle,
            generation: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task_management::pending;

    fn queued(run_id: u64) -> QueuedRun {
        let (resolver, _pending) = pending();
        QueuedRun {
            run_id,
            envelope: Envelope::command("execute", run_id),
            resolver,
            on_intermediate: None,
        }
    }

    #[test]
    fn growth_is_bounded_by_max_workers() {
        let mut pool = ActivePool::default();
        for id in 1..=5 {
            pool.queue.push_back(queued(id));
        }

        assert_eq!(pool.reserve_growth(3), vec![0, 1, 2]);
        assert!(pool.reserve_growth(3).is_empty());
        assert_eq!(pool.state(), PoolState::Running);
    }

    #[test]
    fn starting_workers_count_as_spare() {
        let mut pool = ActivePool::default();
        pool.queue.push_back(queued(1));
        assert_eq!(pool.reserve_growth(4).len(), 1);

        pool.queue.push_back(queued(2));
        assert_eq!(pool.reserve_growth(4), vec![1]);
    }

    #[test]
    fn only_initialized_workers_receive_runs() {
        struct Unused;
        impl ExecutionContext for Unused {
            fn post_message(&self, _envelope: Envelope) {}
            fn terminate(&self) {}
            fn is_inline(&self) -> bool {
                true
            }
        }

        let mut pool = ActivePool::default();
        pool.queue.push_back(queued(1));
        pool.queue.push_back(queued(2));
        assert_eq!(pool.reserve_growth(2), vec![0, 1]);
        for worker in pool.workers.values_mut() {
            worker.context = Some(Arc::new(Unused) as Arc<dyn ExecutionContext>);
        }
        assert!(pool.dispatch().is_empty());

        if let Some(worker) = pool.workers.get_mut(&1) {
            worker.initialized = true;
        }
        let posts = pool.dispatch();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].1.id(), 1);
        assert!(pool.workers[&1].running.is_some());
        assert!(pool.workers[&0].running.is_none());
        assert_eq!(pool.state(), PoolState::Running);
    }

    #[test]
    fn empty_pool_without_running_work_tears_down() {
        let pool = ActivePool::default();
        assert_eq!(pool.state(), PoolState::TornDown);
        assert!(!pool.state().is_active());
    }
}
