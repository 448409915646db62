//! Per task type registry entry.

use std::{
    collections::{HashMap, VecDeque},
    fmt,
    sync::Arc,
};

use super::{
    context::ExecutionContext,
    pending::Resolver,
    worker::{IntermediateCallback, WorkerFunctions},
};
use crate::transport::Envelope;

/// Loader of one dependency fragment.
pub type DependencyLoader = Arc<dyn Fn() -> Result<String, String> + Send + Sync>;

/// A named piece of code or data a non-module task type needs before its
/// contexts can run.
///
/// Loaders run once per task type during initialization; the results are
/// shared by every context of the type.
#[derive(Clone)]
pub struct DependencyDescription {
    /// Identifier (file name or URL)
    pub name: String,
    /// Produces the fragment or a failure reason
    pub loader: DependencyLoader,
}

impl DependencyDescription {
    /// A dependency produced by `loader`.
    pub fn new(
        name: &str,
        loader: impl Fn() -> Result<String, String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.to_string(),
            loader: Arc::new(loader),
        }
    }

    /// A dependency whose content is already known.
    pub fn inline(name: &str, code: &str) -> Self {
        let code = code.to_string();
        Self::new(name, move || Ok(code.clone()))
    }
}

impl fmt::Debug for DependencyDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DependencyDescription")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Loaded dependency fragments of one task type, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedDependencies {
    fragments: Vec<(String, String)>,
}

impl ResolvedDependencies {
    /// Runs every loader in order, stopping at the first failure.
    ///
    /// # Returns
    /// The fragments, or `(name, reason)` of the failing dependency
    pub fn load(descriptions: &[DependencyDescription]) -> Result<Self, (String, String)> {
        let fragments = descriptions
            .iter()
            .map(|description| {
                (description.loader)()
                    .map(|code| (description.name.clone(), code))
                    .map_err(|reason| (description.name.clone(), reason))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { fragments })
    }

    /// A fragment by name.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fragments
            .iter()
            .find(|(fragment, _)| fragment == name)
            .map(|(_, code)| code.as_str())
    }

    /// All fragments concatenated, separated by newlines.
    pub fn source(&self) -> String {
        self.fragments
            .iter()
            .map(|(_, code)| code.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Number of fragments.
    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    /// Whether nothing was loaded.
    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }
}

/// Where the code of a task type comes from.
#[derive(Clone)]
pub(crate) enum WorkerSource {
    /// Functions supplied at registration
    Functions(WorkerFunctions),
    /// A worker module resolved by URL at initialization
    Module(String),
}

/// Lifecycle of a task type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TypeStatus {
    Registered,
    Initializing,
    Initialized,
}

/// Bounded set of execution contexts of one task type.
#[derive(Default)]
pub(crate) struct WorkerPool {
    pub maximum_count: usize,
    pub instances: Vec<Arc<dyn ExecutionContext>>,
    /// Idle slots, in the order they became idle
    pub available: VecDeque<usize>,
}

/// Point-in-time view of a task type's pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSnapshot {
    /// Configured upper bound
    pub maximum_count: usize,
    /// Contexts created
    pub instances: usize,
    /// Idle contexts
    pub available: usize,
    /// Contexts with an outstanding message
    pub in_use: usize,
}

/// The invocation currently assigned to a context.
pub(crate) struct InFlight {
    pub execution_id: u64,
    pub resolver: Resolver<Envelope>,
    pub on_intermediate: Option<IntermediateCallback>,
    pub started: web_time::Instant,
}

/// Initialization waiting for `initComplete` from every context.
pub(crate) struct PendingInit {
    pub remaining: usize,
    pub resolvers: Vec<Resolver<()>>,
}

/// Registry entry of one task type.
pub(crate) struct TaskTypeDefinition {
    pub task_type: String,
    pub fallback: bool,
    pub source: WorkerSource,
    pub dependencies: Vec<DependencyDescription>,
    pub resolved_dependencies: Option<Arc<ResolvedDependencies>>,
    pub status: TypeStatus,
    /// Bumped on every (re)initialization, stale messages carry an older value
    pub generation: u64,
    pub workers: WorkerPool,
    /// Slot → invocation
    pub in_flight: HashMap<usize, InFlight>,
    pub pending_init: Option<PendingInit>,
}

impl TaskTypeDefinition {
    pub fn new(
        task_type: &str,
        fallback: bool,
        source: WorkerSource,
        dependencies: Vec<DependencyDescription>,
        maximum_count: usize,
    ) -> Self {
        Self {
            task_type: task_type.to_string(),
            fallback,
            source,
            dependencies,
            resolved_dependencies: None,
            status: TypeStatus::Registered,
            generation: 0,
            workers: WorkerPool {
                maximum_count,
                ..Default::default()
            },
            in_flight: HashMap::new(),
            pending_init: None,
        }
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot {
            maximum_count: self.workers.maximum_count,
            instances: self.workers.instances.len(),
            available: self.workers.available.len(),
            in_use: self.in_flight.len(),
        }
    }

    /// Pops the idle context that has waited longest.
    pub fn take_available(&mut self) -> Option<(usize, Arc<dyn ExecutionContext>)> {
        let slot = self.workers.available.pop_front()?;
        self.workers
            .instances
            .get(slot)
            .cloned()
            .map(|context| (slot, context))
    }

    pub fn release(&mut self, slot: usize) {
        if slot < self.workers.instances.len() && !self.workers.available.contains(&slot) {
            self.workers.available.push_back(slot);
        }
    }

    /// Drops every context and returns them for termination.
    pub fn reset_pool(&mut self) -> Vec<Arc<dyn ExecutionContext>> {
        self.workers.available.clear();
        self.status = TypeStatus::Registered;
        std::mem::take(&mut self.workers.instances)
    }
}
