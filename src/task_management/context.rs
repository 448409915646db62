//! # Execution Contexts
//!
//! The main side talks to workers only through [`ExecutionContext`]. Two
//! implementations exist:
//!
//! - [`ThreadContext`] owns a dedicated thread (a Web Worker through
//!   `wasm_thread` on wasm) fed by a channel. Messages to one context are
//!   processed strictly in posting order.
//! - [`InlineContext`] runs the worker synchronously on the posting thread.
//!   It is used for fallback task types, when background execution is
//!   disabled, and in tests.
//!
//! Both report back through the [`MessageSink`](super::worker::MessageSink)
//! stored in the worker's scope.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{channel, Sender},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};

use log::{debug, warn};

use super::{
    task_type::ResolvedDependencies,
    worker::{ContextOrigin, MessageSink, TaskWorker, WorkerRuntime, WorkerScope},
};
use crate::{error::TaskError, transport::Envelope};

#[cfg(target_family = "wasm")]
mod wasm_imports {
    pub use wasm_thread as thread;
}

#[cfg(target_family = "wasm")]
use self::wasm_imports::*;

#[cfg(not(target_family = "wasm"))]
use std::thread;

/// A place work can be posted to.
pub trait ExecutionContext: Send + Sync {
    /// Posts one message. Never blocks on the worker finishing its work,
    /// except for inline contexts which run it right away.
    fn post_message(&self, envelope: Envelope);

    /// Stops the context. Messages posted afterwards are dropped.
    fn terminate(&self);

    /// Whether work runs on the posting thread.
    fn is_inline(&self) -> bool;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Creates a context running `worker`.
///
/// # Arguments
/// * `origin` - Identity reported with every message the worker posts
/// * `inline` - Run on the posting thread instead of a dedicated one
/// * `worker` - The worker instance owned by the context
/// * `sink` - Receiver of everything the worker posts
/// * `dependencies` - Dependency fragments exposed through the worker scope
pub fn create_context(
    origin: ContextOrigin,
    inline: bool,
    worker: Box<dyn TaskWorker>,
    sink: Arc<dyn MessageSink>,
    dependencies: Arc<ResolvedDependencies>,
) -> Result<Arc<dyn ExecutionContext>, TaskError> {
    let name = format!("{}-worker-{}", origin.task_type, origin.slot);
    let runtime = WorkerRuntime::new(worker, WorkerScope::new(origin, sink, dependencies));
    if inline {
        Ok(Arc::new(InlineContext::new(runtime)))
    } else {
        Ok(Arc::new(ThreadContext::spawn(&name, runtime)?))
    }
}

/// A context backed by its own thread.
///
/// Terminating drops the channel; the thread finishes the message it is
/// working on and exits. It is never joined.
pub struct ThreadContext {
    name: String,
    sender: Mutex<Option<Sender<Envelope>>>,
}

impl ThreadContext {
    /// Spawns the thread and hands it the runtime.
    pub fn spawn(name: &str, runtime: WorkerRuntime) -> Result<Self, TaskError> {
        let (sender, receiver) = channel::<Envelope>();

        let context_loop = move || {
            let mut runtime = runtime;
            while let Ok(envelope) = receiver.recv() {
                runtime.handle(envelope);
            }
        };

        thread::Builder::new()
            .name(name.to_string())
            .spawn(context_loop)
            .map_err(|err| TaskError::Initialization {
                task_type: name.to_string(),
                reason: format!("failed to spawn context thread: {}", err),
            })?;

        Ok(Self {
            name: name.to_string(),
            sender: Mutex::new(Some(sender)),
        })
    }
}

impl ExecutionContext for ThreadContext {
    fn post_message(&self, envelope: Envelope) {
        match lock(&self.sender).as_ref() {
            Some(sender) => {
                if sender.send(envelope).is_err() {
                    warn!("Context `{}` has stopped, message dropped", self.name);
                }
            }
            None => debug!("Context `{}` is terminated, message dropped", self.name),
        }
    }

    fn terminate(&self) {
        lock(&self.sender).take();
    }

    fn is_inline(&self) -> bool {
        false
    }
}

/// A context running its worker on the posting thread.
///
/// Posts made while the worker is running (the worker's reply causing the
/// next dispatch to this very context) are queued in a mailbox and handled
/// after the current message, in order.
pub struct InlineContext {
    runtime: Mutex<Option<WorkerRuntime>>,
    mailbox: Mutex<VecDeque<Envelope>>,
    draining: AtomicBool,
    terminated: AtomicBool,
}

impl InlineContext {
    /// Wraps the runtime.
    pub fn new(runtime: WorkerRuntime) -> Self {
        Self {
            runtime: Mutex::new(Some(runtime)),
            mailbox: Mutex::new(VecDeque::new()),
            draining: AtomicBool::new(false),
            terminated: AtomicBool::new(false),
        }
    }

    fn drain(&self) {
        loop {
            if self
                .draining
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return;
            }

            loop {
                if self.terminated.load(Ordering::Acquire) {
                    lock(&self.mailbox).clear();
                    break;
                }
                let next = lock(&self.mailbox).pop_front();
                let Some(envelope) = next else {
                    break;
                };
                if let Some(runtime) = lock(&self.runtime).as_mut() {
                    runtime.handle(envelope);
                }
            }

            self.draining.store(false, Ordering::Release);

            if self.terminated.load(Ordering::Acquire) || lock(&self.mailbox).is_empty() {
                return;
            }
        }
    }
}

impl ExecutionContext for InlineContext {
    fn post_message(&self, envelope: Envelope) {
        if self.terminated.load(Ordering::Acquire) {
            debug!("Inline context is terminated, message dropped");
            return;
        }
        lock(&self.mailbox).push_back(envelope);
        self.drain();
    }

    fn terminate(&self) {
        self.terminated.store(true, Ordering::Release);
        lock(&self.mailbox).clear();
    }

    fn is_inline(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        task_management::worker::{execute_fn, FnWorker, WorkerFunctions},
        transport::cmd,
    };
    use std::sync::mpsc::{self, Receiver};
    use std::time::Duration;

    struct ChannelSink(Mutex<mpsc::Sender<Envelope>>);

    impl MessageSink for ChannelSink {
        fn receive(&self, _origin: &ContextOrigin, envelope: Envelope) {
            let _ = self.0.lock().unwrap().send(envelope);
        }
    }

    fn echo_context(inline: bool) -> (Arc<dyn ExecutionContext>, Receiver<Envelope>) {
        let (sender, receiver) = mpsc::channel();
        let worker = FnWorker::new(WorkerFunctions::new(execute_fn(|scope, id, _| {
            scope.post_message(Envelope::command(cmd::EXEC_COMPLETE, id));
            Ok(())
        })));
        let context = create_context(
            ContextOrigin {
                task_type: "echo".into(),
                slot: 0,
                generation: 1,
            },
            inline,
            Box::new(worker),
            Arc::new(ChannelSink(Mutex::new(sender))),
            Arc::default(),
        )
        .unwrap();
        (context, receiver)
    }

    #[test]
    fn thread_context_preserves_order() {
        let (context, replies) = echo_context(false);
        assert!(!context.is_inline());

        context.post_message(Envelope::command(cmd::INIT, 0));
        for id in 1..=5 {
            context.post_message(Envelope::command(cmd::EXECUTE, id));
        }

        let timeout = Duration::from_secs(5);
        assert_eq!(replies.recv_timeout(timeout).unwrap().cmd(), cmd::INIT_COMPLETE);
        for id in 1..=5 {
            assert_eq!(replies.recv_timeout(timeout).unwrap().id(), id);
        }
        context.terminate();
    }

    #[test]
    fn inline_context_answers_before_returning() {
        let (context, replies) = echo_context(true);
        assert!(context.is_inline());

        context.post_message(Envelope::command(cmd::EXECUTE, 7));
        assert_eq!(replies.try_recv().unwrap().id(), 7);

        context.terminate();
        context.post_message(Envelope::command(cmd::EXECUTE, 8));
        assert!(replies.try_recv().is_err());
    }
}
