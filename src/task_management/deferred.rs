//! Side effects collected while the manager state is locked.
//!
//! User callbacks and context posts may re-enter the manager (an inline
//! context answers synchronously), so they only run after the state lock is
//! released.

use std::sync::Arc;

use super::context::ExecutionContext;
use crate::transport::Envelope;

type Notification = Box<dyn FnOnce() + Send>;

/// Work to run once the state lock is released.
#[derive(Default)]
pub(crate) struct Deferred {
    terminations: Vec<Arc<dyn ExecutionContext>>,
    posts: Vec<(Arc<dyn ExecutionContext>, Envelope)>,
    notifications: Vec<Notification>,
}

impl Deferred {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn post(&mut self, context: Arc<dyn ExecutionContext>, envelope: Envelope) {
        self.posts.push((context, envelope));
    }

    pub fn terminate(&mut self, context: Arc<dyn ExecutionContext>) {
        self.terminations.push(context);
    }

    pub fn notify(&mut self, notification: impl FnOnce() + Send + 'static) {
        self.notifications.push(Box::new(notification));
    }

    /// Terminations first, then resolutions and callbacks, then posts.
    ///
    /// Posting last keeps the caller's future settled before an inline context
    /// re-enters the manager with the next completion.
    pub fn run(self) {
        for context in self.terminations {
            context.terminate();
        }
        for notification in self.notifications {
            notification();
        }
        for (context, envelope) in self.posts {
            context.post_message(envelope);
        }
    }
}
