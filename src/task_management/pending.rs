//! One-shot results handed to callers.

use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use futures::channel::oneshot;

use crate::error::TaskError;

/// Future of an initialization or execution request.
///
/// Resolves once the owning manager settles the request. A request that is
/// dropped without being settled (the manager was disposed) resolves to
/// [`TaskError::Disposed`].
#[derive(Debug)]
#[must_use = "a pending result does nothing unless awaited"]
pub struct Pending<T> {
    receiver: oneshot::Receiver<Result<T, TaskError>>,
}

/// Sending half of a [`Pending`].
#[derive(Debug)]
pub struct Resolver<T> {
    sender: oneshot::Sender<Result<T, TaskError>>,
}

/// Creates a connected resolver / pending pair.
pub fn pending<T>() -> (Resolver<T>, Pending<T>) {
    let (sender, receiver) = oneshot::channel();
    (Resolver { sender }, Pending { receiver })
}

impl<T> Pending<T> {
    /// A pending that is already resolved with `value`.
    pub fn resolved(value: T) -> Self {
        let (resolver, pending) = pending();
        resolver.resolve(value);
        pending
    }

    /// A pending that is already rejected with `error`.
    pub fn rejected(error: TaskError) -> Self {
        let (resolver, pending) = pending();
        resolver.reject(error);
        pending
    }
}

impl<T> Resolver<T> {
    /// Settles the request successfully. A dropped receiver is ignored.
    pub fn resolve(self, value: T) {
        let _ = self.sender.send(Ok(value));
    }

    /// Settles the request with an error. A dropped receiver is ignored.
    pub fn reject(self, error: TaskError) {
        let _ = self.sender.send(Err(error));
    }
}

impl<T> Future for Pending<T> {
    type Output = Result<T, TaskError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(oneshot::Canceled)) => Poll::Ready(Err(TaskError::Disposed)),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;

    #[test]
    fn resolved_value_is_ready() {
        assert_eq!(Pending::resolved(5).now_or_never().unwrap().unwrap(), 5);
    }

    #[test]
    fn unsettled_is_not_ready() {
        let (_resolver, pending) = pending::<()>();
        assert!(pending.now_or_never().is_none());
    }

    #[test]
    fn dropped_resolver_means_disposed() {
        let (resolver, pending) = pending::<u32>();
        drop(resolver);
        assert!(matches!(pollster::block_on(pending), Err(TaskError::Disposed)));
    }

    #[test]
    fn rejection_carries_error() {
        let result = pollster::block_on(Pending::<()>::rejected(TaskError::worker("boom")));
        assert!(matches!(result, Err(TaskError::Worker(message)) if message == "boom"));
    }
}
