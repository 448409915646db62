//! Shared coordinator state behind a poison-tolerant read-write lock.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

/// A thread-safe, reference-counted resource container with read-write locking.
///
/// `MtResource` holds the coordinator state that is touched both by the calling
/// thread (registration, enqueueing, disposal) and by worker threads delivering
/// their messages. Every access goes through one lock, which gives the same
/// "callbacks never interleave with enqueue" guarantee an event loop would.
///
/// A panic inside a critical section poisons a std lock. The state kept here is
/// updated in small, self-consistent steps, so a poisoned lock is recovered
/// instead of propagating the panic into unrelated callers.
///
/// # Type Parameters
/// - `T`: The type of the contained resource, must be `Send + Sync`
///
/// # Examples
/// ```ignore
/// # use std::thread;
/// use worker_task_engine::core::MtResource;
///
/// let counter = MtResource::new(0);
/// let counter_clone = counter.clone();
///
/// let handle = thread::spawn(move || {
///     *counter_clone.get_mut() += 1;
/// });
///
/// handle.join().unwrap();
/// assert_eq!(*counter.get(), 1);
/// ```
pub struct MtResource<T: Send + Sync> {
    resource: Arc<RwLock<T>>,
}

impl<T: Send + Sync> MtResource<T> {
    /// Creates a new `MtResource` containing the given value.
    ///
    /// # Arguments
    /// * `resource` - The value to be stored in the resource
    pub fn new(resource: T) -> Self {
        Self {
            resource: Arc::new(RwLock::new(resource)),
        }
    }

    /// Returns a read-only guard that allows reading the contained value.
    pub fn get(&self) -> RwLockReadGuard<'_, T> {
        self.resource.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns a mutable guard that allows modifying the contained value.
    pub fn get_mut(&self) -> RwLockWriteGuard<'_, T> {
        self.resource.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Creates a non-owning handle to the same resource.
    ///
    /// # Returns
    /// An `MtWeak` that can be upgraded back while at least one `MtResource`
    /// is still alive
    pub fn downgrade(&self) -> MtWeak<T> {
        MtWeak {
            resource: Arc::downgrade(&self.resource),
        }
    }
}

impl<T: Send + Sync> Clone for MtResource<T> {
    fn clone(&self) -> Self {
        Self {
            resource: self.resource.clone(),
        }
    }
}

/// A weak counterpart of [`MtResource`].
///
/// Handed to background execution contexts so that their message callbacks can
/// reach the coordinator without owning it.
pub struct MtWeak<T: Send + Sync> {
    resource: Weak<RwLock<T>>,
}

impl<T: Send + Sync> MtWeak<T> {
    /// Attempts to recover a strong handle.
    ///
    /// # Returns
    /// `None` once every strong `MtResource` has been dropped
    pub fn upgrade(&self) -> Option<MtResource<T>> {
        self.resource
            .upgrade()
            .map(|resource| MtResource { resource })
    }
}

impl<T: Send + Sync> Clone for MtWeak<T> {
    fn clone(&self) -> Self {
        Self {
            resource: self.resource.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shares_value_between_clones() {
        let resource = MtResource::new(vec![1, 2, 3]);
        let clone = resource.clone();

        clone.get_mut().push(4);
        assert_eq!(resource.get().len(), 4);
    }

    #[test]
    fn weak_handle_expires_with_last_owner() {
        let resource = MtResource::new(7u32);
        let weak = resource.downgrade();

        assert_eq!(weak.upgrade().map(|r| *r.get()), Some(7));
        drop(resource);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn recovers_from_poisoned_lock() {
        let resource = MtResource::new(1u32);
        let clone = resource.clone();

        let _ = std::thread::spawn(move || {
            let _guard = clone.get_mut();
            panic!("poison the lock");
        })
        .join();

        *resource.get_mut() += 1;
        assert_eq!(*resource.get(), 2);
    }
}
