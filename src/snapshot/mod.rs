//! External-observer snapshot store.
//!
//! Holds one immutable state value behind an `Arc` and notifies
//! subscribers after each commit. Two reads with no intervening commit
//! return the same `Arc`, so a caching UI layer can skip re-renders on
//! pointer identity alone.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::warn;

type Observer = Arc<dyn Fn() + Send + Sync>;

/// Registration of one observer. Unsubscribing is idempotent; dropping the
/// handle unsubscribes too.
pub struct Subscription {
    cancel: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Subscription {
    pub fn new(cancel: Box<dyn FnOnce() + Send>) -> Self {
        Self {
            cancel: Mutex::new(Some(cancel)),
        }
    }

    /// Remove the observer. Safe to call more than once.
    pub fn unsubscribe(&self) {
        if let Some(cancel) = self.cancel.lock().take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// Immutable-snapshot store with a plain callback registry.
pub struct SnapshotStore<T> {
    current: Mutex<Arc<T>>,
    observers: Mutex<Vec<(u64, Observer)>>,
    next_id: AtomicU64,
}

impl<T: Send + Sync + 'static> SnapshotStore<T> {
    pub fn new(initial: T) -> Arc<Self> {
        Arc::new(Self {
            current: Mutex::new(Arc::new(initial)),
            observers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
        })
    }

    /// Synchronous, non-blocking read of the current snapshot.
    pub fn snapshot(&self) -> Arc<T> {
        self.current.lock().clone()
    }

    /// Register an observer. Observers are notified in registration order,
    /// synchronously on the committing thread, after the new snapshot is
    /// readable. An observer must not invoke state-transitioning session
    /// operations from inside the callback.
    pub fn subscribe(self: &Arc<Self>, observer: impl Fn() + Send + Sync + 'static) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.observers.lock().push((id, Arc::new(observer)));

        let store: Weak<Self> = Arc::downgrade(self);
        Subscription::new(Box::new(move || {
            if let Some(store) = store.upgrade() {
                store.observers.lock().retain(|(entry_id, _)| *entry_id != id);
            }
        }))
    }

    /// Swap in a new snapshot and notify every observer. A panicking
    /// observer does not prevent delivery to the rest.
    pub fn commit(&self, next: T) {
        *self.current.lock() = Arc::new(next);

        let observers: Vec<Observer> = self
            .observers
            .lock()
            .iter()
            .map(|(_, observer)| observer.clone())
            .collect();
        for observer in observers {
            if catch_unwind(AssertUnwindSafe(|| observer())).is_err() {
                warn!("snapshot observer panicked during notification");
            }
        }
    }
}
