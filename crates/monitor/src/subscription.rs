//! Callback subscriptions on accepted snapshots.
//!
//! [`Listeners`] is the registry; [`Subscription`] is the guard a
//! subscriber holds. Dropping the guard, or calling
//! [`Subscription::unsubscribe`] any number of times, removes the
//! callback exactly once.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use jobsync_core::job_status::JobStatus;
use parking_lot::Mutex;

/// A snapshot callback.
pub type Listener = Arc<dyn Fn(&JobStatus) + Send + Sync>;

/// Registry of snapshot callbacks, in subscription order.
#[derive(Default)]
pub struct Listeners {
    next_id: AtomicU64,
    entries: Mutex<BTreeMap<u64, Listener>>,
}

impl Listeners {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback and return its guard.
    pub fn subscribe(self: &Arc<Self>, listener: Listener) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.lock().insert(id, listener);
        Subscription {
            id,
            registry: Mutex::new(Some(Arc::downgrade(self))),
        }
    }

    /// Invoke every callback with `status`.
    ///
    /// Callbacks run on a copy of the registry, so they may subscribe or
    /// unsubscribe without deadlocking.
    pub fn notify(&self, status: &JobStatus) {
        let listeners: Vec<Listener> = self.entries.lock().values().cloned().collect();
        for listener in listeners {
            listener(status);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn remove(&self, id: u64) {
        self.entries.lock().remove(&id);
    }
}

/// Guard for a registered callback.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    id: u64,
    registry: Mutex<Option<Weak<Listeners>>>,
}

impl Subscription {
    /// Remove the callback. Safe to call repeatedly.
    pub fn unsubscribe(&self) {
        let registry = self.registry.lock().take();
        if let Some(listeners) = registry.and_then(|weak| weak.upgrade()) {
            listeners.remove(self.id);
        }
    }

    pub fn is_active(&self) -> bool {
        self.registry
            .lock()
            .as_ref()
            .is_some_and(|weak| weak.strong_count() > 0)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
