//! Listener registry for state-change notifications.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use pacer_proto::SessionSnapshot;
use parking_lot::Mutex;
use tracing::warn;

pub type Listener = Arc<dyn Fn(&SessionSnapshot) + Send + Sync>;

#[derive(Default)]
pub(crate) struct ListenerRegistry {
    next_id: u64,
    listeners: BTreeMap<u64, Listener>,
}

impl ListenerRegistry {
    fn insert(&mut self, listener: Listener) -> u64 {
        // Ids are never reused, so a stale handle cannot remove a newer listener.
        let id = self.next_id;
        self.next_id += 1;
        self.listeners.insert(id, listener);
        id
    }

    fn remove(&mut self, id: u64) -> bool {
        self.listeners.remove(&id).is_some()
    }

    pub(crate) fn clear(&mut self) {
        self.listeners.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.listeners.len()
    }

    pub(crate) fn listeners(&self) -> Vec<Listener> {
        self.listeners.values().cloned().collect()
    }
}

pub(crate) type SharedRegistry = Arc<Mutex<ListenerRegistry>>;

pub(crate) fn register(registry: &SharedRegistry, listener: Listener) -> Subscription {
    let id = registry.lock().insert(listener);
    Subscription {
        registry: Arc::downgrade(registry),
        id,
        active: AtomicBool::new(true),
    }
}

/// Handle to a registered listener.
///
/// Dropping the handle unsubscribes. `unsubscribe` may be called any number of
/// times, including after the store itself is gone.
#[must_use = "dropping a Subscription unsubscribes its listener"]
pub struct Subscription {
    registry: Weak<Mutex<ListenerRegistry>>,
    id: u64,
    active: AtomicBool,
}

impl Subscription {
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.lock().remove(self.id);
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire) && self.registry.strong_count() > 0
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Calls each listener with `snapshot`. A panicking listener is logged and
/// skipped; the rest still run. Returns how many listeners failed.
pub(crate) fn deliver(listeners: &[Listener], snapshot: &SessionSnapshot) -> usize {
    let mut failed = 0;
    for listener in listeners {
        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| (**listener)(snapshot))) {
            failed += 1;
            let reason = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic".to_string());
            warn!(target = "pacer.store", reason = %reason, "state listener panicked");
        }
    }
    failed
}
