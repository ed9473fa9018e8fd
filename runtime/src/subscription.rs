//! Change subscriptions.
//!
//! Listeners are notified after every successful commit with the events that
//! were committed. A listener cannot fail or roll back a dispatch: a panic
//! inside a listener is caught and logged, and the remaining listeners still
//! run.

use flux_capacitor_core::event::Event;
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

/// A change listener.
pub type Listener = Arc<dyn Fn(&[Event]) + Send + Sync>;

/// Identifies a subscription within one store.
///
/// Ids increase monotonically, so ordering by id is registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// The raw id.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

/// Listener registry shared by a store and its subscriptions.
#[derive(Default)]
pub(crate) struct Registry {
    next_id: AtomicU64,
    listeners: Mutex<BTreeMap<SubscriptionId, Listener>>,
}

impl Registry {
    pub(crate) fn insert(&self, listener: Listener) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut listeners = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        listeners.insert(id, listener);
        metrics::gauge!(crate::metrics::SUBSCRIBERS).increment(1.0);
        id
    }

    pub(crate) fn remove(&self, id: SubscriptionId) -> bool {
        let mut listeners = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let removed = listeners.remove(&id).is_some();
        if removed {
            metrics::gauge!(crate::metrics::SUBSCRIBERS).decrement(1.0);
        }
        removed
    }

    fn contains(&self, id: SubscriptionId) -> bool {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Invoke every listener in registration order.
    ///
    /// Listeners are snapshotted and called outside the lock, so a listener
    /// may subscribe or unsubscribe. One that was unsubscribed after the
    /// snapshot is skipped.
    pub(crate) fn notify(&self, events: &[Event]) {
        let snapshot: Vec<(SubscriptionId, Listener)> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, listener)| (*id, Arc::clone(listener)))
            .collect();

        tracing::trace!(listeners = snapshot.len(), "Notifying subscribers");

        for (id, listener) in snapshot {
            if !self.contains(id) {
                continue;
            }
            if catch_unwind(AssertUnwindSafe(|| listener(events))).is_err() {
                tracing::error!(subscription = id.get(), "Subscriber panicked during notification");
                metrics::counter!(crate::metrics::SUBSCRIBER_PANICS).increment(1);
            }
        }
    }
}

// The gauge is shared by every store in the process; each registry only
// ever adds or removes its own listeners.
impl Drop for Registry {
    fn drop(&mut self) {
        let remaining = self
            .listeners
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        if remaining > 0 {
            #[allow(clippy::cast_precision_loss)]
            metrics::gauge!(crate::metrics::SUBSCRIBERS).decrement(remaining as f64);
        }
    }
}

/// Handle returned by `Store::subscribe`.
///
/// Dropping the handle does not unsubscribe; call
/// [`unsubscribe`](Subscription::unsubscribe).
pub struct Subscription {
    id: SubscriptionId,
    registry: Weak<Registry>,
    active: AtomicBool,
}

impl Subscription {
    pub(crate) fn new(id: SubscriptionId, registry: &Arc<Registry>) -> Self {
        Self {
            id,
            registry: Arc::downgrade(registry),
            active: AtomicBool::new(true),
        }
    }

    /// The subscription id.
    #[must_use]
    pub const fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Stop receiving notifications.
    ///
    /// Idempotent: only the first call has an effect. Returns whether this
    /// call removed the listener.
    pub fn unsubscribe(&self) -> bool {
        if !self.active.swap(false, Ordering::AcqRel) {
            return false;
        }
        self.registry
            .upgrade()
            .is_some_and(|registry| registry.remove(self.id))
    }

    /// Whether the listener is still registered.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire) && self.registry.strong_count() > 0
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}
