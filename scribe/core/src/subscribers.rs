//! Subscriber Registry
//!
//! Observer sets owned by a [`StreamClient`](crate::StreamClient). Each set
//! maps a [`SubscriptionId`] to a callback and fans every published value out
//! to all registered callbacks.
//!
//! # Dispatch Rules
//!
//! - The callback list is snapshotted before iterating, so a callback may
//!   unsubscribe itself (or anyone else) while being called. Removals take
//!   effect from the next dispatch.
//! - The lock is never held while a callback runs.
//! - A callback that panics is logged and skipped; the remaining callbacks
//!   still receive the value.

use std::collections::BTreeMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

/// Identifier of one registration
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw numeric value
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

type Registry<T> = Mutex<BTreeMap<SubscriptionId, Callback<T>>>;

/// Removal hook, erased over the value type so [`Subscription`] is not generic
trait Unregister: Send + Sync {
    fn unregister(&self, id: SubscriptionId) -> bool;
}

impl<T> Unregister for Registry<T> {
    fn unregister(&self, id: SubscriptionId) -> bool {
        self.lock().remove(&id).is_some()
    }
}

/// Outcome of one dispatch
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DispatchResult {
    /// Callbacks that returned normally
    pub delivered: usize,
    /// Callbacks that panicked
    pub panicked: Vec<SubscriptionId>,
}

/// A set of callbacks interested in values of type `T`
pub struct SubscriberSet<T> {
    inner: Arc<Registry<T>>,
}

impl<T> Default for SubscriberSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for SubscriberSet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberSet")
            .field("len", &self.len())
            .finish()
    }
}

impl<T> SubscriberSet<T> {
    /// Create an empty set
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    /// Number of live registrations
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether nobody is subscribed
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

impl<T: 'static> SubscriberSet<T> {
    /// Register a callback
    ///
    /// The callback stays registered until the returned [`Subscription`] is
    /// unsubscribed or dropped.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = SubscriptionId::next();
        self.inner.lock().insert(id, Arc::new(callback));

        let registry: Arc<dyn Unregister> = self.inner.clone();
        Subscription {
            id,
            registry: Arc::downgrade(&registry),
        }
    }

    /// Deliver `value` to every callback registered at the time of the call
    pub fn dispatch(&self, value: &T) -> DispatchResult {
        // Snapshot so callbacks can (un)subscribe without deadlocking
        let callbacks: Vec<(SubscriptionId, Callback<T>)> = {
            let inner = self.inner.lock();
            inner.iter().map(|(id, cb)| (*id, Arc::clone(cb))).collect()
        };

        let mut result = DispatchResult::default();
        for (id, callback) in callbacks {
            match catch_unwind(AssertUnwindSafe(|| callback(value))) {
                Ok(()) => result.delivered += 1,
                Err(_) => {
                    tracing::warn!(subscription = %id, "Subscriber panicked, continuing delivery");
                    result.panicked.push(id);
                }
            }
        }
        result
    }
}

/// Handle to one registration
///
/// Dropping the handle unsubscribes. Use [`Subscription::detach`] to keep
/// the callback registered for the lifetime of its set.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    id: SubscriptionId,
    registry: Weak<dyn Unregister>,
}

impl Subscription {
    /// The registration's identifier
    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Remove the callback
    ///
    /// Returns `true` if this call removed it, `false` if it was already gone
    /// (or the set itself no longer exists). Safe to call from inside the
    /// callback being removed.
    pub fn unsubscribe(&self) -> bool {
        self.registry
            .upgrade()
            .is_some_and(|registry| registry.unregister(self.id))
    }

    /// Keep the callback registered without holding the handle
    pub fn detach(mut self) {
        self.registry = Weak::<Registry<()>>::new();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> (Arc<AtomicUsize>, impl Fn(&u32) + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        (count, move |_: &u32| {
            c.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_dispatch_reaches_every_subscriber() {
        let set = SubscriberSet::<u32>::new();
        let (a, cb_a) = counter();
        let (b, cb_b) = counter();
        let _sa = set.subscribe(cb_a);
        let _sb = set.subscribe(cb_b);

        let result = set.dispatch(&1);
        assert_eq!(result.delivered, 2);
        assert!(result.panicked.is_empty());
        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let set = SubscriberSet::<u32>::new();
        let (count, cb) = counter();
        let sub = set.subscribe(cb);

        assert!(sub.unsubscribe());
        assert!(!sub.unsubscribe());
        set.dispatch(&1);
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(set.is_empty());
    }

    #[test]
    fn test_drop_unsubscribes_and_detach_keeps() {
        let set = SubscriberSet::<u32>::new();
        let (dropped, cb_dropped) = counter();
        let (kept, cb_kept) = counter();

        drop(set.subscribe(cb_dropped));
        set.subscribe(cb_kept).detach();

        set.dispatch(&1);
        assert_eq!(dropped.load(Ordering::SeqCst), 0);
        assert_eq!(kept.load(Ordering::SeqCst), 1);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_unsubscribe_from_inside_callback() {
        let set = SubscriberSet::<u32>::new();
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let calls = Arc::new(AtomicUsize::new(0));

        let slot_in = Arc::clone(&slot);
        let calls_in = Arc::clone(&calls);
        let sub = set.subscribe(move |_| {
            calls_in.fetch_add(1, Ordering::SeqCst);
            if let Some(me) = slot_in.lock().take() {
                assert!(me.unsubscribe());
            }
        });
        *slot.lock() = Some(sub);

        let (other, cb_other) = counter();
        let _other = set.subscribe(cb_other);

        set.dispatch(&1);
        set.dispatch(&2);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(other.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_panicking_subscriber_does_not_block_others() {
        let set = SubscriberSet::<u32>::new();
        let bad = set.subscribe(|_| panic!("subscriber bug"));
        let (count, cb) = counter();
        let _good = set.subscribe(cb);

        let result = set.dispatch(&7);
        assert_eq!(result.delivered, 1);
        assert_eq!(result.panicked, vec![bad.id()]);
        assert_eq!(count.load(Ordering::SeqCst), 1);

        // still registered, still isolated
        set.dispatch(&8);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_subscription_outlives_set() {
        let set = SubscriberSet::<u32>::new();
        let (_count, cb) = counter();
        let sub = set.subscribe(cb);
        drop(set);
        assert!(!sub.unsubscribe());
    }
}
