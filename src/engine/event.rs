//! Multicast refresh events.
//!
//! Producers notify their dependents through `Event`: each notification carries
//! the producer's node id and the half-open `[start, end)` window of rows that
//! just became valid. The registry only holds weak references to callbacks; the
//! subscribing node owns its callback, so dropping the subscriber silently drops
//! the subscription on the next fire.

use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-unique identity of a graph node. Dependents key their bookkeeping on
/// it, and every refresh notification names its origin with one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

impl NodeId {
    pub(crate) fn next() -> Self {
        NodeId(NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// A refresh callback: `(origin, start, end)` over the origin's own indices.
pub type RefreshCallback = Rc<dyn Fn(NodeId, usize, usize)>;

/// Graph nodes that can be torn down when an upstream node is disposed.
pub(crate) trait Disposable {
    fn dispose_now(&self);
}

struct Subscription {
    callback: Weak<dyn Fn(NodeId, usize, usize)>,
    /// Set when the subscriber is an indicator, so disposal can cascade to it.
    receiver: Option<Weak<dyn Disposable>>,
}

/// Register/unregister/fire multicast event. Callback identity (the `Rc`
/// allocation) deduplicates: registering the same callback twice is a no-op and
/// unregistering twice is harmless.
#[derive(Default)]
pub struct Event {
    subscriptions: RefCell<Vec<Subscription>>,
}

impl Event {
    pub fn new() -> Self {
        Event { subscriptions: RefCell::new(Vec::new()) }
    }

    pub fn register(&self, callback: &RefreshCallback) {
        self.register_dependent(callback, None);
    }

    pub(crate) fn register_dependent(
        &self,
        callback: &RefreshCallback,
        receiver: Option<Weak<dyn Disposable>>,
    ) {
        let mut subscriptions = self.subscriptions.borrow_mut();
        let already_there = subscriptions
            .iter()
            .any(|s| s.callback.upgrade().is_some_and(|held| Rc::ptr_eq(&held, callback)));
        if already_there {
            return;
        }
        subscriptions.push(Subscription { callback: Rc::downgrade(callback), receiver });
    }

    pub fn unregister(&self, callback: &RefreshCallback) {
        self.subscriptions
            .borrow_mut()
            .retain(|s| !s.callback.upgrade().is_some_and(|held| Rc::ptr_eq(&held, callback)));
    }

    /// Live callbacks, pruning entries whose subscriber has gone away. Firing is
    /// always "collect, drop every borrow, then invoke" so that subscribers can
    /// re-enter their producers while handling the notification.
    pub(crate) fn callbacks(&self) -> Vec<RefreshCallback> {
        let mut subscriptions = self.subscriptions.borrow_mut();
        subscriptions.retain(|s| s.callback.strong_count() > 0);
        subscriptions.iter().filter_map(|s| s.callback.upgrade()).collect()
    }

    /// Live dependents registered for disposal cascade.
    pub(crate) fn dependents(&self) -> Vec<Rc<dyn Disposable>> {
        self.subscriptions
            .borrow()
            .iter()
            .filter_map(|s| s.receiver.as_ref().and_then(Weak::upgrade))
            .collect()
    }

    /// Invoke every live callback. Must not be called while the owning node is
    /// mutably borrowed; node internals fire through `callbacks()` instead.
    pub fn trigger(&self, origin: NodeId, start: usize, end: usize) {
        for callback in self.callbacks() {
            callback(origin, start, end);
        }
    }
}
