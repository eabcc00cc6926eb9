//! Event infrastructure for drive-core.
//!
//! `EventBus<E>` fans an event out to every live subscriber. Subscribing returns a
//! [`Subscription`] that unsubscribes when dropped, which is how both collection
//! change callbacks and remote change streams are released on teardown.
//!
//! `EngineEvent` is the monitoring feed published by the sync engine.

use crate::record::Collection;
use crate::stream::ChangeAction;

use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, Weak};

/// Monitoring events emitted by the sync engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EngineEvent {
    /// A collection snapshot changed.
    SnapshotChanged {
        collection: Collection,
        /// Number of records after the change.
        len: usize,
    },
    /// A record was dropped by the validator.
    RecordSkipped {
        collection: Collection,
        /// Event action, or `None` for the initial full listing.
        action: Option<ChangeAction>,
        reason: String,
    },
    /// The directory tree could not be rebuilt from the current snapshot.
    TreeRebuildFailed { reason: String },
    /// An optimistic star toggle was rolled back after the remote refused it.
    StarReverted {
        collection: Collection,
        id: String,
    },
}

trait Unsubscribe: Send + Sync {
    fn unsubscribe(&self, id: usize);
}

/// Subscription handle that unsubscribes automatically when dropped.
///
/// Follows the disposer pattern: hold this value to keep receiving events,
/// drop it (or let it go out of scope) to unsubscribe.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    bus: Weak<dyn Unsubscribe>,
    id: usize,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

type Callback<E> = Arc<dyn Fn(E) + Send + Sync>;

/// Event bus for publishing events to subscribers.
///
/// Wrap in `Arc` to enable subscriptions.
pub struct EventBus<E> {
    callbacks: RwLock<Vec<(usize, Callback<E>)>>,
    next_id: AtomicUsize,
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        Self {
            callbacks: RwLock::new(Vec::new()),
            next_id: AtomicUsize::new(0),
        }
    }
}

impl<E: Clone + Send + 'static> EventBus<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events. Returns `Subscription` that unsubscribes on drop.
    ///
    /// Requires `self` to be wrapped in `Arc`.
    pub fn subscribe(
        self: &Arc<Self>,
        callback: impl Fn(E) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(callback)));
        let bus: Weak<dyn Unsubscribe> = Arc::downgrade(self) as Weak<dyn Unsubscribe>;
        Subscription { bus, id }
    }

    /// Emit an event to all subscribers.
    pub fn emit(&self, event: E) {
        // Clone the callback list to prevent deadlock if a callback calls subscribe.
        let callbacks: Vec<_> = self
            .callbacks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();

        for callback in callbacks {
            callback(event.clone());
        }
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.callbacks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

impl<E: Send + 'static> Unsubscribe for EventBus<E> {
    fn unsubscribe(&self, id: usize) {
        // emit releases its read guard before running callbacks, so waiting
        // here can't deadlock against a callback that drops its subscription.
        self.callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|(i, _)| *i != id);
    }
}
