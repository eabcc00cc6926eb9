//! Change stream: the push channel delivering record lifecycle events.
//!
//! Implementations:
//! - `InMemoryRemote` - For testing and fixture-driven sessions
//!
//! A stream subscription is scoped: the returned [`Subscription`] stops delivery
//! when dropped, so background events never reach state nobody observes.

use crate::events::Subscription;
use crate::record::{Collection, raw_record_id};
use crate::remote::Result;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Subscription filter matching every record of a collection.
pub const ALL_RECORDS: &str = "*";

/// Record lifecycle action carried by a change event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    Create,
    Update,
    Delete,
}

/// A change pushed by the remote: `{"action": ..., "record": {...}}`.
///
/// The record is untyped; it is validated when applied. Delete events only need
/// to carry the record id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub action: ChangeAction,
    pub record: Value,
}

impl ChangeEvent {
    pub fn create(record: Value) -> Self {
        Self {
            action: ChangeAction::Create,
            record,
        }
    }

    pub fn update(record: Value) -> Self {
        Self {
            action: ChangeAction::Update,
            record,
        }
    }

    pub fn delete(record: Value) -> Self {
        Self {
            action: ChangeAction::Delete,
            record,
        }
    }

    /// Id of the affected record, if the payload carries one.
    pub fn record_id(&self) -> Option<&str> {
        raw_record_id(&self.record)
    }

    /// Whether this event passes a subscription filter (`*` or a record id).
    pub fn matches(&self, filter: &str) -> bool {
        filter == ALL_RECORDS || self.record_id() == Some(filter)
    }
}

/// Callback invoked for each delivered event, in delivery order.
pub type EventHandler = Box<dyn Fn(ChangeEvent) + Send + Sync>;

/// Push channel for one or more remote collections.
#[async_trait]
pub trait ChangeStream: Send + Sync {
    /// Start receiving events for `collection` that pass `filter`.
    ///
    /// Delivery stops when the returned handle is dropped.
    async fn subscribe(
        &self,
        collection: Collection,
        filter: &str,
        on_event: EventHandler,
    ) -> Result<Subscription>;
}
