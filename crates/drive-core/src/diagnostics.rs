//! Bounded log of records dropped by the validator.
//!
//! Dropping a malformed record never changes control flow. This log is only there
//! so data-quality problems can be observed after the fact.

use crate::events::{EngineEvent, EventBus};
use crate::record::Collection;
use crate::stream::ChangeAction;

use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Default number of retained entries.
pub const DEFAULT_CAPACITY: usize = 256;

/// A record the validator refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedRecord {
    pub collection: Collection,
    /// Event action, or `None` when the record came from a full listing.
    pub action: Option<ChangeAction>,
    /// Id of the raw record, when it had one.
    pub record_id: Option<String>,
    pub reason: String,
}

/// Shared, bounded diagnostics sink. Oldest entries are evicted first.
pub struct Diagnostics {
    entries: Mutex<VecDeque<SkippedRecord>>,
    capacity: usize,
    events: Option<Arc<EventBus<EngineEvent>>>,
}

impl Diagnostics {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            capacity,
            events: None,
        }
    }

    /// Also publish every entry as `EngineEvent::RecordSkipped`.
    pub fn with_events(mut self, events: Arc<EventBus<EngineEvent>>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn record(&self, skipped: SkippedRecord) {
        debug!(
            "Dropped {} record {:?}: {}",
            skipped.collection, skipped.record_id, skipped.reason
        );

        if let Some(events) = &self.events {
            events.emit(EngineEvent::RecordSkipped {
                collection: skipped.collection,
                action: skipped.action,
                reason: skipped.reason.clone(),
            });
        }

        if self.capacity == 0 {
            return;
        }
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        while entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(skipped);
    }

    /// Retained entries, oldest first.
    pub fn entries(&self) -> Vec<SkippedRecord> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    /// Take every retained entry, leaving the log empty.
    pub fn drain(&self) -> Vec<SkippedRecord> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
