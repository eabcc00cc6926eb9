//! CollectionMirror: local snapshot of one remote collection.
//!
//! The mirror is the only writer of its snapshot. It is seeded from a full listing
//! and then kept current by applying change events in delivery order:
//!
//! - `create` appends (duplicate ids are kept, not merged)
//! - `update` removes any entry with the same id and appends the new one, so
//!   touched records move to the end of the snapshot
//! - `delete` removes entries with the id, or does nothing
//!
//! Invalid payloads are dropped without touching state. After every change the
//! subscribers receive the complete snapshot, never a diff.

use crate::diagnostics::{Diagnostics, SkippedRecord};
use crate::events::{EventBus, Subscription};
use crate::record::{Record, raw_record_id};
use crate::stream::{ChangeAction, ChangeEvent};

use serde_json::Value;
use std::sync::Arc;

/// Immutable view of a collection at one point in time.
pub type Snapshot<T> = Arc<Vec<T>>;

pub struct CollectionMirror<T: Record> {
    records: Vec<T>,
    listeners: Arc<EventBus<Snapshot<T>>>,
    diagnostics: Arc<Diagnostics>,
}

impl<T: Record> CollectionMirror<T> {
    pub fn new() -> Self {
        Self::with_diagnostics(Arc::new(Diagnostics::default()))
    }

    /// Create a mirror that reports dropped records to a shared sink.
    pub fn with_diagnostics(diagnostics: Arc<Diagnostics>) -> Self {
        Self {
            records: Vec::new(),
            listeners: Arc::new(EventBus::new()),
            diagnostics,
        }
    }

    /// Register a change callback. It runs synchronously after each change,
    /// with the full updated snapshot.
    pub fn subscribe(&self, callback: impl Fn(Snapshot<T>) + Send + Sync + 'static) -> Subscription {
        self.listeners.subscribe(callback)
    }

    /// Records in snapshot order.
    pub fn records(&self) -> &[T] {
        &self.records
    }

    pub fn snapshot(&self) -> Snapshot<T> {
        Arc::new(self.records.clone())
    }

    /// First record with this id.
    pub fn get(&self, id: &str) -> Option<&T> {
        self.records.iter().find(|r| r.id() == id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn diagnostics(&self) -> &Arc<Diagnostics> {
        &self.diagnostics
    }

    /// Replace the snapshot wholesale and notify once.
    pub fn initialize(&mut self, records: Vec<T>) {
        self.records = records;
        self.notify();
    }

    /// Validate a full listing, drop what fails, and replace the snapshot with the rest.
    pub fn initialize_raw(&mut self, raw: &[Value]) {
        let records = raw
            .iter()
            .filter_map(|value| self.validate(None, value))
            .collect();
        self.initialize(records);
    }

    /// Apply one change event. Returns whether the snapshot changed.
    pub fn apply_event(&mut self, event: &ChangeEvent) -> bool {
        let changed = match event.action {
            ChangeAction::Create => match self.validate(Some(event.action), &event.record) {
                Some(record) => {
                    self.records.push(record);
                    true
                }
                None => false,
            },
            ChangeAction::Update => match self.validate(Some(event.action), &event.record) {
                Some(record) => {
                    self.records.retain(|r| r.id() != record.id());
                    self.records.push(record);
                    true
                }
                None => false,
            },
            ChangeAction::Delete => match raw_record_id(&event.record) {
                Some(id) => {
                    let before = self.records.len();
                    self.records.retain(|r| r.id() != id);
                    self.records.len() != before
                }
                None => {
                    self.skip(Some(event.action), &event.record, "Record has no id".into());
                    false
                }
            },
        };

        if changed {
            self.notify();
        }
        changed
    }

    fn validate(&self, action: Option<ChangeAction>, raw: &Value) -> Option<T> {
        match T::validate(raw) {
            Ok(record) => Some(record),
            Err(e) => {
                self.skip(action, raw, e.to_string());
                None
            }
        }
    }

    fn skip(&self, action: Option<ChangeAction>, raw: &Value, reason: String) {
        self.diagnostics.record(SkippedRecord {
            collection: T::COLLECTION,
            action,
            record_id: raw_record_id(raw).map(str::to_string),
            reason,
        });
    }

    fn notify(&self) {
        self.listeners.emit(self.snapshot());
    }
}

impl<T: Record> Default for CollectionMirror<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Directory, FileRecord};
    use serde_json::json;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn dir(id: &str, name: &str) -> Value {
        json!({
            "id": id,
            "name": name,
            "parentId": "",
            "isStarred": false,
            "created": "2024-01-01",
            "updated": "2024-01-01"
        })
    }

    fn ids(mirror: &CollectionMirror<Directory>) -> Vec<&str> {
        mirror.records().iter().map(|d| d.id.as_str()).collect()
    }

    #[test]
    fn test_initialize_drops_invalid_and_notifies_once() {
        let mut mirror = CollectionMirror::<Directory>::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);
        let _sub = mirror.subscribe(move |_| {
            calls_clone.fetch_add(1, Ordering::Relaxed);
        });

        mirror.initialize_raw(&[dir("a", "Docs"), json!({"id": "b"}), dir("c", "Music")]);

        assert_eq!(ids(&mirror), vec!["a", "c"]);
        assert_eq!(calls.load(Ordering::Relaxed), 1);
        assert_eq!(mirror.diagnostics().len(), 1);
    }

    #[test]
    fn test_create_appends_without_dedup() {
        let mut mirror = CollectionMirror::<Directory>::new();
        assert!(mirror.apply_event(&ChangeEvent::create(dir("a", "Docs"))));
        assert!(mirror.apply_event(&ChangeEvent::create(dir("a", "Docs"))));
        assert_eq!(ids(&mirror), vec!["a", "a"]);
    }

    #[test]
    fn test_update_moves_record_to_end() {
        let mut mirror = CollectionMirror::<Directory>::new();
        mirror.initialize_raw(&[dir("x", "X"), dir("y", "Y")]);

        assert!(mirror.apply_event(&ChangeEvent::update(dir("x", "X2"))));

        assert_eq!(ids(&mirror), vec!["y", "x"]);
        assert_eq!(mirror.get("x").unwrap().name, "X2");
    }

    #[test]
    fn test_update_unknown_id_appends() {
        let mut mirror = CollectionMirror::<Directory>::new();
        mirror.initialize_raw(&[dir("x", "X")]);
        assert!(mirror.apply_event(&ChangeEvent::update(dir("z", "Z"))));
        assert_eq!(ids(&mirror), vec!["x", "z"]);
    }

    #[test]
    fn test_update_collapses_duplicates() {
        let mut mirror = CollectionMirror::<Directory>::new();
        mirror.initialize_raw(&[dir("a", "A"), dir("b", "B"), dir("a", "A")]);
        mirror.apply_event(&ChangeEvent::update(dir("a", "A2")));
        assert_eq!(ids(&mirror), vec!["b", "a"]);
    }

    #[test]
    fn test_delete_by_id_only() {
        let mut mirror = CollectionMirror::<Directory>::new();
        mirror.initialize_raw(&[dir("a", "A"), dir("b", "B")]);

        assert!(mirror.apply_event(&ChangeEvent::delete(json!({"id": "a"}))));
        assert_eq!(ids(&mirror), vec!["b"]);
    }

    #[test]
    fn test_delete_missing_is_silent_noop() {
        let mut mirror = CollectionMirror::<Directory>::new();
        mirror.initialize_raw(&[dir("a", "A")]);
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);
        let _sub = mirror.subscribe(move |_| {
            calls_clone.fetch_add(1, Ordering::Relaxed);
        });

        assert!(!mirror.apply_event(&ChangeEvent::delete(json!({"id": "zzz"}))));
        assert_eq!(calls.load(Ordering::Relaxed), 0);
        assert!(mirror.diagnostics().is_empty());
    }

    #[test]
    fn test_invalid_payload_dropped() {
        let mut mirror = CollectionMirror::<Directory>::new();
        mirror.initialize_raw(&[dir("a", "A")]);
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);
        let _sub = mirror.subscribe(move |_| {
            calls_clone.fetch_add(1, Ordering::Relaxed);
        });

        assert!(!mirror.apply_event(&ChangeEvent::create(json!({"id": "b", "name": 5}))));
        assert!(!mirror.apply_event(&ChangeEvent::update(json!({"id": "a"}))));
        assert!(!mirror.apply_event(&ChangeEvent::delete(json!({}))));

        assert_eq!(ids(&mirror), vec!["a"]);
        assert_eq!(calls.load(Ordering::Relaxed), 0);

        let skipped = mirror.diagnostics().entries();
        assert_eq!(skipped.len(), 3);
        assert_eq!(skipped[1].record_id.as_deref(), Some("a"));
        assert_eq!(skipped[2].action, Some(ChangeAction::Delete));
    }

    #[test]
    fn test_subscribers_receive_full_snapshot() {
        let mut mirror = CollectionMirror::<FileRecord>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        let _sub = mirror.subscribe(move |snapshot: Snapshot<FileRecord>| {
            seen_clone.lock().unwrap().push(snapshot.len());
        });

        let file = |id: &str| {
            json!({
                "id": id, "name": "n", "size": 1, "keywords": "",
                "isStarred": false, "created": "", "updated": ""
            })
        };
        mirror.apply_event(&ChangeEvent::create(file("1")));
        mirror.apply_event(&ChangeEvent::create(file("2")));
        mirror.apply_event(&ChangeEvent::delete(json!({"id": "1"})));

        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 1]);
    }

    #[test]
    fn test_last_event_per_id_wins() {
        let events = vec![
            ChangeEvent::create(dir("a", "A1")),
            ChangeEvent::create(dir("b", "B1")),
            ChangeEvent::update(dir("a", "A2")),
            ChangeEvent::create(dir("c", "C1")),
            ChangeEvent::delete(json!({"id": "b"})),
            ChangeEvent::update(dir("c", "C2")),
        ];

        // Applying in one pass or in arbitrary chunks must converge to the same state.
        let mut whole = CollectionMirror::<Directory>::new();
        for event in &events {
            whole.apply_event(event);
        }
        let mut chunked = CollectionMirror::<Directory>::new();
        for chunk in events.chunks(4) {
            for event in chunk {
                chunked.apply_event(event);
            }
        }

        assert_eq!(whole.records(), chunked.records());
        let names: Vec<_> = whole.records().iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["A2", "C2"]);
    }
}
