//! RemoteStore trait abstraction for the request/response API.
//!
//! Implementations:
//! - `InMemoryRemote` - For testing and fixture-driven sessions. Also acts as the
//!   change stream, publishing an event for every write it accepts.

use crate::events::{EventBus, Subscription};
use crate::record::{Collection, raw_record_id};
use crate::stream::{ChangeAction, ChangeEvent, ChangeStream, EventHandler};

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    #[error("Record not found: {collection}/{id}")]
    NotFound { collection: Collection, id: String },

    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Remote unavailable: {0}")]
    Unavailable(String),

    #[error("Malformed response: {0}")]
    Malformed(String),
}

pub type Result<T> = std::result::Result<T, RemoteError>;

/// Options for resolving a blob URL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlobOptions {
    /// Thumbnail variant, e.g. `"100x100"`. `None` requests the original.
    pub thumb: Option<String>,
}

/// Remote record store.
///
/// Records cross this boundary untyped; callers validate what comes back.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Fetch every record of a collection, newest `created` first.
    async fn list(&self, collection: Collection) -> Result<Vec<Value>>;

    /// Create a record. Returns the stored record, including its assigned id.
    async fn create(&self, collection: Collection, data: Value) -> Result<Value>;

    /// Apply a partial update to a record. Returns the stored record.
    async fn update(&self, collection: Collection, id: &str, patch: Value) -> Result<Value>;

    /// Delete a record.
    async fn delete(&self, collection: Collection, id: &str) -> Result<()>;

    /// URL of the blob referenced by `record[field]`.
    fn resolve_blob_url(
        &self,
        collection: Collection,
        record: &Value,
        field: &str,
        options: &BlobOptions,
    ) -> Result<String>;
}

#[async_trait]
impl<T: RemoteStore + ?Sized> RemoteStore for Arc<T> {
    async fn list(&self, collection: Collection) -> Result<Vec<Value>> {
        (**self).list(collection).await
    }

    async fn create(&self, collection: Collection, data: Value) -> Result<Value> {
        (**self).create(collection, data).await
    }

    async fn update(&self, collection: Collection, id: &str, patch: Value) -> Result<Value> {
        (**self).update(collection, id, patch).await
    }

    async fn delete(&self, collection: Collection, id: &str) -> Result<()> {
        (**self).delete(collection, id).await
    }

    fn resolve_blob_url(
        &self,
        collection: Collection,
        record: &Value,
        field: &str,
        options: &BlobOptions,
    ) -> Result<String> {
        (**self).resolve_blob_url(collection, record, field, options)
    }
}

/// In-memory remote for testing.
///
/// Keeps records per collection in insertion order. Every accepted write is
/// published on the collection's change stream, mirroring how a live backend
/// echoes mutations back to subscribers.
pub struct InMemoryRemote {
    records: RwLock<HashMap<Collection, Vec<Value>>>,
    streams: HashMap<Collection, Arc<EventBus<ChangeEvent>>>,
    /// Errors returned by upcoming writes, oldest first
    injected: RwLock<VecDeque<RemoteError>>,
    base_url: String,
}

impl InMemoryRemote {
    pub fn new() -> Self {
        Self::with_base_url("http://127.0.0.1:8090")
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        let streams = Collection::ALL
            .iter()
            .map(|c| (*c, Arc::new(EventBus::new())))
            .collect();
        Self {
            records: RwLock::new(HashMap::new()),
            streams,
            injected: RwLock::new(VecDeque::new()),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Replace a collection's records without publishing events.
    pub fn seed(&self, collection: Collection, records: Vec<Value>) {
        self.records
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(collection, records);
    }

    /// Current records of a collection.
    pub fn records(&self, collection: Collection) -> Vec<Value> {
        self.records
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&collection)
            .cloned()
            .unwrap_or_default()
    }

    /// Make the next write fail with `error`. Calls queue up.
    pub fn fail_next_write(&self, error: RemoteError) {
        self.injected
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(error);
    }

    /// Number of live stream subscribers for a collection.
    pub fn subscriber_count(&self, collection: Collection) -> usize {
        self.streams
            .get(&collection)
            .map(|bus| bus.subscriber_count())
            .unwrap_or(0)
    }

    /// Apply a change that originated elsewhere (another session) and publish it.
    ///
    /// The payload is stored as given, so malformed records reach subscribers
    /// exactly like they would from a live backend.
    pub fn publish(&self, collection: Collection, event: ChangeEvent) {
        {
            let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
            let list = records.entry(collection).or_default();
            match (event.action, event.record_id()) {
                (ChangeAction::Create, _) => list.push(event.record.clone()),
                (ChangeAction::Update, Some(id)) => {
                    list.retain(|r| raw_record_id(r) != Some(id));
                    list.push(event.record.clone());
                }
                (ChangeAction::Delete, Some(id)) => {
                    list.retain(|r| raw_record_id(r) != Some(id));
                }
                (_, None) => {}
            }
        }
        self.emit(collection, event);
    }

    fn emit(&self, collection: Collection, event: ChangeEvent) {
        if let Some(bus) = self.streams.get(&collection) {
            bus.emit(event);
        }
    }

    fn take_injected(&self) -> Result<()> {
        match self
            .injected
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
        {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn now() -> String {
        Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    fn new_id() -> String {
        let id = uuid::Uuid::new_v4().simple().to_string();
        id[..15].to_string()
    }

    fn object(value: Value) -> Result<Map<String, Value>> {
        match value {
            Value::Object(map) => Ok(map),
            other => Err(RemoteError::Rejected(format!(
                "expected a JSON object, got {other}"
            ))),
        }
    }
}

impl Default for InMemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemote {
    async fn list(&self, collection: Collection) -> Result<Vec<Value>> {
        let mut records = self.records(collection);
        records.sort_by(|a, b| created_of(b).cmp(created_of(a)));
        Ok(records)
    }

    async fn create(&self, collection: Collection, data: Value) -> Result<Value> {
        self.take_injected()?;
        let mut record = Self::object(data)?;
        let now = Self::now();
        record.insert("id".into(), Value::String(Self::new_id()));
        record.insert("created".into(), Value::String(now.clone()));
        record.insert("updated".into(), Value::String(now));
        let record = Value::Object(record);

        self.records
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(collection)
            .or_default()
            .push(record.clone());
        debug!("Created {}/{}", collection, raw_record_id(&record).unwrap_or(""));

        self.emit(collection, ChangeEvent::create(record.clone()));
        Ok(record)
    }

    async fn update(&self, collection: Collection, id: &str, patch: Value) -> Result<Value> {
        self.take_injected()?;
        let patch = Self::object(patch)?;

        let record = {
            let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
            let list = records.entry(collection).or_default();
            let existing = list
                .iter_mut()
                .find(|r| raw_record_id(r) == Some(id))
                .ok_or_else(|| RemoteError::NotFound {
                    collection,
                    id: id.to_string(),
                })?;
            if let Value::Object(fields) = existing {
                for (key, value) in patch {
                    if key != "id" {
                        fields.insert(key, value);
                    }
                }
                fields.insert("updated".into(), Value::String(Self::now()));
            }
            existing.clone()
        };
        debug!("Updated {}/{}", collection, id);

        self.emit(collection, ChangeEvent::update(record.clone()));
        Ok(record)
    }

    async fn delete(&self, collection: Collection, id: &str) -> Result<()> {
        self.take_injected()?;

        let removed = {
            let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
            let list = records.entry(collection).or_default();
            let position = list
                .iter()
                .position(|r| raw_record_id(r) == Some(id))
                .ok_or_else(|| RemoteError::NotFound {
                    collection,
                    id: id.to_string(),
                })?;
            list.remove(position)
        };
        debug!("Deleted {}/{}", collection, id);

        self.emit(collection, ChangeEvent::delete(removed));
        Ok(())
    }

    fn resolve_blob_url(
        &self,
        collection: Collection,
        record: &Value,
        field: &str,
        options: &BlobOptions,
    ) -> Result<String> {
        let id = raw_record_id(record)
            .ok_or_else(|| RemoteError::Malformed("record has no id".into()))?;
        let blob = record
            .get(field)
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| RemoteError::NotFound {
                collection,
                id: format!("{id}/{field}"),
            })?;

        let mut url = format!("{}/api/files/{}/{}/{}", self.base_url, collection, id, blob);
        if let Some(thumb) = &options.thumb {
            if !is_thumb_size(thumb) {
                return Err(RemoteError::Rejected(format!("invalid thumb size {thumb:?}")));
            }
            url.push_str("?thumb=");
            url.push_str(thumb);
        }
        Ok(url)
    }
}

fn created_of(record: &Value) -> &str {
    record.get("created").and_then(Value::as_str).unwrap_or("")
}

/// `WxH`, optionally followed by one of the crop modes `t`, `b` or `f`.
fn is_thumb_size(thumb: &str) -> bool {
    let dims = thumb.strip_suffix(['t', 'b', 'f']).unwrap_or(thumb);
    match dims.split_once('x') {
        Some((width, height)) => [width, height]
            .iter()
            .all(|part| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit())),
        None => false,
    }
}

#[async_trait]
impl ChangeStream for InMemoryRemote {
    async fn subscribe(
        &self,
        collection: Collection,
        filter: &str,
        on_event: EventHandler,
    ) -> Result<Subscription> {
        let bus = self
            .streams
            .get(&collection)
            .ok_or_else(|| RemoteError::Unavailable(format!("no stream for {collection}")))?;
        let filter = filter.to_string();
        Ok(bus.subscribe(move |event: ChangeEvent| {
            if event.matches(&filter) {
                on_event(event);
            }
        }))
    }
}

#[async_trait]
impl<T: ChangeStream + ?Sized> ChangeStream for Arc<T> {
    async fn subscribe(
        &self,
        collection: Collection,
        filter: &str,
        on_event: EventHandler,
    ) -> Result<Subscription> {
        (**self).subscribe(collection, filter, on_event).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::ALL_RECORDS;
    use serde_json::json;
    use std::sync::Mutex;

    #[tokio::test]
    async fn test_create_assigns_id_and_timestamps() {
        let remote = InMemoryRemote::new();
        let record = remote
            .create(Collection::Directories, json!({"name": "Docs", "parentId": ""}))
            .await
            .unwrap();

        assert_eq!(raw_record_id(&record).map(str::len), Some(15));
        assert!(record["created"].as_str().unwrap().ends_with('Z'));
        assert_eq!(remote.records(Collection::Directories).len(), 1);
    }

    #[tokio::test]
    async fn test_list_is_newest_first() {
        let remote = InMemoryRemote::new();
        remote.seed(
            Collection::Settings,
            vec![
                json!({"id": "old", "created": "2024-01-01T00:00:00.000Z"}),
                json!({"id": "new", "created": "2025-01-01T00:00:00.000Z"}),
                json!({"id": "mid", "created": "2024-06-01T00:00:00.000Z"}),
            ],
        );

        let listed = remote.list(Collection::Settings).await.unwrap();
        let ids: Vec<_> = listed.iter().filter_map(raw_record_id).collect();
        assert_eq!(ids, vec!["new", "mid", "old"]);
    }

    #[test]
    fn test_blob_url_rejects_bad_thumb() {
        let remote = InMemoryRemote::new();
        let record = json!({"id": "f1", "file": "a.png"});
        let thumb = |size: &str| BlobOptions {
            thumb: Some(size.to_string()),
        };

        assert!(remote
            .resolve_blob_url(Collection::Files, &record, "file", &thumb("0x200f"))
            .unwrap()
            .ends_with("?thumb=0x200f"));
        for bad in ["100x100&token=x", "100", "x100", "axb", ""] {
            assert!(matches!(
                remote.resolve_blob_url(Collection::Files, &record, "file", &thumb(bad)),
                Err(RemoteError::Rejected(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_update_merges_patch() {
        let remote = InMemoryRemote::new();
        remote.seed(
            Collection::Files,
            vec![json!({"id": "f1", "name": "a.txt", "isStarred": false})],
        );

        let record = remote
            .update(Collection::Files, "f1", json!({"isStarred": true, "id": "other"}))
            .await
            .unwrap();

        assert_eq!(record["id"], "f1");
        assert_eq!(record["name"], "a.txt");
        assert_eq!(record["isStarred"], true);
    }

    #[tokio::test]
    async fn test_missing_record_errors() {
        let remote = InMemoryRemote::new();
        let err = remote.delete(Collection::Files, "nope").await.unwrap_err();
        assert!(matches!(err, RemoteError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_injected_failure_applies_once() {
        let remote = InMemoryRemote::new();
        remote.fail_next_write(RemoteError::Unavailable("offline".into()));

        assert!(remote.create(Collection::Settings, json!({})).await.is_err());
        assert!(remote.create(Collection::Settings, json!({})).await.is_ok());
    }

    #[tokio::test]
    async fn test_writes_are_published() {
        let remote = InMemoryRemote::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);

        let sub = remote
            .subscribe(
                Collection::Directories,
                ALL_RECORDS,
                Box::new(move |event: ChangeEvent| {
                    seen_clone.lock().unwrap().push(event.action)
                }),
            )
            .await
            .unwrap();

        let record = remote
            .create(Collection::Directories, json!({"name": "Docs"}))
            .await
            .unwrap();
        let id = raw_record_id(&record).unwrap().to_string();
        remote
            .update(Collection::Directories, &id, json!({"name": "Documents"}))
            .await
            .unwrap();
        remote.delete(Collection::Directories, &id).await.unwrap();

        // Other collections don't leak into this stream.
        remote.create(Collection::Files, json!({})).await.unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![ChangeAction::Create, ChangeAction::Update, ChangeAction::Delete]
        );

        drop(sub);
        assert_eq!(remote.subscriber_count(Collection::Directories), 0);
    }

    #[tokio::test]
    async fn test_filtered_subscription() {
        let remote = InMemoryRemote::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);

        let _sub = remote
            .subscribe(
                Collection::Files,
                "f2",
                Box::new(move |event: ChangeEvent| {
                    seen_clone
                        .lock()
                        .unwrap()
                        .push(event.record_id().unwrap_or("").to_string())
                }),
            )
            .await
            .unwrap();

        remote.publish(Collection::Files, ChangeEvent::create(json!({"id": "f1"})));
        remote.publish(Collection::Files, ChangeEvent::create(json!({"id": "f2"})));

        assert_eq!(*seen.lock().unwrap(), vec!["f2".to_string()]);
    }

    #[test]
    fn test_blob_url() {
        let remote = InMemoryRemote::with_base_url("https://drive.example/");
        let record = json!({"id": "f1", "file": "report_abc.pdf"});

        let url = remote
            .resolve_blob_url(Collection::Files, &record, "file", &BlobOptions::default())
            .unwrap();
        assert_eq!(url, "https://drive.example/api/files/files/f1/report_abc.pdf");

        let thumb = BlobOptions {
            thumb: Some("100x100".into()),
        };
        let url = remote
            .resolve_blob_url(Collection::Files, &record, "file", &thumb)
            .unwrap();
        assert!(url.ends_with("?thumb=100x100"));

        let missing = remote.resolve_blob_url(
            Collection::Files,
            &json!({"id": "f1"}),
            "file",
            &BlobOptions::default(),
        );
        assert!(missing.is_err());
    }
}
