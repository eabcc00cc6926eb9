//! SyncEngine: one session's view of the remote drive.
//!
//! The engine owns a mirror per collection and the directory view derived from
//! the directory mirror. It is constructed explicitly with [`SyncEngine::start`]
//! and passed to consumers by reference.
//!
//! Session start lists each collection, seeds its mirror, then subscribes to its
//! change stream. Stream events are queued and applied in delivery order by
//! [`SyncEngine::process_next`] / [`SyncEngine::process_pending`]. Mutations go
//! straight to the remote; their effect reaches the mirrors through the change
//! stream like any other event, so the last event to arrive wins.
//!
//! Dropping the engine drops its stream subscriptions, which stops delivery.
//!
//! Callbacks registered with `on_*_changed` or on [`SyncEngine::events`] run
//! while the engine applies the change. They must not call back into the engine.

use crate::diagnostics::{DEFAULT_CAPACITY, Diagnostics};
use crate::events::{EngineEvent, EventBus, Subscription};
use crate::mirror::{CollectionMirror, Snapshot};
use crate::optimistic::{OptimisticToggle, ToggleOutcome};
use crate::paths::{Breadcrumb, DirectoryEntry, PathIndex, breadcrumbs, normalize_browse_path};
use crate::record::{
    Collection, Directory, FileRecord, NameError, Record, Setting, ValidationError,
    join_keywords, validate_name,
};
use crate::remote::{BlobOptions, RemoteError, RemoteStore};
use crate::search::{SearchHit, search};
use crate::stream::{ALL_RECORDS, ChangeAction, ChangeEvent, ChangeStream};
use crate::tree::{TreeError, TreeNode, build_tree};

use serde::Serialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Invalid name: {0}")]
    InvalidName(#[from] NameError),

    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Invalid record from remote: {0}")]
    Validation(#[from] ValidationError),

    #[error("Not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// Session options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOptions {
    /// Number of skipped-record diagnostics to retain
    pub diagnostics_capacity: usize,
    /// Thumbnail variant requested by [`SyncEngine::blob_url`]
    pub thumb_size: String,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            diagnostics_capacity: DEFAULT_CAPACITY,
            thumb_size: "100x100".to_string(),
        }
    }
}

/// Tree and path index derived from one directory snapshot.
///
/// Rebuilt whole on every directory change and never modified afterwards.
#[derive(Debug, Clone)]
pub struct DirectoryView {
    tree: std::result::Result<Arc<TreeNode>, TreeError>,
    index: Arc<PathIndex>,
}

impl DirectoryView {
    /// Derive the view. If the tree cannot be built, the index holds only the root.
    pub fn build(directories: &[Directory]) -> Self {
        match build_tree(directories) {
            Ok(tree) => {
                let index = PathIndex::new(&tree);
                Self {
                    tree: Ok(Arc::new(tree)),
                    index: Arc::new(index),
                }
            }
            Err(e) => Self {
                tree: Err(e),
                index: Arc::new(PathIndex::new(&TreeNode::root())),
            },
        }
    }

    pub fn tree(&self) -> std::result::Result<Arc<TreeNode>, TreeError> {
        self.tree.clone()
    }

    pub fn path_index(&self) -> Arc<PathIndex> {
        Arc::clone(&self.index)
    }
}

/// Contents of one directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryListing {
    pub directory: DirectoryEntry,
    pub breadcrumbs: Vec<Breadcrumb>,
    /// Child directories in path index order.
    pub directories: Vec<DirectoryEntry>,
    /// Files in snapshot order.
    pub files: Vec<FileRecord>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StarredView {
    pub directories: Vec<DirectoryEntry>,
    pub files: Vec<FileRecord>,
}

/// A record whose star can be toggled.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StarTarget {
    Directory(String),
    File(String),
}

impl StarTarget {
    pub fn collection(&self) -> Collection {
        match self {
            StarTarget::Directory(_) => Collection::Directories,
            StarTarget::File(_) => Collection::Files,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            StarTarget::Directory(id) | StarTarget::File(id) => id,
        }
    }
}

impl From<&Directory> for StarTarget {
    fn from(directory: &Directory) -> Self {
        StarTarget::Directory(directory.id.clone())
    }
}

impl From<&FileRecord> for StarTarget {
    fn from(file: &FileRecord) -> Self {
        StarTarget::File(file.id.clone())
    }
}

type Inbox = mpsc::UnboundedReceiver<(Collection, ChangeEvent)>;

pub struct SyncEngine<R> {
    remote: Arc<R>,
    options: EngineOptions,
    directories: RwLock<CollectionMirror<Directory>>,
    files: RwLock<CollectionMirror<FileRecord>>,
    settings: RwLock<CollectionMirror<Setting>>,
    view: Arc<RwLock<Arc<DirectoryView>>>,
    /// Star controls with the mirror value each one last adopted
    toggles: Mutex<HashMap<StarTarget, (Arc<OptimisticToggle>, bool)>>,
    diagnostics: Arc<Diagnostics>,
    events: Arc<EventBus<EngineEvent>>,
    inbox: tokio::sync::Mutex<Inbox>,
    /// Mirror listeners and stream subscriptions, released on drop
    _subscriptions: Vec<Subscription>,
}

impl<R: RemoteStore + ChangeStream + 'static> SyncEngine<R> {
    /// Start a session: list and subscribe each collection in turn.
    pub async fn start(remote: Arc<R>, options: EngineOptions) -> Result<Self> {
        let events: Arc<EventBus<EngineEvent>> = Arc::new(EventBus::new());
        let diagnostics = Arc::new(
            Diagnostics::new(options.diagnostics_capacity).with_events(Arc::clone(&events)),
        );

        let mut directories = CollectionMirror::<Directory>::with_diagnostics(Arc::clone(&diagnostics));
        let mut files = CollectionMirror::<FileRecord>::with_diagnostics(Arc::clone(&diagnostics));
        let mut settings = CollectionMirror::<Setting>::with_diagnostics(Arc::clone(&diagnostics));

        let view = Arc::new(RwLock::new(Arc::new(DirectoryView::build(&[]))));
        let mut subscriptions = vec![
            directories.subscribe(rebuild_view(Arc::clone(&view), Arc::clone(&events))),
            files.subscribe(announce::<FileRecord>(Arc::clone(&events))),
            settings.subscribe(announce::<Setting>(Arc::clone(&events))),
        ];

        let (tx, rx) = mpsc::unbounded_channel();
        for collection in Collection::ALL {
            let raw = remote.list(collection).await?;
            match collection {
                Collection::Directories => directories.initialize_raw(&raw),
                Collection::Files => files.initialize_raw(&raw),
                Collection::Settings => settings.initialize_raw(&raw),
            }

            let tx = tx.clone();
            let subscription = remote
                .subscribe(
                    collection,
                    ALL_RECORDS,
                    Box::new(move |event: ChangeEvent| {
                        // The receiver only goes away with the engine.
                        let _ = tx.send((collection, event));
                    }),
                )
                .await?;
            subscriptions.push(subscription);
        }

        info!(
            "Session started: {} directories, {} files, {} settings, {} skipped",
            directories.len(),
            files.len(),
            settings.len(),
            diagnostics.len()
        );

        Ok(Self {
            remote,
            options,
            directories: RwLock::new(directories),
            files: RwLock::new(files),
            settings: RwLock::new(settings),
            view,
            toggles: Mutex::new(HashMap::new()),
            diagnostics,
            events,
            inbox: tokio::sync::Mutex::new(rx),
            _subscriptions: subscriptions,
        })
    }

    // ===== Event processing =====

    /// Wait for the next stream event and apply it. Returns its collection, or
    /// `None` once every stream is closed.
    pub async fn process_next(&self) -> Option<Collection> {
        let (collection, event) = self.inbox.lock().await.recv().await?;
        self.apply(collection, &event);
        Some(collection)
    }

    /// Apply every event already delivered, without waiting. Returns the count.
    pub async fn process_pending(&self) -> usize {
        let mut inbox = self.inbox.lock().await;
        let mut applied = 0;
        while let Ok((collection, event)) = inbox.try_recv() {
            self.apply(collection, &event);
            applied += 1;
        }
        applied
    }

    /// Apply one change event to the matching mirror. Returns whether it changed.
    pub fn apply(&self, collection: Collection, event: &ChangeEvent) -> bool {
        debug!(
            "Applying {:?} on {} for {:?}",
            event.action,
            collection,
            event.record_id()
        );
        let changed = match collection {
            Collection::Directories => write(&self.directories).apply_event(event),
            Collection::Files => write(&self.files).apply_event(event),
            Collection::Settings => write(&self.settings).apply_event(event),
        };
        if changed && event.action == ChangeAction::Delete {
            self.forget_control(collection, event.record_id());
        }
        changed
    }

    /// Drop the star control of a record that has left its mirror.
    fn forget_control(&self, collection: Collection, id: Option<&str>) {
        let target = match (collection, id) {
            (Collection::Directories, Some(id)) => StarTarget::Directory(id.to_string()),
            (Collection::Files, Some(id)) => StarTarget::File(id.to_string()),
            _ => return,
        };
        if self.is_starred(&target).is_none() {
            self.toggles
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&target);
        }
    }

    // ===== Snapshots and derived views =====

    pub fn directories(&self) -> Snapshot<Directory> {
        read(&self.directories).snapshot()
    }

    pub fn files(&self) -> Snapshot<FileRecord> {
        read(&self.files).snapshot()
    }

    pub fn settings(&self) -> Snapshot<Setting> {
        read(&self.settings).snapshot()
    }

    /// The current directory view.
    pub fn view(&self) -> Arc<DirectoryView> {
        Arc::clone(&read(&self.view))
    }

    /// The current tree, or the error that prevented building it.
    pub fn tree(&self) -> std::result::Result<Arc<TreeNode>, TreeError> {
        self.view().tree()
    }

    pub fn path_index(&self) -> Arc<PathIndex> {
        self.view().path_index()
    }

    pub fn resolve_by_full_path(&self, full_path: &str) -> Option<Directory> {
        self.path_index()
            .resolve(full_path)
            .map(|entry| entry.directory.clone())
    }

    /// List a directory given a user-supplied path.
    pub fn browse(&self, path: &str) -> Option<DirectoryListing> {
        let index = self.path_index();
        let entry = index.resolve(&normalize_browse_path(path))?;
        Some(self.listing_in(&index, entry))
    }

    /// List a directory by id. The root has the empty id.
    pub fn listing(&self, directory_id: &str) -> Option<DirectoryListing> {
        let index = self.path_index();
        let entry = index.get(directory_id)?;
        Some(self.listing_in(&index, entry))
    }

    fn listing_in(&self, index: &PathIndex, entry: &DirectoryEntry) -> DirectoryListing {
        let id = entry.directory.id.as_str();
        DirectoryListing {
            directory: entry.clone(),
            breadcrumbs: breadcrumbs(&entry.full_path),
            directories: index.children_of(id).cloned().collect(),
            files: read(&self.files)
                .records()
                .iter()
                .filter(|file| file.parent_id.as_deref() == Some(id))
                .cloned()
                .collect(),
        }
    }

    pub fn search(&self, query: &str) -> Vec<SearchHit> {
        let index = self.path_index();
        search(query, read(&self.files).records(), &index)
    }

    pub fn starred(&self) -> StarredView {
        StarredView {
            directories: self.path_index().starred().cloned().collect(),
            files: read(&self.files)
                .records()
                .iter()
                .filter(|file| file.is_starred)
                .cloned()
                .collect(),
        }
    }

    /// Files sorted by creation time, newest first.
    pub fn files_newest_first(&self) -> Vec<FileRecord> {
        let mut files = read(&self.files).records().to_vec();
        files.sort_by(|a, b| b.created.cmp(&a.created));
        files
    }

    /// A file with exactly this name in the directory, if any.
    pub fn file_named_in(&self, directory_id: &str, name: &str) -> Option<FileRecord> {
        read(&self.files)
            .records()
            .iter()
            .find(|file| file.parent_id.as_deref() == Some(directory_id) && file.name == name)
            .cloned()
    }

    /// First setting with this name.
    pub fn setting(&self, name: &str) -> Option<Setting> {
        read(&self.settings)
            .records()
            .iter()
            .find(|setting| setting.setting_name == name)
            .cloned()
    }

    /// Value of a setting that is enabled and non-empty.
    pub fn enabled_setting_value(&self, name: &str) -> Option<String> {
        self.setting(name)
            .filter(|setting| setting.is_enabled && !setting.value.is_empty())
            .map(|setting| setting.value)
    }

    // ===== Stars =====

    /// The optimistic control for a record's star, synced with the mirror.
    pub fn star_control(&self, target: &StarTarget) -> Result<Arc<OptimisticToggle>> {
        let starred = self
            .is_starred(target)
            .ok_or_else(|| EngineError::NotFound(format!("{}/{}", target.collection(), target.id())))?;

        let mut toggles = self.toggles.lock().unwrap_or_else(|e| e.into_inner());
        let (control, seen) = toggles
            .entry(target.clone())
            .or_insert_with(|| (Arc::new(OptimisticToggle::new(starred)), starred));
        // Only a change in the mirror overrides the local value, so a committed
        // toggle holds until its confirmation arrives.
        if *seen != starred && control.observe(starred) {
            *seen = starred;
        }
        Ok(Arc::clone(control))
    }

    /// Flip a record's star locally, then commit it. Reverts if the remote refuses.
    pub async fn toggle_star(&self, target: &StarTarget) -> Result<ToggleOutcome> {
        let control = self.star_control(target)?;
        let collection = target.collection();
        let id = target.id();

        let outcome = control
            .toggle(|next| async move {
                self.remote
                    .update(collection, id, json!({ "isStarred": next }))
                    .await
                    .map(|_| ())
            })
            .await;

        if let ToggleOutcome::Reverted(_) = outcome {
            self.events.emit(EngineEvent::StarReverted {
                collection,
                id: id.to_string(),
            });
        }
        Ok(outcome)
    }

    fn is_starred(&self, target: &StarTarget) -> Option<bool> {
        match target {
            StarTarget::Directory(id) => read(&self.directories).get(id).map(|d| d.is_starred),
            StarTarget::File(id) => read(&self.files).get(id).map(|f| f.is_starred),
        }
    }

    // ===== Mutations =====

    pub async fn create_directory(&self, name: &str, parent_id: &str) -> Result<Directory> {
        let name = name.trim();
        validate_name(name)?;
        let data = json!({ "name": name, "parentId": parent_id, "isStarred": false });
        let created = self.remote.create(Collection::Directories, data).await?;
        info!("Created directory {} under {:?}", name, parent_id);
        Ok(Directory::validate(&created)?)
    }

    pub async fn rename_directory(&self, id: &str, name: &str) -> Result<Directory> {
        let name = name.trim();
        validate_name(name)?;
        self.update_record(Collection::Directories, id, json!({ "name": name }))
            .await
    }

    /// Delete one directory. Children are not touched and become orphans.
    pub async fn delete_directory(&self, id: &str) -> Result<()> {
        self.remote.delete(Collection::Directories, id).await?;
        info!("Deleted directory {}", id);
        Ok(())
    }

    pub async fn rename_file(&self, id: &str, name: &str) -> Result<FileRecord> {
        let name = name.trim();
        validate_name(name)?;
        self.update_record(Collection::Files, id, json!({ "name": name }))
            .await
    }

    pub async fn delete_file(&self, id: &str) -> Result<()> {
        self.remote.delete(Collection::Files, id).await?;
        info!("Deleted file {}", id);
        Ok(())
    }

    pub async fn set_file_keywords<S: AsRef<str>>(
        &self,
        id: &str,
        keywords: &[S],
    ) -> Result<FileRecord> {
        let keywords = join_keywords(keywords);
        self.update_record(Collection::Files, id, json!({ "keywords": keywords }))
            .await
    }

    pub async fn create_setting(&self, name: &str, enabled: bool) -> Result<Setting> {
        let data = json!({ "settingName": name, "isEnabled": enabled, "value": "" });
        let created = self.remote.create(Collection::Settings, data).await?;
        Ok(Setting::validate(&created)?)
    }

    pub async fn update_setting(&self, id: &str, enabled: bool, value: &str) -> Result<Setting> {
        self.update_record(
            Collection::Settings,
            id,
            json!({ "isEnabled": enabled, "value": value }),
        )
        .await
    }

    async fn update_record<T: Record>(&self, collection: Collection, id: &str, patch: Value) -> Result<T> {
        let updated = self.remote.update(collection, id, patch).await?;
        Ok(T::validate(&updated)?)
    }

    /// URL of a file's stored blob, or of its thumbnail.
    pub fn blob_url(&self, file: &FileRecord, thumbnail: bool) -> Result<String> {
        let raw = serde_json::to_value(file).map_err(|e| RemoteError::Malformed(e.to_string()))?;
        let options = BlobOptions {
            thumb: thumbnail.then(|| self.options.thumb_size.clone()),
        };
        Ok(self
            .remote
            .resolve_blob_url(Collection::Files, &raw, "file", &options)?)
    }

    // ===== Monitoring =====

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn diagnostics(&self) -> &Arc<Diagnostics> {
        &self.diagnostics
    }

    pub fn events(&self) -> &Arc<EventBus<EngineEvent>> {
        &self.events
    }

    pub fn on_directories_changed(
        &self,
        callback: impl Fn(Snapshot<Directory>) + Send + Sync + 'static,
    ) -> Subscription {
        read(&self.directories).subscribe(callback)
    }

    pub fn on_files_changed(
        &self,
        callback: impl Fn(Snapshot<FileRecord>) + Send + Sync + 'static,
    ) -> Subscription {
        read(&self.files).subscribe(callback)
    }

    pub fn on_settings_changed(
        &self,
        callback: impl Fn(Snapshot<Setting>) + Send + Sync + 'static,
    ) -> Subscription {
        read(&self.settings).subscribe(callback)
    }
}

fn rebuild_view(
    view: Arc<RwLock<Arc<DirectoryView>>>,
    events: Arc<EventBus<EngineEvent>>,
) -> impl Fn(Snapshot<Directory>) + Send + Sync + 'static {
    move |snapshot| {
        let next = DirectoryView::build(&snapshot);
        if let Err(e) = &next.tree {
            warn!("Directory tree rebuild failed: {}", e);
            events.emit(EngineEvent::TreeRebuildFailed {
                reason: e.to_string(),
            });
        }
        *write(&view) = Arc::new(next);
        events.emit(EngineEvent::SnapshotChanged {
            collection: Collection::Directories,
            len: snapshot.len(),
        });
    }
}

fn announce<T: Record>(
    events: Arc<EventBus<EngineEvent>>,
) -> impl Fn(Snapshot<T>) + Send + Sync + 'static {
    move |snapshot| {
        events.emit(EngineEvent::SnapshotChanged {
            collection: T::COLLECTION,
            len: snapshot.len(),
        });
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}
