//! drive-core: live mirror of a remote drive's directories, files and settings.
//!
//! This crate provides:
//! - Typed records and the validator that admits them from untyped JSON
//! - Collection mirrors kept current by create/update/delete change events
//! - The directory tree and path index derived from the directory mirror
//! - Optimistic star toggling with rollback
//! - Name search joined against the path index
//! - RemoteStore and ChangeStream trait abstractions, with an in-memory remote
//! - `SyncEngine`, which owns one session's state

pub mod diagnostics;
pub mod engine;
pub mod events;
pub mod mirror;
pub mod optimistic;
pub mod paths;
pub mod record;
pub mod remote;
pub mod search;
pub mod stream;
pub mod tree;

pub use diagnostics::{Diagnostics, SkippedRecord};
pub use engine::{
    DirectoryListing, DirectoryView, EngineError, EngineOptions, StarTarget, StarredView,
    SyncEngine,
};
pub use events::{EngineEvent, EventBus, Subscription};
pub use mirror::{CollectionMirror, Snapshot};
pub use optimistic::{OptimisticToggle, ToggleOutcome};
pub use paths::{Breadcrumb, DirectoryEntry, PathIndex, breadcrumbs, normalize_browse_path};
pub use record::{
    Collection, Directory, FileRecord, NameError, Record, Setting, ValidationError, validate_name,
};
pub use remote::{BlobOptions, InMemoryRemote, RemoteError, RemoteStore};
pub use search::SearchHit;
pub use stream::{ChangeAction, ChangeEvent, ChangeStream};
pub use tree::{TreeError, TreeNode, build_tree};
