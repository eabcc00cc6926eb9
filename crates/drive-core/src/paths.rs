//! Path index: the directory tree flattened into `(directory, full path)` entries.
//!
//! Entries are collected in pre-order and then sorted newest-first by `created`
//! (ISO-8601 strings compare chronologically). The synthetic root stays first.
//! The index answers full-path lookups for browsing and parent-id joins for
//! file display and search.

use crate::record::{Directory, PATH_SEPARATOR};
use crate::tree::{ROOT_PATH, TreeNode};

use serde::Serialize;
use std::collections::HashMap;

/// A directory annotated with its full path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryEntry {
    #[serde(flatten)]
    pub directory: Directory,
    pub full_path: String,
}

/// Flatten a tree in pre-order, dropping the child links.
pub fn flatten(tree: &TreeNode) -> Vec<DirectoryEntry> {
    tree.iter()
        .map(|node| DirectoryEntry {
            directory: node.directory.clone(),
            full_path: node.full_path.clone(),
        })
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathIndex {
    entries: Vec<DirectoryEntry>,
    by_id: HashMap<String, usize>,
    by_path: HashMap<String, usize>,
}

impl PathIndex {
    pub fn new(tree: &TreeNode) -> Self {
        let mut entries = flatten(tree);
        if let Some((_root, rest)) = entries.split_first_mut() {
            rest.sort_by(|a, b| b.directory.created.cmp(&a.directory.created));
        }

        // First entry wins, matching a linear scan over the sorted list.
        let mut by_id = HashMap::with_capacity(entries.len());
        let mut by_path = HashMap::with_capacity(entries.len());
        for (index, entry) in entries.iter().enumerate() {
            by_id.entry(entry.directory.id.clone()).or_insert(index);
            by_path.entry(entry.full_path.clone()).or_insert(index);
        }

        Self {
            entries,
            by_id,
            by_path,
        }
    }

    /// Entries in index order (root first, then newest first).
    pub fn entries(&self) -> &[DirectoryEntry] {
        &self.entries
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DirectoryEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Exact full-path lookup. Paths must start and end with the separator.
    pub fn resolve(&self, full_path: &str) -> Option<&DirectoryEntry> {
        self.by_path.get(full_path).map(|&i| &self.entries[i])
    }

    /// Lookup by directory id. The root is reachable with an empty id.
    pub fn get(&self, id: &str) -> Option<&DirectoryEntry> {
        self.by_id.get(id).map(|&i| &self.entries[i])
    }

    /// Directories whose parent is `id`, in index order.
    pub fn children_of<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a DirectoryEntry> {
        self.entries
            .iter()
            .filter(move |entry| entry.directory.parent_id == id)
    }

    /// Starred directories, in index order.
    pub fn starred(&self) -> impl Iterator<Item = &DirectoryEntry> {
        self.entries.iter().filter(|entry| entry.directory.is_starred)
    }
}

/// Make a user-supplied browse path start and end with the separator.
///
/// An empty path is the root.
pub fn normalize_browse_path(raw: &str) -> String {
    if raw.is_empty() {
        return ROOT_PATH.to_string();
    }
    let mut path = String::with_capacity(raw.len() + 2);
    if !raw.starts_with(PATH_SEPARATOR) {
        path.push(PATH_SEPARATOR);
    }
    path.push_str(raw);
    if !path.ends_with(PATH_SEPARATOR) {
        path.push(PATH_SEPARATOR);
    }
    path
}

/// One step of a breadcrumb trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Breadcrumb {
    pub name: String,
    /// Full path of this step, with leading and trailing separator.
    pub path: String,
}

/// Breadcrumb trail for a browse path, root excluded.
pub fn breadcrumbs(path: &str) -> Vec<Breadcrumb> {
    let mut trail = Vec::new();
    let mut current = ROOT_PATH.to_string();
    for segment in path.split(PATH_SEPARATOR).filter(|s| !s.is_empty()) {
        current.push_str(segment);
        current.push(PATH_SEPARATOR);
        trail.push(Breadcrumb {
            name: segment.to_string(),
            path: current.clone(),
        });
    }
    trail
}
