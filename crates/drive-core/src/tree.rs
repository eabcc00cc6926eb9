//! Tree builder: turns the flat "directory has parent" relation into a rooted tree.
//!
//! The root is a synthetic directory (`id = ""`, `name = "/"`, full path `/`) built
//! fresh on every call; it is never stored. Each other node's full path is its
//! parent's full path plus its name and a trailing separator.
//!
//! Children are indexed by parent id once, then the tree is walked with an
//! explicit stack. Directories whose parent chain never reaches the root are
//! orphans and simply don't appear. A record that would become its own ancestor
//! (possible when duplicate ids are mirrored) fails the build with
//! [`TreeError::Cycle`] instead of recursing forever.

use crate::record::{Directory, PATH_SEPARATOR, ROOT_ID};

use serde::Serialize;
use std::collections::HashMap;
use thiserror::Error;

/// Parent id given to the synthetic root. Real records always have a non-empty
/// id, so no directory can claim the root as its child through this value.
pub const ROOT_PARENT_ID: &str = "\u{0}root";

/// Full path of the root directory.
pub const ROOT_PATH: &str = "/";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TreeError {
    #[error("Directory cycle detected at {0}")]
    Cycle(String),
}

pub type Result<T> = std::result::Result<T, TreeError>;

/// A directory with its full path and its children in input order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeNode {
    #[serde(flatten)]
    pub directory: Directory,
    pub full_path: String,
    pub children: Vec<TreeNode>,
}

impl TreeNode {
    /// An empty root.
    pub fn root() -> Self {
        Self {
            directory: root_directory(),
            full_path: ROOT_PATH.to_string(),
            children: Vec::new(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.directory.id == ROOT_ID
    }

    /// Pre-order iterator over this node and all descendants.
    pub fn iter(&self) -> Iter<'_> {
        Iter { stack: vec![self] }
    }

    /// Number of nodes in this subtree, including itself.
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// Find a node by full path.
    pub fn find(&self, full_path: &str) -> Option<&TreeNode> {
        self.iter().find(|node| node.full_path == full_path)
    }
}

// Deep chains would overflow the stack with the derived recursive drop.
impl Drop for TreeNode {
    fn drop(&mut self) {
        let mut pending = std::mem::take(&mut self.children);
        while let Some(mut node) = pending.pop() {
            pending.append(&mut node.children);
        }
    }
}

/// Pre-order traversal of a [`TreeNode`].
pub struct Iter<'a> {
    stack: Vec<&'a TreeNode>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a TreeNode;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        self.stack.extend(node.children.iter().rev());
        Some(node)
    }
}

/// The synthetic root directory.
pub fn root_directory() -> Directory {
    Directory {
        id: ROOT_ID.to_string(),
        name: ROOT_PATH.to_string(),
        parent_id: ROOT_PARENT_ID.to_string(),
        is_starred: false,
        created: String::new(),
        updated: String::new(),
    }
}

enum Step {
    Enter { record: usize, parent: usize },
    Leave { record: usize },
}

struct Slot {
    directory: Directory,
    full_path: String,
    children: Vec<usize>,
}

/// Build the directory tree rooted at the synthetic root.
pub fn build_tree(directories: &[Directory]) -> Result<TreeNode> {
    let mut children_of: HashMap<&str, Vec<usize>> = HashMap::new();
    for (index, directory) in directories.iter().enumerate() {
        children_of
            .entry(directory.parent_id.as_str())
            .or_default()
            .push(index);
    }

    // Slots are created in pre-order, so every child sits after its parent.
    let mut slots = vec![Slot {
        directory: root_directory(),
        full_path: ROOT_PATH.to_string(),
        children: Vec::new(),
    }];
    let mut on_path = vec![false; directories.len()];
    let mut stack: Vec<Step> = children_of
        .get(ROOT_ID)
        .map(|kids| {
            kids.iter()
                .rev()
                .map(|&record| Step::Enter { record, parent: 0 })
                .collect()
        })
        .unwrap_or_default();

    while let Some(step) = stack.pop() {
        let (record, parent) = match step {
            Step::Leave { record } => {
                on_path[record] = false;
                continue;
            }
            Step::Enter { record, parent } => (record, parent),
        };

        let directory = &directories[record];
        if on_path[record] {
            return Err(TreeError::Cycle(directory.id.clone()));
        }

        let full_path = format!(
            "{}{}{}",
            slots[parent].full_path, directory.name, PATH_SEPARATOR
        );
        let slot = slots.len();
        slots.push(Slot {
            directory: directory.clone(),
            full_path,
            children: Vec::new(),
        });
        slots[parent].children.push(slot);

        on_path[record] = true;
        stack.push(Step::Leave { record });
        if let Some(kids) = children_of.get(directory.id.as_str()) {
            stack.extend(
                kids.iter()
                    .rev()
                    .map(|&kid| Step::Enter { record: kid, parent: slot }),
            );
        }
    }

    // Assemble bottom-up: every child slot is finished before its parent.
    let mut built: Vec<Option<TreeNode>> = Vec::with_capacity(slots.len());
    built.resize_with(slots.len(), || None);
    let mut root = None;
    for (index, slot) in slots.into_iter().enumerate().rev() {
        let node = TreeNode {
            directory: slot.directory,
            full_path: slot.full_path,
            children: slot
                .children
                .iter()
                .filter_map(|&child| built[child].take())
                .collect(),
        };
        if index == 0 {
            root = Some(node);
        } else {
            built[index] = Some(node);
        }
    }

    Ok(root.unwrap_or_else(TreeNode::root))
}
