//! Plain-text rendering of engine views for the terminal.

use drive_core::{DirectoryListing, PathIndex, SearchHit, SkippedRecord, StarredView, TreeNode};

use std::fmt::Write;

const STAR: &str = "*";

/// Human-readable byte count, e.g. `2.0 KB`.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

fn star(starred: bool) -> &'static str {
    if starred { STAR } else { "" }
}

/// Indented tree, two spaces per level.
pub fn tree(root: &TreeNode) -> String {
    let mut out = String::new();
    let mut stack = vec![(root, 0usize)];
    while let Some((node, depth)) = stack.pop() {
        let label = if node.is_root() {
            node.full_path.clone()
        } else {
            format!("{}/", node.directory.name)
        };
        let _ = writeln!(
            out,
            "{}{}{}",
            "  ".repeat(depth),
            label,
            star(node.directory.is_starred)
        );
        stack.extend(node.children.iter().rev().map(|child| (child, depth + 1)));
    }
    out
}

/// One line per indexed directory: full path, id, created.
pub fn paths(index: &PathIndex) -> String {
    let mut out = String::new();
    for entry in index.iter() {
        let _ = writeln!(
            out,
            "{}\t{}\t{}",
            entry.full_path, entry.directory.id, entry.directory.created
        );
    }
    out
}

pub fn listing(listing: &DirectoryListing) -> String {
    let mut out = String::new();
    let trail: Vec<&str> = std::iter::once("/")
        .chain(listing.breadcrumbs.iter().map(|crumb| crumb.name.as_str()))
        .collect();
    let _ = writeln!(out, "{}", trail.join(" > "));

    for entry in &listing.directories {
        let _ = writeln!(
            out,
            "  {}/{}",
            entry.directory.name,
            star(entry.directory.is_starred)
        );
    }
    for file in &listing.files {
        let _ = writeln!(
            out,
            "  {}{}\t{}\t{}",
            file.name,
            star(file.is_starred),
            format_size(file.size),
            file.keywords
        );
    }
    if listing.directories.is_empty() && listing.files.is_empty() {
        let _ = writeln!(out, "  (empty)");
    }
    out
}

pub fn hits(hits: &[SearchHit]) -> String {
    let mut out = String::new();
    for hit in hits {
        let _ = writeln!(out, "{}{}", hit.full_path, hit.file.name);
    }
    out
}

pub fn starred(view: &StarredView) -> String {
    let mut out = String::new();
    for entry in &view.directories {
        let _ = writeln!(out, "{}", entry.full_path);
    }
    for file in &view.files {
        let _ = writeln!(out, "{}\t{}", file.name, format_size(file.size));
    }
    out
}

pub fn diagnostics(entries: &[SkippedRecord]) -> String {
    let mut out = String::new();
    for entry in entries {
        let action = entry
            .action
            .map(|action| format!("{action:?}").to_lowercase())
            .unwrap_or_else(|| "list".to_string());
        let _ = writeln!(
            out,
            "{}\t{}\t{}\t{}",
            entry.collection,
            action,
            entry.record_id.as_deref().unwrap_or("-"),
            entry.reason
        );
    }
    out
}
