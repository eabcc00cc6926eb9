//! Name search over the file snapshot.

use crate::paths::PathIndex;
use crate::record::FileRecord;

use serde::Serialize;

/// A matching file with the full path of its directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub file: FileRecord,
    pub full_path: String,
}

/// Case-insensitive substring match on file names.
///
/// Results keep snapshot order. Files whose directory is not in the index
/// (orphaned, or no parent at all) are left out. An empty query matches nothing.
pub fn search(query: &str, files: &[FileRecord], index: &PathIndex) -> Vec<SearchHit> {
    if query.is_empty() {
        return Vec::new();
    }
    let needle = query.to_lowercase();

    files
        .iter()
        .filter(|file| file.name.to_lowercase().contains(&needle))
        .filter_map(|file| {
            let parent = file.parent_id.as_deref()?;
            let entry = index.get(parent)?;
            Some(SearchHit {
                file: file.clone(),
                full_path: entry.full_path.clone(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Directory;
    use crate::tree::build_tree;

    fn file(id: &str, name: &str, parent: Option<&str>) -> FileRecord {
        FileRecord {
            id: id.into(),
            name: name.into(),
            parent_id: parent.map(str::to_string),
            size: 10,
            keywords: String::new(),
            is_starred: false,
            created: "2024-01-01".into(),
            updated: "2024-01-01".into(),
            file: None,
        }
    }

    fn index() -> PathIndex {
        let docs = Directory {
            id: "d".into(),
            name: "Docs".into(),
            parent_id: "".into(),
            is_starred: false,
            created: "2024-01-01".into(),
            updated: "2024-01-01".into(),
        };
        PathIndex::new(&build_tree(&[docs]).unwrap())
    }

    #[test]
    fn test_substring_case_insensitive() {
        let files = vec![
            file("1", "Q1 Report.pdf", Some("d")),
            file("2", "notes.txt", Some("d")),
            file("3", "reporting_tool.exe", Some("")),
        ];
        let hits = search("report", &files, &index());
        let found: Vec<_> = hits
            .iter()
            .map(|h| (h.file.name.as_str(), h.full_path.as_str()))
            .collect();
        assert_eq!(
            found,
            vec![("Q1 Report.pdf", "/Docs/"), ("reporting_tool.exe", "/")]
        );
    }

    #[test]
    fn test_empty_query_matches_nothing() {
        let files = vec![file("1", "a", Some("d"))];
        assert!(search("", &files, &index()).is_empty());
    }

    #[test]
    fn test_unresolved_parents_excluded() {
        let files = vec![
            file("1", "report-a", None),
            file("2", "report-b", Some("gone")),
            file("3", "report-c", Some("d")),
        ];
        let hits = search("REPORT", &files, &index());
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].file.id, "3");
    }
}
