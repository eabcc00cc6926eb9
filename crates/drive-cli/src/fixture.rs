//! Fixture loading: the initial remote contents and change events to replay.
//!
//! A fixture is a JSON object with one array of raw records per collection:
//!
//! ```json
//! { "directories": [...], "files": [...], "settings": [...] }
//! ```
//!
//! Records are kept untyped so that malformed entries reach the engine's
//! validator exactly as they would from a live backend. Replay files are JSONL,
//! one `{"collection", "action", "record"}` object per line.

use drive_core::{ChangeEvent, Collection, InMemoryRemote};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FixtureError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid fixture {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Invalid event on line {line}: {source}")]
    Event {
        line: usize,
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, FixtureError>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Fixture {
    #[serde(default)]
    pub directories: Vec<Value>,
    #[serde(default)]
    pub files: Vec<Value>,
    #[serde(default)]
    pub settings: Vec<Value>,
}

impl Fixture {
    pub fn load(path: &Path) -> Result<Self> {
        let text = read(path)?;
        serde_json::from_str(&text).map_err(|source| FixtureError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Build an in-memory remote seeded with this fixture.
    pub fn into_remote(self, base_url: &str) -> InMemoryRemote {
        let remote = InMemoryRemote::with_base_url(base_url);
        remote.seed(Collection::Directories, self.directories);
        remote.seed(Collection::Files, self.files);
        remote.seed(Collection::Settings, self.settings);
        remote
    }
}

/// A change event tagged with its collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayEvent {
    pub collection: Collection,
    #[serde(flatten)]
    pub event: ChangeEvent,
}

/// Parse JSONL replay events. Blank lines are skipped.
pub fn parse_events(text: &str) -> Result<Vec<ReplayEvent>> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            serde_json::from_str(line).map_err(|source| FixtureError::Event {
                line: index + 1,
                source,
            })
        })
        .collect()
}

pub fn load_events(path: &Path) -> Result<Vec<ReplayEvent>> {
    parse_events(&read(path)?)
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|source| FixtureError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use drive_core::ChangeAction;

    #[test]
    fn test_parse_events_skips_blank_lines() {
        let text = r#"
{"collection": "directories", "action": "create", "record": {"id": "a"}}

{"collection": "files", "action": "delete", "record": {"id": "f"}}
"#;
        let events = parse_events(text).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].collection, Collection::Directories);
        assert_eq!(events[1].event.action, ChangeAction::Delete);
        assert_eq!(events[1].event.record_id(), Some("f"));
    }

    #[test]
    fn test_parse_events_reports_line() {
        let text = "{\"collection\": \"files\", \"action\": \"create\", \"record\": {}}\n{\"collection\": \"nope\"}";
        match parse_events(text) {
            Err(FixtureError::Event { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected an event error, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_collections_default_empty() {
        let fixture: Fixture = serde_json::from_str(r#"{"files": [{"id": "f"}]}"#).unwrap();
        assert!(fixture.directories.is_empty());
        let remote = fixture.into_remote("http://localhost");
        assert_eq!(remote.records(Collection::Files).len(), 1);
    }
}
