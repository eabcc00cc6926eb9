use std::path::{Path, PathBuf};

const FIXTURE_VAR: &str = "DRIVE_FIXTURE";
const BLOB_BASE_URL_VAR: &str = "DRIVE_BLOB_BASE_URL";

/// Base URL used for blob links when none is configured.
pub const DEFAULT_BLOB_BASE_URL: &str = "http://127.0.0.1:8090";

/// CLI configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// JSON fixture holding the remote's initial records
    pub fixture: PathBuf,
    /// JSONL change events replayed after the session starts
    pub events: Option<PathBuf>,
    /// Base URL of the blob store
    pub blob_base_url: String,
}

impl Config {
    /// Load configuration from environment variables, letting command-line
    /// paths win.
    ///
    /// Environment variables:
    /// - `DRIVE_FIXTURE`: Path to the fixture (supports ~ for home directory)
    /// - `DRIVE_BLOB_BASE_URL`: Blob store base URL (optional)
    pub fn from_env(fixture: Option<&Path>, events: Option<&Path>) -> Result<Self, ConfigError> {
        Self::with_overrides(fixture, events, |name| std::env::var(name).ok())
    }

    /// Same as [`Config::from_env`], reading variables through `lookup`.
    pub fn with_overrides(
        fixture: Option<&Path>,
        events: Option<&Path>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let fixture = match fixture {
            Some(path) => path.to_string_lossy().into_owned(),
            None => lookup(FIXTURE_VAR)
                .filter(|value| !value.is_empty())
                .ok_or(ConfigError::MissingFixture)?,
        };

        Ok(Self {
            fixture: expand_tilde(&fixture),
            events: events.map(|path| expand_tilde(&path.to_string_lossy())),
            blob_base_url: lookup(BLOB_BASE_URL_VAR)
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| DEFAULT_BLOB_BASE_URL.to_string()),
        })
    }
}

/// Expand ~ or ~/ prefix to the user's home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" {
        dirs::home_dir().unwrap_or_else(|| PathBuf::from("~"))
    } else if let Some(rest) = path.strip_prefix("~/") {
        dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path))
    } else {
        PathBuf::from(path)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("No fixture given: pass --fixture or set DRIVE_FIXTURE")]
    MissingFixture,
}
