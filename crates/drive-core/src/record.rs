//! Typed records for the mirrored collections.
//!
//! Records arrive from the transport as untyped JSON. [`Record::validate`] turns a
//! raw value into a typed record or a [`ValidationError`]. A rejection never aborts
//! the surrounding batch: callers drop the record and move on.

use serde::de::{DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::{self, Display, Formatter};
use thiserror::Error;

/// Separator between directory names in a full path.
pub const PATH_SEPARATOR: char = '/';

/// Parent id of directories (and files) living directly under the root.
pub const ROOT_ID: &str = "";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Malformed {collection} record: {reason}")]
    Shape {
        collection: Collection,
        reason: String,
    },

    #[error("Record has no id")]
    MissingId,

    #[error("Invalid name: {0}")]
    Name(#[from] NameError),
}

pub type Result<T> = std::result::Result<T, ValidationError>;

/// Why a directory or file name was refused.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum NameError {
    #[error("name cannot be empty")]
    Empty,

    #[error("name cannot contain '/'")]
    ContainsSeparator,
}

/// Check a user-supplied directory or file name.
///
/// Whitespace-only names count as empty. The name itself is stored untrimmed.
pub fn validate_name(name: &str) -> std::result::Result<(), NameError> {
    if name.trim().is_empty() {
        return Err(NameError::Empty);
    }
    if name.contains(PATH_SEPARATOR) {
        return Err(NameError::ContainsSeparator);
    }
    Ok(())
}

/// The remote collections mirrored locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    Directories,
    Files,
    Settings,
}

impl Collection {
    pub const ALL: [Collection; 3] = [
        Collection::Directories,
        Collection::Files,
        Collection::Settings,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Directories => "directories",
            Collection::Files => "files",
            Collection::Settings => "settings",
        }
    }
}

impl Display for Collection {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A schema-checked record of one collection.
pub trait Record: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Collection this record type belongs to.
    const COLLECTION: Collection;

    fn id(&self) -> &str;

    /// ISO-8601 creation timestamp, compared lexicographically.
    fn created(&self) -> &str;

    /// Checks beyond field presence and type.
    fn check(&self) -> Result<()> {
        Ok(())
    }

    /// Parse and validate an untyped record.
    fn validate(raw: &Value) -> Result<Self> {
        let record = Self::deserialize(raw).map_err(|e| ValidationError::Shape {
            collection: Self::COLLECTION,
            reason: e.to_string(),
        })?;
        if record.id().is_empty() {
            return Err(ValidationError::MissingId);
        }
        record.check()?;
        Ok(record)
    }
}

/// Extract the id of an untyped record, if it has a usable one.
pub fn raw_record_id(raw: &Value) -> Option<&str> {
    raw.get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
}

/// A directory. `parent_id` is [`ROOT_ID`] for top-level directories.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Directory {
    pub id: String,
    pub name: String,
    #[serde(alias = "directoryRelationId")]
    pub parent_id: String,
    pub is_starred: bool,
    pub created: String,
    pub updated: String,
}

impl Record for Directory {
    const COLLECTION: Collection = Collection::Directories;

    fn id(&self) -> &str {
        &self.id
    }

    fn created(&self) -> &str {
        &self.created
    }

    fn check(&self) -> Result<()> {
        validate_name(&self.name)?;
        Ok(())
    }
}

/// A stored file. The bytes live in the remote's blob storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub id: String,
    pub name: String,
    #[serde(
        default,
        alias = "directoryRelationId",
        skip_serializing_if = "Option::is_none"
    )]
    pub parent_id: Option<String>,
    #[serde(deserialize_with = "non_negative_size")]
    pub size: u64,
    /// Comma-joined tags, possibly empty.
    pub keywords: String,
    pub is_starred: bool,
    pub created: String,
    pub updated: String,
    /// Stored blob name, used to resolve download and thumbnail URLs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

impl FileRecord {
    /// Individual keywords, trimmed, without empty entries.
    pub fn keyword_list(&self) -> Vec<&str> {
        self.keywords
            .split(',')
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .collect()
    }
}

impl Record for FileRecord {
    const COLLECTION: Collection = Collection::Files;

    fn id(&self) -> &str {
        &self.id
    }

    fn created(&self) -> &str {
        &self.created
    }
}

/// Join keywords into the stored comma form, dropping blanks.
pub fn join_keywords<S: AsRef<str>>(keywords: &[S]) -> String {
    keywords
        .iter()
        .map(|k| k.as_ref().trim())
        .filter(|k| !k.is_empty())
        .collect::<Vec<_>>()
        .join(",")
}

/// A named user setting. Names are not unique; lookups use the first match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Setting {
    pub id: String,
    pub setting_name: String,
    pub is_enabled: bool,
    pub value: String,
    pub created: String,
    pub updated: String,
}

impl Record for Setting {
    const COLLECTION: Collection = Collection::Settings;

    fn id(&self) -> &str {
        &self.id
    }

    fn created(&self) -> &str {
        &self.created
    }
}

// Sizes may arrive as JSON floats; anything negative or non-finite is malformed.
fn non_negative_size<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<u64, D::Error> {
    let size = f64::deserialize(d)?;
    if !size.is_finite() || size < 0.0 {
        return Err(serde::de::Error::custom(format!(
            "size must be a non-negative number, got {size}"
        )));
    }
    Ok(size as u64)
}
