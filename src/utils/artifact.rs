//! Artifact identifiers
//!
//! Identifiers end up in file paths, object keys and command arguments, so
//! every identifier coming from outside is checked against a strict
//! allow-list before it is used.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

use crate::error::OperationError;

const MAX_ID_LEN: usize = 128;
/// Length of `-YYYYMMDD-HHMMSS.dump`
const TIMESTAMP_SUFFIX_LEN: usize = 21;
const MAX_DATABASE_NAME_LEN: usize = 63;

fn artifact_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").expect("artifact pattern is valid")
    })
}

fn database_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("database pattern is valid")
    })
}

/// Check an artifact identifier against the allow-list
pub fn is_valid_artifact_id(id: &str) -> bool {
    id.len() <= MAX_ID_LEN && !id.contains("..") && artifact_pattern().is_match(id)
}

/// Check a database name against the allow-list
pub fn is_valid_database_name(name: &str) -> bool {
    name.len() <= MAX_DATABASE_NAME_LEN && database_pattern().is_match(name)
}

/// Validated artifact identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ArtifactId(String);

impl ArtifactId {
    /// Validate an identifier supplied by a caller
    pub fn parse(id: &str) -> Result<Self, OperationError> {
        if is_valid_artifact_id(id) {
            Ok(Self(id.to_string()))
        } else {
            Err(OperationError::InvalidArtifactId(id.to_string()))
        }
    }

    /// Derive an identifier from a timestamp at second resolution.
    ///
    /// Two backups started within the same second get the same identifier;
    /// the backup orchestrator rejects the second one with a conflict.
    pub fn from_timestamp(prefix: &str, at: DateTime<Utc>) -> Result<Self, OperationError> {
        Self::parse(&format!("{}-{}.dump", prefix, at.format("%Y%m%d-%H%M%S")))
    }

    /// Longest prefix whose generated identifiers still fit the length limit
    pub fn max_prefix_len() -> usize {
        MAX_ID_LEN - TIMESTAMP_SUFFIX_LEN
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ArtifactId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ArtifactId {
    type Error = OperationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ArtifactId> for String {
    fn from(id: ArtifactId) -> Self {
        id.0
    }
}

/// One backup file held in the object store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: ArtifactId,
    pub size: u64,
    /// Where the artifact lives, e.g. `local:backups/backup-...dump`
    pub location: String,
}

/// Name of a fresh isolated database for a disaster-recovery run
pub fn isolated_database_name(base: &str, at: DateTime<Utc>) -> String {
    let suffix = format!("_recovery_{}", at.format("%Y%m%d%H%M%S"));
    let keep = MAX_DATABASE_NAME_LEN.saturating_sub(suffix.len()).min(base.len());
    format!("{}{}", &base[..keep], suffix).to_lowercase()
}
