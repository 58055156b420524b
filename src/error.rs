//! Error taxonomy of backup, restore and disaster-recovery runs

use crate::storage::StorageError;
use crate::utils::command::ProcessError;

/// Failure of an orchestrated operation.
///
/// Every variant is terminal for the run that produced it: the run emits a
/// single failure progress event and an escalated audit entry.
#[derive(Debug, thiserror::Error)]
pub enum OperationError {
    #[error("External command failed: {0}")]
    ExternalCommand(#[from] ProcessError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Local I/O error: {0}")]
    LocalIo(#[from] std::io::Error),

    #[error("Invalid artifact identifier: {0:?}")]
    InvalidArtifactId(String),

    #[error("Artifact '{0}' already exists")]
    ArtifactConflict(String),

    #[error("Invalid database name: {0:?}")]
    InvalidDatabaseName(String),
}

impl OperationError {
    /// True when the error means the requested artifact does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, OperationError::Storage(StorageError::NotFound { .. }))
    }

    /// Storage refused to replace an existing object: report it as a conflict
    pub fn into_conflict(self) -> Self {
        match self {
            OperationError::Storage(StorageError::AlreadyExists { key }) => OperationError::ArtifactConflict(key),
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, OperationError>;
