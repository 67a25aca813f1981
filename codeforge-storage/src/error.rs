//! Storage error types.

use crate::adapter::BackendKind;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur in storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend's transport is unreachable or timed out.
    #[error("{backend} backend unreachable: {reason}")]
    Connectivity { backend: BackendKind, reason: String },

    #[error("remote returned HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// A stored value could not be parsed.
    #[error("invalid stored value for '{key}': {reason}")]
    Validation { key: String, reason: String },

    #[error("migration incomplete: {failed} of {total} keys failed to migrate")]
    PartialMigration { failed: usize, total: usize },

    #[error("no storage backend available")]
    NoBackendAvailable,

    #[error("requested backend {0} is not available")]
    BackendUnavailable(BackendKind),

    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("preferences error: {0}")]
    Preferences(String),
}

impl StorageError {
    pub(crate) fn connectivity(backend: BackendKind, reason: impl ToString) -> Self {
        Self::Connectivity {
            backend,
            reason: reason.to_string(),
        }
    }

    /// Returns true if the error means the backend could not be reached.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Connectivity { .. })
    }
}

impl From<duckdb::Error> for StorageError {
    fn from(err: duckdb::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<tokio::task::JoinError> for StorageError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Database(format!("blocking task failed: {err}"))
    }
}
