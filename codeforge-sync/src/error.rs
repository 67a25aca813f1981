//! Sync error types.

use codeforge_storage::StorageError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur while persisting or synchronizing.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The local store failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// The remote service failed during a bulk operation.
    #[error("remote sync failed: {0}")]
    Remote(#[source] StorageError),

    #[error("pull incomplete: {failed} entities could not be written locally")]
    PartialPull { failed: usize },

    #[error("remote service not configured")]
    NotConfigured,
}
