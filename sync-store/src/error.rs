//! Error types for sync-store.

use std::path::PathBuf;

use sync_types::Sequence;

/// Local storage errors.
///
/// Any of these surfacing from a repository write means the local write did
/// not happen.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Record or payload (de)serialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No queue entry with this sequence (in the expected state).
    #[error("queue entry not found: {0}")]
    EntryNotFound(Sequence),

    /// A stored row could not be decoded.
    #[error("invalid stored row: {0}")]
    InvalidRow(String),

    /// Database path error.
    #[error("invalid database path: {path}")]
    InvalidPath {
        /// The invalid path.
        path: PathBuf,
    },
}

impl From<sync_types::TypesError> for StoreError {
    fn from(err: sync_types::TypesError) -> Self {
        Self::InvalidRow(err.to_string())
    }
}

/// Result type alias for storage operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;
