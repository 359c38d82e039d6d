//! Error types for fleetsync.

use std::time::Duration;
use thiserror::Error;

/// Errors raised while building or decoding data model values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TypesError {
    /// Collection name is empty or contains forbidden characters.
    #[error("invalid collection name: {0:?}")]
    InvalidCollection(String),

    /// Entity identifier is empty.
    #[error("invalid entity id: {0:?}")]
    InvalidEntityId(String),

    /// Record JSON has the wrong shape.
    #[error("invalid record: {0}")]
    InvalidRecord(String),

    /// Field name is reserved for the typed id/owner fields.
    #[error("field {0:?} is reserved")]
    ReservedField(String),

    /// Unknown operation discriminator.
    #[error("unknown operation: {0}")]
    UnknownOperation(String),

    /// Unknown queue status discriminator.
    #[error("unknown queue status: {0}")]
    UnknownStatus(String),
}

/// Error codes reported by a PostgreSQL-backed remote store.
pub mod codes {
    /// `invalid_text_representation`: the identifier is not a well-formed key.
    pub const INVALID_TEXT_REPRESENTATION: &str = "22P02";
    /// `foreign_key_violation`: the row references a missing entity.
    pub const FOREIGN_KEY_VIOLATION: &str = "23503";
    /// `unique_violation`: a row with the same key already exists.
    pub const UNIQUE_VIOLATION: &str = "23505";
}

/// Errors returned by the remote data store.
///
/// Structured enough for the sync engine to tell permanent failures
/// (malformed identifier, dangling reference) from transient ones.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// The request never reached the remote store.
    #[error("network error: {0}")]
    Network(String),

    /// The remote call exceeded its time budget.
    #[error("remote call timed out after {0:?}")]
    Timeout(Duration),

    /// The targeted record does not exist remotely.
    #[error("record not found")]
    NotFound,

    /// The remote store answered with an error.
    #[error("remote rejected request (status {status}, code {}): {message}", .code.as_deref().unwrap_or("-"))]
    Api {
        /// HTTP status code.
        status: u16,
        /// Database/API error code, when provided.
        code: Option<String>,
        /// Human-readable message.
        message: String,
    },
}

impl RemoteError {
    /// Database/API error code, if any.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Api { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// Whether the error means the remote could not be reached at all.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout(_))
    }
}
