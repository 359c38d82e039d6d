//! Error types for sync-client.

use sync_store::StoreError;
use sync_types::{Collection, TypesError};
use thiserror::Error;

use crate::config::ConfigError;

/// Client errors.
///
/// Remote failures are absent on purpose: they are recorded on the queue
/// entry by the engine, never returned to the writer.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Local storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Data model error.
    #[error("data model error: {0}")]
    Types(#[from] TypesError),

    /// Entity could not be mapped to or from a record.
    #[error("mapping error: {0}")]
    Mapping(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Upsert on a collection without a declared conflict key.
    #[error("collection {0} has no declared conflict key")]
    MissingConflictKey(Collection),

    /// Irreversible maintenance called without confirmation.
    #[error("{operation} is irreversible and requires explicit confirmation")]
    ConfirmationRequired {
        /// The refused operation.
        operation: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confirmation_required_display() {
        let err = ClientError::ConfirmationRequired {
            operation: "purge_all",
        };
        assert_eq!(
            err.to_string(),
            "purge_all is irreversible and requires explicit confirmation"
        );
    }

    #[test]
    fn store_errors_convert() {
        let err: ClientError = StoreError::InvalidRow("bad".into()).into();
        assert!(matches!(err, ClientError::Store(_)));
    }
}
