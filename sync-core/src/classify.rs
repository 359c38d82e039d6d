//! Failure classification and retry policy.
//!
//! Every remote failure is classified from the remote error itself (code
//! first, message as a fallback) into permanent or transient. Permanent
//! failures bypass the retry budget: an entry with a malformed identifier or
//! a dangling reference would otherwise be reprocessed forever.

use sync_types::{codes, Operation, RemoteError};

/// Default retry bound for transient failures.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Classification of a remote failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// The identifier is not a well-formed key in the remote schema.
    MalformedIdentifier,
    /// The mutation references an entity that does not exist remotely.
    ReferentialIntegrity,
    /// The remote state already reflects the mutation.
    AlreadyApplied,
    /// Anything else: network, timeout, 5xx, rate limiting, ...
    Transient,
}

/// Classify a remote failure for the given operation.
///
/// A delete answered with "not found" and a create answered with a unique
/// violation both mean a previous attempt already landed.
pub fn classify(operation: Operation, error: &RemoteError) -> FailureClass {
    match error {
        RemoteError::NotFound if operation == Operation::Delete => FailureClass::AlreadyApplied,
        RemoteError::Api { code, message, .. } => {
            let message = message.to_ascii_lowercase();
            match code.as_deref() {
                Some(codes::INVALID_TEXT_REPRESENTATION) => FailureClass::MalformedIdentifier,
                Some(codes::FOREIGN_KEY_VIOLATION) => FailureClass::ReferentialIntegrity,
                Some(codes::UNIQUE_VIOLATION) if operation == Operation::Create => {
                    FailureClass::AlreadyApplied
                }
                _ if message.contains("invalid input syntax") => FailureClass::MalformedIdentifier,
                _ if message.contains("foreign key") => FailureClass::ReferentialIntegrity,
                _ => FailureClass::Transient,
            }
        }
        _ => FailureClass::Transient,
    }
}

/// What to do with a queue entry after a remote failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Treat as success: remove the entry.
    Applied,
    /// Put the entry back to PENDING with the given retry count.
    Retry {
        /// Retry count after this failure.
        retry_count: u32,
    },
    /// Mark the entry FAILED with a diagnostic.
    Failed {
        /// Why the entry failed.
        class: FailureClass,
        /// Diagnostic stored in `last_error`.
        reason: String,
    },
}

/// Bounded retry policy for transient failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
}

impl RetryPolicy {
    /// Create a policy with the given retry bound.
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    /// The retry bound.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Decide the fate of an entry whose remote call failed.
    ///
    /// `retry_count` is the entry's count before this attempt. Once it has
    /// reached the bound, a transient failure becomes permanent; no entry is
    /// sent more than `max_retries + 1` times automatically.
    pub fn on_failure(
        &self,
        operation: Operation,
        retry_count: u32,
        error: &RemoteError,
    ) -> Disposition {
        match classify(operation, error) {
            FailureClass::AlreadyApplied => Disposition::Applied,
            FailureClass::MalformedIdentifier => Disposition::Failed {
                class: FailureClass::MalformedIdentifier,
                reason: format!(
                    "permanent failure (malformed identifier): {}; not retried, the queue would otherwise reprocess this entry forever",
                    error
                ),
            },
            FailureClass::ReferentialIntegrity => Disposition::Failed {
                class: FailureClass::ReferentialIntegrity,
                reason: format!(
                    "permanent failure (referential integrity violation): {}; not retried, the queue would otherwise reprocess this entry forever",
                    error
                ),
            },
            FailureClass::Transient if retry_count >= self.max_retries => Disposition::Failed {
                class: FailureClass::Transient,
                reason: error.to_string(),
            },
            FailureClass::Transient => Disposition::Retry {
                retry_count: retry_count.saturating_add(1),
            },
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn api(status: u16, code: Option<&str>, message: &str) -> RemoteError {
        RemoteError::Api {
            status,
            code: code.map(str::to_string),
            message: message.to_string(),
        }
    }

    #[test]
    fn malformed_identifier_by_code() {
        let err = api(400, Some("22P02"), "invalid input syntax for type uuid: \"m-1\"");
        assert_eq!(
            classify(Operation::Create, &err),
            FailureClass::MalformedIdentifier
        );
    }

    #[test]
    fn malformed_identifier_by_message() {
        let err = api(400, None, "Invalid input syntax for type uuid");
        assert_eq!(
            classify(Operation::Update, &err),
            FailureClass::MalformedIdentifier
        );
    }

    #[test]
    fn referential_integrity_by_code_and_message() {
        let by_code = api(409, Some("23503"), "insert or update violates constraint");
        let by_message = api(409, None, "violates foreign key constraint \"missions_vehicle_id_fkey\"");
        assert_eq!(
            classify(Operation::Create, &by_code),
            FailureClass::ReferentialIntegrity
        );
        assert_eq!(
            classify(Operation::Upsert, &by_message),
            FailureClass::ReferentialIntegrity
        );
    }

    #[test]
    fn delete_not_found_is_already_applied() {
        assert_eq!(
            classify(Operation::Delete, &RemoteError::NotFound),
            FailureClass::AlreadyApplied
        );
        assert_eq!(
            classify(Operation::Update, &RemoteError::NotFound),
            FailureClass::Transient
        );
    }

    #[test]
    fn duplicate_create_is_already_applied() {
        let err = api(409, Some("23505"), "duplicate key value violates unique constraint");
        assert_eq!(
            classify(Operation::Create, &err),
            FailureClass::AlreadyApplied
        );
        assert_eq!(classify(Operation::Upsert, &err), FailureClass::Transient);
    }

    #[test]
    fn everything_else_is_transient() {
        assert_eq!(
            classify(Operation::Create, &RemoteError::Network("refused".into())),
            FailureClass::Transient
        );
        assert_eq!(
            classify(
                Operation::Create,
                &RemoteError::Timeout(Duration::from_secs(10))
            ),
            FailureClass::Transient
        );
        assert_eq!(
            classify(Operation::Update, &api(503, None, "unavailable")),
            FailureClass::Transient
        );
        assert_eq!(
            classify(Operation::Update, &api(429, None, "slow down")),
            FailureClass::Transient
        );
    }

    #[test]
    fn transient_failures_retry_until_bound() {
        let policy = RetryPolicy::default();
        let err = RemoteError::Network("reset".into());

        assert_eq!(
            policy.on_failure(Operation::Create, 0, &err),
            Disposition::Retry { retry_count: 1 }
        );
        assert_eq!(
            policy.on_failure(Operation::Create, 2, &err),
            Disposition::Retry { retry_count: 3 }
        );
        match policy.on_failure(Operation::Create, 3, &err) {
            Disposition::Failed { class, reason } => {
                assert_eq!(class, FailureClass::Transient);
                assert_eq!(reason, err.to_string());
            }
            other => panic!("expected Failed, got {:?}", other),
        }
    }

    #[test]
    fn permanent_failures_ignore_retry_budget() {
        let policy = RetryPolicy::default();
        let err = api(400, Some("22P02"), "invalid input syntax for type uuid");

        match policy.on_failure(Operation::Create, 0, &err) {
            Disposition::Failed { class, reason } => {
                assert_eq!(class, FailureClass::MalformedIdentifier);
                assert!(reason.contains("malformed identifier"));
                assert!(reason.contains("forever"));
            }
            other => panic!("expected Failed, got {:?}", other),
        }
    }

    #[test]
    fn already_applied_is_success() {
        let policy = RetryPolicy::new(1);
        assert_eq!(
            policy.on_failure(Operation::Delete, 1, &RemoteError::NotFound),
            Disposition::Applied
        );
    }

    #[test]
    fn zero_bound_fails_on_first_transient_error() {
        let policy = RetryPolicy::new(0);
        assert!(matches!(
            policy.on_failure(Operation::Update, 0, &RemoteError::NotFound),
            Disposition::Failed { .. }
        ));
    }
}
