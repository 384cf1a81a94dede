//! Error taxonomy for the commit protocol.

use std::error::Error as StdError;

use thiserror::Error;
use uuid::Uuid;

/// Boxed error for wrapping backend-specific failures.
pub type BoxedError = Box<dyn StdError + Send + Sync>;

/// Failures raised by the storage engine.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A unique index rejected a write.
    #[error("unique constraint violated: {constraint}")]
    UniqueViolation {
        /// Name of the violated constraint.
        constraint: String,
    },

    /// The storage engine aborted the transaction because of a concurrent
    /// writer (serialization failure or conditional-update loss).
    #[error("write conflict: {0}")]
    WriteConflict(String),

    /// I/O-level fault: connectivity, timeout, protocol error.
    #[error("storage backend failure: {message}")]
    Backend {
        /// Human-readable description.
        message: String,
        /// Underlying driver error, when available.
        #[source]
        source: Option<BoxedError>,
    },
}

impl StoreError {
    /// Creates a backend error with an underlying source.
    pub fn backend(
        message: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::Backend {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a backend error from a bare message.
    pub fn backend_msg(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
            source: None,
        }
    }
}

/// Classified failure of one commit attempt.
///
/// The protocol never retries on its own initiative: every failure is
/// classified and returned so the caller can decide whether to resubmit.
#[derive(Debug, Error)]
pub enum CommitError {
    /// Another writer already claimed the aggregate version(s) this attempt
    /// tried to reserve. Recoverable: re-read the current version and retry.
    #[error(
        "aggregate conflict on {event_source}/{aggregate_type}: expected version {expected}, found {actual}"
    )]
    AggregateConflict {
        /// Event source of the contested instance.
        event_source: String,
        /// Aggregate type of the contested instance.
        aggregate_type: Uuid,
        /// The version this attempt based its writes on.
        expected: u64,
        /// The version actually stored.
        actual: u64,
    },

    /// Two attempts allocated the same sequence number. Only reachable under
    /// the recount strategy; surfaced by the log's uniqueness constraint.
    #[error("sequence race: sequence number {sequence_number} already committed")]
    SequenceRace {
        /// The contested sequence number.
        sequence_number: u64,
    },

    /// Transient storage-level abort unrelated to the logical constraints.
    /// Recoverable: retry the whole attempt.
    #[error("transaction aborted: {0}")]
    TransactionAbort(String),

    /// I/O-level fault. Fatal for this attempt.
    #[error("storage failure")]
    Storage(#[from] StoreError),
}

impl CommitError {
    /// Whether the caller may reasonably retry the attempt with refreshed
    /// state.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Storage(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_display_names_the_constraint() {
        let err = StoreError::UniqueViolation {
            constraint: "aggregate_roots_key".into(),
        };
        assert!(err.to_string().contains("aggregate_roots_key"));
    }

    #[test]
    fn conflicts_and_aborts_are_retryable() {
        let conflict = CommitError::AggregateConflict {
            event_source: "source".into(),
            aggregate_type: Uuid::new_v4(),
            expected: 0,
            actual: 3,
        };
        assert!(conflict.is_retryable());
        assert!(CommitError::SequenceRace { sequence_number: 7 }.is_retryable());
        assert!(CommitError::TransactionAbort("serialization failure".into()).is_retryable());
    }

    #[test]
    fn storage_failures_are_terminal() {
        let err = CommitError::Storage(StoreError::backend_msg("connection refused"));
        assert!(!err.is_retryable());
    }
}
