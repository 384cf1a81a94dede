//! Commit requests and outcomes.

use chronicle_core::error::CommitError;
use uuid::Uuid;

/// One logical request to append a batch of events atomically.
#[derive(Debug, Clone)]
pub struct CommitRequest {
    /// The stream the events belong to.
    pub event_source: String,
    /// Event payloads in the order they must appear in the log.
    pub payloads: Vec<serde_json::Value>,
    /// When set, the whole batch is scoped to one aggregate instance of
    /// this type and claims its next versions.
    pub aggregate_type: Option<Uuid>,
}

impl CommitRequest {
    /// Builds a non-aggregate request.
    #[must_use]
    pub fn events(event_source: impl Into<String>, payloads: Vec<serde_json::Value>) -> Self {
        Self {
            event_source: event_source.into(),
            payloads,
            aggregate_type: None,
        }
    }

    /// Builds an aggregate-scoped request.
    #[must_use]
    pub fn aggregate_events(
        event_source: impl Into<String>,
        aggregate_type: Uuid,
        payloads: Vec<serde_json::Value>,
    ) -> Self {
        Self {
            event_source: event_source.into(),
            payloads,
            aggregate_type: Some(aggregate_type),
        }
    }
}

/// What a successful commit produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitReceipt {
    /// The sequence numbers the attempt committed, in submission order.
    /// Contiguous under the recount and per-batch strategies; the per-event
    /// strategy may interleave with concurrent attempts.
    pub sequence_numbers: Vec<u64>,
    /// For aggregate-scoped commits, the aggregate type and the version the
    /// instance was advanced to.
    pub aggregate: Option<(Uuid, u64)>,
}

/// Terminal result of one commit attempt.
///
/// `Conflicted` is retryable by resubmitting with refreshed state; `Failed`
/// is an I/O-level fault and terminal for the attempt. No attempt ever
/// partially applies writes.
#[derive(Debug)]
pub enum CommitOutcome {
    /// The transaction committed; all writes are durable and visible.
    Committed(CommitReceipt),
    /// A concurrent writer won; the caller may retry with refreshed state.
    Conflicted(CommitError),
    /// An I/O-level fault; surfaced to the caller, never retried.
    Failed(CommitError),
}

impl CommitOutcome {
    /// Whether the attempt committed.
    #[must_use]
    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed(_))
    }

    /// The receipt of a committed attempt, if any.
    #[must_use]
    pub fn receipt(&self) -> Option<&CommitReceipt> {
        match self {
            Self::Committed(receipt) => Some(receipt),
            Self::Conflicted(_) | Self::Failed(_) => None,
        }
    }

    /// The classified error of a non-committed attempt, if any.
    #[must_use]
    pub fn error(&self) -> Option<&CommitError> {
        match self {
            Self::Committed(_) => None,
            Self::Conflicted(err) | Self::Failed(err) => Some(err),
        }
    }
}
