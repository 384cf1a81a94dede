//! Committed event records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Aggregate identity carried by an aggregate-scoped event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateScope {
    /// The aggregate root type that produced the event.
    pub aggregate_type: Uuid,
    /// The version of the aggregate instance immediately before this event
    /// was applied.
    pub root_version: u64,
}

/// An event as it sits in the event log once a commit succeeds.
///
/// Committed events are immutable: the log is append-only and rows are never
/// updated or deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommittedEvent {
    /// Globally unique, gap-free position in the log's total order.
    pub sequence_number: u64,
    /// Identifier of the stream the event belongs to.
    pub event_source: String,
    /// Aggregate identity, absent for non-aggregate events.
    pub aggregate: Option<AggregateScope>,
    /// Opaque event payload.
    pub content: serde_json::Value,
    /// Timestamp assigned when the commit attempt built the record.
    pub occurred_at: DateTime<Utc>,
}

impl CommittedEvent {
    /// Returns the aggregate root version carried by this event, if any.
    #[must_use]
    pub fn root_version(&self) -> Option<u64> {
        self.aggregate.map(|scope| scope.root_version)
    }
}
