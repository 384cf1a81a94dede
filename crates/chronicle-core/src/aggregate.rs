//! Aggregate root records.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The uniqueness key of an aggregate instance.
///
/// The storage engine enforces a unique index over this pair; exactly one
/// transaction may ever establish a given key's initial row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AggregateKey {
    /// The event source the instance belongs to.
    pub event_source: String,
    /// The aggregate root type.
    pub aggregate_type: Uuid,
}

impl AggregateKey {
    /// Creates a key from its parts.
    #[must_use]
    pub fn new(event_source: impl Into<String>, aggregate_type: Uuid) -> Self {
        Self {
            event_source: event_source.into(),
            aggregate_type,
        }
    }
}

impl fmt::Display for AggregateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.event_source, self.aggregate_type)
    }
}

/// One row of the aggregates table.
///
/// Created on the first commit for the instance, advanced on every later
/// successful commit; never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateRootRecord {
    /// The instance key.
    pub key: AggregateKey,
    /// Count of events applied to the instance.
    pub version: u64,
}
