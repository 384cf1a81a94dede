//! In-memory transactional store.
//!
//! Models the storage engine the protocol is specified against: atomic
//! multi-write transactions with buffered writes, first-committer-wins
//! conflict detection, and unique-index enforcement on the aggregates
//! table. The log's own sequence-number uniqueness constraint is optional
//! (off by default) so the recount strategy's failure mode stays
//! reproducible in tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chronicle_core::aggregate::{AggregateKey, AggregateRootRecord};
use chronicle_core::error::StoreError;
use chronicle_core::event::CommittedEvent;
use chronicle_core::store::{
    AGGREGATE_KEY_CONSTRAINT, EVENT_LOG_SEQUENCE_CONSTRAINT, EventStore, StoreTransaction,
};

/// Behavior switches for [`MemoryEventStore`].
#[derive(Debug, Clone, Copy)]
pub struct MemoryStoreOptions {
    /// Enforce a uniqueness constraint on `sequence_number` at commit, so a
    /// recount race surfaces as a detectable conflict instead of silently
    /// corrupting the log.
    pub enforce_sequence_uniqueness: bool,
}

impl Default for MemoryStoreOptions {
    fn default() -> Self {
        Self {
            enforce_sequence_uniqueness: false,
        }
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    events: Vec<CommittedEvent>,
    aggregates: HashMap<AggregateKey, u64>,
}

/// In-memory implementation of [`EventStore`].
#[derive(Debug, Default)]
pub struct MemoryEventStore {
    state: Arc<Mutex<MemoryState>>,
    options: MemoryStoreOptions,
}

impl MemoryEventStore {
    /// Creates a store with default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store with the given options.
    #[must_use]
    pub fn with_options(options: MemoryStoreOptions) -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState::default())),
            options,
        }
    }

    /// Snapshot of all committed events in commit order.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[must_use]
    pub fn committed_events(&self) -> Vec<CommittedEvent> {
        self.state.lock().unwrap().events.clone()
    }

    /// The committed version of an aggregate instance, if its row exists.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[must_use]
    pub fn stored_aggregate_version(&self, key: &AggregateKey) -> Option<u64> {
        self.state.lock().unwrap().aggregates.get(key).copied()
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        Ok(Box::new(MemoryTransaction {
            state: Arc::clone(&self.state),
            options: self.options,
            staged_events: Vec::new(),
            staged_aggregates: Vec::new(),
        }))
    }

    async fn ensure_schema(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[derive(Debug)]
enum StagedAggregateWrite {
    Insert(AggregateRootRecord),
    Advance {
        key: AggregateKey,
        expected: u64,
        new: u64,
    },
}

/// One buffered transaction against a [`MemoryEventStore`].
///
/// Writes stay local to the handle until `commit`, which revalidates all
/// constraints against the then-current committed state under one lock and
/// applies everything atomically. Dropping the handle discards the buffer.
#[derive(Debug)]
struct MemoryTransaction {
    state: Arc<Mutex<MemoryState>>,
    options: MemoryStoreOptions,
    staged_events: Vec<CommittedEvent>,
    staged_aggregates: Vec<StagedAggregateWrite>,
}

impl MemoryTransaction {
    fn staged_version_of(&self, key: &AggregateKey) -> Option<u64> {
        self.staged_aggregates.iter().rev().find_map(|write| match write {
            StagedAggregateWrite::Insert(record) if record.key == *key => Some(record.version),
            StagedAggregateWrite::Advance { key: k, new, .. } if k == key => Some(*new),
            _ => None,
        })
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn insert_events(&mut self, events: &[CommittedEvent]) -> Result<(), StoreError> {
        self.staged_events.extend_from_slice(events);
        Ok(())
    }

    #[allow(clippy::cast_possible_truncation)]
    async fn count_events(&mut self) -> Result<u64, StoreError> {
        let committed = self.state.lock().unwrap().events.len();
        Ok((committed + self.staged_events.len()) as u64)
    }

    async fn aggregate_version(
        &mut self,
        key: &AggregateKey,
    ) -> Result<Option<u64>, StoreError> {
        if let Some(version) = self.staged_version_of(key) {
            return Ok(Some(version));
        }
        Ok(self.state.lock().unwrap().aggregates.get(key).copied())
    }

    async fn insert_aggregate(&mut self, record: &AggregateRootRecord) -> Result<(), StoreError> {
        // Eager check, like an index probe at write time. The authoritative
        // check is repeated at commit under the state lock.
        let exists = self.state.lock().unwrap().aggregates.contains_key(&record.key)
            || self.staged_version_of(&record.key).is_some();
        if exists {
            return Err(StoreError::UniqueViolation {
                constraint: AGGREGATE_KEY_CONSTRAINT.to_string(),
            });
        }
        self.staged_aggregates
            .push(StagedAggregateWrite::Insert(record.clone()));
        Ok(())
    }

    async fn advance_aggregate(
        &mut self,
        key: &AggregateKey,
        expected: u64,
        new: u64,
    ) -> Result<(), StoreError> {
        let current = self
            .staged_version_of(key)
            .or_else(|| self.state.lock().unwrap().aggregates.get(key).copied());
        match current {
            Some(version) if version == expected => {
                self.staged_aggregates.push(StagedAggregateWrite::Advance {
                    key: key.clone(),
                    expected,
                    new,
                });
                Ok(())
            }
            _ => Err(StoreError::WriteConflict(format!(
                "aggregate {key} no longer at version {expected}"
            ))),
        }
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let Self {
            state,
            options,
            staged_events,
            staged_aggregates,
        } = *self;
        let mut state = state.lock().unwrap();

        for write in &staged_aggregates {
            match write {
                StagedAggregateWrite::Insert(record) => {
                    if state.aggregates.contains_key(&record.key) {
                        return Err(StoreError::UniqueViolation {
                            constraint: AGGREGATE_KEY_CONSTRAINT.to_string(),
                        });
                    }
                }
                StagedAggregateWrite::Advance { key, expected, .. } => {
                    if state.aggregates.get(key) != Some(expected) {
                        return Err(StoreError::WriteConflict(format!(
                            "aggregate {key} no longer at version {expected}"
                        )));
                    }
                }
            }
        }

        if options.enforce_sequence_uniqueness {
            let committed: HashSet<u64> =
                state.events.iter().map(|e| e.sequence_number).collect();
            let mut staged = HashSet::new();
            for event in &staged_events {
                if committed.contains(&event.sequence_number)
                    || !staged.insert(event.sequence_number)
                {
                    return Err(StoreError::UniqueViolation {
                        constraint: EVENT_LOG_SEQUENCE_CONSTRAINT.to_string(),
                    });
                }
            }
        }

        state.events.extend(staged_events);
        for write in staged_aggregates {
            match write {
                StagedAggregateWrite::Insert(record) => {
                    state.aggregates.insert(record.key, record.version);
                }
                StagedAggregateWrite::Advance { key, new, .. } => {
                    state.aggregates.insert(key, new);
                }
            }
        }
        Ok(())
    }

    async fn abort(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}
