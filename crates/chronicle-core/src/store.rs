//! Storage engine abstraction.
//!
//! The commit protocol treats the durable store as an abstract transactional
//! document store offering atomic multi-write transactions and unique-index
//! enforcement. Every read used to make a write decision must happen through
//! the same transaction handle as the write itself; the protocol never
//! assumes exclusive access to the underlying tables.

use async_trait::async_trait;

use crate::aggregate::{AggregateKey, AggregateRootRecord};
use crate::error::StoreError;
use crate::event::CommittedEvent;

/// Name of the uniqueness constraint on the log's sequence number. Stores
/// report violations of it under this name so the protocol can classify
/// them as sequence races.
pub const EVENT_LOG_SEQUENCE_CONSTRAINT: &str = "event_log_sequence_number_key";

/// Name of the uniqueness constraint on `(event_source, aggregate_type)`.
/// Violations of it classify as aggregate conflicts.
pub const AGGREGATE_KEY_CONSTRAINT: &str = "aggregate_roots_key";

/// One in-flight transaction against the store.
///
/// Writes are buffered until [`commit`](StoreTransaction::commit); nothing
/// becomes externally visible unless the transaction commits, and on commit
/// all writes become visible atomically. Event insertion order within the
/// transaction is preserved. Dropping a handle without calling `commit` or
/// [`abort`](StoreTransaction::abort) must behave like an abort.
#[async_trait]
pub trait StoreTransaction: Send {
    /// Inserts events into the log in submission order.
    async fn insert_events(&mut self, events: &[CommittedEvent]) -> Result<(), StoreError>;

    /// Counts all events currently in the log, as seen by this transaction.
    ///
    /// Used only by the recount allocation strategy.
    async fn count_events(&mut self) -> Result<u64, StoreError>;

    /// Reads the stored version of an aggregate instance, if the row exists.
    async fn aggregate_version(&mut self, key: &AggregateKey)
    -> Result<Option<u64>, StoreError>;

    /// Inserts a brand-new aggregate row. A concurrent creator of the same
    /// key surfaces as [`StoreError::UniqueViolation`] at the latest on
    /// commit.
    async fn insert_aggregate(&mut self, record: &AggregateRootRecord) -> Result<(), StoreError>;

    /// Advances an existing aggregate row from `expected` to `new`. Fails
    /// with [`StoreError::WriteConflict`], at the latest on commit, when a
    /// concurrent writer advanced the row first.
    async fn advance_aggregate(
        &mut self,
        key: &AggregateKey,
        expected: u64,
        new: u64,
    ) -> Result<(), StoreError>;

    /// Makes all buffered writes durable and visible atomically.
    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    /// Discards all buffered writes.
    async fn abort(self: Box<Self>) -> Result<(), StoreError>;
}

/// Handle to the durable event log and aggregates table.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Opens a transaction with isolation sufficient to detect write-write
    /// conflicts on the aggregate uniqueness constraint.
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError>;

    /// One-time setup: creates the log and aggregates tables and the unique
    /// index on `(event_source, aggregate_type)`.
    async fn ensure_schema(&self) -> Result<(), StoreError>;
}
