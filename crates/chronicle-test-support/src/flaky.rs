//! Failure-injecting store wrapper.

use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use chronicle_core::aggregate::{AggregateKey, AggregateRootRecord};
use chronicle_core::error::StoreError;
use chronicle_core::event::CommittedEvent;
use chronicle_core::store::{
    AGGREGATE_KEY_CONSTRAINT, EVENT_LOG_SEQUENCE_CONSTRAINT, EventStore, StoreTransaction,
};

/// What kind of failure a doomed transaction reports at commit.
#[derive(Debug, Clone, Copy)]
pub enum FlakyFailure {
    /// A transient serialization failure; the protocol classifies it as a
    /// retryable transaction abort.
    WriteConflict,
    /// An I/O-level fault; terminal for the attempt.
    Backend,
    /// A unique-index violation on the log's sequence number, as a
    /// sequence race would produce.
    SequenceUniqueViolation,
    /// A unique-index violation on the aggregates table, as losing a
    /// creation race would produce. A doomed transaction also reads the
    /// aggregates table as of before the winning commit, so the loser bases
    /// its writes on a snapshot the winner has since overtaken.
    AggregateUniqueViolation,
}

impl FlakyFailure {
    fn to_error(self) -> StoreError {
        match self {
            Self::WriteConflict => {
                StoreError::WriteConflict("injected serialization failure".into())
            }
            Self::Backend => StoreError::backend_msg("injected connection loss"),
            Self::SequenceUniqueViolation => StoreError::UniqueViolation {
                constraint: EVENT_LOG_SEQUENCE_CONSTRAINT.to_string(),
            },
            Self::AggregateUniqueViolation => StoreError::UniqueViolation {
                constraint: AGGREGATE_KEY_CONSTRAINT.to_string(),
            },
        }
    }
}

/// Wraps another store and dooms the first `n` transactions: each behaves
/// like a racing writer that loses, failing at commit with the configured
/// error. Doomed transactions discard their writes, exactly like a real
/// abort, so the wrapper is useful for exercising retry, classification,
/// and allocation-burning behavior.
pub struct FlakyEventStore<S> {
    inner: S,
    failures_remaining: AtomicU32,
    failure: FlakyFailure,
}

impl<S: EventStore> FlakyEventStore<S> {
    /// Fails the first `failures` transactions' commits with `failure`,
    /// then delegates.
    #[must_use]
    pub fn failing_commits(inner: S, failures: u32, failure: FlakyFailure) -> Self {
        Self {
            inner,
            failures_remaining: AtomicU32::new(failures),
            failure,
        }
    }

    /// The wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn take_failure(&self) -> Option<FlakyFailure> {
        let mut remaining = self.failures_remaining.load(Ordering::SeqCst);
        while remaining > 0 {
            match self.failures_remaining.compare_exchange(
                remaining,
                remaining - 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return Some(self.failure),
                Err(actual) => remaining = actual,
            }
        }
        None
    }
}

#[async_trait]
impl<S: EventStore> EventStore for FlakyEventStore<S> {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        let inner = self.inner.begin().await?;
        Ok(Box::new(FlakyTransaction {
            inner,
            fail_with: self.take_failure(),
        }))
    }

    async fn ensure_schema(&self) -> Result<(), StoreError> {
        self.inner.ensure_schema().await
    }
}

struct FlakyTransaction {
    inner: Box<dyn StoreTransaction>,
    fail_with: Option<FlakyFailure>,
}

impl FlakyTransaction {
    fn lost_creation_race(&self) -> bool {
        matches!(self.fail_with, Some(FlakyFailure::AggregateUniqueViolation))
    }
}

#[async_trait]
impl StoreTransaction for FlakyTransaction {
    async fn insert_events(&mut self, events: &[CommittedEvent]) -> Result<(), StoreError> {
        self.inner.insert_events(events).await
    }

    async fn count_events(&mut self) -> Result<u64, StoreError> {
        self.inner.count_events().await
    }

    async fn aggregate_version(
        &mut self,
        key: &AggregateKey,
    ) -> Result<Option<u64>, StoreError> {
        // The loser of a creation race read the table before the winner's
        // row became visible.
        if self.lost_creation_race() {
            return Ok(None);
        }
        self.inner.aggregate_version(key).await
    }

    async fn insert_aggregate(&mut self, record: &AggregateRootRecord) -> Result<(), StoreError> {
        // The doomed insert is accepted into the buffer; the unique index
        // rejects it at commit.
        if self.lost_creation_race() {
            return Ok(());
        }
        self.inner.insert_aggregate(record).await
    }

    async fn advance_aggregate(
        &mut self,
        key: &AggregateKey,
        expected: u64,
        new: u64,
    ) -> Result<(), StoreError> {
        self.inner.advance_aggregate(key, expected, new).await
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        if let Some(failure) = self.fail_with {
            self.inner.abort().await?;
            return Err(failure.to_error());
        }
        self.inner.commit().await
    }

    async fn abort(self: Box<Self>) -> Result<(), StoreError> {
        self.inner.abort().await
    }
}
