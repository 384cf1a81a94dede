//! Single commit attempts.
//!
//! A [`Committer`] drives one attempt through the per-attempt state machine
//! `Pending -> Allocating -> Writing -> Committing` into one of the terminal
//! outcomes. It never retries on its own initiative; every failure is
//! classified and returned to the caller.

use std::fmt;
use std::sync::Arc;

use chronicle_core::aggregate::AggregateKey;
use chronicle_core::clock::{Clock, SystemClock};
use chronicle_core::error::{CommitError, StoreError};
use chronicle_core::event::{AggregateScope, CommittedEvent};
use chronicle_core::sequence::{AllocationStrategy, SequenceCounter};
use chronicle_core::store::{
    AGGREGATE_KEY_CONSTRAINT, EVENT_LOG_SEQUENCE_CONSTRAINT, EventStore, StoreTransaction,
};

use crate::guard::AggregateVersionGuard;
use crate::request::{CommitOutcome, CommitReceipt, CommitRequest};

/// Position of an attempt in its state machine, reported through tracing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptPhase {
    /// The attempt has not started work yet.
    Pending,
    /// Obtaining sequence numbers (and the aggregate base version).
    Allocating,
    /// Building and inserting event records.
    Writing,
    /// Waiting for the storage engine to commit.
    Committing,
}

impl fmt::Display for AttemptPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Allocating => "allocating",
            Self::Writing => "writing",
            Self::Committing => "committing",
        };
        f.write_str(name)
    }
}

/// Context an attempt accumulates, used to classify failures.
#[derive(Debug, Default)]
struct AttemptContext {
    aggregate: Option<(AggregateKey, u64)>,
    first_sequence: Option<u64>,
}

/// Commits event batches as atomic, isolated transactions.
pub struct Committer {
    store: Arc<dyn EventStore>,
    counter: Arc<SequenceCounter>,
    strategy: AllocationStrategy,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for Committer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Committer")
            .field("strategy", &self.strategy)
            .field("next_sequence", &self.counter.peek())
            .finish_non_exhaustive()
    }
}

impl Committer {
    /// Creates a committer using the default (per-batch counter) strategy
    /// and the system clock.
    #[must_use]
    pub fn new(store: Arc<dyn EventStore>, counter: Arc<SequenceCounter>) -> Self {
        Self {
            store,
            counter,
            strategy: AllocationStrategy::default(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Selects the sequence allocation strategy.
    #[must_use]
    pub fn with_strategy(mut self, strategy: AllocationStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Replaces the clock used to stamp `occurred_at`.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The active allocation strategy.
    #[must_use]
    pub fn strategy(&self) -> AllocationStrategy {
        self.strategy
    }

    /// Runs one commit attempt to a terminal outcome.
    ///
    /// All writes of the attempt become visible atomically on commit; on any
    /// failure the transaction is aborted and nothing is visible.
    #[tracing::instrument(
        skip_all,
        fields(
            event_source = %request.event_source,
            events = request.payloads.len(),
            aggregate_type = ?request.aggregate_type,
        )
    )]
    pub async fn commit(&self, request: &CommitRequest) -> CommitOutcome {
        match self.run_attempt(request).await {
            Ok(receipt) => {
                tracing::debug!(events = receipt.sequence_numbers.len(), "attempt committed");
                CommitOutcome::Committed(receipt)
            }
            Err(err) if err.is_retryable() => {
                tracing::debug!(error = %err, "attempt conflicted");
                CommitOutcome::Conflicted(err)
            }
            Err(err) => {
                tracing::warn!(error = %err, "attempt failed");
                CommitOutcome::Failed(err)
            }
        }
    }

    async fn run_attempt(&self, request: &CommitRequest) -> Result<CommitReceipt, CommitError> {
        tracing::trace!(phase = %AttemptPhase::Pending);
        if request.payloads.is_empty() {
            return Ok(CommitReceipt {
                sequence_numbers: Vec::new(),
                aggregate: None,
            });
        }

        let mut ctx = AttemptContext::default();
        let mut tx = match self.store.begin().await {
            Ok(tx) => tx,
            Err(err) => return Err(self.classify(err, &ctx).await),
        };

        match self.stage(tx.as_mut(), request, &mut ctx).await {
            Ok(receipt) => {
                tracing::trace!(phase = %AttemptPhase::Committing);
                match tx.commit().await {
                    Ok(()) => Ok(receipt),
                    Err(err) => Err(self.classify(err, &ctx).await),
                }
            }
            Err(err) => {
                if let Err(abort_err) = tx.abort().await {
                    tracing::warn!(error = %abort_err, "abort after failed attempt also failed");
                }
                Err(self.refine(err, &ctx).await)
            }
        }
    }

    /// Allocates sequence numbers and buffers all writes of the attempt into
    /// the open transaction. Nothing is visible until the caller commits.
    #[allow(clippy::cast_possible_truncation)]
    async fn stage(
        &self,
        tx: &mut dyn StoreTransaction,
        request: &CommitRequest,
        ctx: &mut AttemptContext,
    ) -> Result<CommitReceipt, CommitError> {
        let count = request.payloads.len() as u64;

        tracing::trace!(phase = %AttemptPhase::Allocating, strategy = ?self.strategy);
        let sequence_numbers: Vec<u64> = match self.strategy {
            AllocationStrategy::Recount => {
                // Legacy baseline: the count observed here is not protected
                // against concurrent writers observing the same value.
                let base = tx.count_events().await?;
                (base..base + count).collect()
            }
            AllocationStrategy::CounterPerEvent => (0..count)
                .map(|_| self.counter.allocate(1).start)
                .collect(),
            AllocationStrategy::CounterPerBatch => self.counter.allocate(count).iter().collect(),
        };
        ctx.first_sequence = sequence_numbers.first().copied();

        let aggregate_base = match request.aggregate_type {
            Some(aggregate_type) => {
                let key = AggregateKey::new(request.event_source.clone(), aggregate_type);
                let base = AggregateVersionGuard::current_version(tx, &key).await?;
                ctx.aggregate = Some((key.clone(), base));
                Some((key, base))
            }
            None => None,
        };

        tracing::trace!(phase = %AttemptPhase::Writing);
        let now = self.clock.now();
        let events: Vec<CommittedEvent> = request
            .payloads
            .iter()
            .zip(&sequence_numbers)
            .enumerate()
            .map(|(offset, (payload, &sequence_number))| CommittedEvent {
                sequence_number,
                event_source: request.event_source.clone(),
                aggregate: aggregate_base.as_ref().map(|(key, base)| AggregateScope {
                    aggregate_type: key.aggregate_type,
                    root_version: base + offset as u64,
                }),
                content: payload.clone(),
                occurred_at: now,
            })
            .collect();

        tx.insert_events(&events).await?;

        let aggregate = match aggregate_base {
            Some((key, base)) => {
                let new_version = AggregateVersionGuard::reserve(tx, &key, base, count).await?;
                Some((key.aggregate_type, new_version))
            }
            None => None,
        };

        Ok(CommitReceipt {
            sequence_numbers,
            aggregate,
        })
    }

    /// Re-runs classification on errors that bubbled up as raw storage
    /// failures from deeper in the attempt.
    async fn refine(&self, err: CommitError, ctx: &AttemptContext) -> CommitError {
        match err {
            CommitError::Storage(store_err) => self.classify(store_err, ctx).await,
            other => other,
        }
    }

    /// Maps a storage failure to the protocol's error taxonomy.
    async fn classify(&self, err: StoreError, ctx: &AttemptContext) -> CommitError {
        match err {
            StoreError::UniqueViolation { constraint }
                if constraint == AGGREGATE_KEY_CONSTRAINT =>
            {
                match &ctx.aggregate {
                    Some((key, base)) => {
                        let actual = self.lookup_version(key).await.unwrap_or(*base);
                        CommitError::AggregateConflict {
                            event_source: key.event_source.clone(),
                            aggregate_type: key.aggregate_type,
                            expected: *base,
                            actual,
                        }
                    }
                    None => CommitError::TransactionAbort(format!(
                        "unique constraint violated: {constraint}"
                    )),
                }
            }
            StoreError::UniqueViolation { constraint }
                if constraint == EVENT_LOG_SEQUENCE_CONSTRAINT =>
            {
                CommitError::SequenceRace {
                    sequence_number: ctx.first_sequence.unwrap_or_default(),
                }
            }
            StoreError::UniqueViolation { constraint } => CommitError::TransactionAbort(format!(
                "unique constraint violated: {constraint}"
            )),
            StoreError::WriteConflict(message) => CommitError::TransactionAbort(message),
            err @ StoreError::Backend { .. } => CommitError::Storage(err),
        }
    }

    /// Best-effort read of an aggregate's committed version in a fresh
    /// transaction, used to report the winner's version after a conflict.
    async fn lookup_version(&self, key: &AggregateKey) -> Option<u64> {
        let mut tx = self.store.begin().await.ok()?;
        let version = tx.aggregate_version(key).await.ok().flatten();
        if let Err(err) = tx.abort().await {
            tracing::debug!(error = %err, "failed to close version lookup transaction");
        }
        version
    }
}
