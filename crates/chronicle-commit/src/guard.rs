//! Aggregate version reservation.

use chronicle_core::aggregate::{AggregateKey, AggregateRootRecord};
use chronicle_core::error::CommitError;
use chronicle_core::store::StoreTransaction;

/// Enforces the one-version-per-writer invariant for an aggregate instance.
///
/// All reads and writes go through the caller's transaction handle, so the
/// read-validate-write is atomic with respect to other writers of the same
/// instance. Conflicts that only materialize at commit time (a racing
/// creator hitting the unique index, or a racing advancer winning the
/// conditional update) surface from the transaction's `commit` call.
#[derive(Debug, Clone, Copy)]
pub struct AggregateVersionGuard;

impl AggregateVersionGuard {
    /// Reads the instance's current version through `tx`, treating a missing
    /// row as version 0.
    ///
    /// # Errors
    ///
    /// Returns [`CommitError::Storage`] when the read fails.
    pub async fn current_version(
        tx: &mut dyn StoreTransaction,
        key: &AggregateKey,
    ) -> Result<u64, CommitError> {
        Ok(tx.aggregate_version(key).await?.unwrap_or(0))
    }

    /// Reserves versions `[base_version, base_version + count)` of the
    /// instance and returns the version the row will hold after commit.
    ///
    /// A brand-new instance gets its initial row inserted; an existing
    /// instance is conditionally advanced. A stale `base_version` is
    /// rejected immediately; a concurrent winner is rejected at commit.
    ///
    /// # Errors
    ///
    /// Returns [`CommitError::AggregateConflict`] when the stored version no
    /// longer matches `base_version`, or [`CommitError::Storage`] when the
    /// storage engine fails.
    pub async fn reserve(
        tx: &mut dyn StoreTransaction,
        key: &AggregateKey,
        base_version: u64,
        count: u64,
    ) -> Result<u64, CommitError> {
        let stored = tx.aggregate_version(key).await?;
        let new_version = base_version + count;

        match stored {
            None if base_version == 0 => {
                tx.insert_aggregate(&AggregateRootRecord {
                    key: key.clone(),
                    version: new_version,
                })
                .await?;
            }
            None => {
                return Err(CommitError::AggregateConflict {
                    event_source: key.event_source.clone(),
                    aggregate_type: key.aggregate_type,
                    expected: base_version,
                    actual: 0,
                });
            }
            Some(actual) if actual != base_version => {
                tracing::debug!(
                    aggregate = %key,
                    expected = base_version,
                    actual,
                    "stale base version rejected"
                );
                return Err(CommitError::AggregateConflict {
                    event_source: key.event_source.clone(),
                    aggregate_type: key.aggregate_type,
                    expected: base_version,
                    actual,
                });
            }
            Some(actual) => {
                tx.advance_aggregate(key, actual, new_version).await?;
            }
        }

        Ok(new_version)
    }
}
