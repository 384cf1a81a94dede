//! Concurrent fan-out of commit attempts.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::task::JoinSet;
use uuid::Uuid;

use chronicle_core::error::{CommitError, StoreError};

use crate::committer::Committer;
use crate::request::{CommitOutcome, CommitRequest};
use crate::retry::RetryPolicy;

/// Whether batches commit plain events or aggregate-scoped events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchMode {
    /// Events carry no aggregate identity.
    NonAggregate,
    /// Each batch writes one fresh aggregate instance of its own type.
    Aggregate,
}

/// Parameters of one concurrent run.
#[derive(Debug, Clone)]
pub struct BatchSpec {
    /// The stream all batches write to.
    pub event_source: String,
    /// Number of independent commit attempts to launch.
    pub batches: usize,
    /// Number of events each attempt commits.
    pub events_per_batch: usize,
    /// Aggregate scoping of the batches.
    pub mode: BatchMode,
}

/// Drives `batches` independent commit attempts concurrently and collects
/// every outcome.
///
/// Attempts are launched without mutual ordering constraints. When
/// `run_concurrent` returns, every attempt has either committed or
/// terminally failed; none is silently dropped. A panicked attempt task is
/// reported as a `Failed` outcome.
#[derive(Debug)]
pub struct BatchCoordinator {
    committer: Arc<Committer>,
    retry: RetryPolicy,
}

impl BatchCoordinator {
    /// Creates a coordinator that surfaces conflicts without retrying.
    #[must_use]
    pub fn new(committer: Arc<Committer>) -> Self {
        Self {
            committer,
            retry: RetryPolicy::none(),
        }
    }

    /// Installs a retry policy applied to each attempt's `Conflicted`
    /// outcomes.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Runs all batches to completion and returns their outcomes indexed by
    /// batch.
    #[tracing::instrument(skip_all, fields(batches = spec.batches, events_per_batch = spec.events_per_batch, mode = ?spec.mode))]
    pub async fn run_concurrent(&self, spec: &BatchSpec) -> Vec<CommitOutcome> {
        let mut tasks = JoinSet::new();
        let mut batch_of_task = HashMap::with_capacity(spec.batches);

        for batch in 0..spec.batches {
            let committer = Arc::clone(&self.committer);
            let retry = self.retry.clone();
            let request = Self::request_for(spec, batch);
            let handle = tasks.spawn(async move { retry.run(|| committer.commit(&request)).await });
            batch_of_task.insert(handle.id(), batch);
        }

        let mut outcomes: Vec<Option<CommitOutcome>> =
            (0..spec.batches).map(|_| None).collect();
        while let Some(joined) = tasks.join_next_with_id().await {
            match joined {
                Ok((id, outcome)) => {
                    if let Some(&batch) = batch_of_task.get(&id) {
                        outcomes[batch] = Some(outcome);
                    }
                }
                Err(join_err) => {
                    tracing::error!(error = %join_err, "commit attempt task panicked");
                    if let Some(&batch) = batch_of_task.get(&join_err.id()) {
                        outcomes[batch] = Some(CommitOutcome::Failed(CommitError::Storage(
                            StoreError::backend_msg(format!(
                                "commit attempt task panicked: {join_err}"
                            )),
                        )));
                    }
                }
            }
        }

        outcomes
            .into_iter()
            .map(|outcome| {
                outcome.unwrap_or_else(|| {
                    CommitOutcome::Failed(CommitError::Storage(StoreError::backend_msg(
                        "commit attempt was dropped before completion",
                    )))
                })
            })
            .collect()
    }

    /// Builds the request for one batch. Aggregate mode constructs a fresh
    /// instance identifier per batch, so by default batches never contend on
    /// the aggregate unique index.
    fn request_for(spec: &BatchSpec, batch: usize) -> CommitRequest {
        let payloads: Vec<serde_json::Value> = (0..spec.events_per_batch)
            .map(|n| serde_json::json!({ "batch": batch, "n": n }))
            .collect();
        match spec.mode {
            BatchMode::NonAggregate => CommitRequest::events(spec.event_source.clone(), payloads),
            BatchMode::Aggregate => CommitRequest::aggregate_events(
                spec.event_source.clone(),
                Uuid::new_v4(),
                payloads,
            ),
        }
    }
}
