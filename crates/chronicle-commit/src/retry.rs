//! Caller-configured retry of conflicted attempts.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::request::CommitOutcome;

/// Retry policy for `Conflicted` outcomes.
///
/// The protocol itself never retries; this policy is opt-in and owned by the
/// caller. `Failed` outcomes are terminal and never retried. Each retry
/// re-runs the whole attempt, so state (aggregate base version, sequence
/// numbers) is refreshed.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl RetryPolicy {
    /// No retries: every outcome is returned as-is.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Retries conflicted attempts up to `max_retries` times with jittered
    /// exponential backoff starting at `base_delay`.
    #[must_use]
    pub fn with_backoff(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay: base_delay.saturating_mul(32),
        }
    }

    /// Caps the backoff delay.
    #[must_use]
    pub fn max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Runs `attempt` until it commits, fails terminally, or the retry
    /// budget is exhausted. An exhausted budget returns the last
    /// `Conflicted` outcome so the caller still sees the conflict.
    pub async fn run<F, Fut>(&self, mut attempt: F) -> CommitOutcome
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = CommitOutcome>,
    {
        let mut retries = 0;
        loop {
            let outcome = attempt().await;
            match outcome {
                CommitOutcome::Conflicted(_) if retries < self.max_retries => {
                    let delay = self.delay_for(retries);
                    retries += 1;
                    tracing::debug!(retries, delay_ms = delay.as_millis() as u64, "retrying conflicted attempt");
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
                outcome => return outcome,
            }
        }
    }

    /// Exponential backoff for the given retry, jittered into
    /// `[delay / 2, delay)` to spread contending writers apart.
    fn delay_for(&self, retry: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(retry))
            .min(self.max_delay);
        if exp.is_zero() {
            return exp;
        }
        let half = exp / 2;
        let jitter_micros = rand::rng().random_range(0..=half.as_micros() as u64);
        half + Duration::from_micros(jitter_micros)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}
