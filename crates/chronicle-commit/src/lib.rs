//! Chronicle Commit — the commit protocol for the append-only event log.
//!
//! A commit attempt binds sequence allocation, event writes, and the
//! aggregate-version write into one atomic, isolated transaction against the
//! storage engine. [`Committer`] drives single attempts, [`BatchCoordinator`]
//! fans out many concurrent attempts, and [`AggregateVersionGuard`] enforces
//! the one-version-per-writer invariant.

pub mod committer;
pub mod coordinator;
pub mod guard;
pub mod request;
pub mod retry;

pub use committer::{AttemptPhase, Committer};
pub use coordinator::{BatchCoordinator, BatchMode, BatchSpec};
pub use guard::AggregateVersionGuard;
pub use request::{CommitOutcome, CommitReceipt, CommitRequest};
pub use retry::RetryPolicy;
