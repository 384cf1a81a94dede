//! Shared test doubles for the Chronicle event log.

mod clock;
mod flaky;
mod memory;

pub use clock::FixedClock;
pub use flaky::{FlakyEventStore, FlakyFailure};
pub use memory::{MemoryEventStore, MemoryStoreOptions};
