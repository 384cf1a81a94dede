//! Chronicle Core — shared domain abstractions.
//!
//! This crate defines the fundamental types and traits of the event log
//! commit protocol: committed-event and aggregate-root records, the
//! storage-engine abstraction, sequence allocation, and the error taxonomy.
//! It contains no infrastructure code.

pub mod aggregate;
pub mod clock;
pub mod error;
pub mod event;
pub mod sequence;
pub mod store;
