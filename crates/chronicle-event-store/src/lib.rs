//! Chronicle Event Store — PostgreSQL storage backend.
//!
//! Implements the storage traits from `chronicle-core` on top of `sqlx`.
//! Unique-index violations and serialization failures are mapped to the
//! protocol's error taxonomy so the commit layer can classify them.

pub mod config;
pub mod pg_store;
pub mod schema;

pub use config::StoreConfig;
pub use pg_store::PgEventStore;
