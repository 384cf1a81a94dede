//! Integration tests for `PgEventStore`.
//!
//! These tests need a running PostgreSQL server and are ignored by default:
//!
//! ```text
//! DATABASE_URL=postgres://localhost/chronicle_test \
//!     cargo test -p chronicle-event-store -- --ignored
//! ```
//!
//! Everything runs inside one test function because the tests share the
//! database schema.

use std::sync::Arc;

use chronicle_commit::{CommitRequest, Committer};
use chronicle_core::aggregate::AggregateKey;
use chronicle_core::error::StoreError;
use chronicle_core::event::CommittedEvent;
use chronicle_core::sequence::SequenceCounter;
use chronicle_core::store::{
    AGGREGATE_KEY_CONSTRAINT, EVENT_LOG_SEQUENCE_CONSTRAINT, EventStore,
};
use chronicle_event_store::{PgEventStore, StoreConfig};
use uuid::Uuid;

const EVENT_SOURCE: &str = "a62611fb-ef61-4c28-a1dc-5be183f424cf";

fn payloads(n: usize) -> Vec<serde_json::Value> {
    (0..n).map(|i| serde_json::json!(i.to_string())).collect()
}

fn bare_event(sequence_number: u64) -> CommittedEvent {
    CommittedEvent {
        sequence_number,
        event_source: EVENT_SOURCE.to_string(),
        aggregate: None,
        content: serde_json::json!("0"),
        occurred_at: chrono::Utc::now(),
    }
}

#[tokio::test]
#[ignore = "requires a PostgreSQL server via DATABASE_URL"]
async fn pg_store_end_to_end() {
    let config = StoreConfig::from_env().expect("DATABASE_URL must be set");
    let pool = config.connect().await.expect("database must be reachable");
    sqlx::raw_sql("DROP TABLE IF EXISTS event_log; DROP TABLE IF EXISTS aggregate_roots;")
        .execute(&pool)
        .await
        .expect("failed to reset schema");

    let store = Arc::new(PgEventStore::new(pool));
    store.ensure_schema().await.expect("schema setup failed");

    let committer = Committer::new(
        Arc::clone(&store) as Arc<dyn EventStore>,
        Arc::new(SequenceCounter::default()),
    );

    // Non-aggregate commit lands with contiguous sequence numbers.
    let outcome = committer
        .commit(&CommitRequest::events(EVENT_SOURCE, payloads(3)))
        .await;
    let receipt = outcome.receipt().expect("commit should succeed");
    assert_eq!(receipt.sequence_numbers, vec![0, 1, 2]);

    // Aggregate commit creates the row and assigns versions in order.
    let aggregate_type = Uuid::new_v4();
    let outcome = committer
        .commit(&CommitRequest::aggregate_events(
            EVENT_SOURCE,
            aggregate_type,
            payloads(5),
        ))
        .await;
    let receipt = outcome.receipt().expect("aggregate commit should succeed");
    assert_eq!(receipt.aggregate, Some((aggregate_type, 5)));

    let key = AggregateKey::new(EVENT_SOURCE, aggregate_type);
    let mut tx = store.begin().await.unwrap();
    assert_eq!(tx.aggregate_version(&key).await.unwrap(), Some(5));
    assert_eq!(tx.count_events().await.unwrap(), 8);
    tx.abort().await.unwrap();

    // A second creation of the same aggregate key violates the unique index
    // under the constraint name the protocol classifies.
    let mut tx = store.begin().await.unwrap();
    let duplicate = tx
        .insert_aggregate(&chronicle_core::aggregate::AggregateRootRecord {
            key: key.clone(),
            version: 1,
        })
        .await;
    match duplicate {
        Err(StoreError::UniqueViolation { constraint }) => {
            assert_eq!(constraint, AGGREGATE_KEY_CONSTRAINT);
        }
        other => panic!("expected UniqueViolation, got {other:?}"),
    }
    tx.abort().await.unwrap();

    // A duplicate sequence number violates the log's primary key, so a
    // recount race is detectable rather than silent.
    let mut tx_a = store.begin().await.unwrap();
    let mut tx_b = store.begin().await.unwrap();
    let base = tx_b.count_events().await.unwrap();
    tx_a.insert_events(&[bare_event(base)]).await.unwrap();
    tx_a.commit().await.unwrap();
    let race = tx_b.insert_events(&[bare_event(base)]).await;
    match race {
        Err(StoreError::UniqueViolation { constraint }) => {
            assert_eq!(constraint, EVENT_LOG_SEQUENCE_CONSTRAINT);
        }
        other => panic!("expected UniqueViolation, got {other:?}"),
    }
    tx_b.abort().await.unwrap();

    // Stale conditional advance loses with a write conflict.
    let mut tx = store.begin().await.unwrap();
    let stale = tx.advance_aggregate(&key, 3, 4).await;
    match stale {
        Err(StoreError::WriteConflict(_)) => {}
        other => panic!("expected WriteConflict, got {other:?}"),
    }
    tx.abort().await.unwrap();
}
