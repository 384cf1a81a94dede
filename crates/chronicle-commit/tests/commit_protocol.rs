//! Integration tests for single commit attempts and the version guard.

use std::sync::Arc;

use chronicle_commit::{AggregateVersionGuard, CommitOutcome, CommitRequest, Committer};
use chronicle_core::aggregate::AggregateKey;
use chronicle_core::clock::Clock;
use chronicle_core::error::{CommitError, StoreError};
use chronicle_core::event::CommittedEvent;
use chronicle_core::sequence::{AllocationStrategy, SequenceCounter};
use chronicle_core::store::{
    AGGREGATE_KEY_CONSTRAINT, EVENT_LOG_SEQUENCE_CONSTRAINT, EventStore,
};
use chronicle_test_support::{
    FixedClock, FlakyEventStore, FlakyFailure, MemoryEventStore, MemoryStoreOptions,
};
use uuid::Uuid;

const EVENT_SOURCE: &str = "a62611fb-ef61-4c28-a1dc-5be183f424cf";

fn payloads(n: usize) -> Vec<serde_json::Value> {
    (0..n).map(|i| serde_json::json!(i.to_string())).collect()
}

fn committer_over(store: &Arc<MemoryEventStore>) -> Committer {
    Committer::new(
        Arc::clone(store) as Arc<dyn EventStore>,
        Arc::new(SequenceCounter::default()),
    )
}

#[tokio::test]
async fn non_aggregate_commit_assigns_contiguous_sequence_numbers() {
    let store = Arc::new(MemoryEventStore::new());
    let committer = committer_over(&store);

    let outcome = committer
        .commit(&CommitRequest::events(EVENT_SOURCE, payloads(3)))
        .await;

    let receipt = outcome.receipt().expect("commit should succeed");
    assert_eq!(receipt.sequence_numbers, vec![0, 1, 2]);
    assert_eq!(receipt.aggregate, None);

    let events = store.committed_events();
    assert_eq!(events.len(), 3);
    for (i, event) in events.iter().enumerate() {
        assert_eq!(event.sequence_number, i as u64);
        assert_eq!(event.event_source, EVENT_SOURCE);
        assert_eq!(event.aggregate, None);
    }
}

#[tokio::test]
async fn aggregate_commit_assigns_versions_in_commit_order() {
    let store = Arc::new(MemoryEventStore::new());
    let clock = FixedClock::default_instant();
    let committer = committer_over(&store).with_clock(Arc::new(clock));
    let aggregate_type = Uuid::new_v4();

    let outcome = committer
        .commit(&CommitRequest::aggregate_events(
            EVENT_SOURCE,
            aggregate_type,
            payloads(5),
        ))
        .await;

    let receipt = outcome.receipt().expect("commit should succeed");
    assert_eq!(receipt.sequence_numbers, vec![0, 1, 2, 3, 4]);
    assert_eq!(receipt.aggregate, Some((aggregate_type, 5)));

    let key = AggregateKey::new(EVENT_SOURCE, aggregate_type);
    assert_eq!(store.stored_aggregate_version(&key), Some(5));

    let events = store.committed_events();
    assert_eq!(events.len(), 5);
    for (i, event) in events.iter().enumerate() {
        assert_eq!(event.root_version(), Some(i as u64));
        assert_eq!(event.occurred_at, clock.now());
    }
}

#[tokio::test]
async fn sequential_aggregate_commits_extend_the_version() {
    let store = Arc::new(MemoryEventStore::new());
    let committer = committer_over(&store);
    let aggregate_type = Uuid::new_v4();

    for batch in [3usize, 2] {
        let outcome = committer
            .commit(&CommitRequest::aggregate_events(
                EVENT_SOURCE,
                aggregate_type,
                payloads(batch),
            ))
            .await;
        assert!(outcome.is_committed(), "batch of {batch} should commit");
    }

    let key = AggregateKey::new(EVENT_SOURCE, aggregate_type);
    assert_eq!(store.stored_aggregate_version(&key), Some(5));

    let versions: Vec<u64> = store
        .committed_events()
        .iter()
        .filter_map(CommittedEvent::root_version)
        .collect();
    assert_eq!(versions, vec![0, 1, 2, 3, 4]);
}

#[tokio::test]
async fn empty_commit_is_a_noop() {
    let store = Arc::new(MemoryEventStore::new());
    let committer = committer_over(&store);

    let outcome = committer
        .commit(&CommitRequest::events(EVENT_SOURCE, Vec::new()))
        .await;

    let receipt = outcome.receipt().expect("empty commit should succeed");
    assert!(receipt.sequence_numbers.is_empty());
    assert!(store.committed_events().is_empty());
}

// --- version guard ---

#[tokio::test]
async fn stale_base_version_is_rejected_with_the_actual_version() {
    let store = Arc::new(MemoryEventStore::new());
    let committer = committer_over(&store);
    let aggregate_type = Uuid::new_v4();

    let outcome = committer
        .commit(&CommitRequest::aggregate_events(
            EVENT_SOURCE,
            aggregate_type,
            payloads(2),
        ))
        .await;
    assert!(outcome.is_committed());

    let key = AggregateKey::new(EVENT_SOURCE, aggregate_type);
    let mut tx = store.begin().await.unwrap();
    let result = AggregateVersionGuard::reserve(tx.as_mut(), &key, 0, 1).await;
    tx.abort().await.unwrap();

    match result {
        Err(CommitError::AggregateConflict {
            expected, actual, ..
        }) => {
            assert_eq!(expected, 0);
            assert_eq!(actual, 2);
        }
        other => panic!("expected AggregateConflict, got {other:?}"),
    }
}

#[tokio::test]
async fn concurrent_creation_of_the_same_aggregate_loses_at_commit() {
    let store = Arc::new(MemoryEventStore::new());
    let key = AggregateKey::new(EVENT_SOURCE, Uuid::new_v4());

    // Both transactions reserve version 0 of a brand-new instance before
    // either commits; the unique index decides the winner.
    let mut tx_a = store.begin().await.unwrap();
    let mut tx_b = store.begin().await.unwrap();
    AggregateVersionGuard::reserve(tx_a.as_mut(), &key, 0, 1)
        .await
        .unwrap();
    AggregateVersionGuard::reserve(tx_b.as_mut(), &key, 0, 1)
        .await
        .unwrap();

    tx_a.commit().await.unwrap();
    let loss = tx_b.commit().await;

    match loss {
        Err(StoreError::UniqueViolation { constraint }) => {
            assert_eq!(constraint, AGGREGATE_KEY_CONSTRAINT);
        }
        other => panic!("expected UniqueViolation, got {other:?}"),
    }
    assert_eq!(store.stored_aggregate_version(&key), Some(1));
}

#[tokio::test]
async fn losing_a_creation_race_at_commit_reports_the_winners_version() {
    let store = Arc::new(FlakyEventStore::failing_commits(
        MemoryEventStore::new(),
        1,
        FlakyFailure::AggregateUniqueViolation,
    ));
    let aggregate_type = Uuid::new_v4();
    let key = AggregateKey::new(EVENT_SOURCE, aggregate_type);

    // The winner established the instance at version 3 before the loser's
    // commit reached the unique index.
    {
        let mut tx = store.inner().begin().await.unwrap();
        AggregateVersionGuard::reserve(tx.as_mut(), &key, 0, 3)
            .await
            .unwrap();
        tx.commit().await.unwrap();
    }

    let committer = Committer::new(
        Arc::clone(&store) as Arc<dyn EventStore>,
        Arc::new(SequenceCounter::default()),
    );
    let outcome = committer
        .commit(&CommitRequest::aggregate_events(
            EVENT_SOURCE,
            aggregate_type,
            payloads(2),
        ))
        .await;

    match outcome {
        CommitOutcome::Conflicted(CommitError::AggregateConflict {
            expected, actual, ..
        }) => {
            assert_eq!(expected, 0);
            assert_eq!(actual, 3);
        }
        other => panic!("expected an aggregate conflict, got {other:?}"),
    }

    // The winner's row survives untouched and the loser's events are gone.
    assert_eq!(store.inner().stored_aggregate_version(&key), Some(3));
    assert!(store.inner().committed_events().is_empty());
}

// --- recount strategy hazard ---

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
async fn recount_interleaving_produces_duplicate_sequence_numbers() {
    // Documents the known weakness of the recount strategy: without a
    // uniqueness constraint on the log, two writers observing the same
    // count both commit the same sequence number.
    let store = Arc::new(MemoryEventStore::new());

    let mut tx_a = store.begin().await.unwrap();
    let mut tx_b = store.begin().await.unwrap();
    let base_a = tx_a.count_events().await.unwrap();
    let base_b = tx_b.count_events().await.unwrap();
    assert_eq!(base_a, base_b);

    tx_a.insert_events(&[bare_event(base_a)]).await.unwrap();
    tx_b.insert_events(&[bare_event(base_b)]).await.unwrap();
    tx_a.commit().await.unwrap();
    tx_b.commit().await.unwrap();

    let sequences: Vec<u64> = store
        .committed_events()
        .iter()
        .map(|e| e.sequence_number)
        .collect();
    assert_eq!(sequences, vec![0, 0]);
}

#[tokio::test]
async fn sequence_uniqueness_constraint_turns_the_race_into_a_conflict() {
    let store = Arc::new(MemoryEventStore::with_options(MemoryStoreOptions {
        enforce_sequence_uniqueness: true,
    }));

    let mut tx_a = store.begin().await.unwrap();
    let mut tx_b = store.begin().await.unwrap();
    let base_a = tx_a.count_events().await.unwrap();
    let base_b = tx_b.count_events().await.unwrap();
    tx_a.insert_events(&[bare_event(base_a)]).await.unwrap();
    tx_b.insert_events(&[bare_event(base_b)]).await.unwrap();

    tx_a.commit().await.unwrap();
    match tx_b.commit().await {
        Err(StoreError::UniqueViolation { constraint }) => {
            assert_eq!(constraint, EVENT_LOG_SEQUENCE_CONSTRAINT);
        }
        other => panic!("expected UniqueViolation, got {other:?}"),
    }
    assert_eq!(store.committed_events().len(), 1);
}

#[tokio::test]
async fn recount_commit_works_single_writer() {
    let store = Arc::new(MemoryEventStore::new());
    let committer = committer_over(&store).with_strategy(AllocationStrategy::Recount);

    for _ in 0..3 {
        let outcome = committer
            .commit(&CommitRequest::events(EVENT_SOURCE, payloads(2)))
            .await;
        assert!(outcome.is_committed());
    }

    let sequences: Vec<u64> = store
        .committed_events()
        .iter()
        .map(|e| e.sequence_number)
        .collect();
    assert_eq!(sequences, vec![0, 1, 2, 3, 4, 5]);
}

// --- failure classification ---

#[tokio::test]
async fn sequence_unique_violations_classify_as_sequence_races() {
    let store = Arc::new(FlakyEventStore::failing_commits(
        MemoryEventStore::new(),
        1,
        FlakyFailure::SequenceUniqueViolation,
    ));
    let committer = Committer::new(
        Arc::clone(&store) as Arc<dyn EventStore>,
        Arc::new(SequenceCounter::default()),
    )
    .with_strategy(AllocationStrategy::Recount);

    let outcome = committer
        .commit(&CommitRequest::events(EVENT_SOURCE, payloads(2)))
        .await;

    match outcome {
        CommitOutcome::Conflicted(CommitError::SequenceRace { sequence_number }) => {
            assert_eq!(sequence_number, 0);
        }
        other => panic!("expected a sequence race, got {other:?}"),
    }
    assert!(store.inner().committed_events().is_empty());
}

#[tokio::test]
async fn backend_failures_are_terminal_and_burn_their_allocation() {
    let store = Arc::new(FlakyEventStore::failing_commits(
        MemoryEventStore::new(),
        1,
        FlakyFailure::Backend,
    ));
    let committer = Committer::new(
        Arc::clone(&store) as Arc<dyn EventStore>,
        Arc::new(SequenceCounter::default()),
    );

    let first = committer
        .commit(&CommitRequest::events(EVENT_SOURCE, payloads(5)))
        .await;
    assert!(matches!(first, CommitOutcome::Failed(CommitError::Storage(_))));
    assert!(store.inner().committed_events().is_empty());

    // The failed attempt's numbers are never reused: the next attempt draws
    // a fresh range past the burned one.
    let second = committer
        .commit(&CommitRequest::events(EVENT_SOURCE, payloads(5)))
        .await;
    let receipt = second.receipt().expect("second attempt should commit");
    assert_eq!(receipt.sequence_numbers, vec![5, 6, 7, 8, 9]);

    let sequences: Vec<u64> = store
        .inner()
        .committed_events()
        .iter()
        .map(|e| e.sequence_number)
        .collect();
    assert_eq!(sequences, vec![5, 6, 7, 8, 9]);
}
