//! PostgreSQL implementation of the storage traits.

use async_trait::async_trait;
use sqlx::postgres::PgDatabaseError;
use sqlx::{PgPool, Postgres, Row, Transaction};

use chronicle_core::aggregate::{AggregateKey, AggregateRootRecord};
use chronicle_core::error::StoreError;
use chronicle_core::event::{AggregateScope, CommittedEvent};
use chronicle_core::store::{EventStore, StoreTransaction};

use crate::schema;

/// PostgreSQL-backed event store.
#[derive(Debug, Clone)]
pub struct PgEventStore {
    pool: PgPool,
}

impl PgEventStore {
    /// Creates a store over an existing connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventStore for PgEventStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        let tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        Ok(Box::new(PgStoreTransaction { tx }))
    }

    async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(schema::CREATE_SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        tracing::debug!("event log schema ensured");
        Ok(())
    }
}

struct PgStoreTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTransaction for PgStoreTransaction {
    async fn insert_events(&mut self, events: &[CommittedEvent]) -> Result<(), StoreError> {
        // Row-at-a-time in submission order; a multi-row VALUES insert gives
        // the same ordering guarantee but loses per-row constraint detail.
        for event in events {
            let (aggregate_type, root_version) = match event.aggregate {
                Some(AggregateScope {
                    aggregate_type,
                    root_version,
                }) => (Some(aggregate_type), Some(to_db_u64(root_version)?)),
                None => (None, None),
            };
            sqlx::query(
                "INSERT INTO event_log \
                 (sequence_number, event_source, aggregate_type, aggregate_root_version, content, occurred_at) \
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(to_db_u64(event.sequence_number)?)
            .bind(&event.event_source)
            .bind(aggregate_type)
            .bind(root_version)
            .bind(&event.content)
            .bind(event.occurred_at)
            .execute(&mut *self.tx)
            .await
            .map_err(map_sqlx_error)?;
        }
        Ok(())
    }

    async fn count_events(&mut self) -> Result<u64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS total FROM event_log")
            .fetch_one(&mut *self.tx)
            .await
            .map_err(map_sqlx_error)?;
        let total: i64 = row.try_get("total").map_err(map_sqlx_error)?;
        from_db_i64(total)
    }

    async fn aggregate_version(
        &mut self,
        key: &AggregateKey,
    ) -> Result<Option<u64>, StoreError> {
        let row = sqlx::query(
            "SELECT version FROM aggregate_roots \
             WHERE event_source = $1 AND aggregate_type = $2",
        )
        .bind(&key.event_source)
        .bind(key.aggregate_type)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;

        match row {
            Some(row) => {
                let version: i64 = row.try_get("version").map_err(map_sqlx_error)?;
                Ok(Some(from_db_i64(version)?))
            }
            None => Ok(None),
        }
    }

    async fn insert_aggregate(&mut self, record: &AggregateRootRecord) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO aggregate_roots (event_source, aggregate_type, version) \
             VALUES ($1, $2, $3)",
        )
        .bind(&record.key.event_source)
        .bind(record.key.aggregate_type)
        .bind(to_db_u64(record.version)?)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn advance_aggregate(
        &mut self,
        key: &AggregateKey,
        expected: u64,
        new: u64,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE aggregate_roots SET version = $1 \
             WHERE event_source = $2 AND aggregate_type = $3 AND version = $4",
        )
        .bind(to_db_u64(new)?)
        .bind(&key.event_source)
        .bind(key.aggregate_type)
        .bind(to_db_u64(expected)?)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::WriteConflict(format!(
                "aggregate {key} no longer at version {expected}"
            )));
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await.map_err(map_sqlx_error)
    }

    async fn abort(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await.map_err(map_sqlx_error)
    }
}

/// PostgreSQL SQLSTATE codes that mark transient serialization problems.
const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";
const UNIQUE_VIOLATION: &str = "23505";

fn map_sqlx_error(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if let Some(pg_err) = db_err.try_downcast_ref::<PgDatabaseError>() {
            match pg_err.code() {
                UNIQUE_VIOLATION => {
                    return StoreError::UniqueViolation {
                        constraint: pg_err.constraint().unwrap_or("unknown").to_string(),
                    };
                }
                SERIALIZATION_FAILURE | DEADLOCK_DETECTED => {
                    return StoreError::WriteConflict(pg_err.message().to_string());
                }
                _ => {}
            }
        }
    }
    StoreError::backend("query failed", err)
}

fn to_db_u64(value: u64) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(|_| {
        StoreError::backend_msg(format!("value {value} exceeds the BIGINT range"))
    })
}

fn from_db_i64(value: i64) -> Result<u64, StoreError> {
    u64::try_from(value).map_err(|_| {
        StoreError::backend_msg(format!("negative value {value} in an unsigned column"))
    })
}
