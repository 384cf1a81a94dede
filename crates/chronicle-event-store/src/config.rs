//! Store configuration read from the environment.

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use chronicle_core::error::StoreError;

const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// Connection configuration for the PostgreSQL store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// PostgreSQL connection string.
    pub database_url: String,
    /// Upper bound on pooled connections.
    pub max_connections: u32,
}

impl StoreConfig {
    /// Reads configuration from `DATABASE_URL` and
    /// `CHRONICLE_MAX_CONNECTIONS`.
    ///
    /// # Errors
    ///
    /// Returns an error when `DATABASE_URL` is unset or the connection
    /// count is not a valid number.
    pub fn from_env() -> Result<Self, StoreError> {
        Self::from_vars(
            std::env::var("DATABASE_URL").ok(),
            std::env::var("CHRONICLE_MAX_CONNECTIONS").ok(),
        )
    }

    fn from_vars(
        database_url: Option<String>,
        max_connections: Option<String>,
    ) -> Result<Self, StoreError> {
        let database_url = database_url
            .ok_or_else(|| StoreError::backend_msg("DATABASE_URL must be set"))?;
        let max_connections = match max_connections {
            Some(raw) => raw.parse().map_err(|_| {
                StoreError::backend_msg(format!(
                    "CHRONICLE_MAX_CONNECTIONS must be a number, got {raw:?}"
                ))
            })?,
            None => DEFAULT_MAX_CONNECTIONS,
        };
        Ok(Self {
            database_url,
            max_connections,
        })
    }

    /// Opens a connection pool with this configuration.
    ///
    /// # Errors
    ///
    /// Returns an error when the database is unreachable.
    pub async fn connect(&self) -> Result<PgPool, StoreError> {
        PgPoolOptions::new()
            .max_connections(self.max_connections)
            .connect(&self.database_url)
            .await
            .map_err(|err| StoreError::backend("failed to connect to PostgreSQL", err))
    }
}
