mod config_ops;
mod event_ops;
mod job_ops;
mod mappers;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use crate::config::{redact_database_url, Settings};
use crate::error::{QueueError, Result};

pub use config_ops::STALE_THRESHOLD_KEY;
pub use job_ops::StaleJobOutcome;

/// Schema for the job, event and config tables.
pub const SCHEMA_SQL: &str = include_str!("../../schema.sql");

/// Explicitly constructed handle to the queue store.
///
/// Cloning shares the underlying pool; every component receives a handle
/// instead of reaching for a global connection.
#[derive(Clone)]
pub struct QueueDb {
    pool: PgPool,
}

impl QueueDb {
    /// # Errors
    /// Returns an error if the pool cannot connect.
    pub async fn connect(settings: &Settings) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .connect(&settings.database_url)
            .await
            .map_err(|e| QueueError::from_sqlx("Failed to connect to queue database", &e))?;

        info!(
            database = %redact_database_url(&settings.database_url),
            max_connections = settings.max_connections,
            "Connected to PostgreSQL queue database"
        );
        Ok(Self { pool })
    }

    /// Create a new QueueDb with an existing pool (for testing).
    #[must_use]
    pub const fn new_with_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// # Errors
    /// Returns an error if the schema statements fail.
    pub async fn initialize_schema(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA_SQL)
            .execute(self.pool())
            .await
            .map(|_| info!("Queue schema initialized"))
            .map_err(|e| QueueError::from_sqlx("Failed to initialize schema", &e))
    }

    /// Waits for checked-out connections and closes the pool.
    pub async fn close(&self) {
        self.pool.close().await;
        info!("Queue database pool closed");
    }
}
