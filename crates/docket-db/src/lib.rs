//! # docket-db
//!
//! Storage layer for docket.
//!
//! This crate provides:
//! - Connection pool management
//! - A PostgreSQL [`QueueStore`] with `SKIP LOCKED` leasing and index-backed dedup
//! - A PostgreSQL [`DocumentRepository`]
//! - Filesystem and in-memory blob stores
//! - In-memory queue and document backends with identical contracts
//!
//! ## Example
//!
//! ```rust,ignore
//! use docket_db::{Database, NewJob, QueueName, QueueStore};
//!
//! let db = Database::connect("postgres://localhost/docket").await?;
//! db.migrate().await?;
//! let outcome = db.jobs.enqueue(new_job).await?;
//! ```

pub mod blobs;
pub mod documents;
pub mod jobs;
pub mod memory;
pub mod pool;

use std::time::Duration;

use chrono::{DateTime, Utc};

// Re-export core types
pub use docket_core::*;

pub use blobs::FilesystemBlobStore;
pub use documents::PgDocumentRepository;
pub use jobs::PgQueueStore;
pub use memory::{MemoryBlobStore, MemoryDocumentRepository, MemoryQueueStore};
pub use pool::{create_pool, create_pool_with_config, PoolConfig};

/// `now + delay`, saturating at the latest representable timestamp so an
/// oversized delay never lands in the past.
pub(crate) fn time_after(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Combined PostgreSQL context.
#[derive(Clone)]
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    /// Queue store for all named queues.
    pub jobs: PgQueueStore,
    /// Document rows mutated by the pipeline.
    pub documents: PgDocumentRepository,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            jobs: PgQueueStore::new(pool.clone()),
            documents: PgDocumentRepository::new(pool.clone()),
            pool,
        }
    }

    /// Connect with the default pool configuration.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = create_pool(url).await?;
        Ok(Self::new(pool))
    }

    /// Connect with a custom pool configuration.
    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool_with_config(url, config).await?;
        Ok(Self::new(pool))
    }

    /// Run pending migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    pub fn pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_after_adds_delay() {
        let now = Utc::now();
        assert_eq!(
            time_after(now, Duration::from_secs(5)),
            now + chrono::Duration::seconds(5)
        );
        assert_eq!(time_after(now, Duration::ZERO), now);
    }

    #[test]
    fn test_time_after_saturates() {
        let now = Utc::now();
        let far = time_after(now, Duration::MAX);
        assert_eq!(far, DateTime::<Utc>::MAX_UTC);
        assert!(far > now);
    }
}
