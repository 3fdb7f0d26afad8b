//! Storage layer for the whitelist indexer.
//!
//! This module provides database operations for:
//! - Identities (latest record per address, replaced wholesale)
//! - The ingestion watermark (single-row cycle bookkeeping)
//!
//! Reads go through [`Storage`], which is cheap to clone and shared by every query path.
//! Writes go through [`StoreWriter`], of which at most one exists per pool.

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub mod identity;
pub mod types;
pub mod watermark;

pub use types::*;

const DEFAULT_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_MIN_CONNECTIONS: u32 = 1;

/// Database storage for the indexer (read side).
///
/// Provides async access to a SQLite database with connection pooling. The database runs in
/// WAL mode so readers see either the state before or after a write transaction, never a
/// mix, and are not blocked by the writer.
#[derive(Debug, Clone)]
pub struct Storage {
    pool: SqlitePool,
    writer_claimed: Arc<AtomicBool>,
}

/// Exclusive write handle for the identity store.
///
/// Obtained once through [`Storage::take_writer`] and owned by the ingestion scheduler.
/// Dropping it releases the claim.
#[derive(Debug)]
pub struct StoreWriter {
    storage: Storage,
}

impl Storage {
    /// Create a new storage instance with the given database URL.
    ///
    /// This will create the database file if it doesn't exist. Pool sizes default to 5/1.
    ///
    /// # Example
    /// ```no_run
    /// # use whitelist_indexer::storage::Storage;
    /// # async fn example() -> anyhow::Result<()> {
    /// let storage = Storage::new("sqlite://whitelist.db", None, None).await?;
    /// storage.run_migrations().await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn new(
        database_url: &str,
        max_connections: Option<u32>,
        min_connections: Option<u32>,
    ) -> Result<Self> {
        info!("Connecting to database: {}", database_url);

        let options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("Invalid database URL: {}", database_url))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.unwrap_or(DEFAULT_MAX_CONNECTIONS))
            .min_connections(min_connections.unwrap_or(DEFAULT_MIN_CONNECTIONS))
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;

        info!("Database connection established");

        Ok(Self {
            pool,
            writer_claimed: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Create a new storage instance with a specific file path.
    pub async fn new_with_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let database_url = format!("sqlite://{}", path.as_ref().display());
        Self::new(&database_url, None, None).await
    }

    /// Run database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;

        info!("Migrations completed successfully");

        Ok(())
    }

    /// Claim the single write handle for this pool.
    ///
    /// Fails if another [`StoreWriter`] is alive.
    pub fn take_writer(&self) -> Result<StoreWriter> {
        if self
            .writer_claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            anyhow::bail!("Identity store already has a writer");
        }

        Ok(StoreWriter {
            storage: self.clone(),
        })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the database connection pool.
    pub async fn close(&self) {
        info!("Closing database connection");
        self.pool.close().await;
    }

    /// Get database statistics.
    pub async fn stats(&self) -> Result<DatabaseStats> {
        let identity_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM identities")
            .fetch_one(&self.pool)
            .await
            .context("Failed to count identities")?;

        let watermark = self.get_watermark().await?;

        Ok(DatabaseStats {
            identity_count: identity_count as u64,
            cycle: watermark.cycle,
            last_success_at: watermark.last_success_at,
        })
    }

    /// Check database health.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("Database health check failed")?;

        Ok(())
    }
}

impl StoreWriter {
    /// Read handle on the same pool.
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.storage.pool
    }
}

impl Drop for StoreWriter {
    fn drop(&mut self) {
        self.storage.writer_claimed.store(false, Ordering::Release);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    pub(crate) async fn temp_storage() -> (NamedTempFile, Storage) {
        let temp_db = NamedTempFile::new().unwrap();
        let storage = Storage::new_with_path(temp_db.path()).await.unwrap();
        storage.run_migrations().await.unwrap();
        (temp_db, storage)
    }

    #[tokio::test]
    async fn test_storage_creation() {
        let (_temp_db, storage) = temp_storage().await;

        storage.health_check().await.unwrap();

        storage.close().await;
    }

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let (_temp_db, storage) = temp_storage().await;

        storage.run_migrations().await.unwrap();
        let watermark = storage.get_watermark().await.unwrap();
        assert_eq!(watermark.cycle, 0);

        storage.close().await;
    }

    #[tokio::test]
    async fn test_database_stats() {
        let (_temp_db, storage) = temp_storage().await;

        let stats = storage.stats().await.unwrap();
        assert_eq!(stats.identity_count, 0);
        assert_eq!(stats.cycle, 0);
        assert!(stats.last_success_at.is_none());

        storage.close().await;
    }

    #[tokio::test]
    async fn test_single_writer() {
        let (_temp_db, storage) = temp_storage().await;

        let writer = storage.take_writer().unwrap();
        assert!(storage.take_writer().is_err());
        assert!(storage.clone().take_writer().is_err());

        drop(writer);
        assert!(storage.take_writer().is_ok());

        storage.close().await;
    }
}
