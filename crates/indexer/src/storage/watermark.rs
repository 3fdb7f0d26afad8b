//! Ingestion watermark storage operations.

use super::types::{from_millis, to_millis};
use super::{Storage, StoreWriter};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqliteConnection};
use whitelist_core::IngestionWatermark;

impl Storage {
    /// Get the current ingestion watermark.
    pub async fn get_watermark(&self) -> Result<IngestionWatermark> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .context("Failed to acquire connection")?;

        fetch_watermark(&mut conn).await
    }
}

impl StoreWriter {
    /// Stamp the start of a cycle.
    pub async fn record_attempt(&self, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE ingestion_watermark SET last_attempt_at = ? WHERE id = 1")
            .bind(to_millis(at))
            .execute(self.pool())
            .await
            .context("Failed to record ingestion attempt")?;

        Ok(())
    }

    /// Record a failed cycle. `last_success_at` and `cycle` are left untouched.
    pub async fn record_failure(&self, error: &str, failed_count: u64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE ingestion_watermark
            SET last_error = ?,
                failed_count = ?
            WHERE id = 1
            "#,
        )
        .bind(error)
        .bind(failed_count as i64)
        .execute(self.pool())
        .await
        .context("Failed to record ingestion failure")?;

        Ok(())
    }
}

pub(crate) async fn fetch_watermark(conn: &mut SqliteConnection) -> Result<IngestionWatermark> {
    let row = sqlx::query(
        r#"
        SELECT cycle, last_attempt_at, last_success_at, last_error, failed_count
        FROM ingestion_watermark
        WHERE id = 1
        "#,
    )
    .fetch_one(&mut *conn)
    .await
    .context("Failed to fetch ingestion watermark")?;

    let last_attempt_at: Option<i64> = row.try_get("last_attempt_at")?;
    let last_success_at: Option<i64> = row.try_get("last_success_at")?;

    Ok(IngestionWatermark {
        cycle: row.try_get::<i64, _>("cycle")? as u64,
        last_attempt_at: last_attempt_at.map(from_millis).transpose()?,
        last_success_at: last_success_at.map(from_millis).transpose()?,
        last_error: row.try_get("last_error")?,
        failed_count: row.try_get::<i64, _>("failed_count")? as u64,
    })
}
