//! Identity storage operations.

use super::types::{from_millis, to_millis};
use super::watermark::fetch_watermark;
use super::{IngestionCommit, Storage, StoreSnapshot, StoreWriter};
use anyhow::{Context, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, Transaction};
use whitelist_core::{IdentityAddress, IdentityRecord, IdentityState, Stake, U256};

const UPSERT_IDENTITY: &str = r#"
    INSERT INTO identities (address, state, stake_atto, last_seen_at)
    VALUES (?, ?, ?, ?)
    ON CONFLICT(address) DO UPDATE SET
        state = excluded.state,
        stake_atto = excluded.stake_atto,
        last_seen_at = excluded.last_seen_at
"#;

const SELECT_IDENTITIES: &str = r#"
    SELECT address, state, stake_atto, last_seen_at
    FROM identities
    ORDER BY address ASC
"#;

impl StoreWriter {
    /// Upsert a batch of records in one transaction.
    ///
    /// Either every record is written or none is. Returns the number of records written.
    pub async fn bulk_upsert(&self, records: &[IdentityRecord]) -> Result<u64> {
        let mut tx = self
            .pool()
            .begin()
            .await
            .context("Failed to begin upsert transaction")?;

        let updated = upsert_records(&mut tx, records).await?;

        tx.commit()
            .await
            .context("Failed to commit upsert transaction")?;

        Ok(updated)
    }

    /// Upsert the records of a successful cycle and advance the watermark atomically.
    ///
    /// Readers never observe the new records with the old watermark or the reverse.
    pub async fn commit_ingestion(
        &self,
        records: &[IdentityRecord],
        commit: &IngestionCommit,
    ) -> Result<u64> {
        let mut tx = self
            .pool()
            .begin()
            .await
            .context("Failed to begin ingestion transaction")?;

        let updated = upsert_records(&mut tx, records).await?;

        let started_at = to_millis(commit.started_at);
        sqlx::query(
            r#"
            UPDATE ingestion_watermark
            SET cycle = cycle + 1,
                last_attempt_at = MAX(COALESCE(last_attempt_at, ?), ?),
                last_success_at = ?,
                last_error = ?,
                failed_count = ?
            WHERE id = 1
            "#,
        )
        .bind(started_at)
        .bind(started_at)
        .bind(started_at)
        .bind(commit.last_error.as_deref())
        .bind(commit.failed_count as i64)
        .execute(&mut *tx)
        .await
        .context("Failed to advance ingestion watermark")?;

        tx.commit()
            .await
            .context("Failed to commit ingestion transaction")?;

        Ok(updated)
    }
}

async fn upsert_records(
    tx: &mut Transaction<'_, Sqlite>,
    records: &[IdentityRecord],
) -> Result<u64> {
    let mut updated = 0;

    for record in records {
        let result = sqlx::query(UPSERT_IDENTITY)
            .bind(record.address.as_str())
            .bind(record.state.as_str())
            .bind(record.stake.atto().to_string())
            .bind(to_millis(record.last_seen_at))
            .execute(&mut **tx)
            .await
            .with_context(|| format!("Failed to upsert identity {}", record.address))?;

        updated += result.rows_affected();
    }

    Ok(updated)
}

impl Storage {
    /// Get the record for one address.
    pub async fn get_identity(&self, address: &IdentityAddress) -> Result<Option<IdentityRecord>> {
        let row = sqlx::query(
            r#"
            SELECT address, state, stake_atto, last_seen_at
            FROM identities
            WHERE address = ?
            "#,
        )
        .bind(address.as_str())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch identity")?;

        row.as_ref().map(row_to_identity).transpose()
    }

    /// Every stored record, ordered by address.
    ///
    /// Each call is an independent read of one committed state.
    pub async fn list_identities(&self) -> Result<Vec<IdentityRecord>> {
        let rows = sqlx::query(SELECT_IDENTITIES)
            .fetch_all(&self.pool)
            .await
            .context("Failed to list identities")?;

        rows.iter().map(row_to_identity).collect()
    }

    /// Read the watermark and every record in one transaction.
    pub async fn snapshot(&self) -> Result<StoreSnapshot> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin snapshot read")?;

        let watermark = fetch_watermark(&mut tx).await?;
        let rows = sqlx::query(SELECT_IDENTITIES)
            .fetch_all(&mut *tx)
            .await
            .context("Failed to list identities")?;

        tx.commit().await.context("Failed to end snapshot read")?;

        let records = rows.iter().map(row_to_identity).collect::<Result<Vec<_>>>()?;

        Ok(StoreSnapshot { watermark, records })
    }
}

fn row_to_identity(row: &SqliteRow) -> Result<IdentityRecord> {
    let address: String = row.try_get("address")?;
    let state: String = row.try_get("state")?;
    let stake_atto: String = row.try_get("stake_atto")?;
    let last_seen_at: i64 = row.try_get("last_seen_at")?;

    let stake = stake_atto
        .parse::<U256>()
        .map_err(|e| anyhow::anyhow!("Invalid stored stake '{}': {}", stake_atto, e))?;

    Ok(IdentityRecord {
        address: IdentityAddress::parse(&address)
            .with_context(|| format!("Invalid stored address '{}'", address))?,
        state: IdentityState::from_wire(&state),
        stake: Stake::from_atto(stake),
        last_seen_at: from_millis(last_seen_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::tests::temp_storage;
    use chrono::{TimeZone, Utc};

    fn record(address: &str, state: &str, stake: &str) -> IdentityRecord {
        IdentityRecord {
            address: IdentityAddress::parse(address).unwrap(),
            state: IdentityState::from_wire(state),
            stake: Stake::from_decimal_str(stake).unwrap(),
            last_seen_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        }
    }

    fn sample() -> Vec<IdentityRecord> {
        vec![
            record("0x1234567890abcdef1234567890abcdef12345678", "Human", "15000"),
            record("0xabcdef1234567890abcdef1234567890abcdef12", "Verified", "25000"),
            record("0x9876543210fedcba9876543210fedcba98765432", "Newbie", "5000"),
            record("0xfedcba0987654321fedcba0987654321fedcba09", "Candidate", "12000"),
        ]
    }

    #[tokio::test]
    async fn test_upsert_and_get() {
        let (_temp_db, storage) = temp_storage().await;
        let writer = storage.take_writer().unwrap();

        let updated = writer.bulk_upsert(&sample()).await.unwrap();
        assert_eq!(updated, 4);

        let found = storage
            .get_identity(&sample()[0].address)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found, sample()[0]);

        let missing = IdentityAddress::parse("0x0000000000000000000000000000000000000001").unwrap();
        assert!(storage.get_identity(&missing).await.unwrap().is_none());

        storage.close().await;
    }

    #[tokio::test]
    async fn test_upsert_replaces_wholesale() {
        let (_temp_db, storage) = temp_storage().await;
        let writer = storage.take_writer().unwrap();

        writer.bulk_upsert(&sample()).await.unwrap();

        let mut changed = sample()[2].clone();
        changed.state = IdentityState::Verified;
        changed.stake = Stake::from_decimal_str("10000.5").unwrap();
        changed.last_seen_at = Utc.with_ymd_and_hms(2024, 5, 2, 12, 0, 0).unwrap();
        writer.bulk_upsert(&[changed.clone()]).await.unwrap();

        let found = storage.get_identity(&changed.address).await.unwrap().unwrap();
        assert_eq!(found, changed);
        assert_eq!(storage.list_identities().await.unwrap().len(), 4);

        storage.close().await;
    }

    #[tokio::test]
    async fn test_reingestion_is_idempotent() {
        let (_temp_db, storage) = temp_storage().await;
        let writer = storage.take_writer().unwrap();

        writer.bulk_upsert(&sample()).await.unwrap();
        let first = storage.list_identities().await.unwrap();

        writer.bulk_upsert(&sample()).await.unwrap();
        let second = storage.list_identities().await.unwrap();

        assert_eq!(first, second);

        storage.close().await;
    }

    #[tokio::test]
    async fn test_list_is_ordered_by_address() {
        let (_temp_db, storage) = temp_storage().await;
        let writer = storage.take_writer().unwrap();
        writer.bulk_upsert(&sample()).await.unwrap();

        let addresses: Vec<_> = storage
            .list_identities()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.address)
            .collect();
        let mut sorted = addresses.clone();
        sorted.sort();
        assert_eq!(addresses, sorted);

        storage.close().await;
    }

    #[tokio::test]
    async fn test_unrecognized_state_and_large_stake_survive() {
        let (_temp_db, storage) = temp_storage().await;
        let writer = storage.take_writer().unwrap();

        let odd = record(
            "0x00000000000000000000000000000000000000aa",
            "Ascended",
            "123456789012345678901234567890.000000000000000001",
        );
        writer.bulk_upsert(&[odd.clone()]).await.unwrap();

        let found = storage.get_identity(&odd.address).await.unwrap().unwrap();
        assert_eq!(found.state, IdentityState::Unrecognized("Ascended".to_string()));
        assert_eq!(found.stake, odd.stake);

        storage.close().await;
    }

    #[tokio::test]
    async fn test_bulk_upsert_is_all_or_nothing() {
        let (_temp_db, storage) = temp_storage().await;
        let writer = storage.take_writer().unwrap();

        let batch = sample();
        writer.bulk_upsert(&batch[..1]).await.unwrap();

        // Fail on the third record of the next batch.
        let poisoned = batch[2].address.as_str().to_string();
        sqlx::query(&format!(
            "CREATE TRIGGER fail_mid_batch BEFORE INSERT ON identities \
             WHEN NEW.address = '{}' BEGIN SELECT RAISE(ABORT, 'simulated failure'); END;",
            poisoned
        ))
        .execute(storage.pool())
        .await
        .unwrap();

        let mut second = batch.clone();
        second[0].state = IdentityState::Suspended;
        assert!(writer.bulk_upsert(&second).await.is_err());

        let stored = storage.list_identities().await.unwrap();
        assert_eq!(stored, vec![batch[0].clone()]);

        storage.close().await;
    }

    #[tokio::test]
    async fn test_commit_ingestion_advances_watermark() {
        let (_temp_db, storage) = temp_storage().await;
        let writer = storage.take_writer().unwrap();

        let started_at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        writer.record_attempt(started_at).await.unwrap();
        writer
            .commit_ingestion(
                &sample(),
                &IngestionCommit {
                    started_at,
                    failed_count: 1,
                    last_error: Some("1 address failed".to_string()),
                },
            )
            .await
            .unwrap();

        let snapshot = storage.snapshot().await.unwrap();
        assert_eq!(snapshot.records.len(), 4);
        assert_eq!(snapshot.watermark.cycle, 1);
        assert_eq!(snapshot.watermark.last_success_at, Some(started_at));
        assert_eq!(snapshot.watermark.last_attempt_at, Some(started_at));
        assert_eq!(snapshot.watermark.failed_count, 1);
        assert!(snapshot.watermark.is_consistent());

        storage.close().await;
    }

    #[tokio::test]
    async fn test_failed_commit_leaves_watermark() {
        let (_temp_db, storage) = temp_storage().await;
        let writer = storage.take_writer().unwrap();

        sqlx::query(
            "CREATE TRIGGER fail_all BEFORE INSERT ON identities \
             BEGIN SELECT RAISE(ABORT, 'simulated failure'); END;",
        )
        .execute(storage.pool())
        .await
        .unwrap();

        let started_at = Utc::now();
        let result = writer
            .commit_ingestion(
                &sample(),
                &IngestionCommit {
                    started_at,
                    failed_count: 0,
                    last_error: None,
                },
            )
            .await;
        assert!(result.is_err());

        let snapshot = storage.snapshot().await.unwrap();
        assert!(snapshot.records.is_empty());
        assert_eq!(snapshot.watermark.cycle, 0);
        assert!(snapshot.watermark.last_success_at.is_none());

        storage.close().await;
    }
}
