//! Database types for the indexer storage layer.

use chrono::{DateTime, Utc};
use whitelist_core::{IdentityRecord, IngestionWatermark};

/// Database statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseStats {
    /// Number of stored identities.
    pub identity_count: u64,

    /// Successful ingestion cycles so far.
    pub cycle: u64,

    /// Start of the last successful cycle.
    pub last_success_at: Option<DateTime<Utc>>,
}

/// Outcome of a successful ingestion cycle, committed together with its records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestionCommit {
    /// Start of the cycle. Becomes `last_success_at`.
    pub started_at: DateTime<Utc>,

    /// Addresses that failed individually (per-address mode).
    pub failed_count: u64,

    /// Summary of per-address failures, if any.
    pub last_error: Option<String>,
}

/// A watermark and the identity set it describes, read in one transaction.
#[derive(Debug, Clone)]
pub struct StoreSnapshot {
    /// Watermark at the time of the read.
    pub watermark: IngestionWatermark,

    /// Every stored record, ordered by address.
    pub records: Vec<IdentityRecord>,
}

pub(crate) fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn from_millis(millis: i64) -> anyhow::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| anyhow::anyhow!("Stored timestamp out of range: {}", millis))
}
