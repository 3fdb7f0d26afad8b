//! Commitment service.
//!
//! Builds the whitelist commitment from one consistent store snapshot and caches it. The
//! cache is keyed by the watermark's `cycle`, which changes exactly when a new ingestion
//! commits, so a cached tree is never served once newer data exists.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};
use whitelist_core::IdentityRecord;
use whitelist_engine::{is_eligible, EligibilityPolicy};
use whitelist_merkle::{CommitmentBuilder, CommitmentTree};

use crate::storage::Storage;

/// A commitment together with the snapshot it was built from.
#[derive(Debug, Clone)]
pub struct Commitment {
    /// The tree. Its leaves are the eligible addresses in canonical order.
    pub tree: CommitmentTree,
    /// `last_success_at` of the snapshot (None before the first successful ingestion).
    pub as_of: Option<DateTime<Utc>>,
    /// Watermark cycle of the snapshot.
    pub cycle: u64,
    /// When this commitment was built.
    pub built_at: DateTime<Utc>,
}

/// Build the commitment tree for a set of records.
pub fn build_commitment<'a, I>(policy: &EligibilityPolicy, records: I) -> CommitmentTree
where
    I: IntoIterator<Item = &'a IdentityRecord>,
{
    records
        .into_iter()
        .filter(|record| is_eligible(policy, record))
        .map(|record| record.address.clone())
        .collect::<CommitmentBuilder>()
        .build()
}

/// Cached commitment over the identity store.
#[derive(Clone)]
pub struct CommitmentService {
    storage: Storage,
    policy: EligibilityPolicy,
    current: Arc<RwLock<Option<Arc<Commitment>>>>,
}

impl CommitmentService {
    /// Create a service. Nothing is built until the first request.
    pub fn new(storage: Storage, policy: EligibilityPolicy) -> Self {
        Self {
            storage,
            policy,
            current: Arc::new(RwLock::new(None)),
        }
    }

    /// Eligibility policy used for every build.
    pub fn policy(&self) -> &EligibilityPolicy {
        &self.policy
    }

    /// The current commitment, rebuilding first if a newer ingestion has committed.
    pub async fn current(&self) -> Result<Arc<Commitment>> {
        let watermark = self.storage.get_watermark().await?;

        if let Some(cached) = self.current.read().await.as_ref() {
            if cached.cycle == watermark.cycle {
                return Ok(cached.clone());
            }
        }

        self.rebuild().await
    }

    /// Build from a fresh snapshot and replace the cache.
    pub async fn rebuild(&self) -> Result<Arc<Commitment>> {
        let snapshot = self
            .storage
            .snapshot()
            .await
            .context("Failed to read identity snapshot")?;

        let tree = build_commitment(&self.policy, &snapshot.records);
        debug!(
            cycle = snapshot.watermark.cycle,
            identities = snapshot.records.len(),
            eligible = tree.leaf_count(),
            "Built whitelist commitment"
        );

        let built = Arc::new(Commitment {
            tree,
            as_of: snapshot.watermark.last_success_at,
            cycle: snapshot.watermark.cycle,
            built_at: Utc::now(),
        });

        let mut current = self.current.write().await;
        match current.as_ref() {
            // A concurrent rebuild already cached a newer snapshot.
            Some(existing) if existing.cycle > built.cycle => Ok(existing.clone()),
            _ => {
                if current.as_ref().map(|c| c.cycle) != Some(built.cycle) {
                    info!(
                        cycle = built.cycle,
                        root = %built.tree.root(),
                        leaves = built.tree.leaf_count(),
                        "Whitelist commitment updated"
                    );
                }
                *current = Some(built.clone());
                Ok(built)
            }
        }
    }
}
