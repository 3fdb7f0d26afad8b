//! Read-only query surface over the identity store.
//!
//! Every commitment-bearing answer (listing, root, proof) comes from one cached
//! [`Commitment`], so a root and the proofs served next to it always agree.

use alloy_primitives::B256;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use whitelist_core::{IdentityAddress, IdentityState, IngestionWatermark, Stake};
use whitelist_engine::{evaluate_lookup, Eligibility, EligibilityPolicy};
use whitelist_merkle::InclusionProof;

use crate::commitment::{Commitment, CommitmentService};
use crate::storage::Storage;

/// Query failure.
///
/// "Not found" and "ineligible" are answers, not errors.
#[derive(Debug, Error)]
pub enum QueryError {
    /// The caller supplied a malformed address.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The store could not be read.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),
}

impl QueryError {
    fn store(e: anyhow::Error) -> Self {
        QueryError::StoreUnavailable(format!("{:#}", e))
    }
}

/// Whitelisted addresses of one snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct WhitelistListing {
    /// Eligible addresses in canonical (leaf) order.
    pub addresses: Vec<IdentityAddress>,
    /// Number of addresses.
    pub count: usize,
    /// Root committing to exactly these addresses.
    pub merkle_root: B256,
    /// Snapshot time.
    pub as_of: Option<DateTime<Utc>>,
}

/// Eligibility of one address.
#[derive(Debug, Clone, Serialize)]
pub struct AddressCheck {
    /// Normalized address.
    pub address: IdentityAddress,
    /// Outcome and reason.
    #[serde(flatten)]
    pub eligibility: Eligibility,
    /// Stored state, when the address is known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<IdentityState>,
    /// Stored stake, when the address is known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stake: Option<Stake>,
    /// When the address was last reported.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen_at: Option<DateTime<Utc>>,
}

/// Current root.
#[derive(Debug, Clone, Serialize)]
pub struct CommitmentInfo {
    /// Root digest.
    pub merkle_root: B256,
    /// Number of leaves.
    pub addresses_count: usize,
    /// Snapshot time.
    pub as_of: Option<DateTime<Utc>>,
}

/// Inclusion proof plus the root it verifies against.
#[derive(Debug, Clone, Serialize)]
pub struct ProofResponse {
    /// Root digest.
    pub merkle_root: B256,
    /// Snapshot time.
    pub as_of: Option<DateTime<Utc>>,
    /// The proof.
    pub proof: InclusionProof,
}

/// An address absent from one snapshot. Absence is tied to a root just like a proof.
#[derive(Debug, Clone, Serialize)]
pub struct ProofAbsence {
    /// Normalized address.
    pub address: IdentityAddress,
    /// Root of the snapshot the address is absent from.
    pub merkle_root: B256,
    /// Snapshot time.
    pub as_of: Option<DateTime<Utc>>,
}

/// Outcome of a proof lookup.
#[derive(Debug, Clone)]
pub enum ProofLookup {
    /// The address is whitelisted.
    Found(ProofResponse),
    /// The address is not whitelisted in this snapshot.
    Absent(ProofAbsence),
}

impl ProofLookup {
    /// The proof, if the address was found.
    pub fn found(self) -> Option<ProofResponse> {
        match self {
            ProofLookup::Found(response) => Some(response),
            ProofLookup::Absent(_) => None,
        }
    }
}

/// Query operations shared by every caller.
#[derive(Clone)]
pub struct QuerySurface {
    storage: Storage,
    commitments: CommitmentService,
}

impl QuerySurface {
    /// Create a query surface over `storage`.
    pub fn new(storage: Storage, policy: EligibilityPolicy) -> Self {
        Self {
            commitments: CommitmentService::new(storage.clone(), policy),
            storage,
        }
    }

    /// Eligibility policy in force.
    pub fn policy(&self) -> &EligibilityPolicy {
        self.commitments.policy()
    }

    async fn commitment(&self) -> Result<Arc<Commitment>, QueryError> {
        self.commitments.current().await.map_err(QueryError::store)
    }

    /// All whitelisted addresses.
    pub async fn list_whitelist(&self) -> Result<WhitelistListing, QueryError> {
        let commitment = self.commitment().await?;
        let addresses = commitment.tree.addresses().to_vec();

        Ok(WhitelistListing {
            count: addresses.len(),
            addresses,
            merkle_root: commitment.tree.root(),
            as_of: commitment.as_of,
        })
    }

    /// Evaluate one address against the latest stored record.
    pub async fn check_address(&self, raw: &str) -> Result<AddressCheck, QueryError> {
        let address = parse_address(raw)?;
        let record = self
            .storage
            .get_identity(&address)
            .await
            .map_err(QueryError::store)?;

        Ok(AddressCheck {
            eligibility: evaluate_lookup(self.policy(), record.as_ref()),
            state: record.as_ref().map(|r| r.state.clone()),
            stake: record.as_ref().map(|r| r.stake),
            last_seen_at: record.as_ref().map(|r| r.last_seen_at),
            address,
        })
    }

    /// Current root and leaf count.
    pub async fn get_commitment(&self) -> Result<CommitmentInfo, QueryError> {
        let commitment = self.commitment().await?;

        Ok(CommitmentInfo {
            merkle_root: commitment.tree.root(),
            addresses_count: commitment.tree.leaf_count(),
            as_of: commitment.as_of,
        })
    }

    /// Inclusion proof for one address, or its absence from the current snapshot.
    pub async fn get_proof(&self, raw: &str) -> Result<ProofLookup, QueryError> {
        let address = parse_address(raw)?;
        let commitment = self.commitment().await?;
        let merkle_root = commitment.tree.root();

        Ok(match commitment.tree.prove(&address) {
            Some(proof) => ProofLookup::Found(ProofResponse {
                merkle_root,
                as_of: commitment.as_of,
                proof,
            }),
            None => ProofLookup::Absent(ProofAbsence {
                address,
                merkle_root,
                as_of: commitment.as_of,
            }),
        })
    }

    /// Store liveness plus ingestion bookkeeping.
    pub async fn health(&self) -> Result<IngestionWatermark, QueryError> {
        self.storage.health_check().await.map_err(QueryError::store)?;
        self.storage.get_watermark().await.map_err(QueryError::store)
    }
}

fn parse_address(raw: &str) -> Result<IdentityAddress, QueryError> {
    IdentityAddress::parse(raw).map_err(|e| QueryError::InvalidInput(e.to_string()))
}
