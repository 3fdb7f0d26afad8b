use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use std::path::PathBuf;
use whitelist_core::{IdentityAddress, IdentityRecord, Stake, B256};
use whitelist_engine::EligibilityPolicy;
use whitelist_indexer::build_commitment;
use whitelist_merkle::{CommitmentTree, InclusionProof};

use super::fetch::Snapshot;
use super::read_json;

#[derive(Debug, Args)]
pub struct RootArgs {
    /// Snapshot file written by `fetch`
    #[arg(long, default_value = "snapshot.json")]
    snapshot: PathBuf,

    /// Minimum stake in iDNA. Defaults to 10000.
    #[arg(long)]
    min_stake: Option<String>,

    /// Print every whitelisted address
    #[arg(long)]
    list: bool,

    /// Emit an inclusion proof document for this address instead of the summary
    #[arg(long)]
    prove: Option<String>,
}

/// Proof document, same shape as the API's `/merkle_proof` answer.
#[derive(Debug, Serialize)]
struct ProofDocument {
    found: bool,
    merkle_root: B256,
    proof: InclusionProof,
}

fn policy(min_stake: Option<&str>) -> Result<EligibilityPolicy> {
    match min_stake {
        Some(raw) => {
            let stake = Stake::from_decimal_str(raw)
                .with_context(|| format!("Invalid --min-stake: {}", raw))?;
            Ok(EligibilityPolicy::new(stake))
        }
        None => Ok(EligibilityPolicy::default()),
    }
}

fn snapshot_tree(snapshot: Snapshot, policy: &EligibilityPolicy) -> CommitmentTree {
    let records: Vec<IdentityRecord> = snapshot
        .identities
        .into_iter()
        .map(|identity| identity.into_record(snapshot.timestamp))
        .collect();
    build_commitment(policy, &records)
}

pub fn run(args: RootArgs) -> Result<()> {
    let snapshot: Snapshot = read_json(&args.snapshot)?;
    let timestamp = snapshot.timestamp;
    let policy = policy(args.min_stake.as_deref())?;
    let tree = snapshot_tree(snapshot, &policy);

    if let Some(raw) = args.prove {
        let address = IdentityAddress::parse(&raw).with_context(|| format!("Invalid address: {}", raw))?;
        let proof = tree
            .prove(&address)
            .with_context(|| format!("{} is not on the whitelist of this snapshot", address))?;
        let document = ProofDocument {
            found: true,
            merkle_root: tree.root(),
            proof,
        };
        println!("{}", serde_json::to_string_pretty(&document)?);
        return Ok(());
    }

    println!("timestamp: {}", timestamp.to_rfc3339());
    println!("minStake: {}", policy.min_stake);
    println!("addresses: {}", tree.leaf_count());
    println!("merkleRoot: {}", tree.root());

    if args.list {
        for address in tree.addresses() {
            println!("{}", address);
        }
    }

    Ok(())
}
