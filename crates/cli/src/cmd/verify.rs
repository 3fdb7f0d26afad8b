use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;
use whitelist_core::B256;
use whitelist_merkle::InclusionProof;

use super::read_json;

#[derive(Debug, Args)]
pub struct VerifyArgs {
    /// Proof JSON: a `/merkle_proof` response or a bare proof object
    #[arg(long)]
    proof: PathBuf,

    /// Expected root (0x-prefixed 32-byte hex)
    #[arg(long)]
    root: String,
}

/// Accepts both the API envelope (`{found, merkle_root, proof}`) and a bare proof.
fn extract_proof(document: serde_json::Value) -> Result<InclusionProof> {
    if document.get("found").and_then(|v| v.as_bool()) == Some(false) {
        anyhow::bail!("proof document reports the address as not whitelisted");
    }

    let proof = match document.get("proof") {
        Some(inner) => inner.clone(),
        None => document,
    };
    serde_json::from_value(proof).context("Invalid inclusion proof")
}

fn verify(document: serde_json::Value, root: &str) -> Result<InclusionProof> {
    let root: B256 = root
        .trim()
        .parse()
        .with_context(|| format!("Invalid root: {}", root))?;
    let proof = extract_proof(document)?;
    proof.check(root)?;
    Ok(proof)
}

pub fn run(args: VerifyArgs) -> Result<()> {
    let document: serde_json::Value = read_json(&args.proof)?;
    let proof = verify(document, &args.root)?;
    tracing::debug!(address = %proof.address, steps = proof.steps.len(), "Proof verified");
    println!("OK");
    Ok(())
}
