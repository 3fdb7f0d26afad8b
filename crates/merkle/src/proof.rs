//! Inclusion proofs.

use alloy_primitives::B256;
use serde::{Deserialize, Serialize};
use whitelist_core::{internal_hash, leaf_hash, IdentityAddress};

use crate::error::{MerkleError, Result};

/// Which side of the running hash a sibling sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// Sibling is the left input: `H(0x01 || sibling || current)`.
    Left,
    /// Sibling is the right input: `H(0x01 || current || sibling)`.
    Right,
}

/// One level of an inclusion proof.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofStep {
    /// Sibling node hash.
    pub sibling: B256,
    /// Position of the sibling.
    pub side: Side,
}

/// Proof that an address is a leaf of a commitment.
///
/// Steps run from the leaf level upwards. Levels where the node was promoted without a
/// sibling contribute no step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InclusionProof {
    /// The address being proven.
    pub address: IdentityAddress,
    /// Leaf position in the sorted leaf list.
    pub leaf_index: u64,
    /// Number of leaves in the tree the proof was taken from.
    pub leaf_count: u64,
    /// Sibling path, leaf level first.
    pub steps: Vec<ProofStep>,
}

impl InclusionProof {
    /// Root implied by this proof.
    pub fn compute_root(&self) -> B256 {
        fold_steps(leaf_hash(&self.address), &self.steps)
    }

    /// Verify this proof against a trusted root.
    pub fn verify(&self, root: B256) -> bool {
        self.check(root).is_ok()
    }

    /// Like [`verify`](Self::verify), but reports why a proof is rejected.
    pub fn check(&self, root: B256) -> Result<()> {
        if self.leaf_index >= self.leaf_count {
            return Err(MerkleError::InvalidProof(format!(
                "leaf index {} out of range for {} leaves",
                self.leaf_index, self.leaf_count
            )));
        }

        let max_depth = max_depth(self.leaf_count);
        if self.steps.len() > max_depth {
            return Err(MerkleError::InvalidProof(format!(
                "{} steps exceed tree height {}",
                self.steps.len(),
                max_depth
            )));
        }

        let computed = self.compute_root();
        if computed != root {
            return Err(MerkleError::RootMismatch {
                computed,
                expected: root,
            });
        }

        Ok(())
    }
}

/// Verify a bare sibling path for `address` against `root`.
pub fn verify_inclusion(address: &IdentityAddress, steps: &[ProofStep], root: B256) -> bool {
    fold_steps(leaf_hash(address), steps) == root
}

fn fold_steps(leaf: B256, steps: &[ProofStep]) -> B256 {
    steps.iter().fold(leaf, |hash, step| match step.side {
        Side::Left => internal_hash(&step.sibling, &hash),
        Side::Right => internal_hash(&hash, &step.sibling),
    })
}

/// ceil(log2(n)) for n >= 1.
fn max_depth(leaf_count: u64) -> usize {
    if leaf_count <= 1 {
        0
    } else {
        (u64::BITS - (leaf_count - 1).leading_zeros()) as usize
    }
}
