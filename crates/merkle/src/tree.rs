//! The built commitment tree.

use alloy_primitives::B256;
use whitelist_core::{empty_root, IdentityAddress};

use crate::proof::{InclusionProof, ProofStep, Side};

/// An immutable commitment over a set of addresses.
///
/// Holds the sorted leaves and every level of node hashes, bottom level first, so proofs
/// are produced without rehashing.
#[derive(Debug, Clone)]
pub struct CommitmentTree {
    leaves: Vec<IdentityAddress>,
    levels: Vec<Vec<B256>>,
}

impl CommitmentTree {
    pub(crate) fn from_parts(leaves: Vec<IdentityAddress>, levels: Vec<Vec<B256>>) -> Self {
        Self { leaves, levels }
    }

    /// Root hash. The empty tree has the sentinel root `keccak256(0x00)`.
    pub fn root(&self) -> B256 {
        self.levels
            .last()
            .and_then(|top| top.first())
            .copied()
            .unwrap_or_else(empty_root)
    }

    /// Number of distinct addresses committed.
    pub fn leaf_count(&self) -> usize {
        self.leaves.len()
    }

    /// Check if the tree commits to nothing.
    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    /// Committed addresses in leaf order.
    pub fn addresses(&self) -> &[IdentityAddress] {
        &self.leaves
    }

    /// Leaf position of an address.
    pub fn index_of(&self, address: &IdentityAddress) -> Option<usize> {
        self.leaves.binary_search(address).ok()
    }

    /// Check membership.
    pub fn contains(&self, address: &IdentityAddress) -> bool {
        self.index_of(address).is_some()
    }

    /// Inclusion proof for `address`, or `None` when it is not committed.
    pub fn prove(&self, address: &IdentityAddress) -> Option<InclusionProof> {
        let leaf_index = self.index_of(address)?;

        let mut steps = Vec::new();
        let mut index = leaf_index;
        for level in &self.levels[..self.levels.len() - 1] {
            let sibling = index ^ 1;
            if let Some(hash) = level.get(sibling) {
                let side = if index % 2 == 0 { Side::Right } else { Side::Left };
                steps.push(ProofStep {
                    sibling: *hash,
                    side,
                });
            }
            index /= 2;
        }

        Some(InclusionProof {
            address: address.clone(),
            leaf_index: leaf_index as u64,
            leaf_count: self.leaves.len() as u64,
            steps,
        })
    }
}
