//! Builder for whitelist commitments.

use alloy_primitives::B256;
use whitelist_core::{internal_hash, leaf_hash, IdentityAddress};

use crate::tree::CommitmentTree;

/// Builder for a [`CommitmentTree`].
///
/// The builder collects addresses in any order, with duplicates allowed. `build()` sorts
/// and de-duplicates them, so two builders fed the same set always agree on the root.
///
/// # Examples
///
/// ```
/// use whitelist_core::IdentityAddress;
/// use whitelist_merkle::CommitmentBuilder;
///
/// let a = IdentityAddress::parse("0x1111111111111111111111111111111111111111").unwrap();
/// let b = IdentityAddress::parse("0x2222222222222222222222222222222222222222").unwrap();
///
/// let mut builder = CommitmentBuilder::new();
/// builder.insert(b).insert(a);
/// let tree = builder.build();
/// assert_eq!(tree.leaf_count(), 2);
/// ```
#[derive(Debug, Clone, Default)]
pub struct CommitmentBuilder {
    addresses: Vec<IdentityAddress>,
}

impl CommitmentBuilder {
    /// Create a new empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a builder with room for `capacity` addresses.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            addresses: Vec::with_capacity(capacity),
        }
    }

    /// Add one address.
    pub fn insert(&mut self, address: IdentityAddress) -> &mut Self {
        self.addresses.push(address);
        self
    }

    /// Number of addresses collected so far, duplicates included.
    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    /// Check if nothing has been inserted.
    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    /// Build the commitment.
    pub fn build(self) -> CommitmentTree {
        let mut leaves = self.addresses;
        leaves.sort_unstable();
        leaves.dedup();

        if leaves.is_empty() {
            return CommitmentTree::from_parts(leaves, Vec::new());
        }

        let mut levels = vec![leaves.iter().map(leaf_hash).collect::<Vec<B256>>()];
        while let Some(level) = levels.last().filter(|level| level.len() > 1) {
            let next = level
                .chunks(2)
                .map(|pair| match pair {
                    [left, right] => internal_hash(left, right),
                    // Unpaired last node moves up unchanged.
                    _ => pair[0],
                })
                .collect();
            levels.push(next);
        }

        CommitmentTree::from_parts(leaves, levels)
    }
}

impl Extend<IdentityAddress> for CommitmentBuilder {
    fn extend<I: IntoIterator<Item = IdentityAddress>>(&mut self, iter: I) {
        self.addresses.extend(iter);
    }
}

impl FromIterator<IdentityAddress> for CommitmentBuilder {
    fn from_iter<I: IntoIterator<Item = IdentityAddress>>(iter: I) -> Self {
        Self {
            addresses: iter.into_iter().collect(),
        }
    }
}
