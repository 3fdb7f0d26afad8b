//! Error types for the merkle crate.

use alloy_primitives::B256;
use thiserror::Error;

/// Commitment error type.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MerkleError {
    /// The proof is structurally impossible for the tree it claims to come from.
    #[error("Invalid proof: {0}")]
    InvalidProof(String),

    /// The proof is well formed but does not lead to the expected root.
    #[error("Root mismatch: proof yields {computed}, expected {expected}")]
    RootMismatch {
        /// Root recomputed from the proof.
        computed: B256,
        /// Root the caller trusts.
        expected: B256,
    },
}

/// Result type alias for MerkleError.
pub type Result<T> = std::result::Result<T, MerkleError>;
