//! Whitelist commitment tree.
//!
//! This crate provides:
//! - Canonical (sorted, de-duplicated) leaf ordering
//! - Binary Merkle tree construction with domain-separated hashing
//! - Inclusion proof generation and verification
//!
//! # Commitment format
//!
//! - Leaves are the normalized addresses in byte-lexicographic order,
//!   hashed as `keccak256(0x00 || address)`.
//! - Internal nodes are `keccak256(0x01 || left || right)`.
//! - On a level with an odd number of nodes the last node is promoted unchanged to the
//!   next level (it is never paired with itself).
//! - The empty whitelist commits to `keccak256(0x00)`.

#![warn(missing_docs)]

pub mod builder;
pub mod error;
pub mod proof;
pub mod tree;

pub use builder::CommitmentBuilder;
pub use error::{MerkleError, Result};
pub use proof::{verify_inclusion, InclusionProof, ProofStep, Side};
pub use tree::CommitmentTree;
