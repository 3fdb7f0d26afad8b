//! # Whitelist Core
//!
//! Core types, constants and hashing utilities shared by every whitelist component.
//!
//! ## Features
//!
//! - **Identity types**: `IdentityAddress`, `IdentityState`, `Stake`, `IdentityRecord`
//! - **Watermark**: bookkeeping of the last attempted/successful ingestion cycle
//! - **Constants**: hash domain prefixes, RPC method names, default stake threshold
//! - **Hashing**: Keccak256 leaf/internal hashing for the whitelist commitment

#![warn(missing_docs)]

pub mod constants;
pub mod error;
pub mod hashing;
pub mod types;

// Re-export commonly used items
pub use constants::*;
pub use error::{CoreError, Result};
pub use hashing::{empty_root, internal_hash, keccak256, leaf_hash};
pub use types::*;

// Re-export Alloy primitives for convenience
pub use alloy_primitives::{B256, U256};
