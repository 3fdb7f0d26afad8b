//! Axum-based HTTP API for the identity whitelist.
//!
//! This crate provides:
//! - `/health` - Store liveness plus the ingestion watermark
//! - `/whitelist` - Every whitelisted address with the root committing to them
//! - `/whitelist/check?address=...` - Eligibility of one address, with the reason
//! - `/merkle_root` - Current root, leaf count and snapshot time
//! - `/merkle_proof?address=...` - Inclusion proof against the current root

#![warn(missing_docs)]

/// API server runtime and in-process app builder.
pub mod server;
