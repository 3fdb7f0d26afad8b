//! Identity ingestion and whitelist queries.
//!
//! This crate provides:
//! - A JSON-RPC client for the identity authority (`dna_identities` / `dna_identity`)
//! - A SQLite identity store with atomic bulk upserts and an ingestion watermark
//! - The ingestion scheduler that keeps the store in step with the remote
//! - A cached whitelist commitment and the read-only query surface
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────┐
//! │  whitelist-indexer (this)    │
//! │                              │
//! │  ┌─────────────────────┐     │
//! │  │ Ingestion Scheduler │ ← JSON-RPC node
//! │  │    (tokio task)     │   dna_identities / dna_identity
//! │  └─────────┬───────────┘     │
//! │            │ StoreWriter     │
//! │      ┌─────▼─────┐           │
//! │      │  Storage  │ ← SQLite (WAL)
//! │      └─────┬─────┘           │
//! └────────────┼─────────────────┘
//!              │ Shared DB
//! ┌────────────▼─────────────────┐
//! │   whitelist-api (separate)   │
//! │                              │
//! │   QuerySurface               │
//! │   + CommitmentService cache  │
//! │                              │
//! │   • GET /whitelist           │
//! │   • GET /whitelist/check     │
//! │   • GET /merkle_root         │
//! │   • GET /merkle_proof        │
//! └──────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod commitment;
pub mod config;
pub mod listener;
pub mod query;
pub mod storage;

pub use commitment::{build_commitment, Commitment, CommitmentService};
pub use query::{QueryError, QuerySurface};
