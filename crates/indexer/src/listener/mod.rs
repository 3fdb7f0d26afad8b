//! Identity ingestion.
//!
//! This module provides:
//! - The [`IdentitySource`] abstraction and its typed failures
//! - A JSON-RPC client for the identity authority
//! - The ingestion scheduler (fetch, reconcile, watermark bookkeeping)

pub mod rpc;
pub mod scheduler;
pub mod source;

pub use rpc::RpcIdentitySource;
pub use scheduler::{CycleOutcome, IngestionMode, IngestionScheduler, SchedulerState};
pub use source::{parse_address_list, IdentitySource, RemoteIdentity, SourceError};
