//! Remote identity source abstraction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use whitelist_core::{IdentityAddress, IdentityRecord, IdentityState, Stake};

/// Typed failure of one remote call.
///
/// A failed call never yields records.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
    /// Transport failure or timeout.
    #[error("Remote unreachable: {0}")]
    Unreachable(String),

    /// The response could not be interpreted.
    #[error("Malformed response: {0}")]
    Malformed(String),

    /// The remote answered with an explicit error object.
    #[error("Remote error {code}: {message}")]
    AuthorityError {
        /// Error code reported by the remote.
        code: i64,
        /// Error message reported by the remote.
        message: String,
    },
}

/// An identity as reported by the remote authority, before it is stamped with a cycle time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteIdentity {
    /// Normalized address.
    pub address: IdentityAddress,
    /// Reported state.
    pub state: IdentityState,
    /// Reported stake.
    pub stake: Stake,
}

impl RemoteIdentity {
    /// Stamp with the cycle that observed it.
    pub fn into_record(self, seen_at: DateTime<Utc>) -> IdentityRecord {
        IdentityRecord {
            address: self.address,
            state: self.state,
            stake: self.stake,
            last_seen_at: seen_at,
        }
    }
}

/// Where identity records come from.
#[async_trait]
pub trait IdentitySource: Send + Sync {
    /// Fetch every identity the authority knows, as one internally consistent batch.
    async fn fetch_all(&self) -> Result<Vec<RemoteIdentity>, SourceError>;

    /// Fetch a single identity. The returned address is always `address`.
    async fn fetch_one(&self, address: &IdentityAddress) -> Result<RemoteIdentity, SourceError>;
}

/// Parse an address list: one address per line, blank lines and `#` comments ignored.
///
/// Entries are returned trimmed but otherwise unvalidated.
pub fn parse_address_list(contents: &str) -> Vec<String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}
