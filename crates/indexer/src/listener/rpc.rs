//! JSON-RPC identity source.
//!
//! Talks to a node exposing `dna_identities` (bulk) and `dna_identity` (single address).
//! Requests are `{method, params, id}`; responses are `{result, error, id}` and a non-null
//! `error` short-circuits the call.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;
use whitelist_core::{
    IdentityAddress, IdentityState, Stake, RPC_METHOD_IDENTITIES, RPC_METHOD_IDENTITY,
};

use super::source::{IdentitySource, RemoteIdentity, SourceError};

#[derive(Serialize)]
struct RpcRequest<'a> {
    method: &'a str,
    params: Vec<Value>,
    id: u64,
}

#[derive(Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<RpcErrorObject>,
    #[serde(default)]
    id: Value,
}

#[derive(Deserialize)]
struct RpcErrorObject {
    code: i64,
    #[serde(default)]
    message: String,
}

/// Identity as it appears in `result`. The single-address call may omit `address`.
#[derive(Deserialize)]
struct WireIdentity {
    #[serde(default)]
    address: Option<String>,
    state: String,
    stake: Stake,
}

/// HTTP JSON-RPC client for the identity authority.
pub struct RpcIdentitySource {
    client: Client,
    url: String,
    rpc_key: Option<String>,
    next_id: AtomicU64,
}

impl RpcIdentitySource {
    /// Build a client with a per-call timeout. `rpc_key` is sent as a bearer token.
    pub fn new(url: impl Into<String>, rpc_key: Option<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("whitelist-indexer/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build RPC HTTP client")?;

        Ok(Self {
            client,
            url: url.into(),
            rpc_key: rpc_key.filter(|key| !key.is_empty()),
            next_id: AtomicU64::new(1),
        })
    }

    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, SourceError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let mut request = self.client.post(&self.url).json(&RpcRequest { method, params, id });
        if let Some(key) = &self.rpc_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SourceError::Unreachable(e.to_string()))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| SourceError::Unreachable(e.to_string()))?;

        let parsed: RpcResponse = match serde_json::from_slice(&body) {
            Ok(parsed) => parsed,
            Err(_) if !status.is_success() => {
                return Err(SourceError::Unreachable(format!("HTTP {}", status)))
            }
            Err(e) => return Err(SourceError::Malformed(e.to_string())),
        };

        if let Some(error) = parsed.error {
            return Err(SourceError::AuthorityError {
                code: error.code,
                message: error.message,
            });
        }

        if !status.is_success() {
            return Err(SourceError::Unreachable(format!("HTTP {}", status)));
        }

        match &parsed.id {
            Value::Null => {}
            Value::Number(n) if n.as_u64() == Some(id) => {}
            other => {
                return Err(SourceError::Malformed(format!(
                    "response id {} does not match request id {}",
                    other, id
                )))
            }
        }

        debug!(method, id, "RPC call succeeded");

        Ok(parsed.result)
    }
}

impl WireIdentity {
    fn into_remote(self, address: IdentityAddress) -> RemoteIdentity {
        RemoteIdentity {
            address,
            state: IdentityState::from_wire(&self.state),
            stake: self.stake,
        }
    }
}

#[async_trait]
impl IdentitySource for RpcIdentitySource {
    async fn fetch_all(&self) -> Result<Vec<RemoteIdentity>, SourceError> {
        let result = self.call(RPC_METHOD_IDENTITIES, Vec::new()).await?;

        let wire: Vec<WireIdentity> =
            serde_json::from_value(result).map_err(|e| SourceError::Malformed(e.to_string()))?;

        wire.into_iter()
            .map(|identity| {
                let raw = identity
                    .address
                    .as_deref()
                    .ok_or_else(|| SourceError::Malformed("identity without address".to_string()))?;
                let address = IdentityAddress::parse(raw)
                    .map_err(|e| SourceError::Malformed(e.to_string()))?;
                Ok(identity.into_remote(address))
            })
            .collect()
    }

    async fn fetch_one(&self, address: &IdentityAddress) -> Result<RemoteIdentity, SourceError> {
        let result = self
            .call(RPC_METHOD_IDENTITY, vec![Value::String(address.to_string())])
            .await?;

        if result.is_null() {
            return Err(SourceError::Malformed(format!("no result for address {}", address)));
        }

        let wire: WireIdentity =
            serde_json::from_value(result).map_err(|e| SourceError::Malformed(e.to_string()))?;

        // The queried address is authoritative, whatever the node echoes back.
        Ok(wire.into_remote(address.clone()))
    }
}
