//! Offline batch fetcher: `dna_identity` for every address of a list, written to a snapshot.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};
use whitelist_core::IdentityAddress;
use whitelist_indexer::config::expand_env_vars;
use whitelist_indexer::listener::{
    parse_address_list, IdentitySource, RemoteIdentity, RpcIdentitySource,
};

#[derive(Debug, Args)]
pub struct FetchArgs {
    /// Fetcher configuration file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// JSON-RPC endpoint URL
    #[arg(long)]
    rpc_url: Option<String>,

    /// Bearer token for the RPC endpoint
    #[arg(long, env = "WHITELIST_RPC_KEY", hide_env_values = true)]
    rpc_key: Option<String>,

    /// Address list file (one address per line, `#` comments)
    #[arg(long)]
    addresses: Option<PathBuf>,

    /// Snapshot output path
    #[arg(long)]
    output: Option<PathBuf>,

    /// Addresses per batch
    #[arg(long)]
    batch_size: Option<usize>,

    /// Per-call timeout in seconds
    #[arg(long)]
    timeout_secs: Option<u64>,
}

/// Fetcher configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FetcherConfig {
    #[serde(default)]
    pub rpc_url: String,
    #[serde(default)]
    pub rpc_key: Option<String>,
    #[serde(default = "default_output_file")]
    pub output_file: PathBuf,
    #[serde(default)]
    pub address_list_file: PathBuf,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_batch_pause_ms")]
    pub batch_pause_ms: u64,
}

fn default_output_file() -> PathBuf {
    PathBuf::from("snapshot.json")
}

fn default_batch_size() -> usize {
    100
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_batch_pause_ms() -> u64 {
    100
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            rpc_url: String::new(),
            rpc_key: None,
            output_file: default_output_file(),
            address_list_file: PathBuf::new(),
            batch_size: default_batch_size(),
            timeout_secs: default_timeout_secs(),
            batch_pause_ms: default_batch_pause_ms(),
        }
    }
}

impl FetcherConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read fetcher config {}", path.display()))?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let expanded = expand_env_vars(toml)?;
        toml::from_str(&expanded).context("Failed to parse fetcher config")
    }

    /// Config file values overridden by command-line flags.
    fn resolve(args: FetchArgs) -> Result<Self> {
        let mut config = match &args.config {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        if let Some(rpc_url) = args.rpc_url {
            config.rpc_url = rpc_url;
        }
        if args.rpc_key.is_some() {
            config.rpc_key = args.rpc_key;
        }
        if let Some(addresses) = args.addresses {
            config.address_list_file = addresses;
        }
        if let Some(output) = args.output {
            config.output_file = output;
        }
        if let Some(batch_size) = args.batch_size {
            config.batch_size = batch_size;
        }
        if let Some(timeout_secs) = args.timeout_secs {
            config.timeout_secs = timeout_secs;
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(!self.rpc_url.is_empty(), "rpc_url is required (--rpc-url or config)");
        anyhow::ensure!(
            !self.address_list_file.as_os_str().is_empty(),
            "address_list_file is required (--addresses or config)"
        );
        anyhow::ensure!(self.batch_size > 0, "batch_size must be > 0");
        anyhow::ensure!(self.timeout_secs > 0, "timeout_secs must be > 0");
        Ok(())
    }
}

/// Snapshot file written by `fetch` and read by `root`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub timestamp: DateTime<Utc>,
    pub identities: Vec<RemoteIdentity>,
    pub total: usize,
    pub successful: usize,
    pub failed: Vec<String>,
}

/// Query every address in batches. Failures are collected, never fatal.
pub async fn fetch_snapshot<S: IdentitySource>(
    source: &S,
    addresses: &[String],
    batch_size: usize,
    batch_pause: Duration,
) -> Snapshot {
    let mut snapshot = Snapshot {
        timestamp: Utc::now(),
        identities: Vec::new(),
        total: addresses.len(),
        successful: 0,
        failed: Vec::new(),
    };

    let batch_size = batch_size.max(1);
    let mut start = 0;
    for batch in addresses.chunks(batch_size) {
        let end = start + batch.len();
        info!("Processing batch {}-{}/{}", start + 1, end, addresses.len());

        for raw in batch {
            let address = match IdentityAddress::parse(raw) {
                Ok(address) => address,
                Err(e) => {
                    warn!("Error for {}: {}", raw, e);
                    snapshot.failed.push(raw.clone());
                    continue;
                }
            };

            match source.fetch_one(&address).await {
                Ok(identity) => {
                    debug!(address = %identity.address, state = %identity.state, "Fetched identity");
                    snapshot.identities.push(identity);
                    snapshot.successful += 1;
                }
                Err(e) => {
                    warn!("Error for {}: {}", raw, e);
                    snapshot.failed.push(raw.clone());
                }
            }
        }

        start = end;
        if end < addresses.len() {
            tokio::time::sleep(batch_pause).await;
        }
    }

    snapshot
}

pub async fn run(args: FetchArgs) -> Result<()> {
    let config = FetcherConfig::resolve(args)?;

    let contents = std::fs::read_to_string(&config.address_list_file).with_context(|| {
        format!(
            "Failed to read address list {}",
            config.address_list_file.display()
        )
    })?;
    let addresses = parse_address_list(&contents);
    info!("Fetching information for {} addresses...", addresses.len());

    let source = RpcIdentitySource::new(
        config.rpc_url.clone(),
        config.rpc_key.clone(),
        Duration::from_secs(config.timeout_secs),
    )?;

    let snapshot = fetch_snapshot(
        &source,
        &addresses,
        config.batch_size,
        Duration::from_millis(config.batch_pause_ms),
    )
    .await;

    let json = serde_json::to_string_pretty(&snapshot)?;
    std::fs::write(&config.output_file, json).with_context(|| {
        format!("Failed to write snapshot {}", config.output_file.display())
    })?;

    info!(
        "Completed! {}/{} identities fetched successfully",
        snapshot.successful, snapshot.total
    );
    if !snapshot.failed.is_empty() {
        warn!("Failed addresses: {:?}", snapshot.failed);
    }
    println!("{}", config.output_file.display());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use whitelist_core::{IdentityState, Stake};
    use whitelist_indexer::listener::SourceError;

    #[derive(Default)]
    struct MapSource {
        identities: HashMap<IdentityAddress, RemoteIdentity>,
        calls: Mutex<Vec<IdentityAddress>>,
    }

    impl MapSource {
        fn with(mut self, address: &str, state: &str, stake: &str) -> Self {
            let address = IdentityAddress::parse(address).unwrap();
            self.identities.insert(
                address.clone(),
                RemoteIdentity {
                    address,
                    state: IdentityState::from_wire(state),
                    stake: Stake::from_decimal_str(stake).unwrap(),
                },
            );
            self
        }
    }

    #[async_trait]
    impl IdentitySource for MapSource {
        async fn fetch_all(&self) -> Result<Vec<RemoteIdentity>, SourceError> {
            Ok(self.identities.values().cloned().collect())
        }

        async fn fetch_one(
            &self,
            address: &IdentityAddress,
        ) -> Result<RemoteIdentity, SourceError> {
            self.calls.lock().unwrap().push(address.clone());
            self.identities
                .get(address)
                .cloned()
                .ok_or_else(|| SourceError::AuthorityError {
                    code: -32000,
                    message: "identity not found".to_string(),
                })
        }
    }

    #[tokio::test]
    async fn test_fetch_collects_failures_without_aborting() {
        let source = MapSource::default()
            .with("0x1234567890abcdef1234567890abcdef12345678", "Human", "15000")
            .with("0xabcdef1234567890abcdef1234567890abcdef12", "Newbie", "5000");

        let addresses: Vec<String> = [
            "0x1234567890ABCDEF1234567890ABCDEF12345678",
            "0xinexistant",
            "0x0000000000000000000000000000000000000001",
            "0xabcdef1234567890abcdef1234567890abcdef12",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        let snapshot = fetch_snapshot(&source, &addresses, 2, Duration::from_millis(1)).await;

        assert_eq!(snapshot.total, 4);
        assert_eq!(snapshot.successful, 2);
        assert_eq!(
            snapshot.failed,
            vec![
                "0xinexistant".to_string(),
                "0x0000000000000000000000000000000000000001".to_string()
            ]
        );
        assert_eq!(
            snapshot.identities[0].address.as_str(),
            "0x1234567890abcdef1234567890abcdef12345678"
        );

        // Malformed entries never reach the remote.
        assert_eq!(source.calls.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_snapshot_json_shape() {
        let source =
            MapSource::default().with("0x1234567890abcdef1234567890abcdef12345678", "Human", "15000");
        let addresses = vec!["0x1234567890abcdef1234567890abcdef12345678".to_string()];

        let snapshot = fetch_snapshot(&source, &addresses, 100, Duration::ZERO).await;
        let json = serde_json::to_value(&snapshot).unwrap();

        assert!(json["timestamp"].is_string());
        assert_eq!(json["total"], 1);
        assert_eq!(json["successful"], 1);
        assert_eq!(json["failed"], serde_json::json!([]));
        assert_eq!(json["identities"][0]["state"], "Human");
        assert_eq!(json["identities"][0]["stake"], "15000");

        let back: Snapshot = serde_json::from_value(json).unwrap();
        assert_eq!(back, snapshot);
    }

    #[test]
    fn test_config_defaults() {
        let config = FetcherConfig::from_toml_str(
            r#"
rpc_url = "http://localhost:9009"
address_list_file = "addresses.txt"
"#,
        )
        .unwrap();

        assert_eq!(config.batch_size, 100);
        assert_eq!(config.timeout_secs, 30);
        assert_eq!(config.batch_pause_ms, 100);
        assert_eq!(config.output_file, PathBuf::from("snapshot.json"));
        assert_eq!(config.rpc_key, None);
    }

    #[test]
    fn test_flags_override_config_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(
            file.path(),
            r#"
rpc_url = "http://localhost:9009"
rpc_key = "from-file"
address_list_file = "addresses.txt"
batch_size = 50
"#,
        )
        .unwrap();

        let config = FetcherConfig::resolve(FetchArgs {
            config: Some(file.path().to_path_buf()),
            rpc_url: None,
            rpc_key: Some("from-flag".to_string()),
            addresses: None,
            output: Some(PathBuf::from("out.json")),
            batch_size: None,
            timeout_secs: Some(5),
        })
        .unwrap();

        assert_eq!(config.rpc_url, "http://localhost:9009");
        assert_eq!(config.rpc_key.as_deref(), Some("from-flag"));
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.timeout_secs, 5);
        assert_eq!(config.output_file, PathBuf::from("out.json"));
    }

    #[test]
    fn test_missing_required_settings() {
        let args = FetchArgs {
            config: None,
            rpc_url: None,
            rpc_key: None,
            addresses: Some(PathBuf::from("addresses.txt")),
            output: None,
            batch_size: None,
            timeout_secs: None,
        };
        assert!(FetcherConfig::resolve(args).is_err());
    }
}
