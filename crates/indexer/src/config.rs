//! Configuration management for the whitelist indexer.
//!
//! This module handles loading configuration from:
//! - TOML files
//! - Environment variables referenced as `${VAR_NAME}`
//! - Default values (fallbacks)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use whitelist_core::{IdentityAddress, Stake, DEFAULT_MIN_STAKE_IDNA};
use whitelist_engine::EligibilityPolicy;

use crate::listener::{parse_address_list, IngestionMode};

/// Main configuration for the indexer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Remote identity source
    pub source: SourceConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Ingestion loop configuration
    #[serde(default)]
    pub ingestion: IngestionConfig,

    /// Whitelist rule parameters
    #[serde(default)]
    pub eligibility: EligibilityConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// How the indexer queries the remote source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceMode {
    /// `dna_identities` once per cycle
    #[default]
    Bulk,
    /// `dna_identity` for every address of `address_list_file`
    PerAddress,
}

/// Remote identity source configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// JSON-RPC endpoint URL
    pub rpc_url: String,

    /// Bearer token sent with every call (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rpc_key: Option<String>,

    /// Per-call timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Query mode
    #[serde(default)]
    pub mode: SourceMode,

    /// Address universe for per-address mode (one address per line, `#` comments)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address_list_file: Option<String>,
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database URL (e.g., "sqlite://whitelist.db")
    pub url: String,

    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

/// Ingestion loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionConfig {
    /// Seconds between cycle starts.
    ///
    /// **Must be > 0** - Zero will cause a panic in tokio::time::interval.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Addresses per batch in per-address mode
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Pause between batches in milliseconds
    #[serde(default = "default_batch_pause_ms")]
    pub batch_pause_ms: u64,
}

/// Eligibility configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EligibilityConfig {
    /// Minimum stake in iDNA (decimal string or number)
    #[serde(default = "default_min_stake")]
    pub min_stake: Stake,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,
}

/// Resolved settings handed to the ingestion core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestionSettings {
    /// Time between cycle starts.
    pub poll_interval: Duration,
    /// Addresses per batch in per-address mode.
    pub batch_size: usize,
    /// Pause between batches.
    pub batch_pause: Duration,
    /// Minimum stake for eligibility.
    pub min_stake: Stake,
    /// Per-call timeout for remote requests.
    pub remote_timeout: Duration,
}

impl IngestionSettings {
    /// Policy built from `min_stake`.
    pub fn eligibility_policy(&self) -> EligibilityPolicy {
        EligibilityPolicy::new(self.min_stake)
    }
}

impl Default for IngestionSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(default_poll_interval_secs()),
            batch_size: default_batch_size(),
            batch_pause: Duration::from_millis(default_batch_pause_ms()),
            min_stake: default_min_stake(),
            remote_timeout: Duration::from_secs(default_timeout_secs()),
        }
    }
}

// Default value functions
fn default_timeout_secs() -> u64 {
    30
}

fn default_max_connections() -> u32 {
    5
}

fn default_min_connections() -> u32 {
    1
}

fn default_poll_interval_secs() -> u64 {
    300 // 5 minutes
}

fn default_batch_size() -> usize {
    100
}

fn default_batch_pause_ms() -> u64 {
    100
}

fn default_min_stake() -> Stake {
    Stake::from_idna(DEFAULT_MIN_STAKE_IDNA)
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            batch_size: default_batch_size(),
            batch_pause_ms: default_batch_pause_ms(),
        }
    }
}

impl Default for EligibilityConfig {
    fn default() -> Self {
        Self {
            min_stake: default_min_stake(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// Environment variables can be referenced using `${VAR_NAME}` syntax.
    /// For example: `rpc_key = "${IDENA_RPC_KEY}"`
    ///
    /// # Example
    /// ```no_run
    /// # use whitelist_indexer::config::Config;
    /// let config = Config::from_file("indexer.toml")?;
    /// # Ok::<(), anyhow::Error>(())
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let expanded = expand_env_vars(&contents)?;

        let config: Config = toml::from_str(&expanded)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a TOML string.
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let expanded = expand_env_vars(toml)?;
        let config: Config =
            toml::from_str(&expanded).context("Failed to parse TOML configuration")?;

        config.validate()?;

        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        let rpc_url = self.source.rpc_url.trim();
        if rpc_url.is_empty() {
            anyhow::bail!("Source rpc_url cannot be empty");
        }
        if !(rpc_url.starts_with("http://") || rpc_url.starts_with("https://")) {
            anyhow::bail!("Source rpc_url must start with http:// or https:// (got '{}')", rpc_url);
        }
        if self.source.timeout_secs == 0 {
            anyhow::bail!("Source timeout_secs must be > 0");
        }
        if self.source.mode == SourceMode::PerAddress
            && self
                .source
                .address_list_file
                .as_deref()
                .map_or(true, |path| path.trim().is_empty())
        {
            anyhow::bail!("Source address_list_file is required when mode = \"per_address\"");
        }

        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }
        if self.database.max_connections == 0 {
            anyhow::bail!("Database max_connections must be > 0");
        }
        if self.database.min_connections > self.database.max_connections {
            anyhow::bail!(
                "Database min_connections ({}) cannot exceed max_connections ({})",
                self.database.min_connections,
                self.database.max_connections
            );
        }

        if self.ingestion.poll_interval_secs == 0 {
            anyhow::bail!(
                "Ingestion poll_interval_secs must be > 0 (tokio interval cannot be zero)"
            );
        }
        if self.ingestion.batch_size == 0 {
            anyhow::bail!("Ingestion batch_size must be > 0");
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            anyhow::bail!(
                "Logging level must be one of: {} (got '{}')",
                valid_levels.join(", "),
                self.logging.level
            );
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            anyhow::bail!(
                "Logging format must be one of: {} (got '{}')",
                valid_formats.join(", "),
                self.logging.format
            );
        }

        Ok(())
    }

    /// Settings for the ingestion core.
    pub fn ingestion_settings(&self) -> IngestionSettings {
        IngestionSettings {
            poll_interval: Duration::from_secs(self.ingestion.poll_interval_secs),
            batch_size: self.ingestion.batch_size,
            batch_pause: Duration::from_millis(self.ingestion.batch_pause_ms),
            min_stake: self.eligibility.min_stake,
            remote_timeout: Duration::from_secs(self.source.timeout_secs),
        }
    }

    /// Eligibility policy for everything that builds a commitment from this store
    /// (`status`, the API, and the scheduler's per-cycle eligible count).
    pub fn eligibility_policy(&self) -> EligibilityPolicy {
        self.ingestion_settings().eligibility_policy()
    }

    /// Resolve the ingestion mode, reading and validating the address list if needed.
    pub fn ingestion_mode(&self) -> Result<IngestionMode> {
        match (self.source.mode, self.source.address_list_file.as_deref()) {
            (SourceMode::Bulk, _) => Ok(IngestionMode::Bulk),
            (SourceMode::PerAddress, Some(path)) => {
                let contents = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read address list: {}", path))?;

                let mut addresses = parse_address_list(&contents)
                    .iter()
                    .map(|raw| {
                        IdentityAddress::parse(raw)
                            .with_context(|| format!("Invalid address in {}: '{}'", path, raw))
                    })
                    .collect::<Result<Vec<_>>>()?;
                addresses.sort();
                addresses.dedup();

                Ok(IngestionMode::PerAddress(addresses))
            }
            (SourceMode::PerAddress, None) => {
                anyhow::bail!("Source address_list_file is required when mode = \"per_address\"")
            }
        }
    }
}

/// Expand environment variables in the format `${VAR_NAME}`.
///
/// Placeholders inside TOML comments (after `#` outside strings) are left alone. Inside
/// basic, literal and multiline strings they are expanded.
///
/// # Errors
/// Returns an error if a referenced variable is not set or a placeholder is malformed.
pub fn expand_env_vars(input: &str) -> Result<String> {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    let mut quote: Option<Quote> = None;
    let mut in_comment = false;
    let mut escape_next = false;
    let mut pos = 0;

    while let Some(ch) = chars.next() {
        pos += 1;

        if escape_next {
            escape_next = false;
            result.push(ch);
            continue;
        }

        match ch {
            '\n' => {
                in_comment = false;
                if matches!(quote, Some(Quote::Double | Quote::Single)) {
                    quote = None;
                }
                result.push(ch);
            }
            _ if in_comment => result.push(ch),
            '\\' if matches!(quote, Some(Quote::Double | Quote::TripleDouble)) => {
                escape_next = true;
                result.push(ch);
            }
            '"' | '\'' => {
                let triple = {
                    let mut ahead = chars.clone();
                    ahead.next() == Some(ch) && ahead.next() == Some(ch)
                };
                let (single, multi) = if ch == '"' {
                    (Quote::Double, Quote::TripleDouble)
                } else {
                    (Quote::Single, Quote::TripleSingle)
                };

                if triple && (quote.is_none() || quote == Some(multi)) {
                    quote = if quote.is_none() { Some(multi) } else { None };
                    result.push(ch);
                    result.push(ch);
                    result.push(ch);
                    chars.next();
                    chars.next();
                    pos += 2;
                } else {
                    if quote.is_none() {
                        quote = Some(single);
                    } else if quote == Some(single) {
                        quote = None;
                    }
                    result.push(ch);
                }
            }
            '#' if quote.is_none() => {
                in_comment = true;
                result.push(ch);
            }
            '$' if chars.peek() == Some(&'{') => {
                chars.next();
                pos += 1;

                let mut var_name = String::new();
                let mut found_close = false;
                for c in chars.by_ref() {
                    pos += 1;
                    if c == '}' {
                        found_close = true;
                        break;
                    }
                    var_name.push(c);
                }

                if !found_close {
                    anyhow::bail!(
                        "Unclosed environment variable placeholder at position {}",
                        pos
                    );
                }
                if var_name.is_empty() {
                    anyhow::bail!("Empty environment variable name at position {}", pos);
                }

                match std::env::var(&var_name) {
                    Ok(value) => result.push_str(&value),
                    Err(_) => anyhow::bail!(
                        "Environment variable '{}' is not set (referenced at position {})",
                        var_name,
                        pos
                    ),
                }
            }
            _ => result.push(ch),
        }
    }

    Ok(result)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Quote {
    Double,
    Single,
    TripleDouble,
    TripleSingle,
}
