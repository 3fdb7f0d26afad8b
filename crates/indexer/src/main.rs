//! Whitelist Indexer - identity ingestion from an Idena-style JSON-RPC node
//!
//! This binary provides:
//! - Periodic ingestion into the identity store
//! - One-shot ingestion for cron-style deployments
//! - Store status and commitment inspection
//!
//! Note: The HTTP API is provided by the separate `whitelist-api` service

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{info, warn};
use whitelist_engine::EligibilityPolicy;
use whitelist_indexer::config::{Config, LoggingConfig};
use whitelist_indexer::listener::{
    CycleOutcome, IngestionScheduler, RpcIdentitySource,
};
use whitelist_indexer::storage::Storage;
use whitelist_indexer::CommitmentService;

#[derive(Parser)]
#[command(name = "whitelist-indexer")]
#[command(version, about = "Identity snapshot indexer for the whitelist commitment", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "indexer.toml")]
    config: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the ingestion loop
    Run,

    /// Run a single ingestion cycle and exit
    IngestOnce,

    /// Show ingestion watermark, store statistics and the current root
    Status,

    /// Initialize the database
    InitDb {
        /// Database URL
        #[arg(long, default_value = "sqlite://whitelist.db")]
        database_url: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logging settings come from the config file when it is readable.
    let logging = Config::from_file(&cli.config)
        .map(|config| config.logging)
        .unwrap_or_default();
    init_logging(cli.debug, &logging);

    info!("Whitelist Indexer starting...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_indexer(&cli.config).await?,
        Commands::IngestOnce => ingest_once(&cli.config).await?,
        Commands::Status => show_status(&cli.config).await?,
        Commands::InitDb { database_url } => init_database(&database_url).await?,
    }

    Ok(())
}

/// Initialize tracing subscriber for logging
fn init_logging(debug: bool, logging: &LoggingConfig) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let env_filter = if debug {
        EnvFilter::new("whitelist_indexer=debug,sqlx=warn")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("whitelist_indexer={}", logging.level)))
    };

    let registry = tracing_subscriber::registry().with(env_filter);
    if logging.format == "json" {
        registry
            .with(fmt::layer().json().with_target(true).with_line_number(true))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_line_number(true))
            .init();
    }
}

async fn open_storage(config: &Config) -> Result<Storage> {
    let storage = Storage::new(
        &config.database.url,
        Some(config.database.max_connections),
        Some(config.database.min_connections),
    )
    .await
    .context("Failed to connect to database")?;

    storage
        .run_migrations()
        .await
        .context("Failed to run migrations")?;

    Ok(storage)
}

fn build_scheduler(
    config: &Config,
    storage: &Storage,
) -> Result<IngestionScheduler<RpcIdentitySource>> {
    let settings = config.ingestion_settings();
    let mode = config.ingestion_mode()?;

    let source = RpcIdentitySource::new(
        config.source.rpc_url.clone(),
        config.source.rpc_key.clone(),
        settings.remote_timeout,
    )
    .context("Failed to create RPC identity source")?;

    let writer = storage.take_writer()?;

    Ok(IngestionScheduler::new(source, writer, settings, mode))
}

/// Main indexer service - runs the ingestion loop until Ctrl+C
async fn run_indexer(config_path: &str) -> Result<()> {
    info!("Starting indexer service with config: {}", config_path);

    let config = Config::from_file(config_path).context("Failed to load configuration")?;

    info!("Configuration loaded successfully");
    info!("  RPC URL: {}", config.source.rpc_url);
    info!("  Mode: {:?}", config.source.mode);
    info!("  Database: {}", config.database.url);
    info!("  Poll interval: {}s", config.ingestion.poll_interval_secs);
    info!("  Minimum stake: {} iDNA", config.eligibility.min_stake);

    let storage = open_storage(&config).await?;
    info!("Database initialized");

    let scheduler = build_scheduler(&config, &storage)?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut scheduler_handle = tokio::spawn(scheduler.run(shutdown_rx));

    info!("Indexer is running. Press Ctrl+C to stop.");
    info!("For API queries, run the whitelist-api service separately.");

    tokio::select! {
        result = &mut scheduler_handle => {
            storage.close().await;
            match result {
                Ok(Ok(())) => {
                    warn!("Ingestion scheduler exited unexpectedly");
                    Ok(())
                }
                Ok(Err(e)) => Err(e).context("Ingestion scheduler failed"),
                Err(e) => Err(anyhow::anyhow!("Ingestion task panicked: {}", e)),
            }
        }
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl+C")?;
            info!("Received shutdown signal, gracefully shutting down...");

            // Aborts an in-flight fetch; a batch already being written completes.
            let _ = shutdown_tx.send(true);
            match scheduler_handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Ingestion scheduler failed during shutdown: {:#}", e),
                Err(e) => warn!("Ingestion task panicked during shutdown: {}", e),
            }

            storage.close().await;
            Ok(())
        }
    }
}

/// Run one ingestion cycle
async fn ingest_once(config_path: &str) -> Result<()> {
    let config = Config::from_file(config_path).context("Failed to load configuration")?;
    let storage = open_storage(&config).await?;

    let mut scheduler = build_scheduler(&config, &storage)?;
    let (_shutdown_tx, mut shutdown_rx) = watch::channel(false);

    let outcome = scheduler.run_cycle(&mut shutdown_rx).await;
    drop(scheduler);
    storage.close().await;

    match outcome {
        CycleOutcome::Committed { updated, failed } => {
            info!("Ingestion committed: {} records written, {} addresses failed", updated, failed);
            Ok(())
        }
        CycleOutcome::Failed(error) => Err(anyhow::anyhow!("Ingestion failed: {}", error)),
        CycleOutcome::Aborted => Err(anyhow::anyhow!("Ingestion aborted")),
    }
}

/// Show indexer status
async fn show_status(config_path: &str) -> Result<()> {
    info!("Checking indexer status");

    // Fall back to the default database ONLY if the config file doesn't exist
    let (database_url, max_conn, min_conn, policy) = match Config::from_file(config_path) {
        Ok(config) => {
            info!("Using database from config: {}", config.database.url);
            (
                config.database.url.clone(),
                Some(config.database.max_connections),
                Some(config.database.min_connections),
                config.eligibility_policy(),
            )
        }
        Err(e) => {
            let is_not_found = e.chain().any(|cause| {
                cause
                    .downcast_ref::<std::io::Error>()
                    .is_some_and(|io_err| io_err.kind() == std::io::ErrorKind::NotFound)
            });

            if is_not_found {
                info!("Config file not found, using default database: sqlite://whitelist.db");
                (
                    "sqlite://whitelist.db".to_string(),
                    None,
                    None,
                    EligibilityPolicy::default(),
                )
            } else {
                return Err(e).context("Failed to load config file");
            }
        }
    };

    let storage = Storage::new(&database_url, max_conn, min_conn)
        .await
        .context("Failed to connect to database")?;
    storage
        .run_migrations()
        .await
        .context("Failed to run migrations")?;

    let watermark = storage.get_watermark().await?;
    let stats = storage.stats().await?;
    let commitment = CommitmentService::new(storage.clone(), policy)
        .current()
        .await
        .context("Failed to build commitment")?;

    let format_time = |t: Option<chrono::DateTime<chrono::Utc>>| {
        t.map(|dt| dt.to_rfc3339())
            .unwrap_or_else(|| "never".to_string())
    };

    println!("\n=== Whitelist Indexer Status ===\n");
    println!("Ingestion:");
    println!("  Successful cycles: {}", watermark.cycle);
    println!("  Last attempt: {}", format_time(watermark.last_attempt_at));
    println!("  Last success: {}", format_time(watermark.last_success_at));
    if let Some(error) = &watermark.last_error {
        println!("  Last error: {}", error);
    }
    if watermark.failed_count > 0 {
        println!("  Failed addresses (last cycle): {}", watermark.failed_count);
    }

    println!("\nDatabase Statistics:");
    println!("  Identities: {}", stats.identity_count);

    println!("\nWhitelist Commitment:");
    println!("  Minimum stake: {} iDNA", policy.min_stake);
    println!("  Eligible addresses: {}", commitment.tree.leaf_count());
    println!("  Merkle root: 0x{}", hex::encode(commitment.tree.root()));
    println!();

    storage.close().await;

    Ok(())
}

/// Initialize the database
async fn init_database(database_url: &str) -> Result<()> {
    info!("Initializing database: {}", database_url);

    let storage = Storage::new(database_url, None, None)
        .await
        .context("Failed to connect to database")?;

    storage
        .run_migrations()
        .await
        .context("Failed to run migrations")?;

    storage
        .health_check()
        .await
        .context("Database health check failed")?;

    let stats = storage.stats().await?;
    info!("Database initialized successfully!");
    info!("  Identities: {}", stats.identity_count);
    info!("  Successful cycles: {}", stats.cycle);

    storage.close().await;

    Ok(())
}
