//! Whitelist API server.
//!
//! Reads the identity store written by `whitelist-indexer`. Configuration comes from the
//! environment: `WHITELIST_CONFIG` (the indexer's TOML file), `DATABASE_URL`, `PORT`,
//! `WHITELIST_MIN_STAKE`, `RUST_LOG`.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("whitelist_api=info,whitelist_indexer=info")),
        )
        .with(fmt::layer().with_target(true).with_line_number(true))
        .init();

    whitelist_api::server::run_from_env().await
}
