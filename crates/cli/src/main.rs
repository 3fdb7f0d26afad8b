use anyhow::Result;
use clap::{Parser, Subcommand};

mod cmd;

#[derive(Debug, Parser)]
#[command(name = "whitelist")]
#[command(about = "Identity whitelist operator CLI")]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Fetch identities for an address list into a snapshot file.
    Fetch(cmd::fetch::FetchArgs),
    /// Compute the whitelist root of a snapshot file.
    Root(cmd::root::RootArgs),
    /// Verify an inclusion proof against a root.
    Verify(cmd::verify::VerifyArgs),
}

fn init_logging(debug: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let env_filter = if debug {
        EnvFilter::new("whitelist=debug,whitelist_indexer=debug")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("whitelist=info,whitelist_indexer=info"))
    };

    // stdout carries command output.
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);

    match cli.command {
        Command::Fetch(args) => cmd::fetch::run(args).await?,
        Command::Root(args) => cmd::root::run(args)?,
        Command::Verify(args) => cmd::verify::run(args)?,
    }

    Ok(())
}
