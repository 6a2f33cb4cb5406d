//! Envelope - command-line client for the envelope budgeting API.
//!
//! Main entry point for the `envelope` CLI.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

use commands::{auth, config, request};

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// Envelope - command-line client for the envelope budgeting API
#[derive(Parser)]
#[command(name = "envelope")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output as JSON (for scripting)
    #[arg(long, global = true)]
    pub json: bool,

    /// Directory holding config.toml (default: platform config dir)
    #[arg(long, global = true, env = "ENVELOPE_CONFIG_DIR")]
    pub config_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Sign in, sign out and inspect the session
    Auth(auth::AuthArgs),

    /// Fetch a resource (cached)
    Get(request::GetArgs),

    /// Send a write request
    Send(request::SendArgs),

    /// Configuration management
    Config(config::ConfigArgs),
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let data_dir = envelope_config::data_dir().unwrap_or_else(|| PathBuf::from(".envelope"));

    // Console (human-readable) + rotating JSON file
    let filter = if cli.verbose {
        "envelope=debug,envelope_client=debug,envelope_session=debug,envelope_cache=debug,envelope_retry=debug,envelope_config=debug,info"
    } else {
        "envelope=info,envelope_client=info,envelope_session=info,warn"
    };

    let file_appender = tracing_appender::rolling::daily(data_dir.join("logs"), "envelope.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    use tracing_subscriber::prelude::*;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr)
                .with_filter(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
                ),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_filter(tracing_subscriber::EnvFilter::new(
                    "envelope=trace,envelope_client=trace,envelope_session=trace,envelope_cache=debug,envelope_retry=trace,envelope_config=debug,info",
                )),
        )
        .init();

    let loaded = envelope_config::load_config_with_options(None, cli.config_dir.as_deref())?;
    for warning in &loaded.warnings {
        tracing::warn!("{}", warning);
    }

    let ctx = commands::Context {
        loaded,
        data_dir,
        json_output: cli.json,
        verbose: cli.verbose,
    };

    match cli.command {
        Commands::Auth(args) => auth::run(args, &ctx).await,
        Commands::Get(args) => request::run_get(args, &ctx).await,
        Commands::Send(args) => request::run_send(args, &ctx).await,
        Commands::Config(args) => config::run(args, &ctx).await,
    }
}
