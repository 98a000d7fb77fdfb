//! # Gamehub Server
//!
//! Realtime game server over WebSocket.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! gamehub
//!
//! # Run with custom config
//! gamehub --config /path/to/gamehub.toml
//!
//! # Print the effective configuration and exit
//! gamehub --print-config
//!
//! # Run with environment variables
//! GAMEHUB_PORT=8080 GAMEHUB_HOST=0.0.0.0 gamehub
//! ```

use anyhow::Result;
use clap::Parser;
use gamehub_server::config::{Config, LogFormat, LoggingConfig};
use gamehub_server::{metrics, run_server};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "gamehub")]
#[command(about = "Realtime game server over WebSocket", long_about = None)]
#[command(version)]
struct Args {
    /// Configuration file (defaults to the first of the standard locations)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
}

fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let registry = tracing_subscriber::registry().with(filter);

    match logging.format {
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer().pretty()).init(),
        LogFormat::Compact => registry
            .with(tracing_subscriber::fmt::layer().compact())
            .init(),
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = Config::load(args.config.as_deref())?;
    if args.print_config {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    init_tracing(&config.logging);
    tracing::info!("Starting Gamehub server on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    run_server(config).await?;

    Ok(())
}
