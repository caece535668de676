//! # Relay Server
//!
//! Command-driven chat relay.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! relay
//!
//! # Run with custom config
//! relay --config /path/to/relay.toml
//!
//! # Run with environment variables
//! RELAY_PORT=6060 RELAY_HOST=0.0.0.0 RELAY_POLICE__THRESHOLD=30 relay
//! ```

mod commands;
mod config;
mod handlers;
mod identity;
mod metrics;

use anyhow::{bail, Result};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Path given with `--config`, if any.
fn config_path() -> Result<Option<PathBuf>> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            let Some(path) = args.next() else {
                bail!("--config requires a path");
            };
            return Ok(Some(PathBuf::from(shellexpand::tilde(&path).as_ref())));
        }
    }
    Ok(None)
}

// Command handlers assume one logical thread: a join's nick check and its
// state update must not interleave with another join.
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relay=debug,tenvis_relay_core=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = match config_path()? {
        Some(path) => config::Config::layered(Some(&path))?,
        None => config::Config::load()?,
    };

    tracing::info!("Starting Relay server on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}
