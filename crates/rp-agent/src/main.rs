//! Rallypoint agent daemon
//!
//! Connects out to the rendezvous server, authenticates with the issued
//! token, and keeps the session alive with heartbeats until told to exit.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rp_agent::AgentClient;
use rp_core::config::{self, AgentConfig};

#[derive(Parser)]
#[command(name = "rp-agent")]
#[command(about = "Rallypoint agent - connects to the rendezvous server")]
#[command(version)]
struct Args {
    /// Server address to connect to (overrides config)
    #[arg(short, long)]
    server: Option<String>,

    /// Heartbeat interval in seconds (overrides config)
    #[arg(long)]
    heartbeat_interval: Option<u64>,

    /// Path to the persisted identity record (overrides config)
    #[arg(long)]
    identity_path: Option<PathBuf>,

    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run in foreground with verbose output
    #[arg(short, long)]
    foreground: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.foreground { "debug" } else { &args.log_level };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Rallypoint agent starting...");

    // Load configuration
    let mut config = if let Some(config_path) = &args.config {
        config::load_config(config_path)
            .with_context(|| format!("Failed to load config from {:?}", config_path))?
    } else {
        AgentConfig::default()
    };

    // Apply command-line overrides
    if let Some(server) = args.server {
        config.server_address = server;
    }
    if let Some(secs) = args.heartbeat_interval {
        config.heartbeat_interval = Duration::from_secs(secs);
    }
    if let Some(path) = args.identity_path {
        config.identity_path = path;
    }

    // Create cancellation token for graceful shutdown
    let cancel = CancellationToken::new();

    // Setup signal handlers
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install signal handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received Ctrl+C, disconnecting...");
            }
            _ = terminate => {
                tracing::info!("Received SIGTERM, disconnecting...");
            }
        }

        cancel_clone.cancel();
    });

    let client = AgentClient::new(config);
    client.run(cancel).await?;

    tracing::info!("Agent shutdown complete");
    Ok(())
}
