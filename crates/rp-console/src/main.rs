//! Rallypoint operator console
//!
//! Drives the operator protocol against a running rendezvous server:
//! enumerate sessions, relay commands to one agent or the whole fleet,
//! and inspect a session's heartbeat state.

mod client;
mod output;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rp_protocol::{Command as WireCommand, Reply, Target};

use crate::client::ConsoleClient;

#[derive(Parser)]
#[command(name = "rp-console")]
#[command(about = "Rallypoint operator console")]
#[command(version)]
struct Cli {
    /// Server address
    #[arg(short, long, default_value = "127.0.0.1:9000")]
    server: String,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List connected sessions
    List,
    /// Send a command to one session or to all of them
    Command {
        /// Target session id, or "all"
        target: Target,
        /// Command text to relay
        #[arg(required = true, trailing_var_arg = true)]
        text: Vec<String>,
    },
    /// Show one session's state and last heartbeat
    Status {
        /// Target session id
        id: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| cli.log_level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut client = ConsoleClient::connect(&cli.server).await?;
    tracing::debug!("Connected as session {}", client.session_id);

    match cli.command {
        Commands::List => match client.request(WireCommand::List).await? {
            Reply::Sessions(entries) => println!("{}", output::format_sessions(&entries)),
            other => bail!("Unexpected reply to LIST: {}", other),
        },

        Commands::Command { target, text } => {
            let relay = WireCommand::Relay {
                target,
                command: text.join(" "),
            };
            match client.request(relay).await? {
                Reply::Dispatched { delivered, failed } => {
                    println!("{}", output::format_dispatched(delivered, failed));
                }
                Reply::Error(code) => bail!("Server error: {}", code),
                other => bail!("Unexpected reply to COMMAND: {}", other),
            }
        }

        Commands::Status { id } => match client.request(WireCommand::Status { id: id.into() }).await? {
            Reply::Session(entry) => println!("{}", output::format_status(&entry)),
            Reply::Error(code) => bail!("Server error: {}", code),
            other => bail!("Unexpected reply to STATUS: {}", other),
        },
    }

    client.close().await
}
