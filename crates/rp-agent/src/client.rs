//! Agent-side protocol client
//!
//! Drives one connection at a time through handshake, auth and the command
//! loop; the reconnect policy wraps around it in [`AgentClient::run`].

use std::time::Duration;

use anyhow::Result;
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::MissedTickBehavior;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use rp_core::config::AgentConfig;
use rp_core::time;
use rp_protocol::{ClientId, Command, LineCodec, ProtocolError, Reply};

use crate::backoff::ExponentialBackoff;
use crate::identity::{self, AgentIdentity};

/// Errors ending one connection attempt
#[derive(Error, Debug)]
pub enum AgentError {
    /// Server closed the stream before the handshake completed
    #[error("Connection closed during handshake")]
    HandshakeEof,

    /// Handshake finished without one of its two lines
    #[error("Server never sent {0} during handshake")]
    HandshakeIncomplete(&'static str),

    /// Server rejected the token it issued itself
    #[error("Server rejected the issued token")]
    AuthRejected,

    /// Protocol error on the wire
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// How a connected exchange ended
enum SessionEnd {
    /// Server closed the stream
    ServerClosed,
    /// Clean goodbye after our `EXIT`
    Goodbye,
}

type AgentStream = Framed<TcpStream, LineCodec>;

/// The agent daemon's connection driver
pub struct AgentClient {
    config: AgentConfig,
}

impl AgentClient {
    /// Create a client for the given configuration
    pub fn new(config: AgentConfig) -> Self {
        Self { config }
    }

    /// Run until cancelled, reconnecting with backoff after failures.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let mut backoff = ExponentialBackoff::from_config(&self.config.backoff);

        loop {
            if cancel.is_cancelled() {
                break;
            }

            match self.connect_once(&cancel).await {
                Ok(SessionEnd::Goodbye) => {
                    tracing::info!("Disconnected cleanly");
                    break;
                }
                Ok(SessionEnd::ServerClosed) => {
                    tracing::warn!("Server closed the connection");
                    // The link worked; retry promptly
                    backoff.reset();
                }
                Err(e) => {
                    tracing::warn!("Connection attempt failed: {}", e);
                }
            }

            if cancel.is_cancelled() {
                break;
            }

            let delay = backoff.next_delay();
            tracing::info!("Reconnecting in {:?}", delay);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => break,
            }
        }

        Ok(())
    }

    async fn connect_once(&self, cancel: &CancellationToken) -> Result<SessionEnd, AgentError> {
        let stream = TcpStream::connect(&self.config.server_address).await?;
        tracing::info!("Connected to {}", self.config.server_address);

        let mut framed = Framed::new(stream, LineCodec::new());

        let (client_id, token) = read_handshake(&mut framed).await?;
        tracing::info!("Assigned client id {}", client_id);
        self.remember_identity(client_id);

        framed.send(Command::Auth { token }.to_string()).await?;

        let mut heartbeat = tokio::time::interval(self.config.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    return self.graceful_exit(&mut framed).await;
                }

                _ = heartbeat.tick() => {
                    framed.send(Command::Heartbeat.to_string()).await?;
                }

                inbound = framed.next() => {
                    match inbound {
                        None => return Ok(SessionEnd::ServerClosed),
                        Some(Err(e)) => return Err(e.into()),
                        Some(Ok(line)) => {
                            if line.trim().is_empty() {
                                continue;
                            }
                            if let Some(end) = self.handle_line(&mut framed, &line).await? {
                                return Ok(end);
                            }
                        }
                    }
                }
            }
        }
    }

    async fn handle_line(
        &self,
        framed: &mut AgentStream,
        line: &str,
    ) -> Result<Option<SessionEnd>, AgentError> {
        match Reply::parse(line) {
            Ok(Reply::AuthSuccess) => {
                tracing::info!("Authenticated");
                Ok(None)
            }
            Ok(Reply::AuthFail) => Err(AgentError::AuthRejected),
            Ok(Reply::Cmd(command)) => {
                // Execution stays a stub; report completion the way the
                // operator expects to see it
                tracing::info!("Received command: {}", command);
                framed
                    .send(format!(
                        "RESULT: Command '{}' executed successfully",
                        command
                    ))
                    .await?;
                Ok(None)
            }
            Ok(Reply::Goodbye) => Ok(Some(SessionEnd::Goodbye)),
            Ok(other) => {
                // Includes the ERROR the server answers our RESULT lines with
                tracing::debug!("Ignoring server line: {:?}", other);
                Ok(None)
            }
            Err(e) => {
                tracing::debug!("Unparseable server line {:?}: {}", line, e);
                Ok(None)
            }
        }
    }

    /// Announce `EXIT` and wait briefly for the goodbye.
    async fn graceful_exit(&self, framed: &mut AgentStream) -> Result<SessionEnd, AgentError> {
        tracing::info!("Shutting down, sending EXIT");
        if framed.send(Command::Exit.to_string()).await.is_err() {
            return Ok(SessionEnd::ServerClosed);
        }

        let deadline = tokio::time::timeout(Duration::from_secs(2), async {
            while let Some(Ok(line)) = framed.next().await {
                if matches!(Reply::parse(&line), Ok(Reply::Goodbye)) {
                    return true;
                }
            }
            false
        });

        match deadline.await {
            Ok(true) => Ok(SessionEnd::Goodbye),
            _ => Ok(SessionEnd::ServerClosed),
        }
    }

    fn remember_identity(&self, id: ClientId) {
        let path = &self.config.identity_path;
        let record = AgentIdentity {
            client_id: id.as_u64(),
            first_seen: time::current_time_secs(),
        };

        match identity::load_identity(path) {
            Ok(Some(existing)) if existing.client_id == id.as_u64() => {}
            Ok(Some(existing)) => {
                tracing::info!(
                    "Identity changed: previously client id {}, now {}",
                    existing.client_id,
                    id
                );
                if let Err(e) = identity::save_identity(path, &record) {
                    tracing::warn!("Failed to persist identity: {}", e);
                }
            }
            Ok(None) => {
                if let Err(e) = identity::save_identity(path, &record) {
                    tracing::warn!("Failed to persist identity: {}", e);
                }
            }
            Err(e) => {
                tracing::warn!("Failed to read identity file {:?}: {}", path, e);
            }
        }
    }
}

async fn read_handshake(framed: &mut AgentStream) -> Result<(ClientId, String), AgentError> {
    let mut client_id = None;
    let mut token = None;

    // The two handshake lines may arrive in either order or share a receive
    for _ in 0..4 {
        if client_id.is_some() && token.is_some() {
            break;
        }
        match framed.next().await {
            None => return Err(AgentError::HandshakeEof),
            Some(Err(e)) => return Err(e.into()),
            Some(Ok(line)) => match Reply::parse(&line) {
                Ok(Reply::ClientId(id)) => client_id = Some(id),
                Ok(Reply::AuthToken(t)) => token = Some(t),
                _ => tracing::debug!("Unexpected handshake line: {:?}", line),
            },
        }
    }

    let client_id = client_id.ok_or(AgentError::HandshakeIncomplete("CLIENT_ID"))?;
    let token = token.ok_or(AgentError::HandshakeIncomplete("AUTH_TOKEN"))?;
    Ok((client_id, token))
}
