//! TCP listener
//!
//! Accepts inbound connections and spawns one worker per transport. The
//! heartbeat supervisor runs for as long as the listener does.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::connection::run_connection;
use crate::session::CloseReason;
use crate::state::ServerState;
use crate::supervisor::run_heartbeat_supervisor;

/// Rendezvous server: accept loop plus shutdown handling
pub struct RendezvousServer {
    /// Shared server state
    state: Arc<ServerState>,
    /// Cancellation token for graceful shutdown
    cancel: CancellationToken,
}

impl RendezvousServer {
    /// Create a new server
    pub fn new(state: Arc<ServerState>, cancel: CancellationToken) -> Self {
        Self { state, cancel }
    }

    /// Run until the shutdown token fires.
    pub async fn run(&self) -> Result<()> {
        let bind_address = &self.state.config.bind_address;
        let listener = TcpListener::bind(bind_address)
            .await
            .with_context(|| format!("Failed to bind to {}", bind_address))?;

        let local_addr = listener.local_addr()?;
        tracing::info!("Rendezvous server listening on {}", local_addr);

        tokio::spawn(run_heartbeat_supervisor(
            Arc::clone(&self.state),
            self.cancel.clone(),
        ));

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("Listener shutting down");
                    break;
                }

                result = listener.accept() => {
                    match result {
                        Ok((socket, peer_addr)) => {
                            let state = Arc::clone(&self.state);
                            tokio::spawn(run_connection(state, socket, peer_addr));
                        }
                        Err(e) => {
                            tracing::error!("Failed to accept connection: {}", e);
                        }
                    }
                }
            }
        }

        self.shutdown();
        Ok(())
    }

    /// Stop-accepting cleanup: sever in-flight sessions unless draining,
    /// and flush the identity counter.
    fn shutdown(&self) {
        if !self.state.config.drain_on_shutdown {
            for session in self.state.registry.snapshot() {
                if session.try_close(CloseReason::Shutdown) {
                    self.state.registry.unregister(session.id);
                    // Unblocks the worker's pending receive; the worker
                    // closes the transport
                    session.cancel.cancel();
                }
            }
        }

        if let Err(e) = self.state.allocator.persist() {
            tracing::warn!("Failed to flush identity counter: {}", e);
        }
    }
}
