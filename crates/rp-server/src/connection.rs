//! Per-connection worker
//!
//! One task owns each accepted transport end to end: it sends the handshake,
//! loops over inbound lines, drains relayed pushes from the session outbox,
//! and tears the session down exactly once when the exchange ends: on
//! `EXIT`, on transport failure, or when the supervisor cancels it.

use std::net::SocketAddr;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;

use rp_protocol::{LineCodec, Reply};

use crate::engine::ProtocolEngine;
use crate::session::{CloseReason, Session};
use crate::state::ServerState;

/// Pending relayed lines per session before deliveries start failing
const OUTBOX_CAPACITY: usize = 64;

/// Run one connection to completion.
pub async fn run_connection(state: Arc<ServerState>, stream: TcpStream, peer_addr: SocketAddr) {
    let id = state.allocator.next();
    let (outbox_tx, outbox_rx) = mpsc::channel(OUTBOX_CAPACITY);
    let session = Arc::new(Session::new(id, peer_addr, outbox_tx));
    state.registry.register(Arc::clone(&session));

    tracing::info!("New connection from {} as session {}", peer_addr, id);

    let mut framed = Framed::new(stream, LineCodec::new());
    let engine = ProtocolEngine::new(Arc::clone(&state), Arc::clone(&session));

    let reason = drive(&engine, &session, &mut framed, outbox_rx).await;

    // Whichever path ended the exchange, teardown happens once: claim the
    // close (a no-op if the supervisor or shutdown already did), close the
    // transport, drop out of the registry.
    session.try_close(reason);
    let _ = framed.close().await;
    session.mark_closed();
    state.registry.unregister(session.id);

    let recorded = session.close_reason().unwrap_or(reason);
    tracing::info!("Session {} closed ({})", session.id, recorded);
}

async fn drive(
    engine: &ProtocolEngine,
    session: &Arc<Session>,
    framed: &mut Framed<TcpStream, LineCodec>,
    mut outbox_rx: mpsc::Receiver<Reply>,
) -> CloseReason {
    for reply in engine.handshake() {
        if let Err(e) = framed.send(reply.to_string()).await {
            tracing::warn!("Handshake send to session {} failed: {}", session.id, e);
            return CloseReason::Transport;
        }
    }

    loop {
        tokio::select! {
            _ = session.cancel.cancelled() => {
                // The supervisor or shutdown claimed this session; its
                // recorded reason wins
                return session.close_reason().unwrap_or(CloseReason::Shutdown);
            }

            pushed = outbox_rx.recv() => {
                let Some(reply) = pushed else {
                    return CloseReason::Transport;
                };
                if let Err(e) = framed.send(reply.to_string()).await {
                    tracing::warn!("Push to session {} failed: {}", session.id, e);
                    return CloseReason::Transport;
                }
            }

            inbound = framed.next() => {
                match inbound {
                    None => return CloseReason::Transport, // end of stream
                    Some(Err(e)) => {
                        tracing::warn!("Receive from session {} failed: {}", session.id, e);
                        return CloseReason::Transport;
                    }
                    Some(Ok(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }

                        // Any inbound traffic counts as liveness
                        session.record_heartbeat();

                        let dispatch = engine.dispatch(&line);
                        for reply in dispatch.replies {
                            if let Err(e) = framed.send(reply.to_string()).await {
                                tracing::warn!(
                                    "Reply to session {} failed: {}",
                                    session.id,
                                    e
                                );
                                return CloseReason::Transport;
                            }
                        }
                        if let Some(reason) = dispatch.close {
                            return reason;
                        }
                    }
                }
            }
        }
    }
}
