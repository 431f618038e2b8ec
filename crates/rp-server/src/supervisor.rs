//! Stale-session eviction
//!
//! A background task sweeps the registry on an interval and tears down
//! sessions whose heartbeats have gone stale. The sweep also catches
//! sessions blocked in a receive with no traffic at all: cancelling the
//! session token unblocks the worker, which then closes the transport.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use rp_protocol::SessionState;

use crate::session::CloseReason;
use crate::state::ServerState;

/// Floor for the sweep cadence, so tiny test timeouts don't busy-loop
const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(50);

/// How often to sweep for a given heartbeat timeout
pub fn sweep_interval(timeout: Duration) -> Duration {
    (timeout / 4).max(MIN_SWEEP_INTERVAL)
}

/// Run the heartbeat supervisor until cancelled.
pub async fn run_heartbeat_supervisor(state: Arc<ServerState>, cancel: CancellationToken) {
    let timeout = state.config.heartbeat_timeout;
    let mut interval = tokio::time::interval(sweep_interval(timeout));

    tracing::info!(
        "Starting heartbeat supervisor (timeout: {:?}, sweep interval: {:?})",
        timeout,
        sweep_interval(timeout)
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {
                evict_stale(&state, timeout);
            }
            _ = cancel.cancelled() => {
                tracing::info!("Heartbeat supervisor shutting down");
                break;
            }
        }
    }
}

/// Evict every session whose idle time exceeds the timeout.
///
/// Freshly accepted (`Connected`) sessions are exempt until their handshake
/// is underway; their heartbeat is seeded at creation anyway.
pub fn evict_stale(state: &ServerState, timeout: Duration) -> usize {
    let mut evicted = 0;

    for session in state.registry.snapshot() {
        if !matches!(
            session.state(),
            SessionState::Authenticating | SessionState::Authenticated
        ) {
            continue;
        }
        if session.idle() <= timeout {
            continue;
        }

        // try_close() ensures only one teardown path wins; if the owning
        // worker got there first this session is already on its way out
        if session.try_close(CloseReason::HeartbeatTimeout) {
            tracing::info!(
                "Evicting session {} ({}ms since last heartbeat)",
                session.id,
                session.idle().as_millis()
            );
            state.registry.unregister(session.id);
            // Unblock the worker's pending receive; only the worker
            // closes the transport
            session.cancel.cancel();
            evicted += 1;
        }
    }

    if evicted > 0 {
        tracing::info!("Evicted {} stale session(s)", evicted);
    }
    evicted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Session;
    use rp_core::config::ServerConfig;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    fn test_state(timeout: Duration) -> (ServerState, TempDir) {
        let dir = TempDir::new().unwrap();
        let mut config = ServerConfig::default();
        config.heartbeat_timeout = timeout;
        config.counter_path = dir.path().join("counter");
        (ServerState::new(config), dir)
    }

    fn register_session(state: &ServerState) -> Arc<Session> {
        let (tx, _rx) = mpsc::channel(4);
        let id = state.allocator.next();
        let session = Arc::new(Session::new(id, "127.0.0.1:9999".parse().unwrap(), tx));
        session.begin_authentication();
        state.registry.register(Arc::clone(&session));
        session
    }

    #[test]
    fn test_sweep_interval_scales_with_timeout() {
        assert_eq!(sweep_interval(Duration::from_secs(60)), Duration::from_secs(15));
        assert_eq!(sweep_interval(Duration::from_secs(4)), Duration::from_secs(1));
    }

    #[test]
    fn test_sweep_interval_is_clamped() {
        assert_eq!(
            sweep_interval(Duration::from_millis(100)),
            MIN_SWEEP_INTERVAL
        );
    }

    #[test]
    fn test_stale_session_is_evicted() {
        let (state, _dir) = test_state(Duration::from_secs(60));
        let stale = register_session(&state);
        let fresh = register_session(&state);
        stale.rewind_heartbeat(Duration::from_secs(120));

        assert_eq!(evict_stale(&state, state.config.heartbeat_timeout), 1);

        assert!(state.registry.get(stale.id).is_none());
        assert_eq!(stale.state(), SessionState::Closing);
        assert_eq!(stale.close_reason(), Some(CloseReason::HeartbeatTimeout));
        assert!(stale.cancel.is_cancelled());

        // The unrelated session is untouched
        assert!(state.registry.get(fresh.id).is_some());
        assert_eq!(fresh.state(), SessionState::Authenticating);
        assert!(!fresh.cancel.is_cancelled());
    }

    #[test]
    fn test_fresh_sessions_are_not_evicted() {
        let (state, _dir) = test_state(Duration::from_secs(60));
        register_session(&state);
        register_session(&state);

        assert_eq!(evict_stale(&state, state.config.heartbeat_timeout), 0);
        assert_eq!(state.registry.len(), 2);
    }

    #[test]
    fn test_connected_sessions_are_exempt() {
        let (state, _dir) = test_state(Duration::from_secs(60));
        let (tx, _rx) = mpsc::channel(4);
        let id = state.allocator.next();
        // Still Connected: handshake not yet sent
        let session = Arc::new(Session::new(id, "127.0.0.1:9999".parse().unwrap(), tx));
        session.rewind_heartbeat(Duration::from_secs(600));
        state.registry.register(Arc::clone(&session));

        assert_eq!(evict_stale(&state, state.config.heartbeat_timeout), 0);
        assert!(state.registry.get(session.id).is_some());
    }

    #[test]
    fn test_eviction_does_not_race_worker_teardown() {
        let (state, _dir) = test_state(Duration::from_secs(60));
        let session = register_session(&state);
        session.rewind_heartbeat(Duration::from_secs(120));

        // Worker already claimed teardown
        assert!(session.try_close(CloseReason::Transport));

        assert_eq!(evict_stale(&state, state.config.heartbeat_timeout), 0);
        assert_eq!(session.close_reason(), Some(CloseReason::Transport));
    }
}
