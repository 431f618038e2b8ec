//! Per-connection session state
//!
//! A `Session` is owned by the worker task driving its connection; the
//! registry and the heartbeat supervisor only ever hold `Arc` references.
//! Fields mutated by the owning worker alone are plain atomics; the one
//! transition shared with the supervisor (forcing a close) goes through the
//! `try_close` CAS so exactly one teardown path wins.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use rp_core::time;
use rp_protocol::{ClientId, Reply, SessionState};

/// Why a session was torn down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CloseReason {
    /// Client sent `EXIT` and was answered `GOODBYE`
    ClientExit = 1,
    /// Receive or send failed, or the peer closed the stream
    Transport = 2,
    /// Heartbeat staleness exceeded the configured timeout
    HeartbeatTimeout = 3,
    /// Server shutdown severed the session
    Shutdown = 4,
}

impl CloseReason {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::ClientExit),
            2 => Some(Self::Transport),
            3 => Some(Self::HeartbeatTimeout),
            4 => Some(Self::Shutdown),
            _ => None,
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::ClientExit => write!(f, "client exit"),
            CloseReason::Transport => write!(f, "transport error"),
            CloseReason::HeartbeatTimeout => write!(f, "heartbeat timeout"),
            CloseReason::Shutdown => write!(f, "server shutdown"),
        }
    }
}

/// Issue the authentication token for a session.
///
/// The token scheme is the documented `TOKEN-<id>` echo of the legacy
/// protocol; it is a known weak point of the system, preserved as specified
/// rather than silently replaced.
pub fn issue_token(id: ClientId) -> String {
    format!("TOKEN-{}", id)
}

/// Server-side state for one connected client, from accept to teardown
pub struct Session {
    /// Session identity, assigned once at accept time
    pub id: ClientId,
    /// Peer address, informational only
    pub remote_addr: SocketAddr,
    /// Token the client must echo to authenticate
    pub token: String,
    /// Cancelled by the supervisor or shutdown to unblock a pending receive
    pub cancel: CancellationToken,
    /// Lifecycle state, stored as `SessionState::as_u8`
    state: AtomicU8,
    /// Last observed liveness, milliseconds since the Unix epoch
    last_heartbeat: AtomicU64,
    /// Teardown reason recorded by the `try_close` winner (0 = none yet)
    close_reason: AtomicU8,
    /// Lines queued for this session's worker to send (operator relays)
    outbox: mpsc::Sender<Reply>,
}

impl Session {
    /// Create a new session in the `Connected` state.
    ///
    /// `last_heartbeat` is seeded at creation time so a slow-handshaking
    /// client is not an immediate timeout.
    pub fn new(id: ClientId, remote_addr: SocketAddr, outbox: mpsc::Sender<Reply>) -> Self {
        Self {
            id,
            remote_addr,
            token: issue_token(id),
            cancel: CancellationToken::new(),
            state: AtomicU8::new(SessionState::Connected.as_u8()),
            last_heartbeat: AtomicU64::new(time::current_time_millis()),
            close_reason: AtomicU8::new(0),
            outbox,
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire)).unwrap_or(SessionState::Closed)
    }

    /// Entry transition: handshake sent, waiting for the token echo
    pub fn begin_authentication(&self) {
        let _ = self.state.compare_exchange(
            SessionState::Connected.as_u8(),
            SessionState::Authenticating.as_u8(),
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Token verified. Returns false if the session was not authenticating
    /// (already authenticated, or claimed for teardown).
    pub fn mark_authenticated(&self) -> bool {
        self.state
            .compare_exchange(
                SessionState::Authenticating.as_u8(),
                SessionState::Authenticated.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Record liveness now. `fetch_max` keeps the timestamp non-decreasing
    /// even if clock reads race.
    pub fn record_heartbeat(&self) {
        self.last_heartbeat
            .fetch_max(time::current_time_millis(), Ordering::AcqRel);
    }

    /// Last observed liveness, milliseconds since the Unix epoch
    pub fn last_heartbeat_millis(&self) -> u64 {
        self.last_heartbeat.load(Ordering::Acquire)
    }

    /// Time since the last observed liveness
    pub fn idle(&self) -> Duration {
        time::elapsed_duration(self.last_heartbeat_millis())
    }

    /// Whole seconds since the last observed liveness
    pub fn idle_secs(&self) -> u64 {
        self.idle().as_secs()
    }

    /// Claim this session for teardown.
    ///
    /// Exactly one caller wins the transition to `Closing`; the winner's
    /// reason is recorded and everyone else gets `false`. This is the gate
    /// that keeps the worker, the supervisor and shutdown from double-closing.
    pub fn try_close(&self, reason: CloseReason) -> bool {
        loop {
            let current = self.state.load(Ordering::Acquire);
            if current == SessionState::Closing.as_u8()
                || current == SessionState::Closed.as_u8()
            {
                return false;
            }
            if self
                .state
                .compare_exchange(
                    current,
                    SessionState::Closing.as_u8(),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                self.close_reason.store(reason as u8, Ordering::Release);
                return true;
            }
        }
    }

    /// Transport closed; final state.
    pub fn mark_closed(&self) {
        self.state
            .store(SessionState::Closed.as_u8(), Ordering::Release);
    }

    /// The reason recorded by the `try_close` winner, if teardown has begun
    pub fn close_reason(&self) -> Option<CloseReason> {
        CloseReason::from_u8(self.close_reason.load(Ordering::Acquire))
    }

    /// Queue a line for this session's worker to send.
    ///
    /// Returns false when the worker is gone or its outbox is full; callers
    /// treat that as one failed delivery, never as a reason to stop sending
    /// to other sessions.
    pub fn push(&self, reply: Reply) -> bool {
        self.outbox.try_send(reply).is_ok()
    }

    #[cfg(test)]
    pub(crate) fn rewind_heartbeat(&self, by: Duration) {
        self.last_heartbeat
            .fetch_sub(by.as_millis() as u64, Ordering::AcqRel);
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("remote_addr", &self.remote_addr)
            .field("state", &self.state())
            .finish()
    }
}
