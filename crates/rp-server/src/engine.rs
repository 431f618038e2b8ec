//! Per-session protocol dispatch
//!
//! The engine validates each inbound command against the session's current
//! state and produces the replies plus, when the command ends the session,
//! the teardown reason. It is purely computational: all I/O stays with the
//! connection worker.

use std::sync::Arc;

use rp_protocol::{ClientId, Command, Reply, SessionEntry, SessionState, Target};

use crate::session::{CloseReason, Session};
use crate::state::ServerState;

/// Outcome of dispatching one inbound line
pub struct Dispatch {
    /// Replies to send, in order
    pub replies: Vec<Reply>,
    /// Set when the command ends the session (after the replies are sent)
    pub close: Option<CloseReason>,
}

impl Dispatch {
    fn none() -> Self {
        Self {
            replies: Vec::new(),
            close: None,
        }
    }

    fn reply(reply: Reply) -> Self {
        Self {
            replies: vec![reply],
            close: None,
        }
    }
}

/// State machine driving one session's protocol exchange
pub struct ProtocolEngine {
    state: Arc<ServerState>,
    session: Arc<Session>,
}

impl ProtocolEngine {
    /// Create an engine for one session
    pub fn new(state: Arc<ServerState>, session: Arc<Session>) -> Self {
        Self { state, session }
    }

    /// The two handshake lines sent on connect; moves the session from
    /// `Connected` into `Authenticating`.
    pub fn handshake(&self) -> [Reply; 2] {
        self.session.begin_authentication();
        [
            Reply::ClientId(self.session.id),
            Reply::AuthToken(self.session.token.clone()),
        ]
    }

    /// Parse and dispatch one inbound line.
    ///
    /// Malformed input is recovered locally: the session continues after an
    /// `ERROR: UNKNOWN_COMMAND` reply.
    pub fn dispatch(&self, line: &str) -> Dispatch {
        match Command::parse(line) {
            Ok(command) => self.handle(command),
            Err(e) => {
                tracing::debug!("Session {} sent malformed line: {}", self.session.id, e);
                Dispatch::reply(Reply::unknown_command())
            }
        }
    }

    fn handle(&self, command: Command) -> Dispatch {
        use SessionState::{Authenticated, Authenticating};

        let state = self.session.state();
        match command {
            Command::Heartbeat if matches!(state, Authenticating | Authenticated) => {
                // Liveness was already recorded on receive; no reply
                Dispatch::none()
            }

            Command::Auth { token } if matches!(state, Authenticating | Authenticated) => {
                self.handle_auth(&token)
            }

            Command::Ping if state == Authenticated => Dispatch::reply(Reply::Pong),

            Command::Cmd { line } if state == Authenticated => {
                // Execution belongs to the agent; the engine only echoes
                Dispatch::reply(Reply::Executed(line))
            }

            Command::Exit if state == Authenticated => Dispatch {
                replies: vec![Reply::Goodbye],
                close: Some(CloseReason::ClientExit),
            },

            Command::List if state == Authenticated => self.handle_list(),

            Command::Status { id } if state == Authenticated => self.handle_status(id),

            Command::Relay { target, command } if state == Authenticated => {
                self.handle_relay(target, &command)
            }

            // Recognized keyword, but no row for it in the current state
            _ => Dispatch::reply(Reply::unknown_command()),
        }
    }

    fn handle_auth(&self, token: &str) -> Dispatch {
        if token == self.session.token {
            if self.session.mark_authenticated() {
                tracing::info!(
                    "Session {} authenticated from {}",
                    self.session.id,
                    self.session.remote_addr
                );
            }
            Dispatch::reply(Reply::AuthSuccess)
        } else {
            // The client may retry; a wrong token never ends the session
            tracing::warn!(
                "Session {} failed authentication from {}",
                self.session.id,
                self.session.remote_addr
            );
            Dispatch::reply(Reply::AuthFail)
        }
    }

    fn handle_list(&self) -> Dispatch {
        let entries = self
            .state
            .registry
            .snapshot()
            .iter()
            .map(|s| entry_for(s))
            .collect();
        Dispatch::reply(Reply::Sessions(entries))
    }

    fn handle_status(&self, id: ClientId) -> Dispatch {
        match self.state.registry.get(id) {
            Some(session) => Dispatch::reply(Reply::Session(entry_for(&session))),
            None => Dispatch::reply(Reply::unknown_session()),
        }
    }

    fn handle_relay(&self, target: Target, command: &str) -> Dispatch {
        let targets = self.state.registry.broadcast_targets(target);
        if targets.is_empty() {
            if let Target::One(_) = target {
                return Dispatch::reply(Reply::unknown_session());
            }
        }

        // Sends go against the snapshot, outside the registry's exclusion;
        // one failed target never aborts delivery to the rest
        let mut delivered = 0;
        let mut failed = 0;
        for session in targets {
            if session.push(Reply::Cmd(command.to_string())) {
                delivered += 1;
            } else {
                tracing::warn!("Relay to session {} failed", session.id);
                failed += 1;
            }
        }

        tracing::info!(
            "Session {} relayed {:?} to {} session(s) ({} failed)",
            self.session.id,
            command,
            delivered,
            failed
        );
        Dispatch::reply(Reply::Dispatched { delivered, failed })
    }
}

fn entry_for(session: &Session) -> SessionEntry {
    SessionEntry {
        id: session.id,
        state: session.state(),
        idle_secs: session.idle_secs(),
    }
}
