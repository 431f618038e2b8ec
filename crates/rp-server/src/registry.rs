//! Live-session registry
//!
//! The single point of truth for which sessions are visible to lookup and
//! broadcast: a session appears here exactly while its transport is open
//! and it has not reached `Closed`. Map operations are in-and-out; nothing
//! blocks while holding a shard, and anything that sends to sessions works
//! against an owned snapshot taken first.

use dashmap::DashMap;
use std::sync::Arc;

use rp_protocol::{ClientId, SessionState, Target};

use crate::session::Session;

/// Concurrent map of live sessions, keyed by identity
pub struct SessionRegistry {
    sessions: DashMap<ClientId, Arc<Session>>,
}

impl SessionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Make a session visible to lookup and broadcast
    pub fn register(&self, session: Arc<Session>) {
        self.sessions.insert(session.id, session);
    }

    /// Remove a session; safe to call from both teardown paths
    pub fn unregister(&self, id: ClientId) -> Option<Arc<Session>> {
        self.sessions.remove(&id).map(|(_, session)| session)
    }

    /// Get a session by id
    pub fn get(&self, id: ClientId) -> Option<Arc<Session>> {
        self.sessions.get(&id).map(|r| Arc::clone(&r))
    }

    /// Id-ordered copy of the live set. Never a live view: callers iterate
    /// and send outside the registry's exclusion.
    pub fn snapshot(&self) -> Vec<Arc<Session>> {
        let mut sessions: Vec<_> = self.sessions.iter().map(|r| Arc::clone(&r)).collect();
        sessions.sort_by_key(|s| s.id);
        sessions
    }

    /// Sessions a relay should be delivered to: every authenticated session
    /// for `all`, or the one named session regardless of its state.
    pub fn broadcast_targets(&self, target: Target) -> Vec<Arc<Session>> {
        match target {
            Target::All => self
                .snapshot()
                .into_iter()
                .filter(|s| s.state() == SessionState::Authenticated)
                .collect(),
            Target::One(id) => self.get(id).into_iter().collect(),
        }
    }

    /// Number of live sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
