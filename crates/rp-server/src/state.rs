//! Shared server state
//!
//! One `ServerState` is built at startup and passed explicitly to the
//! listener, every connection worker and the supervisor; there is no
//! ambient global registry or counter.

use std::sync::Arc;

use rp_core::config::ServerConfig;

use crate::allocator::IdentityAllocator;
use crate::registry::SessionRegistry;

/// State shared by the listener and all connection workers
pub struct ServerState {
    /// Configuration
    pub config: ServerConfig,
    /// Live-session registry
    pub registry: Arc<SessionRegistry>,
    /// Identity allocator, seeded from the persisted counter
    pub allocator: Arc<IdentityAllocator>,
}

impl ServerState {
    /// Create server state, loading the identity counter from disk
    pub fn new(config: ServerConfig) -> Self {
        let allocator = Arc::new(IdentityAllocator::load(config.counter_path.clone()));
        Self {
            config,
            registry: Arc::new(SessionRegistry::new()),
            allocator,
        }
    }
}
