//! rp-core: Shared configuration and persistence plumbing for Rallypoint
//!
//! Holds what both daemons and the console need: configuration loading,
//! the persisted identity-counter file, and time helpers.

pub mod config;
pub mod counter;
pub mod error;
pub mod time;

pub use config::{AgentConfig, BackoffConfig, ServerConfig};
pub use error::ConfigError;
