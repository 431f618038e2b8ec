//! rp-agent: Rallypoint agent daemon
//!
//! Connects to the rendezvous server, completes the identity handshake,
//! authenticates with the issued token, heartbeats on an interval, and
//! answers relayed commands. Reconnects with exponential backoff when the
//! link drops.

pub mod backoff;
pub mod client;
pub mod identity;

pub use backoff::ExponentialBackoff;
pub use client::{AgentClient, AgentError};
