//! rp-protocol: Wire protocol for the Rallypoint rendezvous server
//!
//! This crate defines the line-oriented text protocol spoken between remote
//! agents, the operator console and the rendezvous server: the newline
//! framing codec, the command tokenizer for inbound lines, and the typed
//! reply lines the server emits.

pub mod client_id;
pub mod codec;
pub mod command;
pub mod error;
pub mod reply;
pub mod state;

pub use client_id::ClientId;
pub use codec::{LineCodec, MAX_LINE_LEN};
pub use command::{Command, Target};
pub use error::ProtocolError;
pub use reply::{Reply, SessionEntry, ERR_UNKNOWN_COMMAND, ERR_UNKNOWN_SESSION};
pub use state::SessionState;
