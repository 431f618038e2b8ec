//! Session lifecycle states

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a session, from accept to teardown
///
/// Transitions only ever move forward: a session enters `Connected` when the
/// transport is accepted, moves to `Authenticating` once the handshake has
/// been sent, to `Authenticated` on a matching token, and through `Closing`
/// to `Closed` exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum SessionState {
    /// Transport accepted, handshake not yet sent
    Connected = 0,
    /// Handshake sent, waiting for the token echo
    Authenticating = 1,
    /// Token verified, full command set available
    Authenticated = 2,
    /// Teardown claimed, transport about to close
    Closing = 3,
    /// Transport closed
    Closed = 4,
}

impl SessionState {
    /// Convert to u8
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }

    /// Convert from u8
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Connected),
            1 => Some(Self::Authenticating),
            2 => Some(Self::Authenticated),
            3 => Some(Self::Closing),
            4 => Some(Self::Closed),
            _ => None,
        }
    }

    /// Uppercase form used on the wire in `SESSIONS`/`SESSION` replies
    pub fn wire_name(&self) -> &'static str {
        match self {
            SessionState::Connected => "CONNECTED",
            SessionState::Authenticating => "AUTHENTICATING",
            SessionState::Authenticated => "AUTHENTICATED",
            SessionState::Closing => "CLOSING",
            SessionState::Closed => "CLOSED",
        }
    }

    /// Parse the uppercase wire form
    pub fn from_wire_name(name: &str) -> Option<Self> {
        match name {
            "CONNECTED" => Some(Self::Connected),
            "AUTHENTICATING" => Some(Self::Authenticating),
            "AUTHENTICATED" => Some(Self::Authenticated),
            "CLOSING" => Some(Self::Closing),
            "CLOSED" => Some(Self::Closed),
            _ => None,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.wire_name().to_ascii_lowercase())
    }
}
