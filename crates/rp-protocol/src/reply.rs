//! Server reply lines
//!
//! Every line the server emits is a [`Reply`]. `Display` produces the exact
//! wire form; [`Reply::parse`] inverts it on the agent and console side.

use std::fmt;

use crate::client_id::ClientId;
use crate::error::ProtocolError;
use crate::state::SessionState;

/// Error code for an unrecognized or out-of-state command
pub const ERR_UNKNOWN_COMMAND: &str = "UNKNOWN_COMMAND";

/// Error code for a `STATUS`/`COMMAND` referencing a session not in the registry
pub const ERR_UNKNOWN_SESSION: &str = "UNKNOWN_SESSION";

/// One session's line in a `SESSIONS`/`SESSION` reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionEntry {
    /// Session identity
    pub id: ClientId,
    /// Lifecycle state at snapshot time
    pub state: SessionState,
    /// Seconds since the last observed heartbeat
    pub idle_secs: u64,
}

impl fmt::Display for SessionEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.id, self.state.wire_name(), self.idle_secs)
    }
}

impl SessionEntry {
    fn parse(s: &str) -> Result<Self, ProtocolError> {
        let malformed = || ProtocolError::MalformedReply(s.to_string());
        let mut fields = s.split(':');
        let id = fields
            .next()
            .and_then(|f| f.parse::<ClientId>().ok())
            .ok_or_else(malformed)?;
        let state = fields
            .next()
            .and_then(SessionState::from_wire_name)
            .ok_or_else(malformed)?;
        let idle_secs = fields
            .next()
            .and_then(|f| f.parse::<u64>().ok())
            .ok_or_else(malformed)?;
        if fields.next().is_some() {
            return Err(malformed());
        }
        Ok(Self {
            id,
            state,
            idle_secs,
        })
    }
}

/// A server-to-client protocol line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// `CLIENT_ID <id>`: first handshake line
    ClientId(ClientId),
    /// `AUTH_TOKEN <token>`: second handshake line
    AuthToken(String),
    /// `AUTH_SUCCESS`
    AuthSuccess,
    /// `AUTH_FAIL`
    AuthFail,
    /// `PONG`
    Pong,
    /// `EXECUTED: <text>`
    Executed(String),
    /// `GOODBYE`: sent before the server closes the transport
    Goodbye,
    /// `CMD <text>`: an operator-relayed command pushed to this session
    Cmd(String),
    /// `SESSIONS <n> <id>:<STATE>:<idle> ...`
    Sessions(Vec<SessionEntry>),
    /// `SESSION <id> <STATE> <idle>`
    Session(SessionEntry),
    /// `DISPATCHED <delivered> <failed>`
    Dispatched { delivered: usize, failed: usize },
    /// `ERROR: <code>`
    Error(String),
}

impl Reply {
    /// The fixed unknown-command error line
    pub fn unknown_command() -> Self {
        Reply::Error(ERR_UNKNOWN_COMMAND.to_string())
    }

    /// The fixed unknown-session error line
    pub fn unknown_session() -> Self {
        Reply::Error(ERR_UNKNOWN_SESSION.to_string())
    }

    /// Parse one server line
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let trimmed = line.trim();
        let malformed = || ProtocolError::MalformedReply(trimmed.to_string());

        if let Some(text) = trimmed.strip_prefix("EXECUTED:") {
            return Ok(Reply::Executed(text.trim_start().to_string()));
        }
        if let Some(code) = trimmed.strip_prefix("ERROR:") {
            return Ok(Reply::Error(code.trim().to_string()));
        }

        let mut parts = trimmed.splitn(2, char::is_whitespace);
        let keyword = parts.next().unwrap_or("");
        let rest = parts.next().map(str::trim).unwrap_or("");

        match keyword {
            "CLIENT_ID" => rest
                .parse::<ClientId>()
                .map(Reply::ClientId)
                .map_err(|_| malformed()),
            "AUTH_TOKEN" if !rest.is_empty() => Ok(Reply::AuthToken(rest.to_string())),
            "AUTH_SUCCESS" if rest.is_empty() => Ok(Reply::AuthSuccess),
            "AUTH_FAIL" if rest.is_empty() => Ok(Reply::AuthFail),
            "PONG" if rest.is_empty() => Ok(Reply::Pong),
            "GOODBYE" if rest.is_empty() => Ok(Reply::Goodbye),
            "CMD" => Ok(Reply::Cmd(rest.to_string())),
            "SESSIONS" => {
                let mut fields = rest.split_whitespace();
                let count = fields
                    .next()
                    .and_then(|f| f.parse::<usize>().ok())
                    .ok_or_else(malformed)?;
                let entries = fields
                    .map(SessionEntry::parse)
                    .collect::<Result<Vec<_>, _>>()?;
                if entries.len() != count {
                    return Err(malformed());
                }
                Ok(Reply::Sessions(entries))
            }
            "SESSION" => {
                let mut fields = rest.split_whitespace();
                let id = fields
                    .next()
                    .and_then(|f| f.parse::<ClientId>().ok())
                    .ok_or_else(malformed)?;
                let state = fields
                    .next()
                    .and_then(SessionState::from_wire_name)
                    .ok_or_else(malformed)?;
                let idle_secs = fields
                    .next()
                    .and_then(|f| f.parse::<u64>().ok())
                    .ok_or_else(malformed)?;
                if fields.next().is_some() {
                    return Err(malformed());
                }
                Ok(Reply::Session(SessionEntry {
                    id,
                    state,
                    idle_secs,
                }))
            }
            "DISPATCHED" => {
                let mut fields = rest.split_whitespace();
                let delivered = fields
                    .next()
                    .and_then(|f| f.parse::<usize>().ok())
                    .ok_or_else(malformed)?;
                let failed = fields
                    .next()
                    .and_then(|f| f.parse::<usize>().ok())
                    .ok_or_else(malformed)?;
                if fields.next().is_some() {
                    return Err(malformed());
                }
                Ok(Reply::Dispatched { delivered, failed })
            }
            _ => Err(malformed()),
        }
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::ClientId(id) => write!(f, "CLIENT_ID {}", id),
            Reply::AuthToken(token) => write!(f, "AUTH_TOKEN {}", token),
            Reply::AuthSuccess => write!(f, "AUTH_SUCCESS"),
            Reply::AuthFail => write!(f, "AUTH_FAIL"),
            Reply::Pong => write!(f, "PONG"),
            Reply::Executed(text) => write!(f, "EXECUTED: {}", text),
            Reply::Goodbye => write!(f, "GOODBYE"),
            Reply::Cmd(text) => write!(f, "CMD {}", text),
            Reply::Sessions(entries) => {
                write!(f, "SESSIONS {}", entries.len())?;
                for entry in entries {
                    write!(f, " {}", entry)?;
                }
                Ok(())
            }
            Reply::Session(entry) => write!(
                f,
                "SESSION {} {} {}",
                entry.id,
                entry.state.wire_name(),
                entry.idle_secs
            ),
            Reply::Dispatched { delivered, failed } => {
                write!(f, "DISPATCHED {} {}", delivered, failed)
            }
            Reply::Error(code) => write!(f, "ERROR: {}", code),
        }
    }
}
