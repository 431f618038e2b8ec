//! Inbound command parsing
//!
//! Dispatch is keyword-based: the first whitespace-delimited token selects
//! the command, case-insensitively; the remainder is the argument payload.
//! The tokenizer validates keyword and arity up front so malformed input is
//! a [`ProtocolError`], never a panic in a handler.

use std::fmt;
use std::str::FromStr;

use crate::client_id::ClientId;
use crate::error::ProtocolError;

/// Target selector for an operator relay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Every authenticated session
    All,
    /// A single session by id
    One(ClientId),
}

impl FromStr for Target {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("all") {
            return Ok(Target::All);
        }
        s.parse::<ClientId>()
            .map(Target::One)
            .map_err(|_| ProtocolError::InvalidTarget(s.to_string()))
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::All => write!(f, "all"),
            Target::One(id) => write!(f, "{}", id),
        }
    }
}

/// A parsed inbound line: agent commands and operator commands alike
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `AUTH <token>`: echo the issued token to authenticate
    Auth { token: String },
    /// `HEARTBEAT`: liveness signal, no reply expected
    Heartbeat,
    /// `PING`: answered with `PONG`
    Ping,
    /// `CMD <text>`: answered with `EXECUTED: <text>`
    Cmd { line: String },
    /// `EXIT`: answered with `GOODBYE`, then the server closes
    Exit,
    /// `LIST`: operator command, enumerate live sessions
    List,
    /// `COMMAND <id|all> <text>`: operator command, relay `CMD <text>` to targets
    Relay { target: Target, command: String },
    /// `STATUS <id>`: operator command, report one session's state
    Status { id: ClientId },
}

impl Command {
    /// Parse one protocol line
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let trimmed = line.trim();
        let mut parts = trimmed.splitn(2, char::is_whitespace);
        let keyword = match parts.next() {
            Some(k) if !k.is_empty() => k,
            _ => return Err(ProtocolError::EmptyLine),
        };
        let rest = parts.next().map(str::trim).unwrap_or("");

        match keyword.to_ascii_uppercase().as_str() {
            // An absent token is an empty token; it fails the comparison
            // rather than the parse, matching AUTH_FAIL-and-retry semantics
            "AUTH" => Ok(Command::Auth {
                token: rest.to_string(),
            }),
            "HEARTBEAT" => bare("HEARTBEAT", rest, Command::Heartbeat),
            "PING" => bare("PING", rest, Command::Ping),
            "CMD" => Ok(Command::Cmd {
                line: rest.to_string(),
            }),
            "EXIT" => bare("EXIT", rest, Command::Exit),
            "LIST" => bare("LIST", rest, Command::List),
            "COMMAND" => {
                let mut args = rest.splitn(2, char::is_whitespace);
                let target = match args.next() {
                    Some(t) if !t.is_empty() => t.parse::<Target>()?,
                    _ => return Err(ProtocolError::MissingArgument("COMMAND")),
                };
                let command = args.next().map(str::trim).unwrap_or("");
                if command.is_empty() {
                    return Err(ProtocolError::MissingArgument("COMMAND"));
                }
                Ok(Command::Relay {
                    target,
                    command: command.to_string(),
                })
            }
            "STATUS" => {
                if rest.is_empty() {
                    return Err(ProtocolError::MissingArgument("STATUS"));
                }
                let id = rest
                    .parse::<ClientId>()
                    .map_err(|_| ProtocolError::InvalidClientId(rest.to_string()))?;
                Ok(Command::Status { id })
            }
            other => Err(ProtocolError::UnknownKeyword(other.to_string())),
        }
    }
}

fn bare(keyword: &'static str, rest: &str, command: Command) -> Result<Command, ProtocolError> {
    if rest.is_empty() {
        Ok(command)
    } else {
        Err(ProtocolError::UnexpectedArgument(keyword))
    }
}

impl fmt::Display for Command {
    /// Wire encoding, used by the agent and console to send commands
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Auth { token } => write!(f, "AUTH {}", token),
            Command::Heartbeat => write!(f, "HEARTBEAT"),
            Command::Ping => write!(f, "PING"),
            Command::Cmd { line } => write!(f, "CMD {}", line),
            Command::Exit => write!(f, "EXIT"),
            Command::List => write!(f, "LIST"),
            Command::Relay { target, command } => write!(f, "COMMAND {} {}", target, command),
            Command::Status { id } => write!(f, "STATUS {}", id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_is_case_normalized() {
        assert_eq!(Command::parse("ping").unwrap(), Command::Ping);
        assert_eq!(Command::parse("Ping").unwrap(), Command::Ping);
        assert_eq!(Command::parse("PING").unwrap(), Command::Ping);
    }

    #[test]
    fn test_auth_token_passthrough() {
        assert_eq!(
            Command::parse("AUTH TOKEN-3").unwrap(),
            Command::Auth {
                token: "TOKEN-3".to_string()
            }
        );
        // Missing token parses to the empty token and fails comparison later
        assert_eq!(
            Command::parse("AUTH").unwrap(),
            Command::Auth {
                token: String::new()
            }
        );
    }

    #[test]
    fn test_cmd_payload_unparsed() {
        assert_eq!(
            Command::parse("CMD uname -a").unwrap(),
            Command::Cmd {
                line: "uname -a".to_string()
            }
        );
    }

    #[test]
    fn test_bare_keywords_reject_arguments() {
        assert!(matches!(
            Command::parse("PING now"),
            Err(ProtocolError::UnexpectedArgument("PING"))
        ));
        assert!(matches!(
            Command::parse("EXIT 0"),
            Err(ProtocolError::UnexpectedArgument("EXIT"))
        ));
        assert!(matches!(
            Command::parse("HEARTBEAT x"),
            Err(ProtocolError::UnexpectedArgument("HEARTBEAT"))
        ));
    }

    #[test]
    fn test_relay_targets() {
        assert_eq!(
            Command::parse("COMMAND all uptime").unwrap(),
            Command::Relay {
                target: Target::All,
                command: "uptime".to_string()
            }
        );
        assert_eq!(
            Command::parse("COMMAND 4 whoami").unwrap(),
            Command::Relay {
                target: Target::One(ClientId::new(4)),
                command: "whoami".to_string()
            }
        );
        assert!(matches!(
            Command::parse("COMMAND some whoami"),
            Err(ProtocolError::InvalidTarget(_))
        ));
        assert!(matches!(
            Command::parse("COMMAND 4"),
            Err(ProtocolError::MissingArgument("COMMAND"))
        ));
    }

    #[test]
    fn test_status_requires_numeric_id() {
        assert_eq!(
            Command::parse("STATUS 9").unwrap(),
            Command::Status {
                id: ClientId::new(9)
            }
        );
        assert!(matches!(
            Command::parse("STATUS"),
            Err(ProtocolError::MissingArgument("STATUS"))
        ));
        assert!(matches!(
            Command::parse("STATUS nine"),
            Err(ProtocolError::InvalidClientId(_))
        ));
    }

    #[test]
    fn test_unknown_and_empty_lines() {
        assert!(matches!(
            Command::parse("FROBNICATE"),
            Err(ProtocolError::UnknownKeyword(_))
        ));
        assert!(matches!(
            Command::parse("   "),
            Err(ProtocolError::EmptyLine)
        ));
    }

    #[test]
    fn test_display_roundtrip() {
        for line in [
            "AUTH TOKEN-1",
            "HEARTBEAT",
            "PING",
            "CMD uname -a",
            "EXIT",
            "LIST",
            "COMMAND all uptime",
            "COMMAND 3 whoami",
            "STATUS 3",
        ] {
            let command = Command::parse(line).unwrap();
            assert_eq!(command.to_string(), line);
        }
    }
}
