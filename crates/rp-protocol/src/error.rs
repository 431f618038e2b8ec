//! Protocol error types

use thiserror::Error;

/// Errors that can occur while framing or parsing protocol lines
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Outbound line contains an embedded newline
    #[error("Outbound line contains an embedded newline")]
    EmbeddedNewline,

    /// Inbound line is not valid UTF-8
    #[error("Invalid UTF-8 in line")]
    InvalidUtf8,

    /// Empty command line
    #[error("Empty command line")]
    EmptyLine,

    /// Unknown command keyword
    #[error("Unknown command keyword: {0}")]
    UnknownKeyword(String),

    /// Command received an argument it does not take
    #[error("Command {0} takes no argument")]
    UnexpectedArgument(&'static str),

    /// Command is missing a required argument
    #[error("Command {0} is missing an argument")]
    MissingArgument(&'static str),

    /// Broadcast target is neither "all" nor a client id
    #[error("Invalid broadcast target: {0}")]
    InvalidTarget(String),

    /// Client id is not a non-negative integer
    #[error("Invalid client id: {0}")]
    InvalidClientId(String),

    /// Server reply line does not match any known form
    #[error("Malformed reply line: {0}")]
    MalformedReply(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
