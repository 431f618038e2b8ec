//! Persisted agent identity
//!
//! The server assigns a fresh identity per connection; the agent keeps the
//! last one on disk so operators can correlate a reconnecting machine with
//! its earlier sessions in the server logs.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;

/// The identity record stored on the agent machine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentIdentity {
    /// The most recently assigned client id
    pub client_id: u64,
    /// Unix seconds when this identity was first recorded
    pub first_seen: u64,
}

/// Read the identity record.
///
/// Returns `Ok(None)` if no record exists yet; a malformed record is an
/// `InvalidData` error.
pub fn load_identity(path: &Path) -> io::Result<Option<AgentIdentity>> {
    match fs::read_to_string(path) {
        Ok(contents) => {
            let identity = serde_json::from_str(&contents)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            Ok(Some(identity))
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Write the identity record, creating parent directories if needed.
pub fn save_identity(path: &Path, identity: &AgentIdentity) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let contents = serde_json::to_string_pretty(identity)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    fs::write(path, contents)
}
