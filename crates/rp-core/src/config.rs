//! Configuration for the Rallypoint daemons
//!
//! Both daemons read an optional TOML file; every field has a default so a
//! bare deployment runs with no file at all. Command-line flags override
//! file values in the binaries.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

/// Get the default configuration/state directory
pub fn default_state_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("rallypoint")
}

/// Get the default server configuration file path
pub fn default_config_path() -> PathBuf {
    default_state_dir().join("config.toml")
}

/// Load configuration from a file
pub fn load_config<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Invalid(format!("Failed to read config: {}", e)))?;

    let config: T = toml::from_str(&content)?;
    Ok(config)
}

/// Save configuration to a file
pub fn save_config<T: serde::Serialize>(path: &Path, config: &T) -> Result<(), ConfigError> {
    let content = toml::to_string_pretty(config)?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| ConfigError::Invalid(format!("Failed to create config dir: {}", e)))?;
    }

    std::fs::write(path, content)
        .map_err(|e| ConfigError::Invalid(format!("Failed to write config: {}", e)))?;

    Ok(())
}

/// Configuration for the rendezvous server daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind the TCP listener to
    pub bind_address: String,

    /// How long a session may go without inbound traffic before eviction
    #[serde(with = "duration_secs")]
    pub heartbeat_timeout: Duration,

    /// Path to the persisted identity-counter file
    pub counter_path: PathBuf,

    /// Let in-flight sessions drain on shutdown instead of severing them
    pub drain_on_shutdown: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:9000".to_string(),
            heartbeat_timeout: Duration::from_secs(60),
            counter_path: default_state_dir().join("client_counter"),
            drain_on_shutdown: true,
        }
    }
}

/// Configuration for the agent daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Rendezvous server to connect to
    pub server_address: String,

    /// Interval between heartbeats
    #[serde(with = "duration_secs")]
    pub heartbeat_interval: Duration,

    /// Path to the persisted identity record
    pub identity_path: PathBuf,

    /// Backoff configuration for reconnections
    pub backoff: BackoffConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            server_address: "127.0.0.1:9000".to_string(),
            heartbeat_interval: Duration::from_secs(30),
            identity_path: default_state_dir().join("agent_identity.json"),
            backoff: BackoffConfig::default(),
        }
    }
}

/// Exponential backoff configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Initial delay
    #[serde(with = "duration_secs")]
    pub initial: Duration,

    /// Maximum delay
    #[serde(with = "duration_secs")]
    pub max: Duration,

    /// Multiplier for each retry
    pub multiplier: f64,

    /// Jitter factor (0.0 to 1.0)
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: 0.25,
        }
    }
}

// Helper module for Duration serialization as integer seconds
mod duration_secs {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_address, "0.0.0.0:9000");
        assert_eq!(config.heartbeat_timeout, Duration::from_secs(60));
        assert!(config.drain_on_shutdown);
    }

    #[test]
    fn test_partial_server_config_fills_defaults() {
        let config: ServerConfig = toml::from_str("bind_address = \"127.0.0.1:7777\"").unwrap();
        assert_eq!(config.bind_address, "127.0.0.1:7777");
        assert_eq!(config.heartbeat_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_heartbeat_timeout_in_seconds() {
        let config: ServerConfig = toml::from_str("heartbeat_timeout = 5").unwrap();
        assert_eq!(config.heartbeat_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_config_file_roundtrip() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = ServerConfig::default();
        config.bind_address = "10.0.0.1:9100".to_string();
        save_config(&path, &config).unwrap();

        let loaded: ServerConfig = load_config(&path).unwrap();
        assert_eq!(loaded.bind_address, "10.0.0.1:9100");
    }

    #[test]
    fn test_missing_config_file() {
        let result: Result<ServerConfig, _> = load_config(Path::new("/nonexistent/config.toml"));
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_agent_defaults() {
        let config = AgentConfig::default();
        assert_eq!(config.server_address, "127.0.0.1:9000");
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
    }
}
