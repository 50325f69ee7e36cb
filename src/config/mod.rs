//! Configuration management.
//!
//! Supports configuration from:
//! - TOML config files
//! - Environment variables
//! - CLI arguments (for the `sensu-agent` binary)

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AgentError, Result};

/// Agent configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Backend address (e.g., 127.0.0.1:8081 or ws://backend:8081)
    pub backend_url: String,

    /// Check channels to subscribe to, in order
    pub subscriptions: Vec<String>,

    /// Liveness polling tick for the supervisor and send pump
    pub tick_interval_ms: u64,

    /// Delay between failed reconnect attempts
    pub reconnect_interval_ms: u64,

    /// Consecutive failed attempts before falling back to `backend_url`
    pub fallback_threshold: u32,

    /// Outbound queue capacity
    pub queue_capacity: usize,

    /// Maximum wait for the backend handshake
    pub handshake_timeout_ms: u64,

    /// Maximum wait for a TCP connect
    pub connect_timeout_ms: u64,

    /// Upper bound on `Agent::stop`
    pub stop_timeout_ms: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            backend_url: "127.0.0.1:8081".to_string(),
            subscriptions: Vec::new(),
            tick_interval_ms: 100,
            reconnect_interval_ms: 1000,
            fallback_threshold: 30,
            queue_capacity: 10,
            handshake_timeout_ms: 10_000,
            connect_timeout_ms: 5_000,
            stop_timeout_ms: 1_000,
        }
    }
}

impl AgentConfig {
    /// Create a config for a backend and subscription list
    pub fn new(backend_url: impl Into<String>, subscriptions: Vec<String>) -> Self {
        Self {
            backend_url: backend_url.into(),
            subscriptions,
            ..Default::default()
        }
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| AgentError::Config(format!("Failed to read config file: {e}")))?;

        toml::from_str(&content)
            .map_err(|e| AgentError::Config(format!("Failed to parse config: {e}")))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Override fields from `SENSU_BACKEND_URL` and `SENSU_SUBSCRIPTIONS`
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("SENSU_BACKEND_URL") {
            self.backend_url = url;
        }
        if let Ok(subs) = std::env::var("SENSU_SUBSCRIPTIONS") {
            self.subscriptions = parse_subscriptions(&subs);
        }
    }

    /// Default config file location
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("sensu").join("agent.toml"))
    }

    /// Check the values the supervisor relies on
    pub fn validate(&self) -> Result<()> {
        if self.backend_url.trim().is_empty() {
            return Err(AgentError::Config("backend_url must not be empty".to_string()));
        }
        if self.tick_interval_ms == 0 {
            return Err(AgentError::Config("tick_interval_ms must be > 0".to_string()));
        }
        if self.queue_capacity == 0 {
            return Err(AgentError::Config("queue_capacity must be > 0".to_string()));
        }
        if self.fallback_threshold == 0 {
            return Err(AgentError::Config("fallback_threshold must be > 0".to_string()));
        }
        Ok(())
    }

    /// Supervisor and send pump tick
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Fixed reconnect delay
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    /// Handshake timeout
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// Connect timeout
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Stop timeout
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

/// Split a comma-separated subscription list, dropping blanks
pub fn parse_subscriptions(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_default_config() {
        let config = AgentConfig::default();
        assert_eq!(config.tick_interval(), Duration::from_millis(100));
        assert_eq!(config.reconnect_interval(), Duration::from_secs(1));
        assert_eq!(config.fallback_threshold, 30);
        assert_eq!(config.queue_capacity, 10);
        assert_eq!(config.stop_timeout(), Duration::from_secs(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_toml() {
        let toml = r#"
            backend_url = "ws://backend.example:8081"
            subscriptions = ["linux", "web"]
            reconnect_interval_ms = 250
        "#;

        let config: AgentConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.backend_url, "ws://backend.example:8081");
        assert_eq!(config.subscriptions, vec!["linux", "web"]);
        assert_eq!(config.reconnect_interval(), Duration::from_millis(250));
        // Unspecified fields keep their defaults
        assert_eq!(config.queue_capacity, 10);
    }

    #[test]
    fn test_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "backend_url = \"10.0.0.5:8081\"").unwrap();
        writeln!(file, "subscriptions = [\"db\"]").unwrap();

        let config = AgentConfig::from_file(file.path()).unwrap();
        assert_eq!(config.backend_url, "10.0.0.5:8081");
        assert_eq!(config.subscriptions, vec!["db"]);
    }

    #[test]
    fn test_config_from_missing_file() {
        let err = AgentConfig::from_file("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, AgentError::Config(_)));
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let config = AgentConfig {
            queue_capacity: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = AgentConfig::new("  ", vec![]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_subscriptions() {
        assert_eq!(
            parse_subscriptions("linux, web,,  db "),
            vec!["linux", "web", "db"]
        );
        assert!(parse_subscriptions("").is_empty());
    }
}
