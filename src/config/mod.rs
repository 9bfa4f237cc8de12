//! Configuration management

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Client configuration
    pub client: Option<ClientConfig>,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, crate::Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::Config(format!("Failed to read config: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Save configuration to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), crate::Error> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::Error::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| crate::Error::Config(format!("Failed to write config: {}", e)))
    }
}

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Local address to listen on
    pub listen: String,
    /// Upstream server address
    pub server: String,
    /// Shared secret for tunnel authentication
    pub secret: String,
    /// Number of persistent tunnels to maintain
    #[serde(default = "default_tunnels")]
    pub tunnels: usize,
}

fn default_tunnels() -> usize {
    2
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:1080".to_string(),
            server: "127.0.0.1:8443".to_string(),
            secret: String::new(),
            tunnels: default_tunnels(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (pretty, json, compact)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_config() {
        let config: Config = toml::from_str(
            r#"
            [client]
            listen = "127.0.0.1:9000"
            server = "203.0.113.5:8443"
            secret = "hunter2"
            "#,
        )
        .unwrap();

        let client = config.client.unwrap();
        assert_eq!(client.listen, "127.0.0.1:9000");
        assert_eq!(client.server, "203.0.113.5:8443");
        assert_eq!(client.tunnels, 2, "tunnels defaults when omitted");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_parse_full_config() {
        let config: Config = toml::from_str(
            r#"
            [client]
            listen = "0.0.0.0:1080"
            server = "example.com:8443"
            secret = "s"
            tunnels = 8

            [logging]
            level = "debug"
            format = "compact"
            "#,
        )
        .unwrap();

        assert_eq!(config.client.unwrap().tunnels, 8);
        assert_eq!(config.logging.level, "debug");
    }
}
