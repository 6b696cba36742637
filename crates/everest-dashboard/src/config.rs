//! Dashboard configuration.
//!
//! Configuration can be loaded from:
//! - Environment variables (EVEREST_*)
//! - TOML configuration file
//!
//! The credential triple is read from the environment by default so that
//! secrets stay out of config files.

use anyhow::{Context, Result};
use everest_auth::Credentials;
use everest_protocol::TopicSet;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;

/// Dashboard configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind the HTTP API to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port for the HTTP API.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Broker connection configuration.
    #[serde(default)]
    pub broker: BrokerConfig,

    /// Credential triple for request signing.
    #[serde(default)]
    pub credentials: CredentialsConfig,

    /// Buffer retention configuration.
    #[serde(default)]
    pub buffers: BuffersConfig,

    /// Time-series collaborator configuration.
    #[serde(default)]
    pub timeseries: TimeseriesConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Broker connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Broker endpoint host.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Signing region.
    #[serde(default = "default_region")]
    pub region: String,

    /// Presigned-URL validity window in seconds.
    #[serde(default = "default_expires_in")]
    pub expires_in: u64,

    /// MQTT keepalive interval in seconds.
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u16,

    /// Connect handshake deadline in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// The fixed deployment topic set.
    #[serde(default)]
    pub topics: TopicsConfig,
}

/// The three deployment topics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicsConfig {
    /// Status-report topic.
    #[serde(default = "default_status_topic")]
    pub status: String,

    /// Command topic.
    #[serde(default = "default_command_topic")]
    pub command: String,

    /// Vend-event topic.
    #[serde(default = "default_event_topic")]
    pub event: String,
}

/// Credential triple, read from the environment unless set in the file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialsConfig {
    /// Access key identifier.
    #[serde(default = "default_access_key_id")]
    pub access_key_id: String,

    /// Secret signing key.
    #[serde(default = "default_secret_access_key")]
    pub secret_access_key: String,

    /// Session token for temporary credentials.
    #[serde(default = "default_session_token")]
    pub session_token: Option<String>,
}

/// Buffer retention configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuffersConfig {
    /// Retained entries per buffer category.
    #[serde(default = "default_buffer_capacity")]
    pub capacity: usize,
}

/// Time-series collaborator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeseriesConfig {
    /// Database holding the telemetry tables.
    #[serde(default = "default_database")]
    pub database: String,

    /// Status-report table.
    #[serde(default = "default_status_table")]
    pub status_table: String,

    /// Vend-event table.
    #[serde(default = "default_events_table")]
    pub events_table: String,

    /// Default lookback window for history queries, in hours.
    #[serde(default = "default_lookback_hours")]
    pub lookback_hours: u64,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    std::env::var("EVEREST_HOST").unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn default_port() -> u16 {
    std::env::var("EVEREST_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080)
}

fn default_endpoint() -> String {
    std::env::var("EVEREST_BROKER_ENDPOINT").unwrap_or_default()
}

fn default_region() -> String {
    std::env::var("EVEREST_REGION").unwrap_or_else(|_| "us-east-1".to_string())
}

fn default_expires_in() -> u64 {
    86400
}

fn default_keep_alive() -> u16 {
    300
}

fn default_connect_timeout() -> u64 {
    3
}

fn default_status_topic() -> String {
    "vending/status".to_string()
}

fn default_command_topic() -> String {
    "vending/freeVend".to_string()
}

fn default_event_topic() -> String {
    "vending/vendEvents".to_string()
}

fn default_access_key_id() -> String {
    std::env::var("EVEREST_ACCESS_KEY_ID").unwrap_or_default()
}

fn default_secret_access_key() -> String {
    std::env::var("EVEREST_SECRET_ACCESS_KEY").unwrap_or_default()
}

fn default_session_token() -> Option<String> {
    std::env::var("EVEREST_SESSION_TOKEN")
        .ok()
        .filter(|token| !token.is_empty())
}

fn default_buffer_capacity() -> usize {
    1024
}

fn default_database() -> String {
    "everest".to_string()
}

fn default_status_table() -> String {
    "machineStatus".to_string()
}

fn default_events_table() -> String {
    "vendEvents".to_string()
}

fn default_lookback_hours() -> u64 {
    24
}

fn default_true() -> bool {
    true
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            broker: BrokerConfig::default(),
            credentials: CredentialsConfig::default(),
            buffers: BuffersConfig::default(),
            timeseries: TimeseriesConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            region: default_region(),
            expires_in: default_expires_in(),
            keep_alive_secs: default_keep_alive(),
            connect_timeout_secs: default_connect_timeout(),
            topics: TopicsConfig::default(),
        }
    }
}

impl Default for TopicsConfig {
    fn default() -> Self {
        Self {
            status: default_status_topic(),
            command: default_command_topic(),
            event: default_event_topic(),
        }
    }
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            access_key_id: default_access_key_id(),
            secret_access_key: default_secret_access_key(),
            session_token: default_session_token(),
        }
    }
}

impl Default for BuffersConfig {
    fn default() -> Self {
        Self {
            capacity: default_buffer_capacity(),
        }
    }
}

impl Default for TimeseriesConfig {
    fn default() -> Self {
        Self {
            database: default_database(),
            status_table: default_status_table(),
            events_table: default_events_table(),
            lookback_hours: default_lookback_hours(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from file or defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        let config_paths = [
            "everest.toml",
            "/etc/everest/everest.toml",
            "~/.config/everest/everest.toml",
        ];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        // Fall back to defaults with environment overrides
        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Get the socket address to bind the HTTP API to.
    ///
    /// # Errors
    ///
    /// Returns an error if host/port do not form a valid address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }

    /// The deployment topic set.
    #[must_use]
    pub fn topic_set(&self) -> TopicSet {
        TopicSet::new(
            &self.broker.topics.status,
            &self.broker.topics.command,
            &self.broker.topics.event,
        )
    }

    /// The signing credential triple.
    #[must_use]
    pub fn signing_credentials(&self) -> Credentials {
        let mut credentials = Credentials::new(
            &self.credentials.access_key_id,
            &self.credentials.secret_access_key,
        );
        if let Some(token) = &self.credentials.session_token {
            credentials = credentials.with_session_token(token);
        }
        credentials
    }
}

/// Generate a per-process broker client identifier.
#[must_use]
pub fn generate_client_id() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    format!("dash_{:x}", timestamp)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.broker.topics.status, "vending/status");
        assert_eq!(config.broker.expires_in, 86400);
        assert_eq!(config.buffers.capacity, 1024);
        assert_eq!(config.timeseries.database, "everest");
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            host = "0.0.0.0"
            port = 9000

            [broker]
            endpoint = "a1example-ats.iot.eu-west-1.amazonaws.com"
            region = "eu-west-1"

            [broker.topics]
            status = "fleet/status"

            [buffers]
            capacity = 64
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert_eq!(config.broker.region, "eu-west-1");
        assert_eq!(config.broker.topics.status, "fleet/status");
        // Unset sections keep their defaults.
        assert_eq!(config.broker.topics.command, "vending/freeVend");
        assert_eq!(config.buffers.capacity, 64);
    }

    #[test]
    fn test_topic_set() {
        let config = Config::default();
        let topics = config.topic_set();
        assert!(topics.contains("vending/vendEvents"));
    }

    #[test]
    fn test_client_ids_unique() {
        assert_ne!(generate_client_id(), generate_client_id());
    }
}
