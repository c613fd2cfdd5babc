//! Configuration loading and typed config structures for the gateway.
//!
//! The canonical configuration lives in `meshgate.yaml`. This module defines
//! strongly-typed structs that mirror the YAML structure, fills every
//! omitted key with its default, and applies environment overrides for the
//! deployment-specific values (broker address, credentials, database URL).

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// An environment override held an unusable value.
    #[error("invalid value for {name}: {message}")]
    InvalidOverride {
        /// The environment variable name.
        name: &'static str,
        /// What was wrong with it.
        message: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level gateway configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct GatewayConfig {
    /// Broker connection and subscriptions.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Reconnect backoff policy.
    #[serde(default)]
    pub backoff: BackoffConfig,

    /// Change publisher cadence.
    #[serde(default)]
    pub publisher: PublisherConfig,

    /// Gateway identity and command addressing.
    #[serde(default)]
    pub gateway: IdentityConfig,

    /// Persistence collaborator.
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// Observer HTTP server.
    #[serde(default)]
    pub observer: ObserverConfig,

    /// Log output.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl GatewayConfig {
    /// Load configuration from a YAML file and apply environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Yaml`] if the content is not valid YAML, or
    /// [`ConfigError::InvalidOverride`] if an environment override cannot
    /// be parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config = Self::parse(&contents)?;
        config.apply_overrides(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Defaults plus environment overrides, for when no file exists.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidOverride`] if an override cannot be
    /// parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_overrides(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Parse configuration from a YAML string. No overrides are applied.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yml::from_str(yaml)?)
    }

    /// Apply overrides from a variable lookup.
    ///
    /// Recognised variables:
    /// - `BROKER_HOST`, `BROKER_PORT`, `BROKER_USERNAME`, `BROKER_PASSWORD`
    /// - `BROKER_TOPICS` -- comma separated subject filters
    /// - `DATABASE_URL`
    /// - `OBSERVER_PORT`
    /// - `GATEWAY_SELF_ID`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidOverride`] for unparseable ports or an
    /// empty topic list.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("BROKER_HOST") {
            self.transport.host = host;
        }
        if let Some(port) = lookup("BROKER_PORT") {
            self.transport.port = parse_port("BROKER_PORT", &port)?;
        }
        if let Some(user) = lookup("BROKER_USERNAME").filter(|u| !u.is_empty()) {
            self.transport.username = Some(user);
        }
        if let Some(pass) = lookup("BROKER_PASSWORD").filter(|p| !p.is_empty()) {
            self.transport.password = Some(pass);
        }
        if let Some(topics) = lookup("BROKER_TOPICS") {
            let parsed: Vec<String> = topics
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_owned)
                .collect();
            if parsed.is_empty() {
                return Err(ConfigError::InvalidOverride {
                    name: "BROKER_TOPICS",
                    message: "no subject filters given".to_owned(),
                });
            }
            self.transport.topics = parsed;
        }
        if let Some(url) = lookup("DATABASE_URL").filter(|u| !u.is_empty()) {
            self.persistence.database_url = Some(url);
        }
        if let Some(port) = lookup("OBSERVER_PORT") {
            self.observer.port = parse_port("OBSERVER_PORT", &port)?;
        }
        if let Some(id) = lookup("GATEWAY_SELF_ID").filter(|i| !i.is_empty()) {
            self.gateway.self_id = id;
        }
        Ok(())
    }
}

fn parse_port(name: &'static str, raw: &str) -> Result<u16, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|e| ConfigError::InvalidOverride {
            name,
            message: format!("{raw:?}: {e}"),
        })
}

/// Broker connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TransportConfig {
    /// Broker host name or address.
    #[serde(default = "default_broker_host")]
    pub host: String,

    /// Broker port.
    #[serde(default = "default_broker_port")]
    pub port: u16,

    /// Optional user name.
    #[serde(default)]
    pub username: Option<String>,

    /// Optional password (only used together with `username`).
    #[serde(default)]
    pub password: Option<String>,

    /// Subject filters to subscribe to.
    #[serde(default = "default_topics")]
    pub topics: Vec<String>,

    /// Connection attempt timeout in milliseconds.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl TransportConfig {
    /// Broker URL in `nats://host:port` form.
    pub fn url(&self) -> String {
        format!("nats://{}:{}", self.host, self.port)
    }

    /// Connection attempt timeout.
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            host: default_broker_host(),
            port: default_broker_port(),
            username: None,
            password: None,
            topics: default_topics(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

/// Reconnect backoff policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct BackoffConfig {
    /// First delay after a failure, in milliseconds.
    #[serde(default = "default_backoff_initial_ms")]
    pub initial_ms: u64,

    /// Ceiling for the doubling delay, in milliseconds.
    #[serde(default = "default_backoff_max_ms")]
    pub max_ms: u64,

    /// A connection that stays up at least this long resets the delay.
    #[serde(default = "default_backoff_stable_after_ms")]
    pub stable_after_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_ms: default_backoff_initial_ms(),
            max_ms: default_backoff_max_ms(),
            stable_after_ms: default_backoff_stable_after_ms(),
        }
    }
}

/// Change publisher settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct PublisherConfig {
    /// Sampling interval in milliseconds.
    #[serde(default = "default_publisher_tick_ms")]
    pub tick_ms: u64,

    /// How many snapshots a slow subscriber may fall behind before it
    /// skips ahead to the newest one.
    #[serde(default = "default_publisher_capacity")]
    pub channel_capacity: usize,
}

impl PublisherConfig {
    /// Sampling interval.
    pub const fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            tick_ms: default_publisher_tick_ms(),
            channel_capacity: default_publisher_capacity(),
        }
    }
}

/// Gateway identity and command addressing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IdentityConfig {
    /// Identity stamped on every outbound command and recognised as an echo
    /// on ingestion.
    #[serde(default = "default_self_id")]
    pub self_id: String,

    /// Subject prefix for outbound commands.
    #[serde(default = "default_command_namespace")]
    pub command_namespace: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            self_id: default_self_id(),
            command_namespace: default_command_namespace(),
        }
    }
}

/// Persistence collaborator settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PersistenceConfig {
    /// `PostgreSQL` URL. Persistence is disabled when unset.
    #[serde(default)]
    pub database_url: Option<String>,

    /// Pending writes kept before new ones are dropped.
    #[serde(default = "default_persistence_queue")]
    pub queue_capacity: usize,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            queue_capacity: default_persistence_queue(),
        }
    }
}

/// Observer HTTP server settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ObserverConfig {
    /// Bind address.
    #[serde(default = "default_observer_host")]
    pub host: String,

    /// Bind port.
    #[serde(default = "default_observer_port")]
    pub port: u16,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            host: default_observer_host(),
            port: default_observer_port(),
        }
    }
}

/// Log output settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format: `text` or `json`.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl LoggingConfig {
    /// Whether JSON log lines were requested.
    pub fn is_json(&self) -> bool {
        self.format.eq_ignore_ascii_case("json")
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

fn default_broker_host() -> String {
    "127.0.0.1".to_owned()
}

const fn default_broker_port() -> u16 {
    4222
}

fn default_topics() -> Vec<String> {
    vec!["msh.>".to_owned()]
}

const fn default_connect_timeout_ms() -> u64 {
    5_000
}

const fn default_backoff_initial_ms() -> u64 {
    3_000
}

const fn default_backoff_max_ms() -> u64 {
    60_000
}

const fn default_backoff_stable_after_ms() -> u64 {
    30_000
}

const fn default_publisher_tick_ms() -> u64 {
    500
}

const fn default_publisher_capacity() -> usize {
    16
}

fn default_self_id() -> String {
    meshgate_types::GATEWAY_SELF_ID.to_owned()
}

fn default_command_namespace() -> String {
    "mesh/request".to_owned()
}

const fn default_persistence_queue() -> usize {
    1024
}

fn default_observer_host() -> String {
    "0.0.0.0".to_owned()
}

const fn default_observer_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_owned()
}

fn default_log_format() -> String {
    "text".to_owned()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    #[test]
    fn defaults() {
        let config = GatewayConfig::default();
        assert_eq!(config.transport.url(), "nats://127.0.0.1:4222");
        assert_eq!(config.transport.topics, vec!["msh.>".to_owned()]);
        assert_eq!(config.backoff.initial_ms, 3_000);
        assert_eq!(config.backoff.max_ms, 60_000);
        assert_eq!(config.publisher.tick(), Duration::from_millis(500));
        assert_eq!(config.gateway.self_id, "!meshgate");
        assert!(config.persistence.database_url.is_none());
    }

    #[test]
    fn parse_partial_yaml_fills_defaults() {
        let yaml = r"
transport:
  host: broker.local
  topics:
    - msh.eu.>
    - msh.us.>
backoff:
  initial_ms: 1000
publisher:
  tick_ms: 250
logging:
  format: json
";
        let config = GatewayConfig::parse(yaml).unwrap_or_default();
        assert_eq!(config.transport.host, "broker.local");
        assert_eq!(config.transport.port, 4222);
        assert_eq!(config.transport.topics.len(), 2);
        assert_eq!(config.backoff.initial_ms, 1_000);
        assert_eq!(config.backoff.max_ms, 60_000);
        assert_eq!(config.publisher.tick_ms, 250);
        assert!(config.logging.is_json());
    }

    #[test]
    fn sample_file_matches_defaults() {
        let parsed = GatewayConfig::parse(include_str!("../../../meshgate.yaml"));
        assert!(matches!(parsed, Ok(ref config) if *config == GatewayConfig::default()));
    }

    #[test]
    fn empty_yaml_is_default() {
        let config = GatewayConfig::parse("").unwrap_or_default();
        assert_eq!(config, GatewayConfig::default());
    }

    #[test]
    fn invalid_yaml_is_rejected() {
        assert!(matches!(
            GatewayConfig::parse("transport: [unclosed"),
            Err(ConfigError::Yaml { .. })
        ));
    }

    #[test]
    fn overrides_replace_values() {
        let vars: BTreeMap<&str, &str> = [
            ("BROKER_HOST", "10.0.0.2"),
            ("BROKER_PORT", "4333"),
            ("BROKER_USERNAME", "mesh"),
            ("BROKER_PASSWORD", "secret"),
            ("BROKER_TOPICS", "msh.a.>, msh.b.>"),
            ("DATABASE_URL", "postgresql://localhost/mesh"),
            ("OBSERVER_PORT", "9000"),
        ]
        .into_iter()
        .collect();

        let mut config = GatewayConfig::default();
        let result = config.apply_overrides(|name| vars.get(name).map(|v| (*v).to_owned()));
        assert!(result.is_ok());
        assert_eq!(config.transport.url(), "nats://10.0.0.2:4333");
        assert_eq!(config.transport.username.as_deref(), Some("mesh"));
        assert_eq!(config.transport.password.as_deref(), Some("secret"));
        assert_eq!(
            config.transport.topics,
            vec!["msh.a.>".to_owned(), "msh.b.>".to_owned()]
        );
        assert_eq!(
            config.persistence.database_url.as_deref(),
            Some("postgresql://localhost/mesh")
        );
        assert_eq!(config.observer.port, 9000);
    }

    #[test]
    fn bad_port_override_is_an_error() {
        let mut config = GatewayConfig::default();
        let result = config.apply_overrides(|name| {
            (name == "BROKER_PORT").then(|| "not-a-port".to_owned())
        });
        assert!(matches!(
            result,
            Err(ConfigError::InvalidOverride {
                name: "BROKER_PORT",
                ..
            })
        ));
    }

    #[test]
    fn empty_topic_override_is_an_error() {
        let mut config = GatewayConfig::default();
        let result =
            config.apply_overrides(|name| (name == "BROKER_TOPICS").then(|| " , ".to_owned()));
        assert!(result.is_err());
    }
}
