//! Server configuration.
//!
//! Configuration can be loaded from:
//! - A TOML file (`herald.toml`, `/etc/herald/herald.toml`,
//!   `~/.config/herald/herald.toml`, or the path in `HERALD_CONFIG`)
//! - Environment overrides (`HERALD__PORT`, `HERALD__LIMITS__MAX_TOPICS`, ...)
//! - `HERALD_HOST` / `HERALD_PORT` as host and port defaults

use anyhow::{Context, Result};
use herald_core::registry::DEFAULT_MAX_TOPICS;
use herald_core::subscriber::DEFAULT_MAILBOX_CAPACITY;
use herald_core::{BrokerConfig, HISTORY_CAPACITY, MAX_TOPIC_NAME_LENGTH};
use herald_protocol::codec::MAX_FRAME_SIZE;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "HERALD_CONFIG";

const CONFIG_PATHS: [&str; 3] = [
    "herald.toml",
    "/etc/herald/herald.toml",
    "~/.config/herald/herald.toml",
];

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Transport configuration.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path for WebSocket endpoint.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum number of topics.
    #[serde(default = "default_max_topics")]
    pub max_topics: usize,

    /// Maximum topic name length in characters.
    #[serde(default = "default_max_topic_name_length")]
    pub max_topic_name_length: usize,

    /// Maximum inbound message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Events queued per connection before the oldest is dropped. Values
    /// below the history capacity are raised to it so a full replay fits.
    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,
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
    std::env::var("HERALD_HOST").unwrap_or_else(|_| "127.0.0.1".to_string())
}

fn default_port() -> u16 {
    std::env::var("HERALD_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080)
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_max_topics() -> usize {
    DEFAULT_MAX_TOPICS
}

fn default_max_topic_name_length() -> usize {
    MAX_TOPIC_NAME_LENGTH
}

fn default_max_message_size() -> usize {
    MAX_FRAME_SIZE
}

fn default_mailbox_capacity() -> usize {
    DEFAULT_MAILBOX_CAPACITY
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            transport: TransportConfig::default(),
            limits: LimitsConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: default_ws_path(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_topics: default_max_topics(),
            max_topic_name_length: default_max_topic_name_length(),
            max_message_size: default_max_message_size(),
            mailbox_capacity: default_mailbox_capacity(),
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
    /// Load configuration from the first config file found, with
    /// environment overrides applied on top.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed, or if
    /// an override has the wrong type.
    pub fn load() -> Result<Self> {
        let path = match std::env::var(CONFIG_ENV) {
            Ok(path) => Some(shellexpand::tilde(&path).into_owned()),
            Err(_) => CONFIG_PATHS
                .iter()
                .map(|path| shellexpand::tilde(path).into_owned())
                .find(|path| Path::new(path).exists()),
        };

        let base = match &path {
            Some(path) => {
                tracing::info!("Loading configuration from {}", path);
                Self::from_file(path)?
            }
            None => Self::default(),
        };

        let config: Self = config::Config::builder()
            .add_source(config::Config::try_from(&base).context("Failed to load configuration")?)
            .add_source(
                config::Environment::with_prefix("HERALD")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to load configuration")?
            .try_deserialize()
            .context("Failed to apply environment overrides")?;

        if config.limits.mailbox_capacity < HISTORY_CAPACITY {
            tracing::warn!(
                configured = config.limits.mailbox_capacity,
                using = HISTORY_CAPACITY,
                "Mailbox capacity is below the history capacity, raising it"
            );
        }
        Ok(config)
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

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid host:port {}:{}", self.host, self.port))
    }

    /// Broker settings derived from the limits.
    #[must_use]
    pub fn broker_config(&self) -> BrokerConfig {
        BrokerConfig {
            max_topics: self.limits.max_topics,
            max_topic_name_length: self.limits.max_topic_name_length,
            mailbox_capacity: self.limits.mailbox_capacity.max(HISTORY_CAPACITY),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.transport.websocket_path, "/ws");
        assert_eq!(config.limits.max_topics, DEFAULT_MAX_TOPICS);
        assert_eq!(config.limits.max_message_size, MAX_FRAME_SIZE);
        assert!(config.metrics.enabled);
    }

    #[test]
    fn test_config_bind_addr() {
        let config = Config {
            host: "127.0.0.1".into(),
            port: 8080,
            ..Config::default()
        };
        assert_eq!(config.bind_addr().unwrap().port(), 8080);

        let bad = Config {
            host: "not a host".into(),
            ..Config::default()
        };
        assert!(bad.bind_addr().is_err());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            host = "0.0.0.0"
            port = 9000

            [limits]
            max_topics = 50
            mailbox_capacity = 256
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert_eq!(config.limits.max_topics, 50);
        assert_eq!(config.limits.max_topic_name_length, MAX_TOPIC_NAME_LENGTH);

        let broker = config.broker_config();
        assert_eq!(broker.max_topics, 50);
        assert_eq!(broker.mailbox_capacity, 256);
    }

    #[test]
    fn test_small_mailbox_is_raised_to_history_capacity() {
        let config: Config = toml::from_str("[limits]\nmailbox_capacity = 4").unwrap();
        assert_eq!(config.limits.mailbox_capacity, 4);
        assert_eq!(config.broker_config().mailbox_capacity, HISTORY_CAPACITY);

        let broker = std::sync::Arc::new(herald_core::Broker::with_config(config.broker_config()));
        broker.create_topic("t").unwrap();
        let mut publisher = broker.connect();
        for _ in 0..150 {
            publisher.publish("t", herald_protocol::Payload::new()).unwrap();
        }
        let mut session = broker.connect();
        assert_eq!(session.subscribe("t", 10).unwrap(), 10);

        let sequences: Vec<u64> =
            std::iter::from_fn(|| session.subscriber().try_recv())
                .filter_map(|d| match d {
                    herald_core::Delivery::Event(m) => Some(m.sequence),
                    herald_core::Delivery::Control(_) => None,
                })
                .collect();
        assert_eq!(sequences, (141..=150).collect::<Vec<_>>());
    }

    #[test]
    fn test_environment_overrides() {
        std::env::set_var("HERALD__LIMITS__MAX_TOPICS", "7");
        let config = Config::load();
        std::env::remove_var("HERALD__LIMITS__MAX_TOPICS");

        let config = config.unwrap();
        assert_eq!(config.limits.max_topics, 7);
        assert_eq!(config.limits.mailbox_capacity, DEFAULT_MAILBOX_CAPACITY);
    }

    #[test]
    fn test_config_from_file() {
        let path = std::env::temp_dir().join(format!("herald-test-{}.toml", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "port = 7001\n[metrics]\nenabled = false").unwrap();

        let config = Config::from_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.port, 7001);
        assert!(!config.metrics.enabled);
        assert!(Config::from_file(&path).is_err());
    }
}
