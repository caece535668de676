//! Server configuration.
//!
//! Configuration is layered, later sources winning:
//! - Built-in defaults
//! - TOML configuration file (first of `relay.toml`, `/etc/relay/relay.toml`,
//!   `~/.config/relay/relay.toml`)
//! - Environment variables (`RELAY_PORT`, `RELAY_POLICE__THRESHOLD`, ...)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tenvis_relay_core::{ContextConfig, DispatchPolicy, PoliceConfig};
use thiserror::Error;

const CONFIG_PATHS: [&str; 3] = [
    "relay.toml",
    "/etc/relay/relay.toml",
    "~/.config/relay/relay.toml",
];

/// Configuration errors not covered by parsing.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid bind address '{host}:{port}'")]
    InvalidBindAddress { host: String, port: u16 },
}

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

    /// Rate limiting.
    #[serde(default)]
    pub police: PoliceSection,

    /// Privileged identities.
    #[serde(default)]
    pub access: AccessConfig,

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
    /// Maximum number of connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Maximum inbound payload size in bytes.
    #[serde(default = "default_max_payload_size")]
    pub max_payload_size: usize,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoliceSection {
    /// Score half-life in milliseconds.
    #[serde(default = "default_half_life")]
    pub half_life_ms: u64,

    /// Score at which actions are refused.
    #[serde(default = "default_threshold")]
    pub threshold: f64,

    /// Score added for every inbound payload.
    #[serde(default = "default_inbound_penalty")]
    pub inbound_penalty: f64,
}

/// A key that grants a fixed trip and level on join.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub trip: String,
    pub key: String,
}

/// Privileged identities.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccessConfig {
    #[serde(default)]
    pub admin: Option<Credential>,

    #[serde(default)]
    pub moderators: Vec<Credential>,

    /// Salt for address hashes. Random per process when unset.
    #[serde(default)]
    pub salt: Option<String>,
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
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    6060
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/chat-ws".to_string()
}

fn default_max_connections() -> usize {
    10_000
}

fn default_max_payload_size() -> usize {
    relay_protocol::codec::MAX_PAYLOAD_SIZE
}

fn default_half_life() -> u64 {
    30_000 // 30 seconds
}

fn default_threshold() -> f64 {
    25.0
}

fn default_inbound_penalty() -> f64 {
    1.0
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
            police: PoliceSection::default(),
            access: AccessConfig::default(),
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
            max_connections: default_max_connections(),
            max_payload_size: default_max_payload_size(),
        }
    }
}

impl Default for PoliceSection {
    fn default() -> Self {
        Self {
            half_life_ms: default_half_life(),
            threshold: default_threshold(),
            inbound_penalty: default_inbound_penalty(),
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
    /// Load configuration from the default paths and the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed, or an
    /// environment override has the wrong type.
    pub fn load() -> Result<Self> {
        let file = CONFIG_PATHS
            .iter()
            .map(|path| PathBuf::from(shellexpand::tilde(path).as_ref()))
            .find(|path| path.exists());
        Self::layered(file.as_deref())
    }

    /// Defaults, then `file` if given, then `RELAY_*` environment variables.
    ///
    /// Nested keys use a double underscore: `RELAY_POLICE__THRESHOLD=30`.
    ///
    /// # Errors
    ///
    /// Returns an error if any source fails to parse.
    pub fn layered(file: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(::config::File::from(path).required(true));
        }
        builder = builder.add_source(
            ::config::Environment::with_prefix("RELAY")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let settings = builder.build().with_context(|| match file {
            Some(path) => format!("Failed to load config file: {}", path.display()),
            None => "Failed to load configuration".to_string(),
        })?;

        settings
            .try_deserialize()
            .context("Invalid configuration")
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if `host:port` is not a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|_| ConfigError::InvalidBindAddress {
                host: self.host.clone(),
                port: self.port,
            })
    }

    /// Core context settings derived from this configuration.
    #[must_use]
    pub fn context_config(&self) -> ContextConfig {
        ContextConfig {
            police: PoliceConfig {
                half_life: Duration::from_millis(self.police.half_life_ms),
                threshold: self.police.threshold,
            },
            policy: DispatchPolicy {
                inbound_penalty: self.police.inbound_penalty,
            },
        }
    }
}
