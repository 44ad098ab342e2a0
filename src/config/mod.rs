//! Link configuration.
//!
//! Loaded from YAML files and environment variables, then converted into the
//! typed values the core consumes (`ReconnectPolicy`, `Duration`).

use std::time::Duration;

use serde::Deserialize;

use crate::controller::{Backoff, ReconnectPolicy, DEFAULT_HEALTH_CHECK_INTERVAL};
use crate::message::Payload;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "brokerlink.yaml";

/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "BROKERLINK_CONFIG";

/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "BROKERLINK";

/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "BROKERLINK_LOG";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub connection: ConnectionConfig,
    pub reconnect: ReconnectConfig,
    /// Services registered at startup.
    pub services: Vec<ServiceDeclaration>,
}

/// Broker target and health polling.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub address: String,
    pub port: u16,
    pub health_check_interval_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            address: "localhost".to_string(),
            port: 9090,
            health_check_interval_ms: DEFAULT_HEALTH_CHECK_INTERVAL.as_millis() as u64,
        }
    }
}

impl ConnectionConfig {
    /// `address:port`, as handed to a transport.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }
}

/// Backoff strategy discriminator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    #[default]
    Fixed,
    Exponential,
}

/// Reconnect policy as written in configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub enabled: bool,
    /// 0 retries forever.
    pub max_attempts: u32,
    pub interval_secs: f64,
    pub timeout_secs: f64,
    pub backoff: BackoffKind,
    /// Ceiling for exponential backoff.
    pub max_interval_secs: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 5,
            interval_secs: 3.0,
            timeout_secs: 10.0,
            backoff: BackoffKind::Fixed,
            max_interval_secs: 30.0,
        }
    }
}

impl ReconnectConfig {
    /// Convert to a policy. Out-of-range durations are clamped to the
    /// policy floors.
    pub fn to_policy(&self) -> ReconnectPolicy {
        let backoff = match self.backoff {
            BackoffKind::Fixed => Backoff::Fixed,
            BackoffKind::Exponential => Backoff::Exponential {
                max_interval: secs(self.max_interval_secs),
            },
        };
        ReconnectPolicy::new(
            self.enabled,
            self.max_attempts,
            secs(self.interval_secs),
            secs(self.timeout_secs),
        )
        .with_backoff(backoff)
    }
}

/// A service declared in configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServiceDeclaration {
    pub name: String,
    /// Service type name, e.g. `std_srvs/Trigger`.
    pub service_type: String,
    pub default_request: Option<Payload>,
    pub comment: Option<String>,
}

impl LinkConfig {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `brokerlink.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `BROKERLINK_CONFIG` environment variable (if set)
    /// 4. Environment variables, e.g. `BROKERLINK__RECONNECT__MAX_ATTEMPTS`
    pub fn load(path: Option<&str>) -> Result<Self, ::config::ConfigError> {
        use ::config::{Config, Environment, File, FileFormat};

        let mut builder = Config::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}

fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value.max(0.0)).unwrap_or(Duration::ZERO)
}
