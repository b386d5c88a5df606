//! Configuration management for the registration proxy.
//!
//! Supports:
//! - Loading from YAML files
//! - Environment variable overrides (`COAPREG__REGISTRATION__WORKERS=32`)
//! - Validation of all settings
//!
//! Backend order in the file is significant: resolution is first-match in
//! the order backends are listed.

use crate::error::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Root configuration.
///
/// # Examples
///
/// ```no_run
/// use coapreg_core::config::AppConfig;
///
/// let config = AppConfig::from_file("coapreg.yaml").unwrap();
/// config.validate().unwrap();
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Inbound CoAP endpoint
    #[serde(default)]
    pub server: ServerConfig,

    /// Registration workflow tuning
    #[serde(default)]
    pub registration: RegistrationConfig,

    /// Backends, in priority order
    #[serde(default)]
    pub backends: Vec<BackendConfig>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Loads configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::LoadFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        Self::from_yaml(&contents)
    }

    /// Loads configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| {
            ConfigError::InvalidFormat {
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Loads configuration through the `config` crate, layering
    /// `COAPREG__*` environment variables over the file.
    pub fn from_config_builder<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let config = config::Config::builder()
            .add_source(config::File::from(path).required(true))
            .add_source(
                config::Environment::with_prefix("COAPREG")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ConfigError::LoadFailed {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;

        config.try_deserialize().map_err(|e| {
            ConfigError::InvalidFormat {
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<()> {
        self.server.validate()?;
        self.registration.validate()?;

        if self.backends.is_empty() {
            return Err(ConfigError::invalid_value(
                "backends",
                "at least one backend must be configured",
            )
            .into());
        }

        for (index, backend) in self.backends.iter().enumerate() {
            if backend.prefix.trim().is_empty() {
                return Err(ConfigError::invalid_backend(index, "prefix is empty").into());
            }
            if backend.prefix.contains('%') {
                return Err(ConfigError::invalid_backend(
                    index,
                    "prefix must not carry a zone index",
                )
                .into());
            }
        }

        Ok(())
    }
}

/// Inbound endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// UDP bind address
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Path devices POST their announcement to
    #[serde(default = "default_registration_path")]
    pub registration_path: String,

    /// Socket receive buffer size in bytes
    #[serde(default = "default_recv_buffer_size")]
    pub recv_buffer_size: usize,
}

fn default_bind_addr() -> String {
    "[::]:5683".to_string()
}

fn default_registration_path() -> String {
    "/here_i_am".to_string()
}

fn default_recv_buffer_size() -> usize {
    256 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            registration_path: default_registration_path(),
            recv_buffer_size: default_recv_buffer_size(),
        }
    }
}

impl ServerConfig {
    /// Parsed bind address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        self.bind_addr.parse().map_err(|e: std::net::AddrParseError| {
            ConfigError::invalid_value("server.bind_addr", e.to_string()).into()
        })
    }

    fn validate(&self) -> Result<()> {
        self.bind_addr()?;

        if !self.registration_path.starts_with('/') {
            return Err(ConfigError::invalid_value(
                "server.registration_path",
                "must start with '/'",
            )
            .into());
        }

        Ok(())
    }
}

/// Registration workflow settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationConfig {
    /// Number of registration workers; bounds in-flight discoveries
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Announcements queued while all workers are busy
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Port the `/.well-known/core` request is sent to
    #[serde(default = "default_discovery_port")]
    pub discovery_port: u16,

    /// How long a worker waits for a discovery response (seconds)
    #[serde(default = "default_discovery_timeout")]
    pub discovery_timeout_secs: u64,

    /// Drop a node from its backend again when discovery fails, so the next
    /// announcement retries
    #[serde(default)]
    pub forget_failed_nodes: bool,

    /// Use reverse DNS for hostname backends
    #[serde(default = "default_true")]
    pub reverse_dns: bool,
}

fn default_workers() -> usize {
    20
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_discovery_port() -> u16 {
    5683
}

fn default_discovery_timeout() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
            discovery_port: default_discovery_port(),
            discovery_timeout_secs: default_discovery_timeout(),
            forget_failed_nodes: false,
            reverse_dns: true,
        }
    }
}

impl RegistrationConfig {
    /// Discovery timeout as a Duration.
    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_secs(self.discovery_timeout_secs)
    }

    fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(ConfigError::invalid_value("registration.workers", "cannot be 0").into());
        }
        if self.queue_capacity == 0 {
            return Err(
                ConfigError::invalid_value("registration.queue_capacity", "cannot be 0").into(),
            );
        }
        if self.discovery_port == 0 {
            return Err(
                ConfigError::invalid_value("registration.discovery_port", "cannot be 0").into(),
            );
        }
        if self.discovery_timeout_secs == 0 {
            return Err(ConfigError::invalid_value(
                "registration.discovery_timeout_secs",
                "cannot be 0",
            )
            .into());
        }
        Ok(())
    }
}

/// One backend entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Address prefix (`2001:db8::`, `192.168.`) or exact hostname
    pub prefix: String,

    /// Path prefix the proxy exposes this backend's resources under
    #[serde(default)]
    pub path_prefix: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive (`info`, `coapreg_registration=debug`, ...)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "text" or "json"
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}
