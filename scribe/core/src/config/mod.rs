//! Client Configuration
//!
//! Layered configuration for a [`StreamClient`](crate::StreamClient).
//!
//! # Priority (highest first)
//!
//! 1. CLI arguments ([`ConfigOverrides`])
//! 2. Environment variables (`SCRIBE_*`)
//! 3. TOML file (`$XDG_CONFIG_HOME/scribe/client.toml`)
//! 4. Defaults
//!
//! # Example TOML
//!
//! ```toml
//! [transport]
//! endpoint = "ws://localhost:8080/ws"
//! connect_timeout_ms = 5000
//!
//! [transport.reconnect]
//! delay_ms = 3000
//! backoff = "fixed"        # or "exponential"
//! multiplier = 2.0
//! max_delay_ms = 30000
//! # max_attempts = 10      # unset = retry forever
//!
//! [flush]
//! delay_ms = 30
//! max_buffer_chars = 80
//! ```
//!
//! # Environment Variables
//!
//! - `SCRIBE_ENDPOINT`: base WebSocket URL
//! - `SCRIBE_CONNECT_TIMEOUT`: connect timeout in ms
//! - `SCRIBE_RECONNECT_DELAY`: reconnect delay in ms
//! - `SCRIBE_RECONNECT_ATTEMPTS`: attempt cap, or `unlimited`
//! - `SCRIBE_RECONNECT_BACKOFF`: `fixed` or `exponential`
//! - `SCRIBE_FLUSH_DELAY`: debounce delay in ms
//! - `SCRIBE_FLUSH_MAX_CHARS`: buffer size that forces a flush

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::streaming::FlushPolicy;
use crate::transport::{Backoff, TransportConfig};

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Where the highest-priority value in a configuration came from
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    #[default]
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// Client Configuration
// =============================================================================

/// Complete client configuration
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Connection settings
    pub transport: TransportConfig,

    /// Stream assembler flush settings
    pub flush: FlushPolicy,

    /// Where the configuration came from
    #[serde(skip)]
    pub source: ConfigSource,

    /// Path of the loaded config file, if any
    #[serde(skip)]
    pub config_file_path: Option<PathBuf>,
}

impl ClientConfig {
    /// Parse a TOML document; missing keys keep their defaults
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ParseError`] if the document is not valid.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let mut config: Self = toml::from_str(content)?;
        config.source = ConfigSource::File;
        Ok(config)
    }

    /// Check values that would make the client misbehave
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] describing the first problem.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let endpoint = &self.transport.endpoint;
        if !(endpoint.starts_with("ws://") || endpoint.starts_with("wss://")) {
            return Err(ConfigError::ValidationError(format!(
                "endpoint {endpoint:?} must start with ws:// or wss://"
            )));
        }
        if self.flush.max_buffer_chars == 0 {
            return Err(ConfigError::ValidationError(
                "flush.max_buffer_chars must be greater than 0".to_string(),
            ));
        }
        let reconnect = &self.transport.reconnect;
        if reconnect.backoff == Backoff::Exponential
            && (reconnect.multiplier.is_nan() || reconnect.multiplier < 1.0)
        {
            return Err(ConfigError::ValidationError(format!(
                "transport.reconnect.multiplier must be at least 1.0, got {}",
                reconnect.multiplier
            )));
        }
        Ok(())
    }
}

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/scribe/client.toml` or
/// `~/.config/scribe/client.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("scribe").join("client.toml"))
}

/// Load configuration from all sources with proper priority
///
/// `path` selects an explicit config file, which must exist. Without it the
/// default path is tried and a missing file means defaults.
///
/// # Errors
///
/// Returns an error if the config file cannot be read or parsed, or if the
/// result does not validate.
pub fn load_config(
    path: Option<&Path>,
    overrides: &ConfigOverrides,
) -> Result<ClientConfig, ConfigError> {
    let mut config = match path {
        Some(path) => load_config_from_path(Some(path), true)?,
        None => load_config_from_path(default_config_path().as_deref(), false)?,
    };
    apply_env_config(&mut config, |key| std::env::var(key).ok());
    overrides.apply(&mut config);
    config.validate()?;
    Ok(config)
}

/// Load configuration from a specific file, without environment or overrides
///
/// When `required` is set a missing file is an error; otherwise defaults
/// are returned.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn load_config_from_path(
    path: Option<&Path>,
    required: bool,
) -> Result<ClientConfig, ConfigError> {
    let Some(config_path) = path else {
        return Ok(ClientConfig::default());
    };

    let content = match std::fs::read_to_string(config_path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound && !required => {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
            return Ok(ClientConfig::default());
        }
        Err(e) => {
            return Err(ConfigError::ReadError {
                path: config_path.to_path_buf(),
                source: e,
            })
        }
    };

    let mut config = ClientConfig::from_toml_str(&content)?;
    config.config_file_path = Some(config_path.to_path_buf());
    tracing::info!(path = %config_path.display(), "Loaded configuration from file");
    Ok(config)
}

/// Apply environment variable overrides, reading variables through `lookup`
///
/// Unparseable values are logged and ignored.
pub fn apply_env_config<F>(config: &mut ClientConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    fn parsed<T: std::str::FromStr>(key: &str, value: &str) -> Option<T> {
        let result = value.trim().parse().ok();
        if result.is_none() {
            tracing::warn!(key, value, "Ignoring unparseable environment variable");
        }
        result
    }

    if let Some(endpoint) = lookup("SCRIBE_ENDPOINT") {
        config.transport.endpoint = endpoint;
        config.source = ConfigSource::Env;
    }
    if let Some(ms) =
        lookup("SCRIBE_CONNECT_TIMEOUT").and_then(|v| parsed("SCRIBE_CONNECT_TIMEOUT", &v))
    {
        config.transport.connect_timeout_ms = ms;
        config.source = ConfigSource::Env;
    }
    if let Some(ms) =
        lookup("SCRIBE_RECONNECT_DELAY").and_then(|v| parsed("SCRIBE_RECONNECT_DELAY", &v))
    {
        config.transport.reconnect.delay_ms = ms;
        config.source = ConfigSource::Env;
    }
    if let Some(value) = lookup("SCRIBE_RECONNECT_ATTEMPTS") {
        if value.trim().eq_ignore_ascii_case("unlimited") {
            config.transport.reconnect.max_attempts = None;
            config.source = ConfigSource::Env;
        } else if let Some(attempts) = parsed("SCRIBE_RECONNECT_ATTEMPTS", &value) {
            config.transport.reconnect.max_attempts = Some(attempts);
            config.source = ConfigSource::Env;
        }
    }
    if let Some(backoff) =
        lookup("SCRIBE_RECONNECT_BACKOFF").and_then(|v| parsed("SCRIBE_RECONNECT_BACKOFF", &v))
    {
        config.transport.reconnect.backoff = backoff;
        config.source = ConfigSource::Env;
    }
    if let Some(ms) =
        lookup("SCRIBE_FLUSH_DELAY").and_then(|v| parsed("SCRIBE_FLUSH_DELAY", &v))
    {
        config.flush.delay_ms = ms;
        config.source = ConfigSource::Env;
    }
    if let Some(chars) =
        lookup("SCRIBE_FLUSH_MAX_CHARS").and_then(|v| parsed("SCRIBE_FLUSH_MAX_CHARS", &v))
    {
        config.flush.max_buffer_chars = chars;
        config.source = ConfigSource::Env;
    }
}

// =============================================================================
// CLI Overrides
// =============================================================================

/// Values given on the command line
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Endpoint override
    pub endpoint: Option<String>,

    /// Connect timeout override
    pub connect_timeout_ms: Option<u64>,

    /// Reconnect delay override
    pub reconnect_delay_ms: Option<u64>,

    /// Reconnect attempt cap override
    pub max_reconnect_attempts: Option<u32>,

    /// Backoff override
    pub backoff: Option<Backoff>,

    /// Debounce delay override
    pub flush_delay_ms: Option<u64>,

    /// Flush size threshold override
    pub max_buffer_chars: Option<usize>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set endpoint override
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Set reconnect delay override
    #[must_use]
    pub fn with_reconnect_delay_ms(mut self, ms: u64) -> Self {
        self.reconnect_delay_ms = Some(ms);
        self
    }

    /// Set flush delay override
    #[must_use]
    pub fn with_flush_delay_ms(mut self, ms: u64) -> Self {
        self.flush_delay_ms = Some(ms);
        self
    }

    /// Apply overrides to a configuration
    pub fn apply(&self, config: &mut ClientConfig) {
        if self.endpoint.is_some()
            || self.connect_timeout_ms.is_some()
            || self.reconnect_delay_ms.is_some()
            || self.max_reconnect_attempts.is_some()
            || self.backoff.is_some()
            || self.flush_delay_ms.is_some()
            || self.max_buffer_chars.is_some()
        {
            config.source = ConfigSource::Cli;
        }

        if let Some(endpoint) = &self.endpoint {
            config.transport.endpoint.clone_from(endpoint);
        }
        if let Some(ms) = self.connect_timeout_ms {
            config.transport.connect_timeout_ms = ms;
        }
        if let Some(ms) = self.reconnect_delay_ms {
            config.transport.reconnect.delay_ms = ms;
        }
        if let Some(attempts) = self.max_reconnect_attempts {
            config.transport.reconnect.max_attempts = Some(attempts);
        }
        if let Some(backoff) = self.backoff {
            config.transport.reconnect.backoff = backoff;
        }
        if let Some(ms) = self.flush_delay_ms {
            config.flush.delay_ms = ms;
        }
        if let Some(chars) = self.max_buffer_chars {
            config.flush.max_buffer_chars = chars;
        }
    }
}
