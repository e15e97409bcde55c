//! Transport Configuration
//!
//! Where to connect and how to recover when the connection drops.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default agent server endpoint; the conversation id is appended as a path segment
pub const DEFAULT_ENDPOINT: &str = "ws://localhost:8080/ws";

/// How the delay grows between consecutive reconnect attempts
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    /// Same delay before every attempt
    #[default]
    Fixed,
    /// Delay multiplied by `multiplier` after each failed attempt
    Exponential,
}

impl fmt::Display for Backoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed => f.write_str("fixed"),
            Self::Exponential => f.write_str("exponential"),
        }
    }
}

impl FromStr for Backoff {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fixed" => Ok(Self::Fixed),
            "exponential" | "exp" => Ok(Self::Exponential),
            other => Err(format!("unknown backoff {other:?} (expected fixed or exponential)")),
        }
    }
}

/// Automatic reconnection after an unexpected closure
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Delay before the first reconnect attempt, in milliseconds
    pub delay_ms: u64,

    /// Delay growth between attempts
    pub backoff: Backoff,

    /// Growth factor for exponential backoff
    pub multiplier: f64,

    /// Upper bound for exponential backoff delays, in milliseconds
    pub max_delay_ms: u64,

    /// Consecutive attempts before giving up (None = retry forever)
    ///
    /// The counter resets whenever a connection opens.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            delay_ms: 3000,
            backoff: Backoff::Fixed,
            multiplier: 2.0,
            max_delay_ms: 30_000,
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt number `attempt` (1-based)
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => Duration::from_millis(self.delay_ms),
            Backoff::Exponential => {
                let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
                let ceiling = self.max_delay_ms.max(self.delay_ms);
                let millis = (self.delay_ms as f64 * self.multiplier.powi(exponent))
                    .min(ceiling as f64);
                Duration::from_millis(millis as u64)
            }
        }
    }

    /// Whether reconnect attempt number `attempt` (1-based) may be made
    #[must_use]
    pub fn allows(&self, attempt: u32) -> bool {
        !matches!(self.max_attempts, Some(max) if attempt > max)
    }
}

/// Transport configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Base URL; `<endpoint>/<conversation id>` is dialled
    pub endpoint: String,

    /// Connection timeout in milliseconds
    ///
    /// A connect that takes longer counts as a failed attempt.
    pub connect_timeout_ms: u64,

    /// Reconnection behaviour
    pub reconnect: ReconnectPolicy,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            connect_timeout_ms: 5000,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl TransportConfig {
    /// Configuration for a specific endpoint with default timings
    #[must_use]
    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    /// The connect timeout
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}
