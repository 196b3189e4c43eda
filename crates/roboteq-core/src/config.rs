//! Driver configuration
//!
//! Everything is plain serde data read from JSON. Missing fields take their
//! defaults, so an empty object is a valid configuration.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::diagnostics::DiagnosticThresholds;
use crate::protocol::{
    RetryPolicy, DEFAULT_BAUD_RATE, DEFAULT_MAX_RETRIES, DEFAULT_PORTS, DEFAULT_TIMEOUT_MS,
};
use crate::telemetry::TelemetryKind;

/// Errors while loading configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    /// File could not be read
    #[error("Failed to read {path}: {source}")]
    Io {
        /// File that was being read
        path: String,
        /// Underlying read failure
        #[source]
        source: std::io::Error,
    },

    /// Contents are not valid configuration JSON
    #[error("Invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),

    /// Parsed but unusable values
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Serial link and retry settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Serial device path
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Re-sends after a failed attempt
    pub max_retries: u32,
    /// Per-attempt reply timeout in milliseconds
    pub timeout_ms: u64,
    /// Devices tried after `port` by [`Controller::open_first_available`](crate::Controller::open_first_available)
    pub fallback_ports: Vec<String>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORTS[0].to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            max_retries: DEFAULT_MAX_RETRIES,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            fallback_ports: DEFAULT_PORTS.iter().map(|p| p.to_string()).collect(),
        }
    }
}

impl ControllerConfig {
    /// Parse from a JSON string and validate
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = parse(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a JSON file and validate
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config: Self = load(path.as_ref())?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the driver cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port.trim().is_empty() {
            return Err(ConfigError::Invalid("port must not be empty".into()));
        }
        if self.baud_rate == 0 {
            return Err(ConfigError::Invalid("baud_rate must be positive".into()));
        }
        if self.timeout_ms == 0 {
            return Err(ConfigError::Invalid("timeout_ms must be positive".into()));
        }
        Ok(())
    }

    /// Per-attempt reply timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Retry policy for the dispatcher
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, self.timeout())
    }

    /// `port` followed by the fallbacks, without duplicates
    pub fn candidate_ports(&self) -> Vec<String> {
        let mut ports = vec![self.port.clone()];
        for port in &self.fallback_ports {
            if !ports.contains(port) {
                ports.push(port.clone());
            }
        }
        ports
    }
}

/// What the poller queries and how often
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// Time between polling rounds in milliseconds
    pub interval_ms: u64,
    /// Queries issued each round, in order
    pub kinds: Vec<TelemetryKind>,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: 100,
            kinds: vec![
                TelemetryKind::Volts,
                TelemetryKind::MotorCurrent,
                TelemetryKind::BatteryCurrent,
                TelemetryKind::Temperature,
                TelemetryKind::EncoderCount,
                TelemetryKind::MotorRpm,
                TelemetryKind::MotorPower,
                TelemetryKind::Status,
                TelemetryKind::Fault,
            ],
        }
    }
}

impl PollConfig {
    /// Time between polling rounds, never zero
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }
}

/// Complete configuration file of the monitor
///
/// The controller settings sit at the top level, polling and diagnostics in
/// their own sections:
///
/// ```json
/// { "port": "/dev/ttyUSB0", "max_retries": 1, "poll": { "interval_ms": 50 } }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Serial link settings
    #[serde(flatten)]
    pub controller: ControllerConfig,
    /// Poller settings
    pub poll: PollConfig,
    /// Diagnostic limits
    pub thresholds: DiagnosticThresholds,
}

impl DriverConfig {
    /// Parse from a JSON string
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = parse(json)?;
        config.controller.validate()?;
        Ok(config)
    }

    /// Load from a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config: Self = load(path.as_ref())?;
        config.controller.validate()?;
        Ok(config)
    }
}

fn parse<T: DeserializeOwned>(json: &str) -> Result<T, ConfigError> {
    Ok(serde_json::from_str(json)?)
}

fn load<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse(&content)
}
