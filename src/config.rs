//! Service configuration
//!
//! Loaded from the JSON file named by `PULSEWATCH_CONFIG` (defaults when
//! unset), then overridden from the environment:
//!
//! - PULSEWATCH_HOST: Bind address (default: 0.0.0.0)
//! - PULSEWATCH_PORT: Port number (default: 8080)
//! - PULSEWATCH_INSTANCE_NAME: Suffix for service keys (default: none)
//! - PULSEWATCH_STALE_THRESHOLD_SECS: Inactivity threshold (default: 60)
//! - PULSEWATCH_RETENTION_HOURS: Interval retention (default: 168)

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::bus::DEFAULT_MAX_SUBSCRIBERS;
use crate::model::check::duration_secs;
use crate::model::{CheckDefinition, TransportSettings};
use crate::tracker::{DEFAULT_RETENTION, DEFAULT_STALE_THRESHOLD, DEFAULT_SWEEP_INTERVAL};

pub const CONFIG_PATH_VAR: &str = "PULSEWATCH_CONFIG";

/// Largest offset chrono accepts, in minutes (exclusive)
const MAX_OFFSET_MINUTES: i32 = 24 * 60;

/// Upper bound on the retention window (100 years)
pub const MAX_RETENTION: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// Alert delivery queue sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliverySettings {
    pub queue_capacity: usize,
    pub max_in_flight: usize,
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            max_in_flight: 16,
            timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub server: ServerSettings,
    /// Appended to check names as `check@instance` when set
    pub instance_name: Option<String>,
    #[serde(with = "duration_secs")]
    pub stale_threshold: Duration,
    #[serde(with = "duration_secs")]
    pub retention: Duration,
    #[serde(with = "duration_secs")]
    pub retention_sweep_interval: Duration,
    pub max_subscribers: usize,
    pub delivery: DeliverySettings,
    pub checks: Vec<CheckDefinition>,
    pub transports: HashMap<String, TransportSettings>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            instance_name: None,
            stale_threshold: DEFAULT_STALE_THRESHOLD,
            retention: DEFAULT_RETENTION,
            retention_sweep_interval: DEFAULT_SWEEP_INTERVAL,
            max_subscribers: DEFAULT_MAX_SUBSCRIBERS,
            delivery: DeliverySettings::default(),
            checks: Vec::new(),
            transports: HashMap::new(),
        }
    }
}

impl MonitorConfig {
    /// Parse a JSON config file. Not validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// File from `PULSEWATCH_CONFIG` if set, environment overrides, then validation
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = match std::env::var(CONFIG_PATH_VAR) {
            Ok(path) if !path.trim().is_empty() => Self::from_file(path.trim())?,
            _ => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `PULSEWATCH_*` overrides read through `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("PULSEWATCH_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("PULSEWATCH_PORT") {
            self.server.port = parse_var("PULSEWATCH_PORT", &port)?;
        }
        if let Some(instance) = lookup("PULSEWATCH_INSTANCE_NAME") {
            self.instance_name = (!instance.is_empty()).then_some(instance);
        }
        if let Some(secs) = lookup("PULSEWATCH_STALE_THRESHOLD_SECS") {
            let secs = parse_var("PULSEWATCH_STALE_THRESHOLD_SECS", &secs)?;
            self.stale_threshold = Duration::from_secs(secs);
        }
        if let Some(raw) = lookup("PULSEWATCH_RETENTION_HOURS") {
            let hours: u64 = parse_var("PULSEWATCH_RETENTION_HOURS", &raw)?;
            let secs = hours.checked_mul(60 * 60).ok_or_else(|| ConfigError::Env {
                var: "PULSEWATCH_RETENTION_HOURS".to_string(),
                value: raw.clone(),
            })?;
            self.retention = Duration::from_secs(secs);
        }
        Ok(())
    }

    /// Fill default check names and reject configurations the engine cannot run
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for check in &mut self.checks {
            check.apply_default_name();
            if !seen.insert(check.name.clone()) {
                return Err(ConfigError::DuplicateCheck(check.name.clone()));
            }

            let mut bound = HashSet::new();
            for binding in &check.transports {
                if !bound.insert(binding.transport_name.as_str()) {
                    return Err(ConfigError::DuplicateBinding {
                        check: check.name.clone(),
                        transport: binding.transport_name.clone(),
                    });
                }
                if binding.alert_by_fail_count == 0 {
                    return Err(ConfigError::ZeroFailCount {
                        check: check.name.clone(),
                        transport: binding.transport_name.clone(),
                    });
                }
            }
        }

        for (name, settings) in &self.transports {
            if settings.utc_offset_minutes.abs() >= MAX_OFFSET_MINUTES {
                return Err(ConfigError::OffsetOutOfRange {
                    transport: name.clone(),
                    minutes: settings.utc_offset_minutes,
                });
            }
        }

        if self.stale_threshold.is_zero() {
            return Err(ConfigError::Invalid("stale_threshold must be positive".to_string()));
        }
        if self.retention > MAX_RETENTION {
            return Err(ConfigError::Invalid(format!(
                "retention must not exceed {} hours",
                MAX_RETENTION.as_secs() / 3600
            )));
        }
        if self.retention_sweep_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "retention_sweep_interval must be positive".to_string(),
            ));
        }
        if self.delivery.queue_capacity == 0 || self.delivery.max_in_flight == 0 {
            return Err(ConfigError::Invalid(
                "delivery queue_capacity and max_in_flight must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(var: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Env {
        var: var.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Cannot read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid value '{value}' for {var}")]
    Env { var: String, value: String },

    #[error("Duplicate check name '{0}'")]
    DuplicateCheck(String),

    #[error("Check '{check}' binds transport '{transport}' more than once")]
    DuplicateBinding { check: String, transport: String },

    #[error("Check '{check}' binding to '{transport}' has alert_by_fail_count = 0")]
    ZeroFailCount { check: String, transport: String },

    #[error("Transport '{transport}' has UTC offset {minutes} minutes, out of range")]
    OffsetOutOfRange { transport: String, minutes: i32 },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
