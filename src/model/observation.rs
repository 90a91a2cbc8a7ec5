//! Observations and the reports that carry them

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Health status reported by a probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum HealthStatus {
    Unhealthy,
    Degraded,
    #[default]
    Healthy,
    Unknown,
}

impl HealthStatus {
    /// Unhealthy and Degraded both count as failures for alerting
    pub fn is_failed(self) -> bool {
        matches!(self, HealthStatus::Unhealthy | HealthStatus::Degraded)
    }

    /// Ordering used to derive a report's overall status
    fn severity(self) -> u8 {
        match self {
            HealthStatus::Healthy => 0,
            HealthStatus::Unknown => 1,
            HealthStatus::Degraded => 2,
            HealthStatus::Unhealthy => 3,
        }
    }

    /// The worse of two statuses
    pub fn worst(self, other: HealthStatus) -> HealthStatus {
        if other.severity() > self.severity() {
            other
        } else {
            self
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HealthStatus::Unhealthy => "Unhealthy",
            HealthStatus::Degraded => "Degraded",
            HealthStatus::Healthy => "Healthy",
            HealthStatus::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

/// One timestamped status result for a single named check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub check_name: String,
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl Observation {
    pub fn new(
        check_name: impl Into<String>,
        status: HealthStatus,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            check_name: check_name.into(),
            status,
            timestamp,
            description: String::new(),
            error_message: None,
            duration_ms: 0,
            tags: BTreeMap::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error_message = Some(error.into());
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }
}

/// One entry of an inbound report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportEntry {
    pub check_name: String,
    pub status: HealthStatus,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

/// The full set of observations produced by one tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub entries: Vec<ReportEntry>,
}

impl Report {
    /// Build a report from observations, deriving the overall status
    pub fn from_observations(timestamp: DateTime<Utc>, observations: Vec<Observation>) -> Self {
        let status = observations
            .iter()
            .fold(HealthStatus::Healthy, |acc, o| acc.worst(o.status));

        let entries = observations
            .into_iter()
            .map(|o| ReportEntry {
                check_name: o.check_name,
                status: o.status,
                description: o.description,
                error_message: o.error_message,
                duration_ms: o.duration_ms,
                tags: o.tags,
            })
            .collect();

        Self {
            status,
            timestamp,
            entries,
        }
    }

    /// Find the entry for a check
    pub fn entry(&self, check_name: &str) -> Option<&ReportEntry> {
        self.entries.iter().find(|e| e.check_name == check_name)
    }

    /// Observation for a check, stamped with the report timestamp
    pub fn observation(&self, check_name: &str) -> Option<Observation> {
        self.entry(check_name).map(|e| self.to_observation(e))
    }

    /// All entries as observations
    pub fn observations(&self) -> impl Iterator<Item = Observation> + '_ {
        self.entries.iter().map(|e| self.to_observation(e))
    }

    fn to_observation(&self, entry: &ReportEntry) -> Observation {
        Observation {
            check_name: entry.check_name.clone(),
            status: entry.status,
            timestamp: self.timestamp,
            description: entry.description.clone(),
            error_message: entry.error_message.clone(),
            duration_ms: entry.duration_ms,
            tags: entry.tags.clone(),
        }
    }
}

/// A report entry that cannot be evaluated
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ObservationError {
    #[error("Report has no entry for configured check '{0}'")]
    MissingEntry(String),

    #[error("Report entry has an empty check name")]
    EmptyCheckName,
}
