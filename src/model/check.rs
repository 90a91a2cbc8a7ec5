//! Check definitions, transport bindings and transport settings

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use chrono::{FixedOffset, NaiveTime, Offset, Utc};
use serde::{Deserialize, Serialize};

/// Discriminator selecting the prober for a check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    Http,
    Tcp,
    Sql,
    Redis,
    Ping,
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServiceType::Http => "http",
            ServiceType::Tcp => "tcp",
            ServiceType::Sql => "sql",
            ServiceType::Redis => "redis",
            ServiceType::Ping => "ping",
        };
        f.write_str(s)
    }
}

/// Discriminator selecting the notifier for a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMethod {
    Log,
    Webhook,
    Email,
    Slack,
    Telegram,
}

impl fmt::Display for TransportMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransportMethod::Log => "log",
            TransportMethod::Webhook => "webhook",
            TransportMethod::Email => "email",
            TransportMethod::Slack => "slack",
            TransportMethod::Telegram => "telegram",
        };
        f.write_str(s)
    }
}

/// A configured service check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckDefinition {
    /// Unique check name; defaulted from type and target when empty
    #[serde(default)]
    pub name: String,
    pub service_type: ServiceType,
    /// Host, endpoint or connection string
    pub target: String,
    /// Polling interval, consumed by the external scheduler
    #[serde(with = "duration_secs", default = "default_interval")]
    pub interval: Duration,
    /// Probe timeout
    #[serde(with = "duration_secs", default = "default_timeout")]
    pub timeout: Duration,
    #[serde(default)]
    pub transports: Vec<TransportBinding>,
}

impl CheckDefinition {
    pub fn new(
        name: impl Into<String>,
        service_type: ServiceType,
        target: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            service_type,
            target: target.into(),
            interval: default_interval(),
            timeout: default_timeout(),
            transports: Vec::new(),
        }
    }

    pub fn with_transport(mut self, binding: TransportBinding) -> Self {
        self.transports.push(binding);
        self
    }

    /// Fill in the name if none was configured
    pub fn apply_default_name(&mut self) {
        if self.name.trim().is_empty() {
            self.name = format!("{}:{}", self.service_type, self.target);
        }
    }

    /// Binding for a named transport, if this check uses it
    pub fn binding(&self, transport_name: &str) -> Option<&TransportBinding> {
        self.transports
            .iter()
            .find(|b| b.transport_name == transport_name)
    }
}

/// How and when a check alerts through one transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportBinding {
    pub transport_method: TransportMethod,
    pub transport_name: String,
    #[serde(default)]
    pub alert_once: bool,
    #[serde(default = "default_true")]
    pub alert_on_service_recovered: bool,
    /// Minimum time between two alerts
    #[serde(with = "duration_secs", default)]
    pub alert_every: Duration,
    #[serde(default = "midnight")]
    pub start_alerting_on: NaiveTime,
    #[serde(default = "midnight")]
    pub stop_alerting_on: NaiveTime,
    #[serde(default = "default_fail_count")]
    pub alert_by_fail_count: u32,
    #[serde(default)]
    pub publish_all_results: bool,
}

impl TransportBinding {
    pub fn new(transport_method: TransportMethod, transport_name: impl Into<String>) -> Self {
        Self {
            transport_method,
            transport_name: transport_name.into(),
            alert_once: false,
            alert_on_service_recovered: true,
            alert_every: Duration::ZERO,
            start_alerting_on: midnight(),
            stop_alerting_on: midnight(),
            alert_by_fail_count: default_fail_count(),
            publish_all_results: false,
        }
    }

    pub fn with_alert_once(mut self, alert_once: bool) -> Self {
        self.alert_once = alert_once;
        self
    }

    pub fn with_recovery_alert(mut self, enabled: bool) -> Self {
        self.alert_on_service_recovered = enabled;
        self
    }

    pub fn with_alert_every(mut self, every: Duration) -> Self {
        self.alert_every = every;
        self
    }

    pub fn with_window(mut self, start: NaiveTime, stop: NaiveTime) -> Self {
        self.start_alerting_on = start;
        self.stop_alerting_on = stop;
        self
    }

    pub fn with_fail_count(mut self, count: u32) -> Self {
        self.alert_by_fail_count = count;
        self
    }

    pub fn with_publish_all(mut self, publish_all: bool) -> Self {
        self.publish_all_results = publish_all;
        self
    }

    /// Whether a local time of day falls in `[start, stop)`.
    ///
    /// `start == stop` covers the whole day; `start > stop` wraps midnight.
    pub fn in_window(&self, time_of_day: NaiveTime) -> bool {
        let (start, stop) = (self.start_alerting_on, self.stop_alerting_on);
        if start == stop {
            true
        } else if start < stop {
            start <= time_of_day && time_of_day < stop
        } else {
            time_of_day >= start || time_of_day < stop
        }
    }
}

/// Named transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportSettings {
    pub method: TransportMethod,
    /// Offset applied to alerting windows and message timestamps
    #[serde(default)]
    pub utc_offset_minutes: i32,
    /// Transport specific fields, e.g. `url` for webhooks
    #[serde(default)]
    pub options: HashMap<String, String>,
}

impl TransportSettings {
    pub fn new(method: TransportMethod) -> Self {
        Self {
            method,
            utc_offset_minutes: 0,
            options: HashMap::new(),
        }
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    pub fn with_utc_offset(mut self, minutes: i32) -> Self {
        self.utc_offset_minutes = minutes;
        self
    }

    pub fn option(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }

    /// Configured offset, UTC when out of range
    pub fn offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes * 60)
            .unwrap_or_else(|| Utc.fix())
    }
}

fn default_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_fail_count() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

fn midnight() -> NaiveTime {
    NaiveTime::MIN
}

/// Durations as whole seconds
pub(crate) mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn time(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn test_window_bounds() {
        let binding = TransportBinding::new(TransportMethod::Log, "ops")
            .with_window(time(8, 0), time(18, 0));

        assert!(binding.in_window(time(8, 0)));
        assert!(binding.in_window(time(12, 30)));
        assert!(!binding.in_window(time(18, 0)));
        assert!(!binding.in_window(time(7, 59)));
    }

    #[test]
    fn test_window_whole_day_and_overnight() {
        let whole_day = TransportBinding::new(TransportMethod::Log, "ops");
        assert!(whole_day.in_window(time(0, 0)));
        assert!(whole_day.in_window(time(23, 59)));

        let overnight = TransportBinding::new(TransportMethod::Log, "ops")
            .with_window(time(22, 0), time(6, 0));
        assert!(overnight.in_window(time(23, 0)));
        assert!(overnight.in_window(time(3, 0)));
        assert!(!overnight.in_window(time(12, 0)));
    }

    #[test]
    fn test_binding_defaults_from_json() {
        let binding: TransportBinding = serde_json::from_value(serde_json::json!({
            "transport_method": "webhook",
            "transport_name": "ops-hook",
            "alert_every": 300,
            "start_alerting_on": "08:00:00",
            "stop_alerting_on": "20:00:00"
        }))
        .unwrap();

        assert_eq!(binding.transport_method, TransportMethod::Webhook);
        assert_eq!(binding.alert_every, Duration::from_secs(300));
        assert_eq!(binding.alert_by_fail_count, 1);
        assert!(binding.alert_on_service_recovered);
        assert!(!binding.alert_once);
        assert_eq!(binding.start_alerting_on, time(8, 0));
    }

    #[test]
    fn test_default_name() {
        let mut check = CheckDefinition::new("", ServiceType::Http, "http://localhost/health");
        check.apply_default_name();
        assert_eq!(check.name, "http:http://localhost/health");

        let mut named = CheckDefinition::new("api", ServiceType::Http, "http://localhost");
        named.apply_default_name();
        assert_eq!(named.name, "api");
    }

    #[test]
    fn test_transport_offset() {
        let settings = TransportSettings::new(TransportMethod::Log).with_utc_offset(120);
        assert_eq!(settings.offset().local_minus_utc(), 7200);

        let invalid = TransportSettings::new(TransportMethod::Log).with_utc_offset(100_000);
        assert_eq!(invalid.offset().local_minus_utc(), 0);
    }
}
