//! pulsewatch: service health monitoring and alerting
//!
//! Consumes reports of health observations, decides per (check, transport)
//! whether to alert, and keeps a history of status intervals per service.
//!
//! # Features
//!
//! - **Alert Rules**: Fail-count thresholds, alert-once, repeat intervals,
//!   recovery alerts and time-of-day windows per transport
//! - **Pluggable Strategies**: Probers registered per service type, notifiers
//!   per transport method
//! - **Observation Bus**: Ordered fan-out with per-observer failure isolation
//! - **Status Intervals**: Contiguous status history with inactivity detection
//! - **Retention**: Automatic removal of old intervals and observations
//!
//! # Example
//!
//! ```no_run
//! use chrono::Utc;
//! use pulsewatch::config::MonitorConfig;
//! use pulsewatch::engine::MonitorEngine;
//! use pulsewatch::model::{HealthStatus, Observation, Report};
//!
//! let engine = MonitorEngine::from_config(MonitorConfig::default()).unwrap();
//!
//! let now = Utc::now();
//! let report = Report::from_observations(
//!     now,
//!     vec![Observation::new("api", HealthStatus::Unhealthy, now)],
//! );
//! engine.publish(&report);
//!
//! let history = engine.tracker().intervals_between(now, now).unwrap();
//! println!("Intervals: {:?}", history);
//! ```

pub mod alerts;
pub mod api;
pub mod bus;
pub mod config;
pub mod engine;
pub mod model;
pub mod registry;
pub mod tracker;

// Re-export commonly used types
pub use alerts::{AlertRuleEvaluator, RuleKey, RuleState};
pub use bus::{ObservationBus, ReportObserver};
pub use config::{ConfigError, MonitorConfig};
pub use engine::{EngineError, MonitorEngine};
pub use model::{
    CheckDefinition, HealthStatus, Observation, Report, StatusInterval, TransportBinding,
};
pub use registry::Registry;
pub use tracker::{InMemoryRepository, IntervalRepository, StatusIntervalTracker};
