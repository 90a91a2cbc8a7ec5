use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;

use super::repository::{IntervalChange, IntervalRepository, IntervalUpdate, RepositoryError};
use crate::bus::{ObserverError, ReportObserver};
use crate::model::{
    service_key, HealthStatus, Observation, ObservationError, Report, StatusInterval,
    INACTIVITY_REASON,
};

/// Default gap after which an open interval is considered stale
pub const DEFAULT_STALE_THRESHOLD: Duration = Duration::from_secs(60);

/// Attempts made when another writer changes the open interval underneath us
const MAX_ATTEMPTS: usize = 3;

const OBSERVER_NAME: &str = "status-tracker";

/// Rebuilds contiguous status intervals per service key from observations
pub struct StatusIntervalTracker {
    repository: Arc<dyn IntervalRepository>,
    stale_threshold: chrono::Duration,
    instance_name: Option<String>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl StatusIntervalTracker {
    pub fn new(repository: Arc<dyn IntervalRepository>) -> Self {
        Self {
            repository,
            stale_threshold: to_chrono(DEFAULT_STALE_THRESHOLD),
            instance_name: None,
            locks: DashMap::new(),
        }
    }

    pub fn with_stale_threshold(mut self, threshold: Duration) -> Self {
        self.stale_threshold = to_chrono(threshold);
        self
    }

    /// Suffix appended to check names when deriving service keys
    pub fn with_instance_name(mut self, instance: impl Into<String>) -> Self {
        let instance = instance.into();
        self.instance_name = (!instance.is_empty()).then_some(instance);
        self
    }

    pub fn repository(&self) -> &Arc<dyn IntervalRepository> {
        &self.repository
    }

    /// Service key for a check as seen by this tracker
    pub fn key_for(&self, check_name: &str) -> String {
        service_key(check_name, self.instance_name.as_deref())
    }

    /// Fold one observation into the intervals of `service_key`
    pub fn record(
        &self,
        service_key: &str,
        observation: &Observation,
        now: DateTime<Utc>,
    ) -> Result<(), TrackerError> {
        let lock = Arc::clone(
            &self
                .locks
                .entry(service_key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        );
        let _guard = lock.lock();

        let mut attempt = 0;
        loop {
            attempt += 1;
            let open = self.repository.open_interval(service_key)?;
            let change = self.plan(service_key, open, observation, now)?;

            match self.repository.apply(change) {
                Ok(()) => return Ok(()),
                Err(RepositoryError::Conflict(_)) if attempt < MAX_ATTEMPTS => {
                    tracing::debug!(
                        service = %service_key,
                        attempt,
                        "Open interval changed, retrying"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn plan(
        &self,
        key: &str,
        open: Option<StatusInterval>,
        observation: &Observation,
        now: DateTime<Utc>,
    ) -> Result<IntervalChange, TrackerError> {
        let Some(open) = open else {
            return Ok(IntervalChange {
                service_key: key.to_string(),
                expected_open: None,
                update: IntervalUpdate::Open(StatusInterval::open(
                    key,
                    observation.status,
                    now,
                    None,
                )),
                observation: Some(observation.clone()),
            });
        };

        if now < open.last_update_time {
            return Err(TrackerError::OutOfOrder {
                service_key: key.to_string(),
                at: now,
                last_update: open.last_update_time,
            });
        }

        let stale = now - open.last_update_time > self.stale_threshold;

        let update = if !stale && open.status == observation.status {
            IntervalUpdate::Refresh { at: now }
        } else {
            let close_at = if stale {
                open.last_update_time + self.stale_threshold
            } else {
                now
            };

            let mut append = Vec::with_capacity(2);
            if stale {
                let mut gap = StatusInterval::open(
                    key,
                    HealthStatus::Unknown,
                    close_at,
                    Some(INACTIVITY_REASON.to_string()),
                );
                gap.end = Some(now);
                gap.last_update_time = now;
                append.push(gap);

                tracing::info!(
                    service = %key,
                    since = %open.last_update_time,
                    "No observations within the stale threshold, recording inactivity"
                );
            }
            append.push(StatusInterval::open(key, observation.status, now, None));

            IntervalUpdate::Rotate {
                close_at,
                updated_at: now,
                append,
            }
        };

        Ok(IntervalChange {
            service_key: key.to_string(),
            expected_open: Some(open.start),
            update,
            observation: Some(observation.clone()),
        })
    }

    pub fn intervals_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<BTreeMap<String, Vec<StatusInterval>>, TrackerError> {
        Ok(self.repository.intervals_between(from, to)?)
    }

    pub fn observations_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<BTreeMap<String, Vec<Observation>>, TrackerError> {
        Ok(self.repository.observations_between(from, to)?)
    }
}

impl ReportObserver for StatusIntervalTracker {
    fn name(&self) -> &str {
        OBSERVER_NAME
    }

    fn on_report(&self, report: &Report) -> Result<(), ObserverError> {
        let mut failures = Vec::new();
        let mut total = 0;

        for observation in report.observations() {
            if observation.check_name.is_empty() {
                tracing::warn!(error = %ObservationError::EmptyCheckName, "Skipping report entry");
                continue;
            }
            total += 1;

            let key = self.key_for(&observation.check_name);
            if let Err(e) = self.record(&key, &observation, report.timestamp) {
                tracing::error!(service = %key, error = %e, "Failed to record observation");
                failures.push(format!("{}: {}", key, e));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(ObserverError::new(
                OBSERVER_NAME,
                format!(
                    "{} of {} observations failed ({})",
                    failures.len(),
                    total,
                    failures.join("; ")
                ),
            ))
        }
    }
}

fn to_chrono(threshold: Duration) -> chrono::Duration {
    // thresholds beyond a year are treated as a year
    let capped = threshold.min(Duration::from_secs(365 * 24 * 60 * 60));
    chrono::Duration::milliseconds(capped.as_millis() as i64)
}

#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("Observation for '{service_key}' at {at} is older than the last update {last_update}")]
    OutOfOrder {
        service_key: String,
        at: DateTime<Utc>,
        last_update: DateTime<Utc>,
    },
}
