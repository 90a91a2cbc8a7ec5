//! Backing store contract for status intervals and observations

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::model::{Observation, StatusInterval};

/// How a change treats the currently open interval
#[derive(Debug, Clone, PartialEq)]
pub enum IntervalUpdate {
    /// No interval is open yet; start the first one
    Open(StatusInterval),
    /// Same status, not stale: only bump `last_update_time`
    Refresh { at: DateTime<Utc> },
    /// Close the open interval and append new ones (last one open)
    Rotate {
        close_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
        append: Vec<StatusInterval>,
    },
}

/// One atomic change for a service key
#[derive(Debug, Clone, PartialEq)]
pub struct IntervalChange {
    pub service_key: String,
    /// Start of the open interval the change was computed from, `None` if there was none.
    /// The store rejects the change with [`RepositoryError::Conflict`] if it no longer matches.
    pub expected_open: Option<DateTime<Utc>>,
    pub update: IntervalUpdate,
    pub observation: Option<Observation>,
}

/// Rows removed by a purge
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeStats {
    pub intervals: usize,
    pub observations: usize,
}

/// Storage for intervals and observations.
///
/// `apply` must be all-or-nothing: either the whole change lands or none of it.
pub trait IntervalRepository: Send + Sync {
    /// The open interval for a service key
    fn open_interval(&self, service_key: &str) -> Result<Option<StatusInterval>, RepositoryError>;

    fn apply(&self, change: IntervalChange) -> Result<(), RepositoryError>;

    /// Intervals overlapping `[from, to]`, grouped by service key, ordered by start
    fn intervals_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<BTreeMap<String, Vec<StatusInterval>>, RepositoryError>;

    /// Observations within `[from, to]`, grouped by service key, ordered by time
    fn observations_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<BTreeMap<String, Vec<Observation>>, RepositoryError>;

    /// Drop closed intervals that ended and observations taken before `cutoff`
    fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<PurgeStats, RepositoryError>;
}

/// In-process repository
pub struct InMemoryRepository {
    intervals: DashMap<String, Vec<StatusInterval>>,
    observations: DashMap<String, Vec<Observation>>,
    available: AtomicBool,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self {
            intervals: DashMap::new(),
            observations: DashMap::new(),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate the store going away (and coming back)
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// All intervals for a key, ordered by start
    pub fn intervals_for(&self, service_key: &str) -> Vec<StatusInterval> {
        self.intervals
            .get(service_key)
            .map(|v| v.value().clone())
            .unwrap_or_default()
    }

    fn ensure_available(&self) -> Result<(), RepositoryError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RepositoryError::Unavailable("in-memory store disabled".to_string()))
        }
    }
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl IntervalRepository for InMemoryRepository {
    fn open_interval(&self, service_key: &str) -> Result<Option<StatusInterval>, RepositoryError> {
        self.ensure_available()?;
        Ok(self
            .intervals
            .get(service_key)
            .and_then(|v| v.last().filter(|i| i.is_open()).cloned()))
    }

    fn apply(&self, change: IntervalChange) -> Result<(), RepositoryError> {
        self.ensure_available()?;

        // the entry guard holds the shard lock for the whole change
        let mut entry = self.intervals.entry(change.service_key.clone()).or_default();
        let current_open = entry.last().filter(|i| i.is_open()).map(|i| i.start);

        if current_open != change.expected_open {
            return Err(RepositoryError::Conflict(change.service_key));
        }

        let mut next = entry.value().clone();
        let check_from = next.len().saturating_sub(1);

        match change.update {
            IntervalUpdate::Open(interval) => next.push(interval),
            IntervalUpdate::Refresh { at } => {
                let open = next
                    .last_mut()
                    .ok_or_else(|| RepositoryError::Conflict(change.service_key.clone()))?;
                open.last_update_time = at;
            }
            IntervalUpdate::Rotate {
                close_at,
                updated_at,
                append,
            } => {
                let open = next
                    .last_mut()
                    .ok_or_else(|| RepositoryError::Conflict(change.service_key.clone()))?;
                open.end = Some(close_at);
                open.last_update_time = updated_at;
                next.extend(append);
            }
        }

        validate_sequence(&change.service_key, &next[check_from..])?;

        *entry = next;
        drop(entry);

        if let Some(observation) = change.observation {
            self.observations
                .entry(change.service_key)
                .or_default()
                .push(observation);
        }

        Ok(())
    }

    fn intervals_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<BTreeMap<String, Vec<StatusInterval>>, RepositoryError> {
        self.ensure_available()?;

        let mut grouped = BTreeMap::new();
        for entry in self.intervals.iter() {
            let mut matching: Vec<StatusInterval> = entry
                .value()
                .iter()
                .filter(|i| i.overlaps(from, to))
                .cloned()
                .collect();
            if matching.is_empty() {
                continue;
            }
            matching.sort_by_key(|i| i.start);
            grouped.insert(entry.key().clone(), matching);
        }
        Ok(grouped)
    }

    fn observations_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<BTreeMap<String, Vec<Observation>>, RepositoryError> {
        self.ensure_available()?;

        let mut grouped = BTreeMap::new();
        for entry in self.observations.iter() {
            let mut matching: Vec<Observation> = entry
                .value()
                .iter()
                .filter(|o| o.timestamp >= from && o.timestamp <= to)
                .cloned()
                .collect();
            if matching.is_empty() {
                continue;
            }
            matching.sort_by_key(|o| o.timestamp);
            grouped.insert(entry.key().clone(), matching);
        }
        Ok(grouped)
    }

    fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<PurgeStats, RepositoryError> {
        self.ensure_available()?;
        let mut stats = PurgeStats::default();

        for mut entry in self.intervals.iter_mut() {
            let before = entry.len();
            entry.retain(|i| i.end.map(|end| end >= cutoff).unwrap_or(true));
            stats.intervals += before - entry.len();
        }
        self.intervals.retain(|_, v| !v.is_empty());

        for mut entry in self.observations.iter_mut() {
            let before = entry.len();
            entry.retain(|o| o.timestamp >= cutoff);
            stats.observations += before - entry.len();
        }
        self.observations.retain(|_, v| !v.is_empty());

        Ok(stats)
    }
}

/// At most one open interval (the last), each start <= end, no overlap
fn validate_sequence(
    service_key: &str,
    intervals: &[StatusInterval],
) -> Result<(), RepositoryError> {
    let violation = |msg: String| RepositoryError::Invariant(format!("{}: {}", service_key, msg));

    for (i, interval) in intervals.iter().enumerate() {
        let is_last = i + 1 == intervals.len();
        match interval.end {
            None if !is_last => return Err(violation("open interval before the last".to_string())),
            Some(end) if end < interval.start => {
                return Err(violation(format!(
                    "interval ends {} before it starts {}",
                    end, interval.start
                )))
            }
            _ => {}
        }
    }

    for pair in intervals.windows(2) {
        if let Some(end) = pair[0].end {
            if end > pair[1].start {
                return Err(violation(format!(
                    "interval ending {} overlaps one starting {}",
                    end, pair[1].start
                )));
            }
        }
    }

    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    #[error("Repository unavailable: {0}")]
    Unavailable(String),

    #[error("Open interval for '{0}' changed concurrently")]
    Conflict(String),

    #[error("Interval invariant violated for {0}")]
    Invariant(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::HealthStatus;
    use chrono::{Duration, TimeZone};

    fn at(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap() + Duration::minutes(minute)
    }

    fn open(start: i64, status: HealthStatus) -> StatusInterval {
        StatusInterval::open("api", status, at(start), None)
    }

    fn open_change(start: i64) -> IntervalChange {
        IntervalChange {
            service_key: "api".to_string(),
            expected_open: None,
            update: IntervalUpdate::Open(open(start, HealthStatus::Healthy)),
            observation: None,
        }
    }

    #[test]
    fn test_open_and_refresh() {
        let repo = InMemoryRepository::new();
        repo.apply(open_change(0)).unwrap();

        repo.apply(IntervalChange {
            service_key: "api".to_string(),
            expected_open: Some(at(0)),
            update: IntervalUpdate::Refresh { at: at(1) },
            observation: None,
        })
        .unwrap();

        let current = repo.open_interval("api").unwrap().unwrap();
        assert_eq!(current.last_update_time, at(1));
        assert_eq!(repo.intervals_for("api").len(), 1);
    }

    #[test]
    fn test_conflicting_change_is_rejected() {
        let repo = InMemoryRepository::new();
        repo.apply(open_change(0)).unwrap();

        // a second writer that still believes nothing is open
        let err = repo.apply(open_change(1)).unwrap_err();
        assert_eq!(err, RepositoryError::Conflict("api".to_string()));
        assert_eq!(repo.intervals_for("api").len(), 1);
    }

    #[test]
    fn test_invalid_rotation_leaves_store_untouched() {
        let repo = InMemoryRepository::new();
        repo.apply(open_change(10)).unwrap();

        // closing before the start would produce start > end
        let err = repo
            .apply(IntervalChange {
                service_key: "api".to_string(),
                expected_open: Some(at(10)),
                update: IntervalUpdate::Rotate {
                    close_at: at(5),
                    updated_at: at(5),
                    append: vec![open(5, HealthStatus::Unhealthy)],
                },
                observation: Some(crate::model::Observation::new(
                    "api",
                    HealthStatus::Unhealthy,
                    at(5),
                )),
            })
            .unwrap_err();

        assert!(matches!(err, RepositoryError::Invariant(_)));
        let intervals = repo.intervals_for("api");
        assert_eq!(intervals.len(), 1);
        assert!(intervals[0].is_open());
        assert!(repo.observations_between(at(0), at(60)).unwrap().is_empty());
    }

    #[test]
    fn test_unavailable() {
        let repo = InMemoryRepository::new();
        repo.set_available(false);
        assert!(matches!(
            repo.apply(open_change(0)),
            Err(RepositoryError::Unavailable(_))
        ));
        repo.set_available(true);
        assert!(repo.apply(open_change(0)).is_ok());
    }

    #[test]
    fn test_purge_keeps_open_intervals() {
        let repo = InMemoryRepository::new();
        repo.apply(open_change(0)).unwrap();
        repo.apply(IntervalChange {
            service_key: "api".to_string(),
            expected_open: Some(at(0)),
            update: IntervalUpdate::Rotate {
                close_at: at(10),
                updated_at: at(10),
                append: vec![open(10, HealthStatus::Unhealthy)],
            },
            observation: Some(crate::model::Observation::new(
                "api",
                HealthStatus::Unhealthy,
                at(10),
            )),
        })
        .unwrap();

        let stats = repo.purge_before(at(60)).unwrap();
        assert_eq!(stats, PurgeStats { intervals: 1, observations: 1 });

        let remaining = repo.intervals_for("api");
        assert_eq!(remaining.len(), 1);
        assert!(remaining[0].is_open());
    }
}
