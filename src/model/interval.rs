//! Status intervals reconstructed from observations

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::observation::HealthStatus;

/// Reason recorded on synthetic intervals covering a gap in observations
pub const INACTIVITY_REASON: &str = "inactivity";

/// Key identifying one tracked service: `check` or `check@instance`
pub fn service_key(check_name: &str, instance: Option<&str>) -> String {
    match instance {
        Some(instance) if !instance.is_empty() => format!("{}@{}", check_name, instance),
        _ => check_name.to_string(),
    }
}

/// A time range during which a service held one status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusInterval {
    pub service_key: String,
    pub start: DateTime<Utc>,
    /// `None` while the interval is open
    pub end: Option<DateTime<Utc>>,
    pub status: HealthStatus,
    pub status_reason: Option<String>,
    pub last_update_time: DateTime<Utc>,
}

impl StatusInterval {
    /// Open a new interval at `start`
    pub fn open(
        service_key: impl Into<String>,
        status: HealthStatus,
        start: DateTime<Utc>,
        reason: Option<String>,
    ) -> Self {
        Self {
            service_key: service_key.into(),
            start,
            end: None,
            status,
            status_reason: reason,
            last_update_time: start,
        }
    }

    pub fn is_open(&self) -> bool {
        self.end.is_none()
    }

    /// Overlap with `[from, to]`: start in range, end in range, or spanning it.
    /// An open interval extends without bound.
    pub fn overlaps(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> bool {
        let start_in = self.start >= from && self.start <= to;
        match self.end {
            Some(end) => {
                let end_in = end >= from && end <= to;
                let spans = self.start <= from && end >= to;
                start_in || end_in || spans
            }
            None => start_in || self.start <= from,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap() + Duration::minutes(minute)
    }

    fn closed(start: i64, end: i64) -> StatusInterval {
        let mut interval = StatusInterval::open("api", HealthStatus::Healthy, at(start), None);
        interval.end = Some(at(end));
        interval
    }

    #[test]
    fn test_service_key() {
        assert_eq!(service_key("api", None), "api");
        assert_eq!(service_key("api", Some("")), "api");
        assert_eq!(service_key("api", Some("node-1")), "api@node-1");
    }

    #[test]
    fn test_overlap_three_ways() {
        // starts inside
        assert!(closed(5, 20).overlaps(at(0), at(10)));
        // ends inside
        assert!(closed(-5, 5).overlaps(at(0), at(10)));
        // spans the whole range
        assert!(closed(-5, 15).overlaps(at(0), at(10)));
        // entirely before / after
        assert!(!closed(-10, -5).overlaps(at(0), at(10)));
        assert!(!closed(11, 15).overlaps(at(0), at(10)));
    }

    #[test]
    fn test_open_interval_overlap() {
        let open = StatusInterval::open("api", HealthStatus::Healthy, at(-30), None);
        assert!(open.overlaps(at(0), at(10)));

        let later = StatusInterval::open("api", HealthStatus::Healthy, at(30), None);
        assert!(!later.overlaps(at(0), at(10)));
    }
}
