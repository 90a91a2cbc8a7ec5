//! Status interval reconstruction and its backing store

pub mod repository;
pub mod retention;
pub mod status;

pub use repository::{
    InMemoryRepository, IntervalChange, IntervalRepository, IntervalUpdate, PurgeStats,
    RepositoryError,
};
pub use retention::{RetentionWorker, DEFAULT_RETENTION, DEFAULT_SWEEP_INTERVAL};
pub use status::{StatusIntervalTracker, TrackerError, DEFAULT_STALE_THRESHOLD};
