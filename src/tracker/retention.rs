use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Notify;
use tokio::time;

use super::repository::{IntervalRepository, PurgeStats, RepositoryError};

pub const DEFAULT_RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Retention worker that periodically purges old intervals and observations
pub struct RetentionWorker {
    repository: Arc<dyn IntervalRepository>,
    retention: Duration,
    interval: Duration,
    running: AtomicBool,
    shutdown: Notify,
}

impl RetentionWorker {
    pub fn new(
        repository: Arc<dyn IntervalRepository>,
        retention: Duration,
        interval: Duration,
    ) -> Self {
        Self {
            repository,
            retention,
            interval,
            running: AtomicBool::new(false),
            shutdown: Notify::new(),
        }
    }

    /// Start the background worker
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);

        tokio::spawn(async move {
            tracing::info!(
                retention = ?self.retention,
                interval = ?self.interval,
                "Retention worker started"
            );

            let mut ticker = time::interval(self.interval);

            while self.running.load(Ordering::SeqCst) {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = self.shutdown.notified() => break,
                }

                match self.sweep() {
                    Ok(stats) if stats.intervals + stats.observations > 0 => {
                        tracing::info!(
                            intervals = stats.intervals,
                            observations = stats.observations,
                            "Retention worker purged expired data"
                        );
                    }
                    Ok(_) => {}
                    Err(e) => tracing::error!(error = %e, "Retention sweep failed"),
                }
            }

            tracing::info!("Retention worker stopped");
        })
    }

    /// Purge everything older than the retention window, once
    pub fn sweep(&self) -> Result<PurgeStats, RepositoryError> {
        let cutoff = chrono::Duration::from_std(self.retention)
            .ok()
            .and_then(|retention| Utc::now().checked_sub_signed(retention));

        match cutoff {
            Some(cutoff) => self.repository.purge_before(cutoff),
            None => {
                // Cutoff predates anything representable
                tracing::debug!(retention = ?self.retention, "Retention sweep skipped");
                Ok(PurgeStats::default())
            }
        }
    }

    /// Stop the worker
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.shutdown.notify_one();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
