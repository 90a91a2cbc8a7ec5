//! Report consumer contract

use crate::model::Report;

/// A consumer of completed reports
pub trait ReportObserver: Send + Sync {
    /// Name used in logs and diagnostics
    fn name(&self) -> &str;

    /// Handle one report. Errors are logged by the bus and never reach the publisher.
    fn on_report(&self, report: &Report) -> Result<(), ObserverError>;
}

/// Failure raised by an observer while handling a report
#[derive(Debug, thiserror::Error)]
#[error("Observer '{observer}' failed: {message}")]
pub struct ObserverError {
    pub observer: String,
    pub message: String,
}

impl ObserverError {
    pub fn new(observer: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            observer: observer.into(),
            message: message.into(),
        }
    }
}
