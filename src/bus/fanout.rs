//! In-process fan-out of reports to subscribed observers

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use super::observer::ReportObserver;
use crate::model::Report;

/// Default bound on the number of subscribers
pub const DEFAULT_MAX_SUBSCRIBERS: usize = 64;

struct Entry {
    id: u64,
    observer: Arc<dyn ReportObserver>,
}

struct Inner {
    subscribers: RwLock<Vec<Entry>>,
    next_id: AtomicU64,
    max_subscribers: usize,
}

impl Inner {
    fn remove(&self, id: u64) -> bool {
        let mut subscribers = self.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|e| e.id != id);
        subscribers.len() != before
    }
}

/// Fan-out dispatcher delivering each report to every observer in subscription order
#[derive(Clone)]
pub struct ObservationBus {
    inner: Arc<Inner>,
}

impl ObservationBus {
    pub fn new() -> Self {
        Self::with_max_subscribers(DEFAULT_MAX_SUBSCRIBERS)
    }

    pub fn with_max_subscribers(max_subscribers: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                subscribers: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(1),
                max_subscribers,
            }),
        }
    }

    /// Subscribe an observer. Subscribing the same observer twice returns
    /// a handle to the existing subscription.
    pub fn subscribe(&self, observer: Arc<dyn ReportObserver>) -> Result<Subscription, BusError> {
        let mut subscribers = self.inner.subscribers.write();

        if let Some(existing) = subscribers
            .iter()
            .find(|e| same_observer(&e.observer, &observer))
        {
            return Ok(Subscription {
                id: existing.id,
                bus: Arc::downgrade(&self.inner),
            });
        }

        if subscribers.len() >= self.inner.max_subscribers {
            return Err(BusError::Full(self.inner.max_subscribers));
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(observer = %observer.name(), id, "Observer subscribed");
        subscribers.push(Entry { id, observer });

        Ok(Subscription {
            id,
            bus: Arc::downgrade(&self.inner),
        })
    }

    /// Deliver a report to every current subscriber.
    ///
    /// Iterates a snapshot so observers may unsubscribe while delivery is in flight.
    pub fn publish(&self, report: &Report) -> PublishSummary {
        let snapshot: Vec<Arc<dyn ReportObserver>> = self
            .inner
            .subscribers
            .read()
            .iter()
            .map(|e| Arc::clone(&e.observer))
            .collect();

        let mut summary = PublishSummary::default();

        for observer in snapshot {
            match catch_unwind(AssertUnwindSafe(|| observer.on_report(report))) {
                Ok(Ok(())) => summary.delivered += 1,
                Ok(Err(e)) => {
                    summary.failed += 1;
                    tracing::error!(observer = %observer.name(), error = %e, "Observer failed");
                }
                Err(_) => {
                    summary.failed += 1;
                    tracing::error!(observer = %observer.name(), "Observer panicked");
                }
            }
        }

        summary
    }

    /// Number of current subscribers
    pub fn len(&self) -> usize {
        self.inner.subscribers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Names of current subscribers, in delivery order
    pub fn observer_names(&self) -> Vec<String> {
        self.inner
            .subscribers
            .read()
            .iter()
            .map(|e| e.observer.name().to_string())
            .collect()
    }
}

impl Default for ObservationBus {
    fn default() -> Self {
        Self::new()
    }
}

fn same_observer(a: &Arc<dyn ReportObserver>, b: &Arc<dyn ReportObserver>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

/// Handle returned by [`ObservationBus::subscribe`]
#[derive(Debug, Clone)]
pub struct Subscription {
    id: u64,
    bus: Weak<Inner>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Remove the observer. Returns false if it was already removed or the bus is gone.
    pub fn unsubscribe(&self) -> bool {
        self.bus.upgrade().map(|bus| bus.remove(self.id)).unwrap_or(false)
    }
}

/// Outcome of one publish
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishSummary {
    pub delivered: usize,
    pub failed: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Subscriber limit of {0} reached")]
    Full(usize),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::ObserverError;
    use crate::model::HealthStatus;
    use chrono::Utc;
    use parking_lot::Mutex;

    struct Recording {
        name: String,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl ReportObserver for Recording {
        fn name(&self) -> &str {
            &self.name
        }

        fn on_report(&self, _report: &Report) -> Result<(), ObserverError> {
            self.log.lock().push(self.name.clone());
            Ok(())
        }
    }

    struct Failing;

    impl ReportObserver for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn on_report(&self, _report: &Report) -> Result<(), ObserverError> {
            Err(ObserverError::new("failing", "boom"))
        }
    }

    struct Panicking;

    impl ReportObserver for Panicking {
        fn name(&self) -> &str {
            "panicking"
        }

        fn on_report(&self, _report: &Report) -> Result<(), ObserverError> {
            panic!("observer bug");
        }
    }

    /// Unsubscribes itself while a publish is running
    struct SelfRemoving {
        handle: Mutex<Option<Subscription>>,
        calls: Mutex<usize>,
    }

    impl ReportObserver for SelfRemoving {
        fn name(&self) -> &str {
            "self-removing"
        }

        fn on_report(&self, _report: &Report) -> Result<(), ObserverError> {
            *self.calls.lock() += 1;
            if let Some(handle) = self.handle.lock().take() {
                handle.unsubscribe();
            }
            Ok(())
        }
    }

    fn report() -> Report {
        Report {
            status: HealthStatus::Healthy,
            timestamp: Utc::now(),
            entries: vec![],
        }
    }

    fn recording(name: &str, log: &Arc<Mutex<Vec<String>>>) -> Arc<dyn ReportObserver> {
        Arc::new(Recording {
            name: name.to_string(),
            log: Arc::clone(log),
        })
    }

    #[test]
    fn test_delivers_in_subscription_order() {
        let bus = ObservationBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        bus.subscribe(recording("first", &log)).unwrap();
        bus.subscribe(recording("second", &log)).unwrap();

        let summary = bus.publish(&report());
        assert_eq!(summary.delivered, 2);
        assert_eq!(*log.lock(), vec!["first".to_string(), "second".to_string()]);
    }

    #[test]
    fn test_failures_are_isolated() {
        let bus = ObservationBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        bus.subscribe(Arc::new(Failing)).unwrap();
        bus.subscribe(Arc::new(Panicking)).unwrap();
        bus.subscribe(recording("after", &log)).unwrap();

        let summary = bus.publish(&report());
        assert_eq!(summary, PublishSummary { delivered: 1, failed: 2 });
        assert_eq!(*log.lock(), vec!["after".to_string()]);
    }

    #[test]
    fn test_duplicate_subscribe_is_noop() {
        let bus = ObservationBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let observer = recording("once", &log);

        let a = bus.subscribe(Arc::clone(&observer)).unwrap();
        let b = bus.subscribe(observer).unwrap();
        assert_eq!(a.id(), b.id());
        assert_eq!(bus.len(), 1);

        bus.publish(&report());
        assert_eq!(log.lock().len(), 1);
    }

    #[test]
    fn test_unsubscribe() {
        let bus = ObservationBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let handle = bus.subscribe(recording("gone", &log)).unwrap();
        assert!(handle.unsubscribe());
        assert!(!handle.unsubscribe());
        assert!(bus.is_empty());

        bus.publish(&report());
        assert!(log.lock().is_empty());
    }

    #[test]
    fn test_unsubscribe_during_publish() {
        let bus = ObservationBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let observer = Arc::new(SelfRemoving {
            handle: Mutex::new(None),
            calls: Mutex::new(0),
        });

        let handle = bus.subscribe(observer.clone()).unwrap();
        *observer.handle.lock() = Some(handle);
        bus.subscribe(recording("next", &log)).unwrap();

        let summary = bus.publish(&report());
        assert_eq!(summary.delivered, 2);
        assert_eq!(bus.len(), 1);

        bus.publish(&report());
        assert_eq!(*observer.calls.lock(), 1);
        assert_eq!(log.lock().len(), 2);
    }

    #[test]
    fn test_subscriber_bound() {
        let bus = ObservationBus::with_max_subscribers(1);
        let log = Arc::new(Mutex::new(Vec::new()));

        bus.subscribe(recording("a", &log)).unwrap();
        assert!(matches!(
            bus.subscribe(recording("b", &log)),
            Err(BusError::Full(1))
        ));
    }
}
