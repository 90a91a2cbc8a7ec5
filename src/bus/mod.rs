//! Report fan-out
//!
//! Delivers each completed report to every subscribed observer, isolating
//! one observer's failure from the rest.

pub mod fanout;
pub mod observer;

pub use fanout::{BusError, ObservationBus, PublishSummary, Subscription, DEFAULT_MAX_SUBSCRIBERS};
pub use observer::{ObserverError, ReportObserver};
