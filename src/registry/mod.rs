//! Prober and notifier registration, resolution and validation

pub mod dispatcher;
pub mod error;
pub mod probe;

pub use dispatcher::{BuildSummary, NotifierFactory, ProberFactory, PublisherContext, Registry};
pub use error::{ConfigurationError, RegistryError, ValidationError};
pub use probe::{HttpProber, Monitor, ProbeOutcome, Prober, TcpProber};
