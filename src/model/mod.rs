pub mod check;
pub mod interval;
pub mod observation;

pub use check::{CheckDefinition, ServiceType, TransportBinding, TransportMethod, TransportSettings};
pub use interval::{service_key, StatusInterval, INACTIVITY_REASON};
pub use observation::{HealthStatus, Observation, ObservationError, Report, ReportEntry};
