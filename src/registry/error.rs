use serde::Serialize;

use crate::bus::BusError;
use crate::model::{ServiceType, TransportMethod};

/// A prober or notifier whose settings are unusable. Only that strategy is excluded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("'{subject}': invalid field '{field}': {reason}")]
pub struct ValidationError {
    /// Check or transport name
    pub subject: String,
    pub field: String,
    pub reason: String,
}

impl ValidationError {
    pub fn new(
        subject: impl Into<String>,
        field: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Fatal startup errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("No prober registered for service type '{service_type}' (check '{check}')")]
    UnknownServiceType {
        check: String,
        service_type: ServiceType,
    },

    #[error("No notifier registered for transport method '{method}' (transport '{transport}')")]
    UnknownTransportMethod {
        transport: String,
        method: TransportMethod,
    },

    #[error("Check '{check}' references undefined transport '{transport}'")]
    UnknownTransport { check: String, transport: String },

    #[error("Transport '{transport}' is '{configured}', check '{check}' binds it as '{binding}'")]
    MethodMismatch {
        check: String,
        transport: String,
        binding: TransportMethod,
        configured: TransportMethod,
    },

    #[error("Cannot subscribe publisher: {0}")]
    Subscribe(#[from] BusError),
}

/// Resolution failure: fatal configuration error or per-strategy validation error
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}
