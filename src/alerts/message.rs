//! Alert message composition

use chrono::{DateTime, TimeZone};
use serde::{Deserialize, Serialize};

use crate::model::{CheckDefinition, Observation};

/// Message handed to a notifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertMessage {
    pub subject: String,
    pub body: String,
}

impl AlertMessage {
    /// Compose the message for an alert on `check`.
    ///
    /// `triggered_at` is rendered in whatever offset it carries.
    pub fn compose<Tz: TimeZone>(
        check: &CheckDefinition,
        observation: &Observation,
        triggered_at: &DateTime<Tz>,
        recovered: bool,
    ) -> Self
    where
        Tz::Offset: std::fmt::Display,
    {
        let subject = if recovered {
            format!("[{}] {} recovered", observation.status, check.name)
        } else {
            format!("[{}] {}", observation.status, check.name)
        };

        let mut lines = vec![
            format!("Trigger time: {}", triggered_at.to_rfc3339()),
            format!("Service type: {}", check.service_type),
            format!("Endpoint: {}", check.target),
            format!("Status: {}", observation.status),
            format!("Description: {}", observation.description),
        ];

        if let Some(error) = &observation.error_message {
            lines.push(format!("Error: {}", error));
        }

        // tags are a BTreeMap, so lines come out sorted by key
        for (key, value) in &observation.tags {
            lines.push(format!("{}: {}", key, value));
        }

        Self {
            subject,
            body: lines.join("\n"),
        }
    }
}
