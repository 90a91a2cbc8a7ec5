//! Notification strategies for alerts

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use super::message::AlertMessage;
use crate::model::{TransportMethod, TransportSettings};
use crate::registry::ValidationError;

/// Delivery strategy for one named transport
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Transport name this notifier was built for
    fn name(&self) -> &str;

    fn method(&self) -> TransportMethod;

    /// Check the transport settings before the notifier is wired in
    fn validate(&self) -> Result<(), ValidationError>;

    /// Deliver one message
    async fn send(&self, message: &AlertMessage) -> Result<(), DeliveryError>;
}

/// Writes alerts to the tracing log
pub struct LogNotifier {
    name: String,
}

impl LogNotifier {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        &self.name
    }

    fn method(&self) -> TransportMethod {
        TransportMethod::Log
    }

    fn validate(&self) -> Result<(), ValidationError> {
        Ok(())
    }

    async fn send(&self, message: &AlertMessage) -> Result<(), DeliveryError> {
        tracing::warn!(
            transport = %self.name,
            subject = %message.subject,
            "Alert triggered:\n{}",
            message.body
        );
        Ok(())
    }
}

/// Posts alerts as JSON to an HTTP endpoint.
///
/// Options: `url` (required), `header.<Name>` for extra request headers.
pub struct WebhookNotifier {
    name: String,
    url: Option<String>,
    headers: HashMap<String, String>,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn from_settings(name: impl Into<String>, settings: &TransportSettings) -> Self {
        let headers = settings
            .options
            .iter()
            .filter_map(|(key, value)| {
                key.strip_prefix("header.")
                    .map(|header| (header.to_string(), value.clone()))
            })
            .collect();

        Self {
            name: name.into(),
            url: settings.option("url").map(str::to_string),
            headers,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &str {
        &self.name
    }

    fn method(&self) -> TransportMethod {
        TransportMethod::Webhook
    }

    fn validate(&self) -> Result<(), ValidationError> {
        let url = self
            .url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| ValidationError::new(&self.name, "url", "is required"))?;

        let parsed = reqwest::Url::parse(url)
            .map_err(|e| ValidationError::new(&self.name, "url", e.to_string()))?;

        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ValidationError::new(
                &self.name,
                "url",
                format!("unsupported scheme '{}'", parsed.scheme()),
            ));
        }

        Ok(())
    }

    async fn send(&self, message: &AlertMessage) -> Result<(), DeliveryError> {
        let url = self
            .url
            .as_deref()
            .ok_or_else(|| DeliveryError::Webhook("No URL configured".to_string()))?;

        let payload = serde_json::json!({
            "transport": self.name,
            "subject": message.subject,
            "body": message.body,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });

        let mut request = self.client.post(url).json(&payload);

        for (key, value) in &self.headers {
            request = request.header(key, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| DeliveryError::Webhook(format!("Failed to send webhook: {}", e)))?;

        if !response.status().is_success() {
            return Err(DeliveryError::Webhook(format!(
                "Webhook returned status {}",
                response.status()
            )));
        }

        tracing::debug!(transport = %self.name, url = %url, "Webhook notification sent");

        Ok(())
    }
}

/// Delivery errors
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("Webhook error: {0}")]
    Webhook(String),

    #[error("Delivery via '{transport}' timed out after {after:?}")]
    Timeout { transport: String, after: Duration },

    #[error("Delivery queue full, dropped alert for '{0}'")]
    QueueFull(String),

    #[error("Delivery queue closed")]
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message() -> AlertMessage {
        AlertMessage {
            subject: "[Unhealthy] api".to_string(),
            body: "Status: Unhealthy".to_string(),
        }
    }

    #[tokio::test]
    async fn test_log_notification() {
        let notifier = LogNotifier::new("ops-log");
        assert!(notifier.validate().is_ok());
        assert!(notifier.send(&message()).await.is_ok());
    }

    #[test]
    fn test_webhook_requires_url() {
        let settings = TransportSettings::new(TransportMethod::Webhook);
        let notifier = WebhookNotifier::from_settings("hook", &settings);

        let err = notifier.validate().unwrap_err();
        assert_eq!(err.field, "url");
        assert_eq!(err.subject, "hook");
    }

    #[test]
    fn test_webhook_rejects_bad_urls() {
        let settings =
            TransportSettings::new(TransportMethod::Webhook).with_option("url", "not a url");
        assert!(WebhookNotifier::from_settings("hook", &settings).validate().is_err());

        let settings = TransportSettings::new(TransportMethod::Webhook)
            .with_option("url", "ftp://example.com");
        assert!(WebhookNotifier::from_settings("hook", &settings).validate().is_err());
    }

    #[test]
    fn test_webhook_headers_from_options() {
        let settings = TransportSettings::new(TransportMethod::Webhook)
            .with_option("url", "https://hooks.example.com/alert")
            .with_option("header.Authorization", "Bearer abc");
        let notifier = WebhookNotifier::from_settings("hook", &settings);

        assert!(notifier.validate().is_ok());
        assert_eq!(
            notifier.headers.get("Authorization").map(String::as_str),
            Some("Bearer abc")
        );
    }
}
