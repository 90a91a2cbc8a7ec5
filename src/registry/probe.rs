//! Prober strategies producing an observation for one check

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;

use super::error::ValidationError;
use crate::model::{CheckDefinition, HealthStatus, Observation, ServiceType};

/// Result of one probe
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeOutcome {
    pub status: HealthStatus,
    pub description: String,
    pub error: Option<String>,
}

impl ProbeOutcome {
    pub fn healthy(description: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Healthy,
            description: description.into(),
            error: None,
        }
    }

    pub fn unhealthy(description: impl Into<String>, error: Option<String>) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            description: description.into(),
            error,
        }
    }
}

/// Connectivity test for one service type
#[async_trait]
pub trait Prober: Send + Sync {
    fn service_type(&self) -> ServiceType;

    /// Check the target before the prober is wired in
    fn validate(&self) -> Result<(), ValidationError>;

    async fn probe(&self) -> ProbeOutcome;
}

/// A validated prober bound to its check
pub struct Monitor {
    pub check: CheckDefinition,
    prober: Arc<dyn Prober>,
}

impl Monitor {
    pub fn new(check: CheckDefinition, prober: Arc<dyn Prober>) -> Self {
        Self { check, prober }
    }

    /// Probe once and stamp the outcome as an observation
    pub async fn run(&self) -> Observation {
        let started = Instant::now();
        let outcome = self.prober.probe().await;

        Observation {
            check_name: self.check.name.clone(),
            status: outcome.status,
            timestamp: Utc::now(),
            description: outcome.description,
            error_message: outcome.error,
            duration_ms: started.elapsed().as_millis() as u64,
            tags: Default::default(),
        }
    }
}

/// GET request; any 2xx response is healthy
pub struct HttpProber {
    name: String,
    url: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl HttpProber {
    pub fn new(check: &CheckDefinition) -> Self {
        Self {
            name: check.name.clone(),
            url: check.target.clone(),
            timeout: check.timeout,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Prober for HttpProber {
    fn service_type(&self) -> ServiceType {
        ServiceType::Http
    }

    fn validate(&self) -> Result<(), ValidationError> {
        let parsed = reqwest::Url::parse(&self.url)
            .map_err(|e| ValidationError::new(&self.name, "target", e.to_string()))?;

        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ValidationError::new(
                &self.name,
                "target",
                format!("unsupported scheme '{}'", parsed.scheme()),
            ));
        }
        Ok(())
    }

    async fn probe(&self) -> ProbeOutcome {
        match self.client.get(&self.url).timeout(self.timeout).send().await {
            Ok(response) if response.status().is_success() => {
                ProbeOutcome::healthy(format!("HTTP {}", response.status()))
            }
            Ok(response) => ProbeOutcome::unhealthy(format!("HTTP {}", response.status()), None),
            Err(e) => ProbeOutcome::unhealthy("Request failed", Some(e.to_string())),
        }
    }
}

/// TCP connect to `host:port`
pub struct TcpProber {
    name: String,
    address: String,
    timeout: Duration,
}

impl TcpProber {
    pub fn new(check: &CheckDefinition) -> Self {
        Self {
            name: check.name.clone(),
            address: check.target.clone(),
            timeout: check.timeout,
        }
    }
}

#[async_trait]
impl Prober for TcpProber {
    fn service_type(&self) -> ServiceType {
        ServiceType::Tcp
    }

    fn validate(&self) -> Result<(), ValidationError> {
        let (host, port) = self
            .address
            .rsplit_once(':')
            .ok_or_else(|| ValidationError::new(&self.name, "target", "expected host:port"))?;

        if host.is_empty() {
            return Err(ValidationError::new(&self.name, "target", "host is empty"));
        }
        port.parse::<u16>().map_err(|_| {
            ValidationError::new(&self.name, "target", format!("invalid port '{}'", port))
        })?;
        Ok(())
    }

    async fn probe(&self) -> ProbeOutcome {
        let connect = tokio::net::TcpStream::connect(&self.address);
        match tokio::time::timeout(self.timeout, connect).await {
            Ok(Ok(_)) => ProbeOutcome::healthy(format!("Connected to {}", self.address)),
            Ok(Err(e)) => ProbeOutcome::unhealthy("Connection failed", Some(e.to_string())),
            Err(_) => ProbeOutcome::unhealthy(
                "Connection timed out",
                Some(format!("no response within {:?}", self.timeout)),
            ),
        }
    }
}
