use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::alerts::RuleState;
use crate::bus::PublishSummary;
use crate::engine::MonitorEngine;
use crate::model::{
    HealthStatus, Observation, Report, ServiceType, StatusInterval, TransportMethod,
};
use crate::registry::ValidationError;
use crate::tracker::{RepositoryError, TrackerError};

/// Application state shared across handlers
pub struct AppState {
    pub engine: Arc<MonitorEngine>,
}

// ============================================================================
// Health Check
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ============================================================================
// Reports
// ============================================================================

#[derive(Serialize)]
pub struct PublishResponse {
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    pub entries: usize,
    pub delivered: usize,
    pub failed: usize,
}

impl PublishResponse {
    fn new(report: &Report, summary: PublishSummary) -> Self {
        Self {
            status: report.status,
            timestamp: report.timestamp,
            entries: report.entries.len(),
            delivered: summary.delivered,
            failed: summary.failed,
        }
    }
}

pub async fn ingest_report(
    State(state): State<Arc<AppState>>,
    Json(report): Json<Report>,
) -> Result<Json<PublishResponse>, ApiError> {
    if report.entries.iter().any(|e| e.check_name.trim().is_empty()) {
        return Err(ApiError::BadRequest(
            "Report entries must have a check name".to_string(),
        ));
    }

    let summary = state.engine.publish(&report);
    Ok(Json(PublishResponse::new(&report, summary)))
}

pub async fn run_probes(State(state): State<Arc<AppState>>) -> Json<PublishResponse> {
    let (report, summary) = state.engine.run_probes().await;
    Json(PublishResponse::new(&report, summary))
}

// ============================================================================
// Interval and observation history
// ============================================================================

#[derive(Deserialize)]
pub struct RangeParams {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl RangeParams {
    /// Defaults to the last hour
    fn resolve(&self) -> Result<(DateTime<Utc>, DateTime<Utc>), ApiError> {
        let to = self.to.unwrap_or_else(Utc::now);
        let from = self.from.unwrap_or(to - Duration::hours(1));
        if from > to {
            return Err(ApiError::BadRequest(format!(
                "'from' ({}) is after 'to' ({})",
                from, to
            )));
        }
        Ok((from, to))
    }
}

#[derive(Serialize)]
pub struct IntervalsResponse {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub services: BTreeMap<String, Vec<StatusInterval>>,
}

pub async fn list_intervals(
    State(state): State<Arc<AppState>>,
    Query(params): Query<RangeParams>,
) -> Result<Json<IntervalsResponse>, ApiError> {
    let (from, to) = params.resolve()?;
    let services = state.engine.tracker().intervals_between(from, to)?;
    Ok(Json(IntervalsResponse { from, to, services }))
}

#[derive(Serialize)]
pub struct ObservationsResponse {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub services: BTreeMap<String, Vec<Observation>>,
}

pub async fn list_observations(
    State(state): State<Arc<AppState>>,
    Query(params): Query<RangeParams>,
) -> Result<Json<ObservationsResponse>, ApiError> {
    let (from, to) = params.resolve()?;
    let services = state.engine.tracker().observations_between(from, to)?;
    Ok(Json(ObservationsResponse { from, to, services }))
}

// ============================================================================
// Wiring
// ============================================================================

#[derive(Serialize)]
pub struct MonitorInfo {
    pub name: String,
    pub service_type: ServiceType,
    pub target: String,
    pub interval_secs: u64,
    pub transports: Vec<String>,
}

pub async fn list_monitors(State(state): State<Arc<AppState>>) -> Json<Vec<MonitorInfo>> {
    let monitors = state
        .engine
        .registry()
        .monitors()
        .iter()
        .map(|m| MonitorInfo {
            name: m.check.name.clone(),
            service_type: m.check.service_type,
            target: m.check.target.clone(),
            interval_secs: m.check.interval.as_secs(),
            transports: m
                .check
                .transports
                .iter()
                .map(|b| b.transport_name.clone())
                .collect(),
        })
        .collect();

    Json(monitors)
}

#[derive(Serialize)]
pub struct PublisherInfo {
    pub transport: String,
    pub method: TransportMethod,
    pub checks: Vec<String>,
}

#[derive(Serialize)]
pub struct PublishersResponse {
    pub publishers: Vec<PublisherInfo>,
    pub rejected: Vec<ValidationError>,
    pub observers: Vec<String>,
}

pub async fn list_publishers(State(state): State<Arc<AppState>>) -> Json<PublishersResponse> {
    let registry = state.engine.registry();
    let publishers = registry
        .publishers()
        .iter()
        .map(|p| PublisherInfo {
            transport: p.transport_name().to_string(),
            method: p.method(),
            checks: p.check_names(),
        })
        .collect();

    Json(PublishersResponse {
        publishers,
        rejected: registry.rejected(),
        observers: state.engine.bus().observer_names(),
    })
}

#[derive(Serialize)]
pub struct RuleInfo {
    pub check_name: String,
    pub transport_name: String,
    #[serde(flatten)]
    pub state: RuleState,
}

pub async fn list_rules(State(state): State<Arc<AppState>>) -> Json<Vec<RuleInfo>> {
    let rules = state
        .engine
        .evaluator()
        .snapshot()
        .into_iter()
        .map(|(key, state)| RuleInfo {
            check_name: key.check_name,
            transport_name: key.transport_name,
            state,
        })
        .collect();

    Json(rules)
}

// ============================================================================
// Error Handling
// ============================================================================

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unavailable(String),
    Internal(String),
}

impl From<TrackerError> for ApiError {
    fn from(e: TrackerError) -> Self {
        match e {
            TrackerError::Repository(RepositoryError::Unavailable(_)) => {
                ApiError::Unavailable(e.to_string())
            }
            _ => ApiError::Internal(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}
