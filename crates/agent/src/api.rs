//! Read-only HTTP adapter over the autonomic system
//!
//! Serves liveness/readiness probes, Prometheus metrics, and JSON snapshots of
//! monitor, trend, healing and diagnosis state.

use autonomic_lib::{AutonomicSystem, ComponentStatus, DiagnosisError};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::{Arc, OnceLock};
use tracing::{error, info};

const DEFAULT_HISTORY_LIMIT: usize = 100;

/// Shared application state. The server starts before the system is built,
/// so every handler answers 503 until [`AppState::install`] runs.
#[derive(Default)]
pub struct AppState {
    system: OnceLock<Arc<AutonomicSystem>>,
}

impl AppState {
    #[cfg(test)]
    pub fn new(system: Arc<AutonomicSystem>) -> Self {
        let state = Self::uninitialized();
        state.install(system);
        state
    }

    pub fn uninitialized() -> Self {
        Self::default()
    }

    /// Make the constructed system visible to handlers. Only the first call
    /// takes effect.
    pub fn install(&self, system: Arc<AutonomicSystem>) {
        if self.system.set(system).is_err() {
            error!("Autonomic system already installed, ignoring");
        }
    }

    fn system(&self) -> Result<&Arc<AutonomicSystem>, ApiError> {
        self.system.get().ok_or(ApiError::NotInitialized)
    }
}

#[derive(Debug)]
pub enum ApiError {
    NotInitialized,
    NotFound(String),
    Internal(String),
}

impl From<DiagnosisError> for ApiError {
    fn from(e: DiagnosisError) -> Self {
        match e {
            DiagnosisError::FailureNotFound(_) => ApiError::NotFound(e.to_string()),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::Internal(format!("{:#}", e))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotInitialized => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Autonomic system not initialized".to_string(),
            ),
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, message),
            ApiError::Internal(message) => {
                error!(error = %message, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, message)
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    limit: Option<usize>,
}

impl HistoryQuery {
    fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_HISTORY_LIMIT)
    }
}

#[derive(Serialize)]
struct HealingResponse {
    metrics: autonomic_lib::healing::HealingMetrics,
    summary: autonomic_lib::healing::IssueSummary,
    recent_actions: Vec<autonomic_lib::healing::RemediationAction>,
    suggestions: Vec<String>,
}

/// Health check response - returns 200 if healthy or degraded, 503 otherwise
async fn healthz(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let health = state.system()?.health().health();

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK, // Still operational
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    Ok((status_code, Json(health)).into_response())
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let readiness = state.system()?.health().readiness();

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    Ok((status_code, Json(readiness)).into_response())
}

/// Prometheus metrics endpoint
async fn metrics(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let body = state.system()?.render_metrics().await?;

    Ok((
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
        .into_response())
}

async fn resources(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let stats = state.system()?.monitor().stats().await;
    Ok(Json(stats).into_response())
}

async fn resource_history(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HistoryQuery>,
) -> Result<Response, ApiError> {
    let history = state.system()?.monitor().metrics_history(query.limit());
    Ok(Json(history).into_response())
}

async fn predictions(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let current = state.system()?.analyzer().current_predictions();
    Ok(Json(current).into_response())
}

async fn prediction_history(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HistoryQuery>,
) -> Result<Response, ApiError> {
    let history = state.system()?.analyzer().prediction_history();
    let skip = history.len().saturating_sub(query.limit());
    let recent: Vec<_> = history.into_iter().skip(skip).collect();
    Ok(Json(recent).into_response())
}

async fn trends(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let summary = state.system()?.analyzer().metrics_summary();
    Ok(Json(summary).into_response())
}

async fn healing(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let system = state.system()?;
    let healing = system.healing();

    Ok(Json(HealingResponse {
        metrics: healing.metrics(),
        summary: healing.issue_summary(),
        recent_actions: healing.action_history(DEFAULT_HISTORY_LIMIT),
        suggestions: system.integration().suggestions(),
    })
    .into_response())
}

async fn component_health(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let system = state.system()?;
    let report = system.component_health(&id);
    if !report.registered && report.recent_failures == 0 {
        return Err(ApiError::NotFound(format!("component not found: {}", id)));
    }
    Ok(Json(report).into_response())
}

async fn failure_analysis(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let analysis = state.system()?.analyze_failure(&id)?;
    Ok(Json(analysis).into_response())
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/api/v1/resources", get(resources))
        .route("/api/v1/resources/history", get(resource_history))
        .route("/api/v1/predictions", get(predictions))
        .route("/api/v1/predictions/history", get(prediction_history))
        .route("/api/v1/trends", get(trends))
        .route("/api/v1/healing", get(healing))
        .route("/api/v1/components/:id/health", get(component_health))
        .route("/api/v1/failures/:id/analysis", get(failure_analysis))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
