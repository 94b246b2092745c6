//! Liveness and queue health.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use docket_core::HealthStatus;

use crate::state::AppState;

pub async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Structured queue health. Only an unreachable store turns into a 503;
/// a degraded queue still answers 200 with the report.
pub async fn queue_health(State(state): State<AppState>) -> impl IntoResponse {
    let health = state.queue.health().await;
    let status = match health.status {
        HealthStatus::Unreachable => StatusCode::SERVICE_UNAVAILABLE,
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
    };
    (status, Json(health))
}
