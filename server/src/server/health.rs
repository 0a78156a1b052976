//! Health, readiness and metrics endpoints.

use super::state::AppState;
use axum::{Json, extract::State, http::StatusCode};
use serde::Serialize;

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    /// Service status
    pub status: String,
    /// Service version
    pub version: String,
}

/// Liveness check. Returns 200 while the process is serving; dependencies
/// are not consulted.
///
/// ```bash
/// curl http://localhost:8080/health
/// # {"status":"ok","version":"0.1.0"}
/// ```
#[allow(clippy::unused_async)] // Axum handler signature requires async
pub async fn health_check() -> (StatusCode, Json<HealthResponse>) {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }),
    )
}

/// Readiness check response.
#[derive(Serialize)]
pub struct ReadinessResponse {
    /// Overall readiness status
    pub ready: bool,
    /// Appointment store reachable
    pub store: bool,
}

/// Readiness check. Returns 503 when the appointment store does not answer.
pub async fn readiness_check(
    State(state): State<AppState>,
) -> (StatusCode, Json<ReadinessResponse>) {
    let store = match state.store.ping().await {
        Ok(()) => true,
        Err(error) => {
            tracing::warn!(%error, "Readiness check failed");
            false
        }
    };
    let status = if store {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(ReadinessResponse { ready: store, store }))
}

/// Prometheus text exposition.
#[allow(clippy::unused_async)] // Axum handler signature requires async
pub async fn metrics(State(state): State<AppState>) -> String {
    state.metrics.render()
}
