//! Router configuration.

use super::health::{health_check, metrics, readiness_check};
use super::state::AppState;
use crate::api::{admin, appointments, slots, websocket};
use axum::{
    Router,
    routing::{get, post, put},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Build the complete Axum router.
///
/// - `GET /health`, `GET /ready`, `GET /metrics`
/// - `GET /api/services/:service_id/slots?date=YYYY-MM-DD` (public)
/// - `POST|GET /api/appointments`, `GET /api/appointments/:id`,
///   `POST /api/appointments/:id/cancel`
/// - `GET|POST /api/admin/appointments`, `PUT /api/admin/appointments/:id/status`
/// - `GET /api/ws` (WebSocket upgrade)
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/services/:service_id/slots", get(slots::get_slots))
        .route(
            "/appointments",
            post(appointments::create_appointment).get(appointments::list_appointments),
        )
        .route("/appointments/:id", get(appointments::get_appointment))
        .route("/appointments/:id/cancel", post(appointments::cancel_appointment))
        .route(
            "/admin/appointments",
            get(admin::list_scoped_appointments).post(admin::create_appointment_on_behalf),
        )
        .route(
            "/admin/appointments/:id/status",
            put(admin::update_appointment_status),
        )
        .route("/ws", get(websocket::queue_updates));

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(metrics))
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
