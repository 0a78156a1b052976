//! Citizen appointment endpoints.
//!
//! - POST /api/appointments - Reserve a slot
//! - GET /api/appointments - Caller's appointments
//! - GET /api/appointments/:id - One appointment (owner or scoped admin)
//! - POST /api/appointments/:id/cancel - Cancel

use crate::auth::SessionUser;
use crate::error::AppError;
use crate::server::state::AppState;
use axum::{
    Json,
    extract::{
        Path, State,
        rejection::{JsonRejection, PathRejection},
    },
    http::StatusCode,
};
use queueline_core::{Appointment, AppointmentId, ReservationRequest};

/// Reserve a slot for the caller.
///
/// ```bash
/// curl -X POST http://localhost:8080/api/appointments \
///   -H 'Authorization: Bearer <token>' -H 'Content-Type: application/json' \
///   -d '{"serviceId":"SER1","date":"2024-01-01","slotTime":"09:00"}'
/// ```
///
/// # Errors
///
/// 400 for a malformed body, 404 for an unknown service, 409 when the slot
/// is full or not offered that day.
pub async fn create_appointment(
    session: SessionUser,
    State(state): State<AppState>,
    body: Result<Json<ReservationRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Appointment>), AppError> {
    let Json(request) = body?;
    let appointment = state
        .controller
        .reserve(&session.principal.user_id, request)
        .await?;
    Ok((StatusCode::CREATED, Json(appointment)))
}

/// Every appointment booked by the caller.
///
/// # Errors
///
/// 503 when storage is unavailable.
pub async fn list_appointments(
    session: SessionUser,
    State(state): State<AppState>,
) -> Result<Json<Vec<Appointment>>, AppError> {
    let appointments = state
        .controller
        .appointments_for_user(&session.principal.user_id)
        .await?;
    Ok(Json(appointments))
}

/// One appointment visible to the caller.
///
/// # Errors
///
/// 404 when missing, 403 when owned by someone else.
pub async fn get_appointment(
    session: SessionUser,
    State(state): State<AppState>,
    id: Result<Path<AppointmentId>, PathRejection>,
) -> Result<Json<Appointment>, AppError> {
    let Path(id) = id?;
    let appointment = state.controller.appointment(id, &session.principal).await?;
    Ok(Json(appointment))
}

/// Cancel an appointment and free its place.
///
/// # Errors
///
/// 404 when missing, 403 when owned by someone else, 409 when already in a
/// terminal status.
pub async fn cancel_appointment(
    session: SessionUser,
    State(state): State<AppState>,
    id: Result<Path<AppointmentId>, PathRejection>,
) -> Result<Json<Appointment>, AppError> {
    let Path(id) = id?;
    let appointment = state.controller.cancel(id, &session.principal).await?;
    Ok(Json(appointment))
}
