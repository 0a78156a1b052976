//! Administrator endpoints.
//!
//! - GET /api/admin/appointments?serviceId=&date=&status=
//! - POST /api/admin/appointments
//! - PUT /api/admin/appointments/:id/status

use crate::auth::AdminUser;
use crate::error::AppError;
use crate::server::state::AppState;
use axum::{
    Json,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    http::StatusCode,
};
use queueline_core::{
    Appointment, AppointmentFilter, AppointmentId, AppointmentStatus, ReservationRequest,
    ServiceId, UserId, parse_date,
};
use serde::Deserialize;

/// Body of a status change.
#[derive(Debug, Deserialize)]
pub struct StatusUpdate {
    /// Target status
    pub status: AppointmentStatus,
}

/// Query string of the scoped listing.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminAppointmentsQuery {
    /// Only this service
    pub service_id: Option<ServiceId>,
    /// Only this date, `YYYY-MM-DD`
    pub date: Option<String>,
    /// Only this status
    pub status: Option<AppointmentStatus>,
}

impl AdminAppointmentsQuery {
    fn into_filter(self) -> Result<AppointmentFilter, AppError> {
        let date = match self.date.filter(|raw| !raw.is_empty()) {
            Some(raw) => Some(
                parse_date(&raw)
                    .map_err(|e| AppError::bad_request(format!("Invalid date '{raw}': {e}")))?,
            ),
            None => None,
        };
        Ok(AppointmentFilter {
            service_ids: self.service_id.map(|id| [id].into_iter().collect()),
            date,
            status: self.status,
        })
    }
}

/// Reservation made by an administrator for a citizen.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnBehalfReservation {
    /// Citizen the appointment is for
    pub user_id: UserId,
    /// Requested slot
    #[serde(flatten)]
    pub request: ReservationRequest,
}

/// Appointments of every user within the admin's scope.
///
/// ```bash
/// curl -H "Authorization: Bearer $TOKEN" \
///   'http://localhost:8080/api/admin/appointments?serviceId=SER1&date=2024-01-01'
/// ```
///
/// # Errors
///
/// 400 for a malformed query, 403 for citizens and out-of-scope services.
pub async fn list_scoped_appointments(
    admin: AdminUser,
    State(state): State<AppState>,
    query: Result<Query<AdminAppointmentsQuery>, QueryRejection>,
) -> Result<Json<Vec<Appointment>>, AppError> {
    let Query(query) = query?;
    let appointments = state
        .controller
        .appointments_for_scope(&admin.principal, query.into_filter()?)
        .await?;
    Ok(Json(appointments))
}

/// Book a slot for a citizen. Capacity and operational hours apply as for
/// any reservation.
///
/// # Errors
///
/// 400 for a malformed body, 403 outside the admin's scope, 404 for an
/// unknown service, 409 when the slot is full or not offered.
pub async fn create_appointment_on_behalf(
    admin: AdminUser,
    State(state): State<AppState>,
    body: Result<Json<OnBehalfReservation>, JsonRejection>,
) -> Result<(StatusCode, Json<Appointment>), AppError> {
    let Json(reservation) = body?;
    let appointment = state
        .controller
        .reserve_on_behalf(&admin.principal, &reservation.user_id, reservation.request)
        .await?;
    Ok((StatusCode::CREATED, Json(appointment)))
}

/// Move an appointment along the status machine.
///
/// Cancellation and no-show release the place and broadcast a fresh snapshot.
///
/// # Errors
///
/// 403 for citizens and out-of-scope admins, 404 when missing, 409 for a
/// terminal or unreachable status.
pub async fn update_appointment_status(
    admin: AdminUser,
    State(state): State<AppState>,
    id: Result<Path<AppointmentId>, PathRejection>,
    body: Result<Json<StatusUpdate>, JsonRejection>,
) -> Result<Json<Appointment>, AppError> {
    let Path(id) = id?;
    let Json(update) = body?;
    let appointment = state
        .controller
        .transition(id, update.status, &admin.principal)
        .await?;
    Ok(Json(appointment))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can use unwrap
mod tests {
    use super::*;

    #[test]
    fn listing_query_becomes_a_filter() {
        let query = AdminAppointmentsQuery {
            service_id: Some(ServiceId::new("SER1")),
            date: Some("2024-01-01".to_string()),
            status: Some(AppointmentStatus::Confirmed),
        };
        let filter = query.into_filter().unwrap();
        assert_eq!(filter.service_ids.unwrap().len(), 1);
        assert_eq!(filter.date.unwrap().to_string(), "2024-01-01");

        let empty = AdminAppointmentsQuery::default().into_filter().unwrap();
        assert_eq!(empty, AppointmentFilter::default());

        let bad = AdminAppointmentsQuery {
            date: Some("01/01/2024".to_string()),
            ..AdminAppointmentsQuery::default()
        };
        assert_eq!(bad.into_filter().unwrap_err().status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn on_behalf_body_flattens_the_reservation() {
        let body: OnBehalfReservation = serde_json::from_str(
            r#"{"userId":"U7","serviceId":"SER1","date":"2024-01-01","slotTime":"09:00"}"#,
        )
        .unwrap();
        assert_eq!(body.user_id, UserId::new("U7"));
        assert_eq!(body.request.slot_time.to_string(), "09:00");
    }
}
