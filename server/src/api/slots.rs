//! Public slot availability.
//!
//! - GET /api/services/:service_id/slots?date=YYYY-MM-DD

use crate::error::AppError;
use crate::server::state::AppState;
use axum::{
    Json,
    extract::{Path, Query, State, rejection::QueryRejection},
};
use queueline_core::{ServiceId, ServiceSnapshot, parse_date};
use serde::Deserialize;

/// Query string of the slots endpoint.
#[derive(Debug, Deserialize)]
pub struct SlotsQuery {
    /// Calendar date, `YYYY-MM-DD`
    pub date: Option<String>,
}

/// Occupancy of every operational slot of a service on a date.
///
/// ```bash
/// curl 'http://localhost:8080/api/services/SER1/slots?date=2024-01-01'
/// ```
///
/// ```json
/// {
///   "serviceId": "SER1",
///   "date": "2024-01-01",
///   "slots": [
///     {"time": "09:00", "currentQueueSize": 2, "maxCapacity": 2, "isAvailable": false},
///     {"time": "10:00", "currentQueueSize": 0, "maxCapacity": 2, "isAvailable": true}
///   ]
/// }
/// ```
///
/// A date on which the service is closed yields an empty `slots` array.
///
/// # Errors
///
/// 400 when `date` is missing or malformed, 404 for an unknown service.
pub async fn get_slots(
    Path(service_id): Path<String>,
    query: Result<Query<SlotsQuery>, QueryRejection>,
    State(state): State<AppState>,
) -> Result<Json<ServiceSnapshot>, AppError> {
    let Query(query) = query?;
    let raw = query
        .date
        .filter(|date| !date.is_empty())
        .ok_or_else(|| AppError::bad_request("Query parameter 'date' is required"))?;
    let date = parse_date(&raw)
        .map_err(|e| AppError::bad_request(format!("Invalid date '{raw}': {e}")))?;

    let snapshot = state
        .projector
        .snapshot_for(&ServiceId::new(service_id), date)
        .await?;
    Ok(Json(snapshot))
}
