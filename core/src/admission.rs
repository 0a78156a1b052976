//! Admission control: the only path by which appointments are created or
//! change status.
//!
//! Every successful change is followed by a recompute-and-broadcast of the
//! affected slot's service/date snapshot through the [`SnapshotPublisher`].

use crate::access::{AdminScope, Principal};
use crate::calendar::SlotCalendar;
use crate::catalog::ServiceCatalog;
use crate::environment::Clock;
use crate::error::{AdmissionError, Result};
use crate::hub::SnapshotPublisher;
use crate::metrics;
use crate::store::{Admission, AppointmentFilter, AppointmentStore, Transition};
use crate::types::{
    Appointment, AppointmentId, AppointmentStatus, ServiceId, SlotTime, UserId, Weekday,
};
use chrono::NaiveDate;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Instant;

/// Longest accepted free-form note, in characters.
pub const MAX_NOTES_CHARS: usize = 1000;

/// Collaborators of the admission controller.
#[derive(Clone)]
pub struct AdmissionEnvironment {
    /// Time source for timestamps
    pub clock: Arc<dyn Clock>,
    /// Service lookup
    pub catalog: Arc<dyn ServiceCatalog>,
    /// Appointment persistence
    pub store: Arc<dyn AppointmentStore>,
    /// Receives every committed occupancy change
    pub publisher: Arc<dyn SnapshotPublisher>,
}

/// A citizen's request for a slot.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationRequest {
    /// Requested service
    pub service_id: ServiceId,
    /// Requested date
    pub date: NaiveDate,
    /// Requested slot start
    pub slot_time: SlotTime,
    /// Optional note for staff
    #[serde(default)]
    pub notes: Option<String>,
}

/// Accepts or rejects reservations and status changes.
#[derive(Clone)]
pub struct AdmissionController {
    env: AdmissionEnvironment,
}

impl AdmissionController {
    /// Create a controller over `env`
    #[must_use]
    pub const fn new(env: AdmissionEnvironment) -> Self {
        Self { env }
    }

    /// Reserve a slot for `user_id`.
    ///
    /// Checks run in order: notes length, service existence, department
    /// link, operational hours, then capacity. The capacity check and insert
    /// are one atomic step in the store.
    ///
    /// # Errors
    ///
    /// - [`AdmissionError::Validation`] for an over-long note
    /// - [`AdmissionError::ServiceNotFound`] / [`AdmissionError::DepartmentUnlinked`]
    /// - [`AdmissionError::SlotNotOperational`] when the time is not offered
    ///   that day, regardless of capacity
    /// - [`AdmissionError::SlotFull`] when the slot is at capacity
    /// - [`AdmissionError::Unavailable`] on storage failure
    #[tracing::instrument(
        skip(self, request),
        fields(service_id = %request.service_id, date = %request.date, slot_time = %request.slot_time)
    )]
    pub async fn reserve(&self, user_id: &UserId, request: ReservationRequest) -> Result<Appointment> {
        let started = Instant::now();
        let result = self.try_reserve(user_id, request).await;
        let outcome = match &result {
            Ok(_) => "admitted",
            Err(error) => error.kind().as_str(),
        };
        metrics::record_reservation(outcome, started.elapsed());
        result
    }

    async fn try_reserve(&self, user_id: &UserId, request: ReservationRequest) -> Result<Appointment> {
        let notes = normalize_notes(request.notes)?;
        let service = self.env.catalog.get(&request.service_id).await?;
        let department_id = service
            .department_id
            .clone()
            .ok_or_else(|| AdmissionError::DepartmentUnlinked(service.id.clone()))?;

        if !SlotCalendar::is_operational(&service, request.date, request.slot_time) {
            return Err(AdmissionError::SlotNotOperational {
                service_id: service.id.clone(),
                date: request.date,
                weekday: Weekday::of(request.date),
                slot_time: request.slot_time,
            });
        }

        let now = self.env.clock.now();
        let candidate = Appointment {
            id: AppointmentId::new(),
            user_id: user_id.clone(),
            service_id: service.id.clone(),
            department_id,
            date: request.date,
            slot_time: request.slot_time,
            status: AppointmentStatus::Scheduled,
            notes,
            created_at: now,
            updated_at: now,
        };

        match self.env.store.admit(candidate, service.capacity_per_slot).await? {
            Admission::Admitted(appointment) => {
                tracing::info!(
                    appointment_id = %appointment.id,
                    user_id = %appointment.user_id,
                    "Reservation admitted"
                );
                self.env.publisher.refresh(&service, appointment.date).await;
                Ok(appointment)
            }
            Admission::Full { occupancy } => {
                tracing::info!(occupancy, capacity = service.capacity(), "Reservation rejected, slot full");
                Err(AdmissionError::SlotFull {
                    service_id: service.id,
                    date: request.date,
                    slot_time: request.slot_time,
                    capacity: service.capacity_per_slot.get(),
                })
            }
        }
    }

    /// Reserve a slot for `user_id` as an administrator.
    ///
    /// Runs the same admission checks and broadcast as [`reserve`](Self::reserve).
    ///
    /// # Errors
    ///
    /// [`AdmissionError::Forbidden`] when the requester does not administer
    /// the service, [`AdmissionError::Validation`] for a blank user id, then
    /// any error of [`reserve`](Self::reserve).
    pub async fn reserve_on_behalf(
        &self,
        requester: &Principal,
        user_id: &UserId,
        request: ReservationRequest,
    ) -> Result<Appointment> {
        if !requester.can_manage(&request.service_id) {
            return Err(AdmissionError::Forbidden(format!(
                "service {} is outside the administrator's scope",
                request.service_id
            )));
        }
        if user_id.as_str().trim().is_empty() {
            return Err(AdmissionError::Validation("userId must not be empty".to_string()));
        }
        tracing::info!(
            admin_id = %requester.user_id,
            %user_id,
            "Booking on behalf of user"
        );
        self.reserve(user_id, request).await
    }

    /// Cancel an appointment on behalf of its owner or a scoped admin.
    ///
    /// # Errors
    ///
    /// - [`AdmissionError::AppointmentNotFound`]
    /// - [`AdmissionError::Forbidden`] when the requester neither owns the
    ///   appointment nor administers its service
    /// - [`AdmissionError::AlreadyTerminal`] when it is completed, cancelled
    ///   or marked no-show
    /// - [`AdmissionError::Unavailable`] on storage failure
    #[tracing::instrument(skip(self, requester), fields(user_id = %requester.user_id))]
    pub async fn cancel(&self, id: AppointmentId, requester: &Principal) -> Result<Appointment> {
        let current = self.appointment(id, requester).await?;
        self.apply(current, AppointmentStatus::Cancelled).await
    }

    /// Move an appointment along the status machine as an administrator.
    ///
    /// # Errors
    ///
    /// - [`AdmissionError::Forbidden`] for citizens, and for admins whose
    ///   scope does not cover the service
    /// - [`AdmissionError::AppointmentNotFound`]
    /// - [`AdmissionError::AlreadyTerminal`] from a terminal status
    /// - [`AdmissionError::InvalidTransition`] for any other missing edge
    /// - [`AdmissionError::Unavailable`] on storage failure
    #[tracing::instrument(skip(self, requester), fields(user_id = %requester.user_id))]
    pub async fn transition(
        &self,
        id: AppointmentId,
        target: AppointmentStatus,
        requester: &Principal,
    ) -> Result<Appointment> {
        if !requester.is_admin() {
            return Err(AdmissionError::Forbidden(
                "only administrators can change appointment status".to_string(),
            ));
        }
        let current = self.appointment(id, requester).await?;
        if !requester.can_manage(&current.service_id) {
            return Err(AdmissionError::Forbidden(format!(
                "service {} is outside the administrator's scope",
                current.service_id
            )));
        }
        self.apply(current, target).await
    }

    /// Fetch an appointment visible to `requester`.
    ///
    /// # Errors
    ///
    /// [`AdmissionError::AppointmentNotFound`], [`AdmissionError::Forbidden`]
    /// or [`AdmissionError::Unavailable`].
    pub async fn appointment(&self, id: AppointmentId, requester: &Principal) -> Result<Appointment> {
        let appointment = self
            .env
            .store
            .get(id)
            .await?
            .ok_or(AdmissionError::AppointmentNotFound(id))?;

        if appointment.user_id != requester.user_id && !requester.can_manage(&appointment.service_id) {
            return Err(AdmissionError::Forbidden(format!(
                "appointment {id} belongs to another user"
            )));
        }
        Ok(appointment)
    }

    /// Every appointment booked by `user_id`, ordered by date and time.
    ///
    /// # Errors
    ///
    /// [`AdmissionError::Unavailable`] on storage failure.
    pub async fn appointments_for_user(&self, user_id: &UserId) -> Result<Vec<Appointment>> {
        Ok(self.env.store.list_for_user(user_id).await?)
    }

    /// Appointments of every user within the requester's admin scope.
    ///
    /// A scoped admin listing without `service_ids` sees all of their
    /// services.
    ///
    /// # Errors
    ///
    /// [`AdmissionError::Forbidden`] for citizens and for requested services
    /// outside the scope, [`AdmissionError::Unavailable`] on storage failure.
    pub async fn appointments_for_scope(
        &self,
        requester: &Principal,
        mut filter: AppointmentFilter,
    ) -> Result<Vec<Appointment>> {
        let Some(scope) = requester.admin_scope.as_ref() else {
            return Err(AdmissionError::Forbidden(
                "only administrators can list other users' appointments".to_string(),
            ));
        };
        if let AdminScope::ServiceSubset(allowed) = scope {
            let requested = filter.service_ids.get_or_insert_with(|| allowed.clone());
            if let Some(outside) = requested.iter().find(|id| !allowed.contains(*id)) {
                return Err(AdmissionError::Forbidden(format!(
                    "service {outside} is outside the administrator's scope"
                )));
            }
        }
        Ok(self.env.store.list(&filter).await?)
    }

    async fn apply(&self, current: Appointment, target: AppointmentStatus) -> Result<Appointment> {
        let id = current.id;
        if current.status.is_terminal() {
            return Err(AdmissionError::AlreadyTerminal { id, status: current.status });
        }
        if !current.status.can_transition_to(target) {
            return Err(AdmissionError::InvalidTransition {
                id,
                from: current.status,
                to: target,
            });
        }

        let now = self.env.clock.now();
        match self.env.store.transition(id, target, now).await? {
            Transition::Applied { previous, appointment } => {
                metrics::record_transition(target.as_str());
                tracing::info!(
                    appointment_id = %id,
                    from = %previous,
                    to = %target,
                    "Appointment status changed"
                );
                self.broadcast(&appointment).await;
                Ok(appointment)
            }
            Transition::NotFound => Err(AdmissionError::AppointmentNotFound(id)),
            // Another request changed the status between our read and the store's lock.
            Transition::Rejected { current } if current.is_terminal() => {
                Err(AdmissionError::AlreadyTerminal { id, status: current })
            }
            Transition::Rejected { current } => Err(AdmissionError::InvalidTransition {
                id,
                from: current,
                to: target,
            }),
        }
    }

    async fn broadcast(&self, appointment: &Appointment) {
        match self.env.catalog.get(&appointment.service_id).await {
            Ok(service) => self.env.publisher.refresh(&service, appointment.date).await,
            Err(error) => tracing::warn!(
                service_id = %appointment.service_id,
                %error,
                "Service unavailable after status change, snapshot not broadcast"
            ),
        }
    }
}

impl std::fmt::Debug for AdmissionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionController").finish_non_exhaustive()
    }
}

fn normalize_notes(notes: Option<String>) -> Result<Option<String>> {
    let Some(notes) = notes else {
        return Ok(None);
    };
    let trimmed = notes.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    if trimmed.chars().count() > MAX_NOTES_CHARS {
        return Err(AdmissionError::Validation(format!(
            "notes must be at most {MAX_NOTES_CHARS} characters"
        )));
    }
    Ok(Some(trimmed.to_string()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can use unwrap
mod tests {
    use super::*;

    #[test]
    fn blank_notes_are_dropped() {
        assert_eq!(normalize_notes(Some("   ".into())).unwrap(), None);
        assert_eq!(normalize_notes(None).unwrap(), None);
        assert_eq!(
            normalize_notes(Some(" bring ID ".into())).unwrap(),
            Some("bring ID".to_string())
        );
    }

    #[test]
    fn long_notes_are_rejected() {
        let long = "x".repeat(MAX_NOTES_CHARS + 1);
        assert!(matches!(
            normalize_notes(Some(long)),
            Err(AdmissionError::Validation(_))
        ));
    }
}
