//! Appointment persistence contract.
//!
//! Implementations own the critical section of admission control: counting the
//! active appointments of a slot and inserting a new one must happen as one
//! indivisible step per [`SlotKey`](crate::types::SlotKey), and status changes
//! on a slot must exclude concurrent admissions to it.

use crate::error::StoreError;
use crate::types::{Appointment, AppointmentId, AppointmentStatus, ServiceId, SlotTime, UserId};
use chrono::{DateTime, NaiveDate, Utc};
use futures::future::BoxFuture;
use std::collections::{BTreeSet, HashMap};
use std::num::NonZeroU32;

/// Active-appointment counts per slot time.
pub type Occupancy = HashMap<SlotTime, u32>;

/// Criteria for listing appointments across users. Absent fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppointmentFilter {
    /// Restrict to these services
    pub service_ids: Option<BTreeSet<ServiceId>>,
    /// Restrict to one date
    pub date: Option<NaiveDate>,
    /// Restrict to one status
    pub status: Option<AppointmentStatus>,
}

impl AppointmentFilter {
    /// Whether `appointment` satisfies every criterion
    #[must_use]
    pub fn matches(&self, appointment: &Appointment) -> bool {
        self.service_ids
            .as_ref()
            .is_none_or(|ids| ids.contains(&appointment.service_id))
            && self.date.is_none_or(|date| date == appointment.date)
            && self.status.is_none_or(|status| status == appointment.status)
    }
}

/// Outcome of an atomic admission attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// The appointment was inserted.
    Admitted(Appointment),
    /// The slot already held `occupancy` active appointments; nothing was written.
    Full {
        /// Occupancy observed under the slot lock
        occupancy: u32,
    },
}

/// Outcome of an atomic status update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Status changed.
    Applied {
        /// Status before the change
        previous: AppointmentStatus,
        /// Appointment after the change
        appointment: Appointment,
    },
    /// No appointment with that id.
    NotFound,
    /// The current status has no edge to the target; nothing was written.
    Rejected {
        /// Status observed under the lock
        current: AppointmentStatus,
    },
}

/// Persistent record of appointments.
pub trait AppointmentStore: Send + Sync {
    /// Committed active-appointment counts for every slot of a service on a date.
    ///
    /// Only `scheduled` and `confirmed` appointments are counted. Slot times
    /// with no active appointment may be absent.
    fn occupancy<'a>(
        &'a self,
        service_id: &'a ServiceId,
        date: NaiveDate,
    ) -> BoxFuture<'a, Result<Occupancy, StoreError>>;

    /// Insert `appointment` if its slot holds fewer than `capacity` active
    /// appointments, as one atomic step.
    fn admit(
        &self,
        appointment: Appointment,
        capacity: NonZeroU32,
    ) -> BoxFuture<'_, Result<Admission, StoreError>>;

    /// Move an appointment to `target` if the state machine allows it,
    /// stamping `updated_at` with `at`.
    fn transition(
        &self,
        id: AppointmentId,
        target: AppointmentStatus,
        at: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<Transition, StoreError>>;

    /// Fetch one appointment.
    fn get(&self, id: AppointmentId) -> BoxFuture<'_, Result<Option<Appointment>, StoreError>>;

    /// All appointments booked by `user_id`, ordered by date then slot time.
    fn list_for_user<'a>(
        &'a self,
        user_id: &'a UserId,
    ) -> BoxFuture<'a, Result<Vec<Appointment>, StoreError>>;

    /// Appointments of any user matching `filter`, ordered by date, slot
    /// time, then creation.
    fn list<'a>(
        &'a self,
        filter: &'a AppointmentFilter,
    ) -> BoxFuture<'a, Result<Vec<Appointment>, StoreError>>;

    /// Check the backend is reachable.
    fn ping(&self) -> BoxFuture<'_, Result<(), StoreError>>;
}
