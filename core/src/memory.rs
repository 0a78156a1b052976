//! In-memory appointment store for single-node deployments and tests.
//!
//! Each [`SlotKey`] owns an async mutex around the appointments booked into
//! it. Admission holds that mutex across count-and-insert, and status changes
//! take the same mutex, so operations on one slot are serialized while
//! distinct slots proceed in parallel. The slot table is a sharded
//! [`DashMap`]; no lock spans more than one slot.

use crate::error::StoreError;
use crate::store::{Admission, AppointmentFilter, AppointmentStore, Occupancy, Transition};
use crate::types::{Appointment, AppointmentId, AppointmentStatus, ServiceId, SlotKey, UserId};
use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;
use futures::future::BoxFuture;
use std::num::NonZeroU32;
use std::sync::Arc;
use tokio::sync::Mutex;

type SlotCell = Arc<Mutex<Vec<Appointment>>>;

/// Appointment store backed by process memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryAppointmentStore {
    slots: Arc<DashMap<SlotKey, SlotCell>>,
    index: Arc<DashMap<AppointmentId, SlotKey>>,
    by_user: Arc<DashMap<UserId, Vec<AppointmentId>>>,
}

impl InMemoryAppointmentStore {
    /// Empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of appointments held, in any status
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Whether no appointment has been stored
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    // The map guard is dropped before returning so no shard lock is held
    // while the caller awaits the slot mutex.
    fn slot(&self, key: &SlotKey) -> SlotCell {
        if let Some(cell) = self.slots.get(key) {
            return Arc::clone(cell.value());
        }
        Arc::clone(self.slots.entry(key.clone()).or_default().value())
    }

    fn existing_slot(&self, id: AppointmentId) -> Option<SlotCell> {
        let key = self.index.get(&id)?.value().clone();
        self.slots.get(&key).map(|cell| Arc::clone(cell.value()))
    }
}

impl AppointmentStore for InMemoryAppointmentStore {
    fn occupancy<'a>(
        &'a self,
        service_id: &'a ServiceId,
        date: NaiveDate,
    ) -> BoxFuture<'a, Result<Occupancy, StoreError>> {
        Box::pin(async move {
            let cells: Vec<(SlotKey, SlotCell)> = self
                .slots
                .iter()
                .filter(|entry| entry.key().service_id == *service_id && entry.key().date == date)
                .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
                .collect();

            let mut occupancy = Occupancy::with_capacity(cells.len());
            for (key, cell) in cells {
                let active = cell
                    .lock()
                    .await
                    .iter()
                    .filter(|a| a.status.is_active())
                    .count();
                if active > 0 {
                    occupancy.insert(key.slot_time, u32::try_from(active).unwrap_or(u32::MAX));
                }
            }
            Ok(occupancy)
        })
    }

    fn admit(
        &self,
        appointment: Appointment,
        capacity: NonZeroU32,
    ) -> BoxFuture<'_, Result<Admission, StoreError>> {
        Box::pin(async move {
            let key = appointment.slot_key();
            let cell = self.slot(&key);
            let mut booked = cell.lock().await;

            let active = booked.iter().filter(|a| a.status.is_active()).count();
            let occupancy = u32::try_from(active).unwrap_or(u32::MAX);
            if occupancy >= capacity.get() {
                return Ok(Admission::Full { occupancy });
            }

            self.index.insert(appointment.id, key);
            self.by_user
                .entry(appointment.user_id.clone())
                .or_default()
                .push(appointment.id);
            booked.push(appointment.clone());
            Ok(Admission::Admitted(appointment))
        })
    }

    fn transition(
        &self,
        id: AppointmentId,
        target: AppointmentStatus,
        at: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<Transition, StoreError>> {
        Box::pin(async move {
            let Some(cell) = self.existing_slot(id) else {
                return Ok(Transition::NotFound);
            };
            let mut booked = cell.lock().await;
            let Some(appointment) = booked.iter_mut().find(|a| a.id == id) else {
                return Err(StoreError::Corrupt(format!(
                    "appointment {id} indexed but missing from its slot"
                )));
            };

            let previous = appointment.status;
            if !previous.can_transition_to(target) {
                return Ok(Transition::Rejected { current: previous });
            }
            appointment.status = target;
            appointment.updated_at = at;
            Ok(Transition::Applied {
                previous,
                appointment: appointment.clone(),
            })
        })
    }

    fn get(&self, id: AppointmentId) -> BoxFuture<'_, Result<Option<Appointment>, StoreError>> {
        Box::pin(async move {
            let Some(cell) = self.existing_slot(id) else {
                return Ok(None);
            };
            let booked = cell.lock().await;
            Ok(booked.iter().find(|a| a.id == id).cloned())
        })
    }

    fn list_for_user<'a>(
        &'a self,
        user_id: &'a UserId,
    ) -> BoxFuture<'a, Result<Vec<Appointment>, StoreError>> {
        Box::pin(async move {
            let ids = self
                .by_user
                .get(user_id)
                .map(|entry| entry.value().clone())
                .unwrap_or_default();

            let mut appointments = Vec::with_capacity(ids.len());
            for id in ids {
                if let Some(appointment) = self.get(id).await? {
                    appointments.push(appointment);
                }
            }
            appointments.sort_by(|a, b| (a.date, a.slot_time).cmp(&(b.date, b.slot_time)));
            Ok(appointments)
        })
    }

    fn list<'a>(
        &'a self,
        filter: &'a AppointmentFilter,
    ) -> BoxFuture<'a, Result<Vec<Appointment>, StoreError>> {
        Box::pin(async move {
            let cells: Vec<SlotCell> = self
                .slots
                .iter()
                .filter(|entry| {
                    let key = entry.key();
                    filter
                        .service_ids
                        .as_ref()
                        .is_none_or(|ids| ids.contains(&key.service_id))
                        && filter.date.is_none_or(|date| date == key.date)
                })
                .map(|entry| Arc::clone(entry.value()))
                .collect();

            let mut appointments = Vec::new();
            for cell in cells {
                let booked = cell.lock().await;
                appointments.extend(booked.iter().filter(|a| filter.matches(a)).cloned());
            }
            appointments.sort_by(|a, b| {
                (a.date, a.slot_time, a.created_at).cmp(&(b.date, b.slot_time, b.created_at))
            });
            Ok(appointments)
        })
    }

    fn ping(&self) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async { Ok(()) })
    }
}
