//! Queue-state projection: slot template joined with committed occupancy.

use crate::calendar::SlotCalendar;
use crate::catalog::ServiceCatalog;
use crate::error::Result;
use crate::store::{AppointmentStore, Occupancy};
use crate::types::{ServiceDefinition, ServiceId, ServiceSnapshot, SlotSnapshot};
use chrono::NaiveDate;
use std::sync::Arc;

/// Builds [`ServiceSnapshot`]s from the catalog and the appointment store.
#[derive(Clone)]
pub struct QueueStateProjector {
    catalog: Arc<dyn ServiceCatalog>,
    store: Arc<dyn AppointmentStore>,
}

impl QueueStateProjector {
    /// Create a projector over the given collaborators
    #[must_use]
    pub fn new(catalog: Arc<dyn ServiceCatalog>, store: Arc<dyn AppointmentStore>) -> Self {
        Self { catalog, store }
    }

    /// Snapshot of every slot `service` offers on `date`.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::Unavailable`](crate::error::AdmissionError::Unavailable)
    /// if occupancy cannot be read.
    pub async fn snapshot(
        &self,
        service: &ServiceDefinition,
        date: NaiveDate,
    ) -> Result<ServiceSnapshot> {
        let occupancy = self.store.occupancy(&service.id, date).await?;
        Ok(project(service, date, &occupancy))
    }

    /// Resolve `service_id` through the catalog, then snapshot it.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::ServiceNotFound`](crate::error::AdmissionError::ServiceNotFound)
    /// for unknown services, or a transient error if a backend fails.
    pub async fn snapshot_for(
        &self,
        service_id: &ServiceId,
        date: NaiveDate,
    ) -> Result<ServiceSnapshot> {
        let service = self.catalog.get(service_id).await?;
        self.snapshot(&service, date).await
    }
}

/// Left-join the slot template for `date` against `occupancy`.
///
/// Template slots with no count get occupancy 0; counts at times outside the
/// template are ignored.
#[must_use]
pub fn project(service: &ServiceDefinition, date: NaiveDate, occupancy: &Occupancy) -> ServiceSnapshot {
    let capacity = service.capacity();
    let slots = SlotCalendar::valid_slots(service, date)
        .iter()
        .map(|&time| SlotSnapshot::new(time, occupancy.get(&time).copied().unwrap_or(0), capacity))
        .collect();

    ServiceSnapshot {
        service_id: service.id.clone(),
        date,
        slots,
    }
}
