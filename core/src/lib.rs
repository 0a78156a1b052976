//! # Queueline Core
//!
//! Slot admission control and real-time queue-state broadcast.
//!
//! Citizens book capacity-limited slots of a service on a date. This crate
//! decides whether each booking may be accepted and keeps every observer of
//! that service, plus the administrative dashboard, in sync with the
//! resulting occupancy.
//!
//! ## Components
//!
//! - [`SlotCalendar`]: slot-start times a service offers on a date
//! - [`QueueStateProjector`]: template joined with committed occupancy
//! - [`AdmissionController`]: the only writer of appointments
//! - [`RealtimeHub`]: per-service and admin topics, authenticated at connect
//! - [`AppointmentStore`] / [`ServiceCatalog`]: persistence and catalog seams
//!
//! ## Example
//!
//! ```no_run
//! use queueline_core::*;
//! use std::sync::Arc;
//!
//! # async fn example(catalog: InMemoryServiceCatalog) -> Result<(), AdmissionError> {
//! let catalog: Arc<dyn ServiceCatalog> = Arc::new(catalog);
//! let store: Arc<dyn AppointmentStore> = Arc::new(InMemoryAppointmentStore::new());
//! let clock: Arc<dyn Clock> = Arc::new(SystemClock);
//!
//! let projector = QueueStateProjector::new(Arc::clone(&catalog), Arc::clone(&store));
//! let hub = RealtimeHub::new(
//!     TokenVerifier::hs256(b"secret"),
//!     projector,
//!     Arc::clone(&clock),
//!     HubConfig::default(),
//! );
//! let controller = AdmissionController::new(AdmissionEnvironment {
//!     clock,
//!     catalog,
//!     store,
//!     publisher: Arc::new(hub),
//! });
//!
//! let request = ReservationRequest {
//!     service_id: ServiceId::new("SER1"),
//!     date: parse_date("2024-01-01").map_err(|e| AdmissionError::Validation(e.to_string()))?,
//!     slot_time: "09:00".parse()?,
//!     notes: None,
//! };
//! let appointment = controller.reserve(&UserId::new("USR1"), request).await?;
//! # let _ = appointment;
//! # Ok(())
//! # }
//! ```

pub mod access;
pub mod admission;
pub mod calendar;
pub mod catalog;
pub mod environment;
pub mod error;
pub mod hub;
pub mod memory;
pub mod metrics;
pub mod projection;
pub mod store;
pub mod token;
pub mod types;

pub use access::{AdminScope, Principal, Role};
pub use admission::{AdmissionController, AdmissionEnvironment, MAX_NOTES_CHARS, ReservationRequest};
pub use calendar::SlotCalendar;
pub use catalog::{InMemoryServiceCatalog, ServiceCatalog};
pub use environment::{Clock, SystemClock};
pub use error::{AdmissionError, CatalogError, ErrorCategory, ErrorKind, StoreError};
pub use hub::{Connection, HubConfig, HubError, HubEvent, RealtimeHub, SnapshotPublisher, Topic};
pub use memory::InMemoryAppointmentStore;
pub use projection::QueueStateProjector;
pub use store::{Admission, AppointmentFilter, AppointmentStore, Occupancy, Transition};
pub use token::{Claims, TokenError, TokenIssuer, TokenVerifier};
pub use types::{
    Appointment, AppointmentId, AppointmentStatus, DepartmentId, OperationalHours,
    ServiceDefinition, ServiceId, ServiceSnapshot, SlotKey, SlotSnapshot, SlotTime, UserId,
    Weekday, parse_date,
};
