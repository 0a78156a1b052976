//! Error types for admission control and its collaborators.
//!
//! Every failure of a reservation, cancellation or status transition maps to
//! an [`ErrorKind`] so callers can branch on semantics rather than message
//! text. Kinds are grouped into [`ErrorCategory`] for transport mapping.

use crate::types::{
    AppointmentId, AppointmentStatus, ServiceId, SlotTime, SlotTimeParseError, Weekday,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for admission operations.
pub type Result<T> = std::result::Result<T, AdmissionError>;

/// Coarse grouping of failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Malformed input, rejected before touching storage
    Validation,
    /// Unknown service or appointment
    NotFound,
    /// Business-rule rejection; safe to retry with different parameters
    Conflict,
    /// Requester lacks ownership or role
    Authorization,
    /// Storage unavailable or transaction aborted; the whole operation may be retried
    Transient,
}

/// Machine-readable failure kind, exposed on every error response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed request
    Validation,
    /// Service does not exist (or was soft-deleted)
    ServiceNotFound,
    /// Service exists but belongs to no department
    DepartmentUnlinked,
    /// Appointment does not exist
    NotFound,
    /// Slot is at capacity
    SlotFull,
    /// Slot time is not in the service's template for that weekday
    SlotNotOperational,
    /// Appointment already completed, cancelled or marked no-show
    AlreadyTerminal,
    /// Requested status is not reachable from the current one
    InvalidTransition,
    /// Requester may not act on the resource
    Forbidden,
    /// Storage or infrastructure failure
    Internal,
}

impl ErrorKind {
    /// Category of this kind
    #[must_use]
    pub const fn category(self) -> ErrorCategory {
        match self {
            Self::Validation => ErrorCategory::Validation,
            Self::ServiceNotFound | Self::NotFound => ErrorCategory::NotFound,
            Self::DepartmentUnlinked
            | Self::SlotFull
            | Self::SlotNotOperational
            | Self::AlreadyTerminal
            | Self::InvalidTransition => ErrorCategory::Conflict,
            Self::Forbidden => ErrorCategory::Authorization,
            Self::Internal => ErrorCategory::Transient,
        }
    }

    /// Wire name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::ServiceNotFound => "service_not_found",
            Self::DepartmentUnlinked => "department_unlinked",
            Self::NotFound => "not_found",
            Self::SlotFull => "slot_full",
            Self::SlotNotOperational => "slot_not_operational",
            Self::AlreadyTerminal => "already_terminal",
            Self::InvalidTransition => "invalid_transition",
            Self::Forbidden => "forbidden",
            Self::Internal => "internal",
        }
    }
}

/// Failure of an admission-control operation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    /// Malformed input.
    #[error("Invalid request: {0}")]
    Validation(String),

    /// The service is unknown to the catalog.
    #[error("Service {0} not found")]
    ServiceNotFound(ServiceId),

    /// The service has no owning department.
    #[error("Service {0} is not linked to a department")]
    DepartmentUnlinked(ServiceId),

    /// The appointment does not exist.
    #[error("Appointment {0} not found")]
    AppointmentNotFound(AppointmentId),

    /// The slot time is not offered on that date.
    #[error("Service {service_id} does not offer a {slot_time} slot on {weekday} {date}")]
    SlotNotOperational {
        /// Service
        service_id: ServiceId,
        /// Requested date
        date: NaiveDate,
        /// Weekday of `date`
        weekday: Weekday,
        /// Requested slot time
        slot_time: SlotTime,
    },

    /// The slot has reached capacity.
    #[error("This time slot is full: {slot_time} on {date} already holds {capacity} appointments")]
    SlotFull {
        /// Service
        service_id: ServiceId,
        /// Requested date
        date: NaiveDate,
        /// Requested slot time
        slot_time: SlotTime,
        /// Slot capacity
        capacity: u32,
    },

    /// The appointment can no longer change status.
    #[error("Appointment {id} is already {status}")]
    AlreadyTerminal {
        /// Appointment
        id: AppointmentId,
        /// Terminal status it is in
        status: AppointmentStatus,
    },

    /// The requested status is not reachable from the current one.
    #[error("Appointment {id} cannot move from {from} to {to}")]
    InvalidTransition {
        /// Appointment
        id: AppointmentId,
        /// Current status
        from: AppointmentStatus,
        /// Requested status
        to: AppointmentStatus,
    },

    /// The requester may not act on the resource.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Storage or catalog failure; no partial state was left behind.
    #[error("Service temporarily unavailable: {0}")]
    Unavailable(String),
}

impl AdmissionError {
    /// Machine-readable kind
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::ServiceNotFound(_) => ErrorKind::ServiceNotFound,
            Self::DepartmentUnlinked(_) => ErrorKind::DepartmentUnlinked,
            Self::AppointmentNotFound(_) => ErrorKind::NotFound,
            Self::SlotNotOperational { .. } => ErrorKind::SlotNotOperational,
            Self::SlotFull { .. } => ErrorKind::SlotFull,
            Self::AlreadyTerminal { .. } => ErrorKind::AlreadyTerminal,
            Self::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            Self::Forbidden(_) => ErrorKind::Forbidden,
            Self::Unavailable(_) => ErrorKind::Internal,
        }
    }

    /// Coarse category
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        self.kind().category()
    }
}

impl From<SlotTimeParseError> for AdmissionError {
    fn from(err: SlotTimeParseError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<StoreError> for AdmissionError {
    fn from(err: StoreError) -> Self {
        Self::Unavailable(err.to_string())
    }
}

impl From<CatalogError> for AdmissionError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::NotFound(id) => Self::ServiceNotFound(id),
            other => Self::Unavailable(other.to_string()),
        }
    }
}

/// Failure reported by an [`AppointmentStore`](crate::store::AppointmentStore).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Backend could not be reached.
    #[error("appointment store unavailable: {0}")]
    Unavailable(String),

    /// Transaction rolled back; nothing was written.
    #[error("appointment store transaction aborted: {0}")]
    Aborted(String),

    /// Stored data could not be decoded.
    #[error("corrupt appointment record: {0}")]
    Corrupt(String),
}

/// Failure reported by a [`ServiceCatalog`](crate::catalog::ServiceCatalog).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CatalogError {
    /// Unknown or soft-deleted service.
    #[error("service {0} not found")]
    NotFound(ServiceId),

    /// Catalog entry violates the service schema.
    #[error("invalid service definition: {0}")]
    Invalid(String),

    /// Backend could not be reached.
    #[error("service catalog unavailable: {0}")]
    Unavailable(String),
}
