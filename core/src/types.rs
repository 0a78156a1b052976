//! Domain types for slot admission.
//!
//! Identifiers, slot times, operational-hours templates, appointments and the
//! computed snapshots that are broadcast to subscribers.
//!
//! Slot times are plain `(hour, minute)` values. They are parsed from and
//! rendered as canonical `HH:MM` strings and compared structurally, never
//! through a date/time anchored to some epoch.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::num::NonZeroU32;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            #[doc = concat!("Create a `", stringify!($name), "` from any string-like value")]
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Borrow the raw identifier
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self::new(id)
            }
        }
    };
}

string_id!(
    /// Identifier of a service offered by a department (owned by the external catalog)
    ServiceId
);
string_id!(
    /// Identifier of a department (owned by the external catalog)
    DepartmentId
);
string_id!(
    /// Identifier of a citizen or staff member, as carried in the token subject
    UserId
);

/// Unique identifier for an appointment
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AppointmentId(Uuid);

impl AppointmentId {
    /// Creates a new random `AppointmentId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create an `AppointmentId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for AppointmentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AppointmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Slot time
// ============================================================================

/// Error returned when a string is not a canonical `HH:MM` slot time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid slot time {input:?}: expected zero-padded HH:MM (00:00-23:59)")]
pub struct SlotTimeParseError {
    input: String,
}

/// Time-of-day at which a slot starts.
///
/// Ordering is chronological within a day.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotTime {
    hour: u8,
    minute: u8,
}

impl SlotTime {
    /// Build a slot time, returning `None` when out of range.
    #[must_use]
    pub const fn new(hour: u8, minute: u8) -> Option<Self> {
        if hour < 24 && minute < 60 {
            Some(Self { hour, minute })
        } else {
            None
        }
    }

    /// Hour component (0-23)
    #[must_use]
    pub const fn hour(self) -> u8 {
        self.hour
    }

    /// Minute component (0-59)
    #[must_use]
    pub const fn minute(self) -> u8 {
        self.minute
    }
}

impl FromStr for SlotTime {
    type Err = SlotTimeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || SlotTimeParseError {
            input: s.to_string(),
        };
        let bytes = s.as_bytes();
        if bytes.len() != 5 || bytes[2] != b':' {
            return Err(err());
        }
        let digit = |b: u8| b.is_ascii_digit().then(|| b - b'0');
        let (Some(h1), Some(h2), Some(m1), Some(m2)) =
            (digit(bytes[0]), digit(bytes[1]), digit(bytes[3]), digit(bytes[4]))
        else {
            return Err(err());
        };
        Self::new(h1 * 10 + h2, m1 * 10 + m2).ok_or_else(err)
    }
}

impl fmt::Display for SlotTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl Serialize for SlotTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SlotTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Weekday
// ============================================================================

/// Error returned for an unknown weekday name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown weekday {0:?}")]
pub struct WeekdayParseError(String);

/// Day of the week, keyed by its English name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Weekday {
    /// Monday
    Monday,
    /// Tuesday
    Tuesday,
    /// Wednesday
    Wednesday,
    /// Thursday
    Thursday,
    /// Friday
    Friday,
    /// Saturday
    Saturday,
    /// Sunday
    Sunday,
}

impl Weekday {
    /// Weekday of a calendar date (proleptic Gregorian).
    #[must_use]
    pub fn of(date: NaiveDate) -> Self {
        match date.weekday() {
            chrono::Weekday::Mon => Self::Monday,
            chrono::Weekday::Tue => Self::Tuesday,
            chrono::Weekday::Wed => Self::Wednesday,
            chrono::Weekday::Thu => Self::Thursday,
            chrono::Weekday::Fri => Self::Friday,
            chrono::Weekday::Sat => Self::Saturday,
            chrono::Weekday::Sun => Self::Sunday,
        }
    }

    /// Lower-case English name, as used in operational-hours templates
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Monday => "monday",
            Self::Tuesday => "tuesday",
            Self::Wednesday => "wednesday",
            Self::Thursday => "thursday",
            Self::Friday => "friday",
            Self::Saturday => "saturday",
            Self::Sunday => "sunday",
        }
    }
}

impl FromStr for Weekday {
    type Err = WeekdayParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "monday" => Ok(Self::Monday),
            "tuesday" => Ok(Self::Tuesday),
            "wednesday" => Ok(Self::Wednesday),
            "thursday" => Ok(Self::Thursday),
            "friday" => Ok(Self::Friday),
            "saturday" => Ok(Self::Saturday),
            "sunday" => Ok(Self::Sunday),
            _ => Err(WeekdayParseError(s.to_string())),
        }
    }
}

impl fmt::Display for Weekday {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Weekday {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Weekday {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Weekly template of slot-start times.
///
/// Weekdays absent from the map are non-operational. Each day's sequence is
/// kept in the order it was configured.
pub type OperationalHours = BTreeMap<Weekday, Vec<SlotTime>>;

// ============================================================================
// Service definition
// ============================================================================

/// Read-only view of a service, as published by the external catalog.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDefinition {
    /// Service identifier
    pub id: ServiceId,
    /// Maximum number of active appointments per slot
    pub capacity_per_slot: NonZeroU32,
    /// Weekly slot template
    #[serde(default)]
    pub operational_hours: OperationalHours,
    /// Owning department; a service without one cannot take bookings
    #[serde(default)]
    pub department_id: Option<DepartmentId>,
}

impl ServiceDefinition {
    /// Capacity as a plain integer
    #[must_use]
    pub const fn capacity(&self) -> u32 {
        self.capacity_per_slot.get()
    }
}

// ============================================================================
// Appointments
// ============================================================================

/// Lifecycle status of an appointment.
///
/// ```text
/// scheduled ──► confirmed ──► completed
///     │             │
///     ├─────────────┴──► cancelled
///     └─────────────┴──► no_show
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    /// Booked, awaiting confirmation
    Scheduled,
    /// Confirmed by staff
    Confirmed,
    /// Service delivered
    Completed,
    /// Withdrawn by the citizen or staff
    Cancelled,
    /// Citizen did not attend
    NoShow,
}

impl AppointmentStatus {
    /// Statuses that count towards slot occupancy
    pub const ACTIVE: [Self; 2] = [Self::Scheduled, Self::Confirmed];

    /// Whether no further transition is possible
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::NoShow)
    }

    /// Whether the appointment holds a place in its slot
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Scheduled | Self::Confirmed)
    }

    /// Whether `self → target` is an edge of the state machine
    #[must_use]
    pub const fn can_transition_to(self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Scheduled, Self::Confirmed)
                | (Self::Confirmed, Self::Completed)
                | (
                    Self::Scheduled | Self::Confirmed,
                    Self::Cancelled | Self::NoShow
                )
        )
    }

    /// Wire / storage name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Confirmed => "confirmed",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::NoShow => "no_show",
        }
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AppointmentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(Self::Scheduled),
            "confirmed" => Ok(Self::Confirmed),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            "no_show" => Ok(Self::NoShow),
            other => Err(format!("unknown appointment status {other:?}")),
        }
    }
}

/// The unit of admission control: one slot of one service on one date.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SlotKey {
    /// Service
    pub service_id: ServiceId,
    /// Calendar date
    pub date: NaiveDate,
    /// Slot start
    pub slot_time: SlotTime,
}

/// A citizen's booking of a slot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Appointment {
    /// Appointment identifier
    pub id: AppointmentId,
    /// Booking citizen
    pub user_id: UserId,
    /// Booked service
    pub service_id: ServiceId,
    /// Department owning the service at booking time
    pub department_id: DepartmentId,
    /// Calendar date (no time component)
    pub date: NaiveDate,
    /// Slot start within `date`
    pub slot_time: SlotTime,
    /// Current lifecycle status
    pub status: AppointmentStatus,
    /// Free-form notes from the citizen
    pub notes: Option<String>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last status change
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    /// The slot this appointment occupies
    #[must_use]
    pub fn slot_key(&self) -> SlotKey {
        SlotKey {
            service_id: self.service_id.clone(),
            date: self.date,
            slot_time: self.slot_time,
        }
    }
}

// ============================================================================
// Snapshots
// ============================================================================

/// Occupancy of a single slot at a point in time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotSnapshot {
    /// Slot start
    pub time: SlotTime,
    /// Active appointments in the slot
    #[serde(rename = "currentQueueSize")]
    pub occupancy: u32,
    /// Slot capacity
    #[serde(rename = "maxCapacity")]
    pub capacity: u32,
    /// `occupancy < capacity`
    #[serde(rename = "isAvailable")]
    pub available: bool,
}

impl SlotSnapshot {
    /// Build a snapshot entry, deriving availability.
    #[must_use]
    pub const fn new(time: SlotTime, occupancy: u32, capacity: u32) -> Self {
        Self {
            time,
            occupancy,
            capacity,
            available: occupancy < capacity,
        }
    }
}

/// Queue state of every slot of a service on one date.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSnapshot {
    /// Service
    pub service_id: ServiceId,
    /// Calendar date
    pub date: NaiveDate,
    /// Slots in template order
    pub slots: Vec<SlotSnapshot>,
}

impl ServiceSnapshot {
    /// Find the entry for a slot time
    #[must_use]
    pub fn slot(&self, time: SlotTime) -> Option<&SlotSnapshot> {
        self.slots.iter().find(|slot| slot.time == time)
    }
}

/// Parse a strict `YYYY-MM-DD` calendar date.
///
/// # Errors
///
/// Returns the underlying chrono parse error for malformed input.
pub fn parse_date(raw: &str) -> Result<NaiveDate, chrono::ParseError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can use unwrap
mod tests {
    use super::*;

    #[test]
    fn slot_time_parses_canonical_form() {
        let time: SlotTime = "09:05".parse().unwrap();
        assert_eq!((time.hour(), time.minute()), (9, 5));
        assert_eq!(time.to_string(), "09:05");
    }

    #[test]
    fn slot_time_rejects_non_canonical_forms() {
        for raw in ["9:05", "09:5", "24:00", "09:60", "0905", "09-05", "", "ab:cd", " 9:05"] {
            assert!(raw.parse::<SlotTime>().is_err(), "{raw:?} should be rejected");
        }
    }

    #[test]
    fn slot_time_orders_chronologically() {
        let early: SlotTime = "07:30".parse().unwrap();
        let late: SlotTime = "13:00".parse().unwrap();
        assert!(early < late);
    }

    #[test]
    fn weekday_of_known_dates() {
        // 2024-01-01 was a Monday, 2024-02-29 a Thursday.
        let monday = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let leap = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        assert_eq!(Weekday::of(monday), Weekday::Monday);
        assert_eq!(Weekday::of(leap), Weekday::Thursday);
    }

    #[test]
    fn weekday_names_are_case_insensitive() {
        assert_eq!("Friday".parse::<Weekday>().unwrap(), Weekday::Friday);
        assert_eq!("SUNDAY".parse::<Weekday>().unwrap(), Weekday::Sunday);
        assert!("funday".parse::<Weekday>().is_err());
    }

    #[test]
    fn status_machine_edges() {
        use AppointmentStatus::{Cancelled, Completed, Confirmed, NoShow, Scheduled};

        assert!(Scheduled.can_transition_to(Confirmed));
        assert!(Confirmed.can_transition_to(Completed));
        assert!(Scheduled.can_transition_to(Cancelled));
        assert!(Confirmed.can_transition_to(NoShow));

        assert!(!Scheduled.can_transition_to(Completed));
        assert!(!Confirmed.can_transition_to(Scheduled));
        for terminal in [Completed, Cancelled, NoShow] {
            assert!(terminal.is_terminal());
            for target in [Scheduled, Confirmed, Completed, Cancelled, NoShow] {
                assert!(!terminal.can_transition_to(target));
            }
        }
    }

    #[test]
    fn service_definition_reads_template_json() {
        let json = r#"{
            "id": "SER1",
            "capacityPerSlot": 2,
            "operationalHours": { "Monday": ["09:00", "10:00"] },
            "departmentId": "DEP1"
        }"#;
        let service: ServiceDefinition = serde_json::from_str(json).unwrap();
        assert_eq!(service.capacity(), 2);
        assert_eq!(
            service.operational_hours[&Weekday::Monday],
            vec!["09:00".parse::<SlotTime>().unwrap(), "10:00".parse().unwrap()]
        );
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let json = r#"{ "id": "SER1", "capacityPerSlot": 0 }"#;
        assert!(serde_json::from_str::<ServiceDefinition>(json).is_err());
    }

    #[test]
    fn slot_snapshot_uses_queue_wire_names() {
        let slot = SlotSnapshot::new("09:00".parse().unwrap(), 2, 2);
        let json = serde_json::to_value(&slot).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "time": "09:00",
                "currentQueueSize": 2,
                "maxCapacity": 2,
                "isAvailable": false
            })
        );
    }
}
