//! Slot calendar: which slot-start times a service offers on a given date.

use crate::types::{ServiceDefinition, SlotTime, Weekday};
use chrono::{DateTime, Duration, NaiveDate, Utc};

/// Pure lookup of a service's slot template.
#[derive(Debug, Clone, Copy, Default)]
pub struct SlotCalendar;

impl SlotCalendar {
    /// Slot-start times offered on `date`, in configured order.
    ///
    /// Empty when the weekday of `date` has no entry in the template.
    #[must_use]
    pub fn valid_slots(service: &ServiceDefinition, date: NaiveDate) -> &[SlotTime] {
        service
            .operational_hours
            .get(&Weekday::of(date))
            .map_or(&[], Vec::as_slice)
    }

    /// Whether `time` is offered on `date`.
    #[must_use]
    pub fn is_operational(service: &ServiceDefinition, date: NaiveDate, time: SlotTime) -> bool {
        Self::valid_slots(service, date).contains(&time)
    }

    /// Calendar date at `now` in a zone `offset_minutes` east of UTC.
    #[must_use]
    pub fn local_date(now: DateTime<Utc>, offset_minutes: i32) -> NaiveDate {
        (now + Duration::minutes(i64::from(offset_minutes))).date_naive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can use unwrap
mod tests {
    use super::*;
    use crate::types::{OperationalHours, ServiceId};
    use proptest::prelude::*;
    use std::num::NonZeroU32;

    fn service(hours: OperationalHours) -> ServiceDefinition {
        ServiceDefinition {
            id: ServiceId::new("SER1"),
            capacity_per_slot: NonZeroU32::new(2).unwrap(),
            operational_hours: hours,
            department_id: None,
        }
    }

    fn time(raw: &str) -> SlotTime {
        raw.parse().unwrap()
    }

    #[test]
    fn absent_weekday_has_no_slots() {
        let svc = service(OperationalHours::from([(Weekday::Monday, vec![time("09:00")])]));
        // 2024-01-02 is a Tuesday
        let tuesday = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        assert!(SlotCalendar::valid_slots(&svc, tuesday).is_empty());
    }

    #[test]
    fn configured_order_is_kept() {
        let configured = vec![time("14:00"), time("09:00"), time("11:30")];
        let svc = service(OperationalHours::from([(Weekday::Monday, configured.clone())]));
        let monday = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        assert_eq!(SlotCalendar::valid_slots(&svc, monday), configured.as_slice());
        assert!(SlotCalendar::is_operational(&svc, monday, time("11:30")));
        assert!(!SlotCalendar::is_operational(&svc, monday, time("11:00")));
    }

    #[test]
    fn local_date_crosses_midnight() {
        let now = DateTime::parse_from_rfc3339("2024-01-01T23:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(SlotCalendar::local_date(now, 0), NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        assert_eq!(SlotCalendar::local_date(now, 60), NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        assert_eq!(
            SlotCalendar::local_date(now, -24 * 60),
            NaiveDate::from_ymd_opt(2023, 12, 31).unwrap()
        );
    }

    proptest! {
        #[test]
        fn only_the_matching_weekday_is_operational(days in 0i64..3650, h in 0u8..24, m in 0u8..60) {
            let slot = SlotTime::new(h, m).unwrap();
            let svc = service(OperationalHours::from([(Weekday::Wednesday, vec![slot])]));
            let date = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap() + Duration::days(days);

            let slots = SlotCalendar::valid_slots(&svc, date);
            if Weekday::of(date) == Weekday::Wednesday {
                prop_assert_eq!(slots, &[slot][..]);
            } else {
                prop_assert!(slots.is_empty());
            }
        }

        #[test]
        fn slot_time_display_round_trips(h in 0u8..24, m in 0u8..60) {
            let slot = SlotTime::new(h, m).unwrap();
            prop_assert_eq!(slot.to_string().parse::<SlotTime>().unwrap(), slot);
        }
    }
}
