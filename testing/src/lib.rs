//! # Queueline Testing
//!
//! Fixtures and deterministic collaborators for exercising admission control
//! and the realtime hub without external services.
//!
//! ## Example
//!
//! ```
//! use queueline_testing::{TestHarness, fixtures};
//! use queueline_core::{ReservationRequest, UserId};
//!
//! # tokio_test::block_on(async {
//! let harness = TestHarness::new([fixtures::example_service()]);
//! let request = ReservationRequest {
//!     service_id: fixtures::example_service().id,
//!     date: fixtures::monday(),
//!     slot_time: fixtures::slot("09:00"),
//!     notes: None,
//! };
//! let appointment = harness.controller.reserve(&UserId::new("USR1"), request).await;
//! assert!(appointment.is_ok());
//! # });
//! ```

use chrono::{DateTime, Utc};
use queueline_core::environment::Clock;

/// Deterministic implementations of injected dependencies.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use chrono::NaiveDate;
    use futures::future::BoxFuture;
    use queueline_core::{ServiceDefinition, ServiceId, SnapshotPublisher};
    use tokio::sync::Mutex;

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use queueline_testing::mocks::FixedClock;
    /// use queueline_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Fixed clock at Monday 2024-01-01 08:00:00 UTC
    ///
    /// # Panics
    ///
    /// Panics if the hardcoded timestamp fails to parse, which cannot happen.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2024-01-01T08:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }

    /// Publisher that records every refresh instead of broadcasting.
    #[derive(Debug, Default)]
    pub struct RecordingPublisher {
        calls: Mutex<Vec<(ServiceId, NaiveDate)>>,
    }

    impl RecordingPublisher {
        /// Create an empty recorder
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Refreshes seen so far, in call order
        pub async fn calls(&self) -> Vec<(ServiceId, NaiveDate)> {
            self.calls.lock().await.clone()
        }
    }

    impl SnapshotPublisher for RecordingPublisher {
        fn refresh<'a>(
            &'a self,
            service: &'a ServiceDefinition,
            date: NaiveDate,
        ) -> BoxFuture<'a, ()> {
            Box::pin(async move {
                self.calls.lock().await.push((service.id.clone(), date));
            })
        }
    }
}

/// Service definitions and dates shared by tests.
///
/// Dates are fixed: 2024-01-01 is a Monday.
pub mod fixtures {
    use chrono::NaiveDate;
    use queueline_core::{
        DepartmentId, OperationalHours, ServiceDefinition, ServiceId, SlotTime, Weekday,
    };
    use std::num::NonZeroU32;

    /// Department every fixture service belongs to
    pub const DEPARTMENT: &str = "DEP1";

    /// Parse an `HH:MM` literal.
    ///
    /// # Panics
    ///
    /// Panics on a malformed literal.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn slot(raw: &str) -> SlotTime {
        raw.parse().expect("fixture slot time should be HH:MM")
    }

    /// Build a date.
    ///
    /// # Panics
    ///
    /// Panics on an impossible date.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).expect("fixture date should exist")
    }

    /// Monday 2024-01-01
    #[must_use]
    pub fn monday() -> NaiveDate {
        date(2024, 1, 1)
    }

    /// Tuesday 2024-01-02
    #[must_use]
    pub fn tuesday() -> NaiveDate {
        date(2024, 1, 2)
    }

    /// A service in [`DEPARTMENT`] with the given capacity and weekly template.
    ///
    /// A capacity of zero is raised to one.
    #[must_use]
    pub fn service(id: &str, capacity: u32, hours: &[(Weekday, &[&str])]) -> ServiceDefinition {
        let operational_hours: OperationalHours = hours
            .iter()
            .map(|(day, times)| (*day, times.iter().map(|t| slot(t)).collect()))
            .collect();
        ServiceDefinition {
            id: ServiceId::new(id),
            capacity_per_slot: NonZeroU32::new(capacity).unwrap_or(NonZeroU32::MIN),
            operational_hours,
            department_id: Some(DepartmentId::new(DEPARTMENT)),
        }
    }

    /// `SER1`: capacity 2, open Monday at 09:00 and 10:00
    #[must_use]
    pub fn example_service() -> ServiceDefinition {
        service("SER1", 2, &[(Weekday::Monday, &["09:00", "10:00"])])
    }

    /// `SER2`: capacity 6, open weekday mornings on the half hour
    #[must_use]
    pub fn weekday_service() -> ServiceDefinition {
        const MORNING: &[&str] = &["09:00", "09:30", "10:00", "10:30", "11:00", "11:30"];
        service(
            "SER2",
            6,
            &[
                (Weekday::Monday, MORNING),
                (Weekday::Tuesday, MORNING),
                (Weekday::Wednesday, MORNING),
                (Weekday::Thursday, MORNING),
                (Weekday::Friday, MORNING),
            ],
        )
    }

    /// A service with no department, which cannot take bookings
    #[must_use]
    pub fn unlinked_service(id: &str) -> ServiceDefinition {
        ServiceDefinition {
            department_id: None,
            ..service(id, 2, &[(Weekday::Monday, &["09:00"])])
        }
    }
}

/// Token minting for tests and local development.
pub mod tokens {
    use chrono::{Duration, Utc};
    use queueline_core::{Claims, Role, ServiceId, TokenIssuer, TokenVerifier, UserId};

    /// Shared secret used by [`TestTokens`]
    pub const TEST_SECRET: &[u8] = b"queueline-test-secret";

    /// Issues signed tokens for the common roles.
    #[derive(Debug, Clone)]
    pub struct TestTokens {
        issuer: TokenIssuer,
    }

    impl Default for TestTokens {
        fn default() -> Self {
            Self::new(TEST_SECRET)
        }
    }

    impl TestTokens {
        /// Tokens signed with `secret`
        #[must_use]
        pub fn new(secret: &[u8]) -> Self {
            Self {
                issuer: TokenIssuer::hs256(secret),
            }
        }

        /// Verifier matching [`TEST_SECRET`], with no expiry leeway
        #[must_use]
        pub fn verifier() -> TokenVerifier {
            TokenVerifier::hs256(TEST_SECRET).with_leeway(0)
        }

        /// Sign arbitrary claims.
        ///
        /// # Panics
        ///
        /// Panics if signing fails.
        #[must_use]
        #[allow(clippy::expect_used)]
        pub fn sign(&self, claims: &Claims) -> String {
            self.issuer.issue(claims).expect("HS256 signing should not fail")
        }

        /// Token for `user` with `role`, valid for an hour
        #[must_use]
        pub fn for_role(&self, user: &str, role: Role) -> String {
            self.sign(&Claims::new(&UserId::new(user), role, Utc::now() + Duration::hours(1)))
        }

        /// Citizen token, valid for an hour
        #[must_use]
        pub fn citizen(&self, user: &str) -> String {
            self.for_role(user, Role::Citizen)
        }

        /// Unrestricted admin token
        #[must_use]
        pub fn admin(&self, user: &str) -> String {
            self.for_role(user, Role::Admin)
        }

        /// Super admin token
        #[must_use]
        pub fn super_admin(&self, user: &str) -> String {
            self.for_role(user, Role::SuperAdmin)
        }

        /// Admin token restricted to `services`
        #[must_use]
        pub fn scoped_admin(&self, user: &str, services: &[&str]) -> String {
            let claims = Claims::new(&UserId::new(user), Role::Admin, Utc::now() + Duration::hours(1))
                .with_services(services.iter().map(|id| ServiceId::new(*id)));
            self.sign(&claims)
        }

        /// Citizen token that expires `seconds` from now
        #[must_use]
        pub fn citizen_expiring_in(&self, user: &str, seconds: i64) -> String {
            self.sign(&Claims::new(
                &UserId::new(user),
                Role::Citizen,
                Utc::now() + Duration::seconds(seconds),
            ))
        }

        /// Citizen token that expired an hour ago
        #[must_use]
        pub fn expired(&self, user: &str) -> String {
            self.citizen_expiring_in(user, -3600)
        }
    }
}

/// Fully wired in-memory system.
pub mod harness {
    use super::mocks::{FixedClock, test_clock};
    use super::tokens::TestTokens;
    use queueline_core::{
        AdmissionController, AdmissionEnvironment, HubConfig, InMemoryAppointmentStore,
        InMemoryServiceCatalog, QueueStateProjector, RealtimeHub, ServiceDefinition,
    };
    use std::sync::Arc;

    /// Catalog, store, hub and controller sharing one fixed clock.
    #[derive(Debug, Clone)]
    pub struct TestHarness {
        /// Clock fixed at [`test_clock`]
        pub clock: FixedClock,
        /// Seeded catalog
        pub catalog: InMemoryServiceCatalog,
        /// Appointment store
        pub store: InMemoryAppointmentStore,
        /// Hub verifying [`TestTokens`]
        pub hub: RealtimeHub,
        /// Controller publishing to `hub`
        pub controller: AdmissionController,
        /// Token minting
        pub tokens: TestTokens,
    }

    impl TestHarness {
        /// Wire a system around `services`.
        #[must_use]
        pub fn new(services: impl IntoIterator<Item = ServiceDefinition>) -> Self {
            let clock = test_clock();
            let catalog = InMemoryServiceCatalog::from_services(services);
            let store = InMemoryAppointmentStore::new();
            let projector =
                QueueStateProjector::new(Arc::new(catalog.clone()), Arc::new(store.clone()));
            let hub = RealtimeHub::new(
                TestTokens::verifier(),
                projector,
                Arc::new(clock.clone()),
                HubConfig::default(),
            );
            let controller = AdmissionController::new(AdmissionEnvironment {
                clock: Arc::new(clock.clone()),
                catalog: Arc::new(catalog.clone()),
                store: Arc::new(store.clone()),
                publisher: Arc::new(hub.clone()),
            });

            Self {
                clock,
                catalog,
                store,
                hub,
                controller,
                tokens: TestTokens::default(),
            }
        }
    }
}

/// Property-based testing strategies for domain types.
pub mod properties {
    use proptest::prelude::*;
    use queueline_core::SlotTime;

    /// Any valid slot time
    pub fn slot_time() -> impl Strategy<Value = SlotTime> {
        (0u8..24, 0u8..60).prop_filter_map("in range", |(h, m)| SlotTime::new(h, m))
    }

    /// Strings that are not canonical `HH:MM`
    pub fn malformed_slot_time() -> impl Strategy<Value = String> {
        prop_oneof![
            (0u8..10, 0u8..60).prop_map(|(h, m)| format!("{h}:{m:02}")),
            (24u8..100, 0u8..60).prop_map(|(h, m)| format!("{h}:{m:02}")),
            (0u8..24, 60u8..100).prop_map(|(h, m)| format!("{h:02}:{m}")),
            (0u8..24, 0u8..60).prop_map(|(h, m)| format!("{h:02}{m:02}")),
        ]
    }
}

/// Install a test-friendly tracing subscriber; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("queueline=debug")
        .try_init();
}

// Re-export commonly used items
pub use harness::TestHarness;
pub use mocks::{FixedClock, RecordingPublisher, test_clock};
pub use tokens::{TEST_SECRET, TestTokens};
