//! Metric names and recorders for admission control and broadcast.
//!
//! Recording goes through the `metrics` facade; with no recorder installed
//! every call is a no-op. The server installs a Prometheus recorder and calls
//! [`describe`] once at startup.

use ::metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::time::Duration;

/// Reservations attempted, labelled by `outcome`
pub const RESERVATIONS_TOTAL: &str = "queueline_reservations_total";
/// Status transitions applied, labelled by target `status`
pub const TRANSITIONS_TOTAL: &str = "queueline_transitions_total";
/// Snapshots pushed to topics
pub const SNAPSHOTS_PUBLISHED_TOTAL: &str = "queueline_snapshots_published_total";
/// Time spent in the admission critical path
pub const ADMISSION_DURATION_SECONDS: &str = "queueline_admission_duration_seconds";
/// Open WebSocket sessions
pub const WS_CONNECTIONS: &str = "queueline_ws_connections";
/// Events skipped by subscribers that fell behind
pub const SUBSCRIBER_LAGGED_TOTAL: &str = "queueline_subscriber_lagged_total";

/// Register descriptions for every metric above.
pub fn describe() {
    describe_counter!(RESERVATIONS_TOTAL, "Total reservation attempts by outcome");
    describe_counter!(TRANSITIONS_TOTAL, "Total appointment status transitions by target status");
    describe_counter!(SNAPSHOTS_PUBLISHED_TOTAL, "Total queue snapshots published");
    describe_histogram!(ADMISSION_DURATION_SECONDS, "Time taken to admit or reject a reservation");
    describe_gauge!(WS_CONNECTIONS, "Currently open WebSocket sessions");
    describe_counter!(SUBSCRIBER_LAGGED_TOTAL, "Total events skipped by lagging subscribers");
}

/// Record a reservation attempt.
pub fn record_reservation(outcome: &'static str, duration: Duration) {
    counter!(RESERVATIONS_TOTAL, "outcome" => outcome).increment(1);
    histogram!(ADMISSION_DURATION_SECONDS).record(duration.as_secs_f64());
}

/// Record an applied status transition.
pub fn record_transition(status: &'static str) {
    counter!(TRANSITIONS_TOTAL, "status" => status).increment(1);
}

/// Record a published snapshot.
pub fn record_snapshot_published() {
    counter!(SNAPSHOTS_PUBLISHED_TOTAL).increment(1);
}

/// Record events skipped by a lagging subscriber.
pub fn record_lagged(skipped: u64) {
    counter!(SUBSCRIBER_LAGGED_TOTAL).increment(skipped);
}

/// Set the open WebSocket session count.
#[allow(clippy::cast_precision_loss)] // Connection counts are far below 2^52
pub fn set_ws_connections(count: usize) {
    gauge!(WS_CONNECTIONS).set(count as f64);
}
