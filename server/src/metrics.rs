//! Prometheus exporter for the metrics recorded by `queueline-core`.
//!
//! The recorder is installed once at startup and rendered by `GET /metrics`.
//!
//! # Exported Metrics
//!
//! ## Counters
//! - `queueline_reservations_total{outcome}` - Reservation attempts by outcome
//! - `queueline_transitions_total{status}` - Status transitions by target
//! - `queueline_snapshots_published_total` - Snapshots pushed to topics
//! - `queueline_subscriber_lagged_total` - Events skipped by slow subscribers
//!
//! ## Gauges
//! - `queueline_ws_connections` - Open WebSocket sessions
//!
//! ## Histograms
//! - `queueline_admission_duration_seconds` - Admission latency

use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};

const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
];

fn builder() -> Result<PrometheusBuilder, BuildError> {
    PrometheusBuilder::new().set_buckets_for_metric(
        Matcher::Suffix("duration_seconds".to_string()),
        LATENCY_BUCKETS,
    )
}

/// Install the Prometheus recorder as the global `metrics` recorder and
/// register metric descriptions.
///
/// # Errors
///
/// Returns [`BuildError`] if a recorder is already installed or the
/// exporter cannot be built.
pub fn install() -> Result<PrometheusHandle, BuildError> {
    let handle = builder()?.install_recorder()?;
    queueline_core::metrics::describe();
    tracing::info!("Metrics recorder installed");
    Ok(handle)
}

/// A handle backed by a recorder that is not installed globally.
///
/// Renders an empty exposition; used where a global recorder already exists
/// or is unwanted, such as tests.
#[must_use]
pub fn detached() -> PrometheusHandle {
    PrometheusBuilder::new().build_recorder().handle()
}
