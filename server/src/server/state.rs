//! Application state for the Queueline HTTP server.

use crate::config::RealtimeConfig;
use metrics_exporter_prometheus::PrometheusHandle;
use queueline_core::{AdmissionController, AppointmentStore, QueueStateProjector, RealtimeHub};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Application state shared across all HTTP handlers.
///
/// Cloned per request; every field is reference-counted.
#[derive(Clone)]
pub struct AppState {
    /// Reservation and status-change entry point
    pub controller: AdmissionController,
    /// Realtime topics and token verification
    pub hub: RealtimeHub,
    /// Snapshot queries for the public slots endpoint
    pub projector: QueueStateProjector,
    /// Store handle, used by readiness checks
    pub store: Arc<dyn AppointmentStore>,
    /// Prometheus exposition
    pub metrics: PrometheusHandle,
    /// WebSocket tuning
    pub realtime: RealtimeConfig,
    ws_connections: Arc<AtomicUsize>,
}

impl AppState {
    /// Create a new application state.
    #[must_use]
    pub fn new(
        controller: AdmissionController,
        hub: RealtimeHub,
        projector: QueueStateProjector,
        store: Arc<dyn AppointmentStore>,
        metrics: PrometheusHandle,
        realtime: RealtimeConfig,
    ) -> Self {
        Self {
            controller,
            hub,
            projector,
            store,
            metrics,
            realtime,
            ws_connections: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Currently open WebSocket sessions
    #[must_use]
    pub fn ws_connections(&self) -> usize {
        self.ws_connections.load(Ordering::Relaxed)
    }

    /// Reserve a WebSocket session slot, or `None` at the configured limit.
    ///
    /// The slot is released when the returned guard drops.
    #[must_use]
    pub fn acquire_ws_slot(&self) -> Option<WsSlot> {
        let limit = self.realtime.max_connections;
        self.ws_connections
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current < limit).then_some(current + 1)
            })
            .ok()
            .map(|previous| {
                queueline_core::metrics::set_ws_connections(previous + 1);
                WsSlot {
                    counter: Arc::clone(&self.ws_connections),
                }
            })
    }
}

/// An occupied WebSocket session slot.
#[derive(Debug)]
pub struct WsSlot {
    counter: Arc<AtomicUsize>,
}

impl Drop for WsSlot {
    fn drop(&mut self) {
        let previous = self.counter.fetch_sub(1, Ordering::AcqRel);
        queueline_core::metrics::set_ws_connections(previous.saturating_sub(1));
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("hub", &self.hub)
            .field("realtime", &self.realtime)
            .field("ws_connections", &self.ws_connections())
            .finish_non_exhaustive()
    }
}
