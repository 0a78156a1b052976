//! # Queueline Server
//!
//! HTTP and WebSocket boundary over `queueline-core`:
//!
//! - Public slot availability per service and date
//! - Authenticated reservation, listing and cancellation
//! - Administrator status changes
//! - A WebSocket session that streams queue snapshots and accepts bookings
//! - Health, readiness and Prometheus metrics
//!
//! Access tokens are HS256 JWTs issued elsewhere; this server only verifies
//! them.
//!
//! ## Architecture
//!
//! ```text
//! HTTP / WS ─► AdmissionController ─► AppointmentStore (memory | postgres)
//!                    │
//!                    └─► RealtimeHub ─► per-service topics + admin topic
//! ```

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod metrics;
pub mod server;

pub use config::Config;
pub use error::AppError;
pub use server::{AppState, build_router};
