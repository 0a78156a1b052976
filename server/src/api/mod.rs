//! HTTP and WebSocket handlers.

pub mod admin;
pub mod appointments;
pub mod slots;
pub mod websocket;
