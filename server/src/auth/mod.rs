//! Request authentication.

pub mod middleware;

pub use middleware::{AdminUser, BearerToken, SessionUser};
