//! Authentication extractors.
//!
//! Provides Axum extractors for:
//! - Bearer token extraction from the `Authorization` header
//! - Token verification into a [`Principal`]
//! - Administrator checks
//!
//! ```rust,ignore
//! async fn my_appointments(session: SessionUser) -> Result<Json<Vec<Appointment>>, AppError> {
//!     // session.principal is verified and unexpired
//! }
//! ```

use crate::error::AppError;
use crate::server::state::AppState;
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use queueline_core::Principal;

/// Bearer token extracted from `Authorization: Bearer <token>` header.
#[derive(Debug, Clone)]
pub struct BearerToken(pub String);

impl BearerToken {
    /// Token from the `Authorization` header, if well-formed.
    #[must_use]
    pub fn from_parts(parts: &Parts) -> Option<Self> {
        parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(|token| Self(token.to_string()))
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for BearerToken
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if !parts.headers.contains_key(axum::http::header::AUTHORIZATION) {
            return Err(AppError::unauthorized("Missing authorization header"));
        }
        Self::from_parts(parts).ok_or_else(|| {
            AppError::unauthorized("Invalid authorization format. Expected 'Bearer <token>'")
        })
    }
}

/// Authenticated caller.
///
/// Verifies the bearer token with the hub's verifier. Use as a handler
/// parameter to require authentication.
#[derive(Debug, Clone)]
pub struct SessionUser {
    /// Verified identity
    pub principal: Principal,
}

#[async_trait]
impl FromRequestParts<AppState> for SessionUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let BearerToken(token) = BearerToken::from_request_parts(parts, state).await?;
        let principal = state.hub.verifier().verify(&token).map_err(|error| {
            tracing::debug!(%error, "Rejected bearer token");
            AppError::from(error)
        })?;
        Ok(Self { principal })
    }
}

/// Authenticated administrator of any scope.
///
/// Rejects citizens with 403. Per-service scope is checked by the
/// controller.
#[derive(Debug, Clone)]
pub struct AdminUser {
    /// Verified identity, with an admin scope
    pub principal: Principal,
}

#[async_trait]
impl FromRequestParts<AppState> for AdminUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let SessionUser { principal } = SessionUser::from_request_parts(parts, state).await?;
        if !principal.is_admin() {
            return Err(AppError::forbidden("Administrator role required"));
        }
        Ok(Self { principal })
    }
}
