//! Signed access tokens.
//!
//! Tokens are HS256 JWTs carrying `{sub, role, exp}` and an optional
//! `services` restriction for department administrators. Verification
//! failure is a hard rejection: there is no anonymous fallback.

use crate::access::{AdminScope, Principal, Role};
use crate::types::{ServiceId, UserId};
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Claims carried by an access token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// User identifier
    pub sub: String,
    /// Role of the user
    pub role: Role,
    /// Expiry, seconds since the Unix epoch
    pub exp: i64,
    /// Services an admin is restricted to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub services: Option<Vec<ServiceId>>,
}

impl Claims {
    /// Claims for `user_id` with `role`, expiring at `expires_at`.
    #[must_use]
    pub fn new(user_id: &UserId, role: Role, expires_at: DateTime<Utc>) -> Self {
        Self {
            sub: user_id.to_string(),
            role,
            exp: expires_at.timestamp(),
            services: None,
        }
    }

    /// Restrict an admin token to the given services.
    #[must_use]
    pub fn with_services(mut self, services: impl IntoIterator<Item = ServiceId>) -> Self {
        self.services = Some(services.into_iter().collect());
        self
    }
}

/// Token verification or signing failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    /// No token was presented.
    #[error("Authentication error: token not provided")]
    Missing,

    /// Signature, format or claims are invalid.
    #[error("Authentication error: invalid token ({0})")]
    Invalid(String),

    /// Token is past its expiry.
    #[error("Authentication error: token expired")]
    Expired,

    /// Token could not be signed.
    #[error("failed to sign token: {0}")]
    Signing(String),
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => Self::Expired,
            _ => Self::Invalid(err.to_string()),
        }
    }
}

/// Verifies access tokens and turns them into a [`Principal`].
#[derive(Clone)]
pub struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    /// Verifier for HS256 tokens signed with `secret`.
    #[must_use]
    pub fn hs256(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp", "sub"]);
        Self {
            key: DecodingKey::from_secret(secret),
            validation,
        }
    }

    /// Accept tokens up to `seconds` past expiry to absorb clock skew.
    #[must_use]
    pub fn with_leeway(mut self, seconds: u64) -> Self {
        self.validation.leeway = seconds;
        self
    }

    /// Verify `token` and derive the caller's principal.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::Missing`] for an empty token, [`TokenError::Expired`]
    /// past expiry and [`TokenError::Invalid`] for any other defect.
    pub fn verify(&self, token: &str) -> Result<Principal, TokenError> {
        if token.is_empty() {
            return Err(TokenError::Missing);
        }
        let claims = decode::<Claims>(token, &self.key, &self.validation)?.claims;
        if claims.sub.is_empty() {
            return Err(TokenError::Invalid("empty subject".to_string()));
        }
        let expires_at = DateTime::from_timestamp(claims.exp, 0)
            .ok_or_else(|| TokenError::Invalid("exp out of range".to_string()))?;

        Ok(Principal {
            user_id: UserId::new(claims.sub),
            role: claims.role,
            admin_scope: AdminScope::for_role(claims.role, claims.services.as_deref()),
            expires_at,
        })
    }

    /// Time until `principal`'s token stops verifying, leeway included.
    ///
    /// Measured against system time, as [`verify`](Self::verify) is.
    #[must_use]
    pub fn remaining(&self, principal: &Principal) -> std::time::Duration {
        let leeway = std::time::Duration::from_secs(self.validation.leeway);
        let now = Utc::now();
        match (principal.expires_at - now).to_std() {
            Ok(left) => left.saturating_add(leeway),
            Err(_) => {
                let overdue = (now - principal.expires_at).to_std().unwrap_or_default();
                leeway.saturating_sub(overdue)
            }
        }
    }
}

impl std::fmt::Debug for TokenVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenVerifier")
            .field("algorithms", &self.validation.algorithms)
            .field("leeway", &self.validation.leeway)
            .finish_non_exhaustive()
    }
}

/// Signs access tokens. Issuance belongs to the external login flow; this
/// exists for local development and tests.
#[derive(Clone)]
pub struct TokenIssuer {
    key: EncodingKey,
}

impl TokenIssuer {
    /// Issuer for HS256 tokens signed with `secret`.
    #[must_use]
    pub fn hs256(secret: &[u8]) -> Self {
        Self {
            key: EncodingKey::from_secret(secret),
        }
    }

    /// Sign `claims`.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError::Signing`] if encoding fails.
    pub fn issue(&self, claims: &Claims) -> Result<String, TokenError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.key)
            .map_err(|e| TokenError::Signing(e.to_string()))
    }
}

impl std::fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenIssuer").finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can use unwrap
mod tests {
    use super::*;
    use chrono::Duration;

    const SECRET: &[u8] = b"unit-test-secret";

    fn issue(claims: &Claims) -> String {
        TokenIssuer::hs256(SECRET).issue(claims).unwrap()
    }

    #[test]
    fn verifies_citizen_token() {
        let user = UserId::new("USR1");
        let token = issue(&Claims::new(&user, Role::Citizen, Utc::now() + Duration::hours(1)));

        let principal = TokenVerifier::hs256(SECRET).verify(&token).unwrap();
        assert_eq!(principal.user_id, user);
        assert_eq!(principal.role, Role::Citizen);
        assert!(principal.admin_scope.is_none());
    }

    #[test]
    fn remaining_time_includes_leeway() {
        let principal = |offset: i64| Principal {
            user_id: UserId::new("USR1"),
            role: Role::Citizen,
            admin_scope: None,
            expires_at: Utc::now() + Duration::seconds(offset),
        };
        let strict = TokenVerifier::hs256(SECRET).with_leeway(0);
        let lenient = TokenVerifier::hs256(SECRET).with_leeway(30);

        assert_eq!(strict.remaining(&principal(-10)), std::time::Duration::ZERO);
        let overdue = lenient.remaining(&principal(-10)).as_secs();
        assert!((19..=20).contains(&overdue), "got {overdue}");
        let ahead = strict.remaining(&principal(100)).as_secs();
        assert!((99..=100).contains(&ahead), "got {ahead}");
        assert!(lenient.remaining(&principal(100)).as_secs() >= 129);
    }

    #[test]
    fn admin_token_carries_service_scope() {
        let claims = Claims::new(&UserId::new("ADM1"), Role::Admin, Utc::now() + Duration::hours(1))
            .with_services([ServiceId::new("SER1")]);
        let principal = TokenVerifier::hs256(SECRET).verify(&issue(&claims)).unwrap();

        assert!(principal.can_manage(&ServiceId::new("SER1")));
        assert!(!principal.can_manage(&ServiceId::new("SER2")));
    }

    #[test]
    fn rejects_wrong_secret() {
        let token = issue(&Claims::new(
            &UserId::new("USR1"),
            Role::Citizen,
            Utc::now() + Duration::hours(1),
        ));
        let err = TokenVerifier::hs256(b"other").verify(&token).unwrap_err();
        assert!(matches!(err, TokenError::Invalid(_)));
    }

    #[test]
    fn rejects_expired_token() {
        let token = issue(&Claims::new(
            &UserId::new("USR1"),
            Role::Citizen,
            Utc::now() - Duration::hours(1),
        ));
        assert_eq!(
            TokenVerifier::hs256(SECRET).verify(&token),
            Err(TokenError::Expired)
        );
    }

    #[test]
    fn rejects_garbage_and_empty() {
        let verifier = TokenVerifier::hs256(SECRET);
        assert_eq!(verifier.verify(""), Err(TokenError::Missing));
        assert!(matches!(verifier.verify("not-a-jwt"), Err(TokenError::Invalid(_))));
    }
}
