//! Roles, administrative scopes and the authenticated principal.
//!
//! Administrative reach is an explicit [`AdminScope`] evaluated before any
//! topic subscription or status override, rather than a string comparison
//! on the role buried in the transport layer.

use crate::types::{ServiceId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Role carried in the access token.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Member of the public booking appointments
    #[serde(alias = "CITIZEN")]
    Citizen,
    /// Department staff
    #[serde(alias = "ADMIN")]
    Admin,
    /// Staff with reach over every service
    #[serde(alias = "SUPER_ADMIN", alias = "superadmin")]
    SuperAdmin,
}

impl Role {
    /// Whether the role grants any administrative reach
    #[must_use]
    pub const fn is_admin(self) -> bool {
        matches!(self, Self::Admin | Self::SuperAdmin)
    }
}

/// Which services an administrator may observe and manage.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AdminScope {
    /// Every service
    AllAppointments,
    /// Only the listed services
    ServiceSubset(BTreeSet<ServiceId>),
}

impl AdminScope {
    /// Derive the scope granted by a role and an optional service restriction.
    ///
    /// Super admins always get [`AdminScope::AllAppointments`]; admins are
    /// narrowed to `services` when present. Citizens get no scope.
    #[must_use]
    pub fn for_role(role: Role, services: Option<&[ServiceId]>) -> Option<Self> {
        match (role, services) {
            (Role::Citizen, _) => None,
            (Role::SuperAdmin, _) | (Role::Admin, None) => Some(Self::AllAppointments),
            (Role::Admin, Some(ids)) => Some(Self::ServiceSubset(ids.iter().cloned().collect())),
        }
    }

    /// Whether the scope covers `service_id`
    #[must_use]
    pub fn permits(&self, service_id: &ServiceId) -> bool {
        match self {
            Self::AllAppointments => true,
            Self::ServiceSubset(ids) => ids.contains(service_id),
        }
    }
}

/// Verified identity of a caller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Principal {
    /// Subject of the token
    pub user_id: UserId,
    /// Role of the subject
    pub role: Role,
    /// Administrative reach, `None` for citizens
    pub admin_scope: Option<AdminScope>,
    /// Token expiry
    pub expires_at: DateTime<Utc>,
}

impl Principal {
    /// Whether this principal may manage appointments of `service_id`
    #[must_use]
    pub fn can_manage(&self, service_id: &ServiceId) -> bool {
        self.admin_scope
            .as_ref()
            .is_some_and(|scope| scope.permits(service_id))
    }

    /// Whether the principal is an administrator of any reach
    #[must_use]
    pub const fn is_admin(&self) -> bool {
        self.admin_scope.is_some()
    }
}
