//! Read access to the external service catalog.

use crate::error::CatalogError;
use crate::types::{ServiceDefinition, ServiceId};
use dashmap::DashMap;
use futures::future::BoxFuture;
use std::sync::Arc;

/// Read-only lookup of service definitions.
///
/// Services, departments and their editing live outside this system; this
/// trait is the only way admission control sees them.
pub trait ServiceCatalog: Send + Sync {
    /// Fetch a service definition.
    ///
    /// Returns [`CatalogError::NotFound`] for unknown or soft-deleted services.
    fn get<'a>(
        &'a self,
        service_id: &'a ServiceId,
    ) -> BoxFuture<'a, Result<ServiceDefinition, CatalogError>>;
}

/// In-memory catalog, seeded from configuration or fixtures.
#[derive(Debug, Clone, Default)]
pub struct InMemoryServiceCatalog {
    services: Arc<DashMap<ServiceId, ServiceDefinition>>,
}

impl InMemoryServiceCatalog {
    /// Empty catalog
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog holding `services`
    #[must_use]
    pub fn from_services(services: impl IntoIterator<Item = ServiceDefinition>) -> Self {
        let catalog = Self::new();
        for service in services {
            catalog.insert(service);
        }
        catalog
    }

    /// Parse a JSON array of service definitions.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Invalid`] when the document does not match the
    /// service schema (unknown weekday, malformed slot time, zero capacity).
    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        let services: Vec<ServiceDefinition> =
            serde_json::from_str(json).map_err(|e| CatalogError::Invalid(e.to_string()))?;
        Ok(Self::from_services(services))
    }

    /// Add or replace a service
    pub fn insert(&self, service: ServiceDefinition) {
        self.services.insert(service.id.clone(), service);
    }

    /// Remove a service; later lookups report it as not found.
    pub fn soft_delete(&self, service_id: &ServiceId) -> bool {
        self.services.remove(service_id).is_some()
    }

    /// Number of services
    #[must_use]
    pub fn len(&self) -> usize {
        self.services.len()
    }

    /// Whether the catalog is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

impl ServiceCatalog for InMemoryServiceCatalog {
    fn get<'a>(
        &'a self,
        service_id: &'a ServiceId,
    ) -> BoxFuture<'a, Result<ServiceDefinition, CatalogError>> {
        let found = self
            .services
            .get(service_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| CatalogError::NotFound(service_id.clone()));
        Box::pin(async move { found })
    }
}
