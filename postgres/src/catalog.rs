//! Service catalog read from the `services` table.

use futures::future::BoxFuture;
use queueline_core::{
    CatalogError, DepartmentId, OperationalHours, ServiceCatalog, ServiceDefinition, ServiceId,
};
use sqlx::PgPool;
use sqlx::types::Json;
use std::num::NonZeroU32;

type ServiceRow = (String, Option<String>, i32, serde_json::Value);

/// Catalog backed by the `services` table.
///
/// Rows with `deleted_at` set are treated as absent.
#[derive(Clone, Debug)]
pub struct PostgresServiceCatalog {
    pool: PgPool,
}

impl PostgresServiceCatalog {
    /// Create a catalog over an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert or replace a service, clearing any soft delete.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Unavailable`] if the write fails.
    pub async fn upsert(&self, service: &ServiceDefinition) -> Result<(), CatalogError> {
        let capacity = i32::try_from(service.capacity())
            .map_err(|_| CatalogError::Invalid(format!("capacity of {} exceeds i32", service.id)))?;

        sqlx::query(
            "INSERT INTO services (id, department_id, capacity_per_slot, operational_hours, deleted_at)
             VALUES ($1, $2, $3, $4, NULL)
             ON CONFLICT (id) DO UPDATE SET
                 department_id = EXCLUDED.department_id,
                 capacity_per_slot = EXCLUDED.capacity_per_slot,
                 operational_hours = EXCLUDED.operational_hours,
                 deleted_at = NULL",
        )
        .bind(service.id.as_str())
        .bind(service.department_id.as_ref().map(DepartmentId::as_str))
        .bind(capacity)
        .bind(Json(&service.operational_hours))
        .execute(&self.pool)
        .await
        .map_err(|e| CatalogError::Unavailable(format!("Failed to upsert service: {e}")))?;

        tracing::debug!(service_id = %service.id, "Service upserted");
        Ok(())
    }

    /// Mark a service deleted. Returns whether a live row was affected.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Unavailable`] if the write fails.
    pub async fn soft_delete(&self, service_id: &ServiceId) -> Result<bool, CatalogError> {
        let result = sqlx::query(
            "UPDATE services SET deleted_at = NOW() WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(service_id.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| CatalogError::Unavailable(format!("Failed to delete service: {e}")))?;

        Ok(result.rows_affected() > 0)
    }

    async fn load(&self, service_id: &ServiceId) -> Result<ServiceDefinition, CatalogError> {
        let row: Option<ServiceRow> = sqlx::query_as(
            "SELECT id, department_id, capacity_per_slot, operational_hours
             FROM services
             WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(service_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| CatalogError::Unavailable(format!("Failed to load service: {e}")))?;

        let Some((id, department_id, capacity, hours)) = row else {
            return Err(CatalogError::NotFound(service_id.clone()));
        };

        let capacity_per_slot = u32::try_from(capacity)
            .ok()
            .and_then(NonZeroU32::new)
            .ok_or_else(|| CatalogError::Invalid(format!("service {id} has capacity {capacity}")))?;
        let operational_hours: OperationalHours = serde_json::from_value(hours)
            .map_err(|e| CatalogError::Invalid(format!("service {id} operational hours: {e}")))?;

        Ok(ServiceDefinition {
            id: ServiceId::new(id),
            capacity_per_slot,
            operational_hours,
            department_id: department_id.map(DepartmentId::new),
        })
    }
}

impl ServiceCatalog for PostgresServiceCatalog {
    fn get<'a>(
        &'a self,
        service_id: &'a ServiceId,
    ) -> BoxFuture<'a, Result<ServiceDefinition, CatalogError>> {
        Box::pin(self.load(service_id))
    }
}
