//! `PostgreSQL`-backed appointment store.

use crate::store_error;
use chrono::{DateTime, NaiveDate, Utc};
use futures::future::BoxFuture;
use queueline_core::{
    Admission, Appointment, AppointmentFilter, AppointmentId, AppointmentStatus, AppointmentStore,
    DepartmentId,
    Occupancy, ServiceId, SlotTime, StoreError, Transition, UserId,
};
use sqlx::{PgPool, Postgres};
use std::num::NonZeroU32;
use uuid::Uuid;

const APPOINTMENT_COLUMNS: &str = "id, user_id, service_id, department_id, appointment_date, \
     slot_time, status, notes, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct AppointmentRow {
    id: Uuid,
    user_id: String,
    service_id: String,
    department_id: String,
    appointment_date: NaiveDate,
    slot_time: String,
    status: String,
    notes: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<AppointmentRow> for Appointment {
    type Error = StoreError;

    fn try_from(row: AppointmentRow) -> Result<Self, Self::Error> {
        let slot_time: SlotTime = row
            .slot_time
            .parse()
            .map_err(|e| StoreError::Corrupt(format!("appointment {}: {e}", row.id)))?;
        let status: AppointmentStatus = row
            .status
            .parse()
            .map_err(|e| StoreError::Corrupt(format!("appointment {}: {e}", row.id)))?;

        Ok(Self {
            id: AppointmentId::from_uuid(row.id),
            user_id: UserId::new(row.user_id),
            service_id: ServiceId::new(row.service_id),
            department_id: DepartmentId::new(row.department_id),
            date: row.appointment_date,
            slot_time,
            status,
            notes: row.notes,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Appointment store on `PostgreSQL`.
///
/// Each admission runs in one transaction: upsert the slot's counter row,
/// lock it `FOR UPDATE`, compare against capacity, insert the appointment and
/// bump the counter. Status changes lock the appointment row first, then the
/// counter row of its slot.
#[derive(Clone, Debug)]
pub struct PostgresAppointmentStore {
    pool: PgPool,
}

impl PostgresAppointmentStore {
    /// Create a store over an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Access the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn admit_in_tx(
        &self,
        appointment: Appointment,
        capacity: NonZeroU32,
    ) -> Result<Admission, StoreError> {
        let slot_time = appointment.slot_time.to_string();
        let capacity = i64::from(capacity.get());

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| store_error("Failed to start transaction", &e))?;

        sqlx::query(
            "INSERT INTO slot_occupancy (service_id, slot_date, slot_time, active)
             VALUES ($1, $2, $3, 0)
             ON CONFLICT (service_id, slot_date, slot_time) DO NOTHING",
        )
        .bind(appointment.service_id.as_str())
        .bind(appointment.date)
        .bind(&slot_time)
        .execute(&mut *tx)
        .await
        .map_err(|e| store_error("Failed to create slot counter", &e))?;

        let (active,): (i32,) = sqlx::query_as(
            "SELECT active FROM slot_occupancy
             WHERE service_id = $1 AND slot_date = $2 AND slot_time = $3
             FOR UPDATE",
        )
        .bind(appointment.service_id.as_str())
        .bind(appointment.date)
        .bind(&slot_time)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| store_error("Failed to lock slot counter", &e))?;

        if i64::from(active) >= capacity {
            rollback(tx).await;
            return Ok(Admission::Full {
                occupancy: u32::try_from(active).unwrap_or_default(),
            });
        }

        sqlx::query(
            "INSERT INTO appointments
                 (id, user_id, service_id, department_id, appointment_date,
                  slot_time, status, notes, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(appointment.id.as_uuid())
        .bind(appointment.user_id.as_str())
        .bind(appointment.service_id.as_str())
        .bind(appointment.department_id.as_str())
        .bind(appointment.date)
        .bind(&slot_time)
        .bind(appointment.status.as_str())
        .bind(appointment.notes.as_deref())
        .bind(appointment.created_at)
        .bind(appointment.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| store_error("Failed to insert appointment", &e))?;

        sqlx::query(
            "UPDATE slot_occupancy SET active = active + 1
             WHERE service_id = $1 AND slot_date = $2 AND slot_time = $3",
        )
        .bind(appointment.service_id.as_str())
        .bind(appointment.date)
        .bind(&slot_time)
        .execute(&mut *tx)
        .await
        .map_err(|e| store_error("Failed to update slot counter", &e))?;

        tx.commit()
            .await
            .map_err(|e| store_error("Failed to commit admission", &e))?;

        tracing::debug!(
            appointment_id = %appointment.id,
            service_id = %appointment.service_id,
            occupancy = active + 1,
            "Appointment admitted"
        );
        Ok(Admission::Admitted(appointment))
    }

    async fn transition_in_tx(
        &self,
        id: AppointmentId,
        target: AppointmentStatus,
        at: DateTime<Utc>,
    ) -> Result<Transition, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| store_error("Failed to start transaction", &e))?;

        let row: Option<AppointmentRow> = sqlx::query_as(&format!(
            "SELECT {APPOINTMENT_COLUMNS} FROM appointments WHERE id = $1 FOR UPDATE"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| store_error("Failed to lock appointment", &e))?;

        let Some(row) = row else {
            rollback(tx).await;
            return Ok(Transition::NotFound);
        };
        let mut appointment = Appointment::try_from(row)?;
        let previous = appointment.status;

        if !previous.can_transition_to(target) {
            rollback(tx).await;
            return Ok(Transition::Rejected { current: previous });
        }

        if previous.is_active() && !target.is_active() {
            release_place(&mut tx, &appointment).await?;
        }

        sqlx::query("UPDATE appointments SET status = $2, updated_at = $3 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(target.as_str())
            .bind(at)
            .execute(&mut *tx)
            .await
            .map_err(|e| store_error("Failed to update appointment status", &e))?;

        tx.commit()
            .await
            .map_err(|e| store_error("Failed to commit status change", &e))?;

        appointment.status = target;
        appointment.updated_at = at;
        Ok(Transition::Applied {
            previous,
            appointment,
        })
    }
}

async fn rollback(tx: sqlx::Transaction<'_, Postgres>) {
    if let Err(error) = tx.rollback().await {
        tracing::warn!(%error, "Failed to roll back transaction");
    }
}

async fn release_place(
    tx: &mut sqlx::Transaction<'_, Postgres>,
    appointment: &Appointment,
) -> Result<(), StoreError> {
    let slot_time = appointment.slot_time.to_string();
    sqlx::query(
        "SELECT active FROM slot_occupancy
         WHERE service_id = $1 AND slot_date = $2 AND slot_time = $3
         FOR UPDATE",
    )
    .bind(appointment.service_id.as_str())
    .bind(appointment.date)
    .bind(&slot_time)
    .fetch_optional(&mut **tx)
    .await
    .map_err(|e| store_error("Failed to lock slot counter", &e))?;

    sqlx::query(
        "UPDATE slot_occupancy SET active = GREATEST(active - 1, 0)
         WHERE service_id = $1 AND slot_date = $2 AND slot_time = $3",
    )
    .bind(appointment.service_id.as_str())
    .bind(appointment.date)
    .bind(&slot_time)
    .execute(&mut **tx)
    .await
    .map_err(|e| store_error("Failed to update slot counter", &e))?;
    Ok(())
}

impl AppointmentStore for PostgresAppointmentStore {
    fn occupancy<'a>(
        &'a self,
        service_id: &'a ServiceId,
        date: NaiveDate,
    ) -> BoxFuture<'a, Result<Occupancy, StoreError>> {
        Box::pin(async move {
            let rows: Vec<(String, i32)> = sqlx::query_as(
                "SELECT slot_time, active FROM slot_occupancy
                 WHERE service_id = $1 AND slot_date = $2 AND active > 0",
            )
            .bind(service_id.as_str())
            .bind(date)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| store_error("Failed to query occupancy", &e))?;

            rows.into_iter()
                .map(|(time, active)| {
                    let time: SlotTime = time
                        .parse()
                        .map_err(|e| StoreError::Corrupt(format!("slot counter: {e}")))?;
                    Ok((time, u32::try_from(active).unwrap_or_default()))
                })
                .collect()
        })
    }

    fn admit(
        &self,
        appointment: Appointment,
        capacity: NonZeroU32,
    ) -> BoxFuture<'_, Result<Admission, StoreError>> {
        Box::pin(self.admit_in_tx(appointment, capacity))
    }

    fn transition(
        &self,
        id: AppointmentId,
        target: AppointmentStatus,
        at: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<Transition, StoreError>> {
        Box::pin(self.transition_in_tx(id, target, at))
    }

    fn get(&self, id: AppointmentId) -> BoxFuture<'_, Result<Option<Appointment>, StoreError>> {
        Box::pin(async move {
            let row: Option<AppointmentRow> = sqlx::query_as(&format!(
                "SELECT {APPOINTMENT_COLUMNS} FROM appointments WHERE id = $1"
            ))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| store_error("Failed to load appointment", &e))?;

            row.map(Appointment::try_from).transpose()
        })
    }

    fn list_for_user<'a>(
        &'a self,
        user_id: &'a UserId,
    ) -> BoxFuture<'a, Result<Vec<Appointment>, StoreError>> {
        Box::pin(async move {
            let rows: Vec<AppointmentRow> = sqlx::query_as(&format!(
                "SELECT {APPOINTMENT_COLUMNS} FROM appointments
                 WHERE user_id = $1
                 ORDER BY appointment_date, slot_time"
            ))
            .bind(user_id.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| store_error("Failed to list appointments", &e))?;

            rows.into_iter().map(Appointment::try_from).collect()
        })
    }

    fn list<'a>(
        &'a self,
        filter: &'a AppointmentFilter,
    ) -> BoxFuture<'a, Result<Vec<Appointment>, StoreError>> {
        Box::pin(async move {
            let service_ids: Option<Vec<String>> = filter
                .service_ids
                .as_ref()
                .map(|ids| ids.iter().map(|id| id.as_str().to_string()).collect());

            let rows: Vec<AppointmentRow> = sqlx::query_as(&format!(
                "SELECT {APPOINTMENT_COLUMNS} FROM appointments
                 WHERE ($1::text[] IS NULL OR service_id = ANY($1))
                   AND ($2::date IS NULL OR appointment_date = $2)
                   AND ($3::text IS NULL OR status = $3)
                 ORDER BY appointment_date, slot_time, created_at"
            ))
            .bind(service_ids)
            .bind(filter.date)
            .bind(filter.status.map(AppointmentStatus::as_str))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| store_error("Failed to list appointments", &e))?;

            rows.into_iter().map(Appointment::try_from).collect()
        })
    }

    fn ping(&self) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            sqlx::query("SELECT 1")
                .execute(&self.pool)
                .await
                .map_err(|e| store_error("Database ping failed", &e))?;
            Ok(())
        })
    }
}
