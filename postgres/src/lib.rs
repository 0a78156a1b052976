//! `PostgreSQL` persistence for Queueline.
//!
//! Provides [`PostgresAppointmentStore`] and [`PostgresServiceCatalog`],
//! implementing the store and catalog traits of `queueline-core` on sqlx.
//!
//! Admission is serialized per slot through a `slot_occupancy` counter row
//! that every admission and status change locks with `SELECT ... FOR UPDATE`
//! inside its transaction. Slots are independent rows, so distinct slots
//! never contend.
//!
//! # Example
//!
//! ```no_run
//! use queueline_postgres::{PoolSettings, PostgresAppointmentStore, connect, migrate};
//!
//! # async fn example() -> Result<(), queueline_postgres::PostgresError> {
//! let pool = connect("postgres://localhost/queueline", &PoolSettings::default()).await?;
//! migrate(&pool).await?;
//! let store = PostgresAppointmentStore::new(pool);
//! # let _ = store;
//! # Ok(())
//! # }
//! ```

mod catalog;
mod store;

pub use catalog::PostgresServiceCatalog;
pub use store::PostgresAppointmentStore;

use queueline_core::StoreError;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;
use thiserror::Error;

/// Pool setup or migration failure.
#[derive(Debug, Error)]
pub enum PostgresError {
    /// Could not open the connection pool
    #[error("Failed to connect to PostgreSQL: {0}")]
    Connect(#[source] sqlx::Error),

    /// Embedded migrations failed
    #[error("Failed to run migrations: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

/// Connection pool sizing and timeouts.
#[derive(Debug, Clone, Copy)]
pub struct PoolSettings {
    /// Upper bound on open connections
    pub max_connections: u32,
    /// Connections kept open when idle
    pub min_connections: u32,
    /// Wait for a free connection before failing
    pub acquire_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

/// Open a connection pool.
///
/// # Errors
///
/// Returns [`PostgresError::Connect`] if the database cannot be reached.
pub async fn connect(url: &str, settings: &PoolSettings) -> Result<PgPool, PostgresError> {
    PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .min_connections(settings.min_connections)
        .acquire_timeout(settings.acquire_timeout)
        .connect(url)
        .await
        .map_err(PostgresError::Connect)
}

/// Apply the embedded schema migrations.
///
/// # Errors
///
/// Returns [`PostgresError::Migrate`] if a migration fails.
pub async fn migrate(pool: &PgPool) -> Result<(), PostgresError> {
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("Database migrations applied");
    Ok(())
}

/// Map a sqlx failure into the store taxonomy.
///
/// Serialization failures and deadlocks roll the transaction back and are
/// reported as aborted; everything else as unavailable.
fn store_error(context: &str, err: &sqlx::Error) -> StoreError {
    let aborted = err
        .as_database_error()
        .and_then(|db| db.code())
        .is_some_and(|code| code == "40001" || code == "40P01");
    if aborted {
        StoreError::Aborted(format!("{context}: {err}"))
    } else {
        StoreError::Unavailable(format!("{context}: {err}"))
    }
}
