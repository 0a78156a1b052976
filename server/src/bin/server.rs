//! Queueline server.
//!
//! ```bash
//! # In-memory backend with a seeded catalog
//! CATALOG_SEED_PATH=services.json JWT_SECRET=dev cargo run --bin queueline-server
//!
//! # PostgreSQL backend
//! STORE_BACKEND=postgres DATABASE_URL=postgres://localhost/queueline cargo run --bin queueline-server
//! ```

use anyhow::Context;
use queueline_core::{
    AdmissionController, AdmissionEnvironment, AppointmentStore, Clock, HubConfig,
    InMemoryAppointmentStore, InMemoryServiceCatalog, QueueStateProjector, RealtimeHub,
    ServiceCatalog, ServiceDefinition, SystemClock, TokenVerifier,
};
use queueline_postgres::{PostgresAppointmentStore, PostgresServiceCatalog};
use queueline_server::config::StoreBackend;
use queueline_server::{AppState, Config, build_router};
use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

type Backend = (Arc<dyn ServiceCatalog>, Arc<dyn AppointmentStore>);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let config = Config::from_env();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.server.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        backend = ?config.store.backend,
        realtime = ?config.realtime,
        "Starting Queueline server"
    );

    let metrics = queueline_server::metrics::install().context("installing metrics recorder")?;
    let seed = load_seed(config.store.catalog_seed_path.as_deref()).await?;
    let (catalog, store) = match config.store.backend {
        StoreBackend::Memory => memory_backend(seed),
        StoreBackend::Postgres => postgres_backend(&config, seed).await?,
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let verifier = TokenVerifier::hs256(config.auth.jwt_secret.as_bytes())
        .with_leeway(config.auth.leeway);
    let projector = QueueStateProjector::new(Arc::clone(&catalog), Arc::clone(&store));
    let hub = RealtimeHub::new(
        verifier,
        projector.clone(),
        Arc::clone(&clock),
        HubConfig {
            channel_capacity: config.realtime.channel_capacity,
            utc_offset_minutes: config.realtime.utc_offset_minutes,
        },
    );
    let controller = AdmissionController::new(AdmissionEnvironment {
        clock,
        catalog,
        store: Arc::clone(&store),
        publisher: Arc::new(hub.clone()),
    });

    let state = AppState::new(controller, hub, projector, store, metrics, config.realtime);
    let app = build_router(state);

    let addr = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(address = %addr, "Server listening");

    let grace = Duration::from_secs(config.server.shutdown_timeout);
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .into_future();
    tokio::select! {
        result = server => result.context("serving HTTP")?,
        () = async {
            shutdown_signal().await;
            tokio::time::sleep(grace).await;
        } => {
            tracing::warn!(?grace, "Graceful shutdown timed out, exiting");
        }
    }

    info!("Server stopped");
    Ok(())
}

async fn load_seed(path: Option<&str>) -> anyhow::Result<Vec<ServiceDefinition>> {
    let Some(path) = path else {
        tracing::warn!("CATALOG_SEED_PATH not set, starting without seeded services");
        return Ok(Vec::new());
    };
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading catalog seed {path}"))?;
    let services: Vec<ServiceDefinition> =
        serde_json::from_str(&raw).with_context(|| format!("parsing catalog seed {path}"))?;
    info!(path, services = services.len(), "Loaded catalog seed");
    Ok(services)
}

fn memory_backend(seed: Vec<ServiceDefinition>) -> Backend {
    info!("Using in-memory store; appointments are lost on restart");
    (
        Arc::new(InMemoryServiceCatalog::from_services(seed)),
        Arc::new(InMemoryAppointmentStore::new()),
    )
}

async fn postgres_backend(config: &Config, seed: Vec<ServiceDefinition>) -> anyhow::Result<Backend> {
    let pool = queueline_postgres::connect(&config.postgres.url, &config.postgres.pool_settings())
        .await
        .context("connecting to PostgreSQL")?;
    if config.postgres.run_migrations {
        queueline_postgres::migrate(&pool).await.context("running migrations")?;
        info!("Migrations applied");
    }

    let catalog = PostgresServiceCatalog::new(pool.clone());
    for service in &seed {
        catalog
            .upsert(service)
            .await
            .with_context(|| format!("seeding service {}", service.id))?;
    }

    Ok((
        Arc::new(catalog),
        Arc::new(PostgresAppointmentStore::new(pool)),
    ))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = signal::ctrl_c().await {
            tracing::error!(%error, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(error) => {
                tracing::error!(%error, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C signal, shutting down gracefully..."),
        () = terminate => info!("Received SIGTERM signal, shutting down gracefully..."),
    }
}
