//! Pollroom API server entry point.

use std::sync::{Arc, Mutex};

use pollroom_api::config::AppConfig;
use pollroom_api::error::AppError;
use pollroom_api::state::AppState;
use pollroom_api::telemetry;
use pollroom_core::clock::SystemClock;
use pollroom_core::id::RandomIds;
use pollroom_core::rng::{DeterministicRng, SystemRng};
use pollroom_core::store::KeyValueStore;
use pollroom_store::{MemoryStore, PgStore};
use sqlx::postgres::PgPoolOptions;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let config = AppConfig::from_env()?;
    let otlp_endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok();
    let _telemetry = telemetry::init_tracing(otlp_endpoint.as_deref())?;

    tracing::info!("Starting Pollroom API server");

    let store = open_store(&config).await?;
    let rng: Arc<Mutex<dyn DeterministicRng + Send>> = Arc::new(Mutex::new(SystemRng::new()));
    let app_state = AppState::new(
        store,
        Arc::new(SystemClock),
        rng,
        Arc::new(RandomIds),
        config.max_answer_length,
        config.feed_capacity,
    );
    let _relay = app_state.feed.spawn();

    let app = pollroom_api::app(app_state);

    let addr = config.bind_addr()?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

/// Opens PostgreSQL when `DATABASE_URL` is set, otherwise an in-memory store.
async fn open_store(config: &AppConfig) -> Result<Arc<dyn KeyValueStore>, AppError> {
    let Some(database_url) = config.database_url.as_deref() else {
        tracing::warn!("DATABASE_URL not set; state lives in memory and is lost on exit");
        return Ok(Arc::new(MemoryStore::new()));
    };

    let statement_timeout = format!(
        "SET statement_timeout = {}",
        config.store_timeout.as_millis()
    );
    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .acquire_timeout(config.store_timeout)
        .after_connect(move |conn, _meta| {
            let statement_timeout = statement_timeout.clone();
            Box::pin(async move {
                sqlx::query(&statement_timeout).execute(&mut *conn).await?;
                Ok(())
            })
        })
        .connect(database_url)
        .await?;

    let store = PgStore::connect(pool).await?;
    store.migrate().await?;
    tracing::info!("PostgreSQL store ready");
    Ok(Arc::new(store))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
