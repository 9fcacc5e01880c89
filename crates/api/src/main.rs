use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use field_safety_api::app::{create_app, AppState, Backends};
use field_safety_api::config::Config;
use field_safety_api::jobs::{
    AlertEvictionJob, CleanupLocationsJob, JobScheduler, OfflineQueueSweepJob, RealtimeMetricsJob,
};
use field_safety_api::middleware::{init_metrics, logging::init_logging};
use field_safety_api::routes::realtime::relay_presence;
use field_safety_api::services::WebhookNotifier;
use domain::services::{InMemoryCache, LocalBroker};
use persistence::PgStore;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let config = Config::load()?;

    init_logging(&config.logging);
    init_metrics()?;

    info!("Starting field safety service v{}", env!("CARGO_PKG_VERSION"));

    let db_config: persistence::db::DatabaseConfig = (&config.database).into();
    let pool = persistence::db::create_pool(&db_config).await?;

    info!("Running database migrations...");
    persistence::db::run_migrations(&pool).await?;
    info!("Migrations completed");

    let store = Arc::new(PgStore::new(pool.clone()));
    let backends = Backends {
        tracking: store.clone(),
        alerts: store.clone(),
        directory: Some(store),
        cache: Arc::new(InMemoryCache::new()),
        broker: Some(Arc::new(LocalBroker::new(config.realtime.broker_capacity))),
        notifier: Arc::new(WebhookNotifier::new(&config.notifications)?),
        pool: Some(pool.clone()),
    };

    let addr = config.socket_addr()?;
    let retention_days = config.limits.location_retention_days;
    let queue_max_age = Duration::from_secs(config.limits.queue_max_age_hours * 3600);
    let terminal_retention = Duration::from_secs(config.escalation.terminal_retention_secs);

    let state = AppState::new(config, backends)?;

    match state.alerts.recover().await {
        Ok(armed) => info!(armed, "Recovered open alerts"),
        Err(e) => warn!(error = %e, "Alert recovery failed; open alerts will not escalate"),
    }

    let mut scheduler = JobScheduler::new();
    scheduler.register(CleanupLocationsJob::new(
        Arc::clone(&state.pipeline),
        retention_days,
    ));
    scheduler.register(OfflineQueueSweepJob::new(
        Arc::clone(state.gateway.queue()),
        queue_max_age,
    ));
    scheduler.register(AlertEvictionJob::new(
        state.alerts.clone(),
        terminal_retention,
    ));
    scheduler.register(RealtimeMetricsJob::new(
        Arc::clone(&state.gateway),
        state.alerts.clone(),
        Some(pool),
    ));
    scheduler.start();

    let gateway = Arc::clone(&state.gateway);
    let shutdown = scheduler.shutdown_signal();
    scheduler.track(tokio::spawn(async move {
        gateway.relay_remote(shutdown).await;
    }));
    scheduler.track(tokio::spawn(relay_presence(
        Arc::clone(&state.gateway),
        scheduler.shutdown_signal(),
    )));

    let app = create_app(state);

    info!("Server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.shutdown();
    scheduler.wait_for_shutdown(Duration::from_secs(10)).await;
    info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
