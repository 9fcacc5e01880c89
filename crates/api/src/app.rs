use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use uuid::Uuid;

use crate::config::{Config, ConfigValidationError};
use crate::middleware::{
    metrics_handler, metrics_middleware, rate_limit_middleware, require_auth, trace_id,
    RateLimiterState,
};
use crate::routes::{alerts, health, locations, perimeters, realtime};
use domain::services::{
    AlertEngine, AlertStore, Cache, Directory, EngineDeps, ExternalNotifier, LocationPipeline,
    MessageBroker, NotificationGateway, OfflineQueue, SessionRegistry, TrackingStore,
};
use shared::jwt::JwtConfig;

/// Infrastructure adapters the services are wired onto.
pub struct Backends {
    pub tracking: Arc<dyn TrackingStore>,
    pub alerts: Arc<dyn AlertStore>,
    pub directory: Option<Arc<dyn Directory>>,
    pub cache: Arc<dyn Cache>,
    pub broker: Option<Arc<dyn MessageBroker>>,
    pub notifier: Arc<dyn ExternalNotifier>,
    pub pool: Option<PgPool>,
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// Present when running against Postgres; health checks ping it.
    pub pool: Option<PgPool>,
    pub jwt: Arc<JwtConfig>,
    pub gateway: Arc<NotificationGateway>,
    pub pipeline: Arc<LocationPipeline>,
    pub alerts: AlertEngine,
    pub rate_limiter: Option<Arc<RateLimiterState>>,
}

impl AppState {
    /// Builds every service from the configuration and the given adapters.
    pub fn new(config: Config, backends: Backends) -> Result<Self, ConfigValidationError> {
        let jwt = config.jwt_verifier()?;
        let engine_settings = config.engine_settings()?;

        let registry = Arc::new(SessionRegistry::new());
        let queue = Arc::new(OfflineQueue::new(config.limits.queue_capacity));
        let mut gateway = NotificationGateway::new(registry, queue);
        if let Some(directory) = &backends.directory {
            gateway = gateway.with_directory(Arc::clone(directory), config.store_timeout());
        }
        if let Some(broker) = backends.broker {
            let instance_id = config.realtime.instance_id.unwrap_or_else(Uuid::new_v4);
            gateway = gateway.with_broker(broker, instance_id);
        }
        let gateway = Arc::new(gateway);

        let alerts = AlertEngine::new(
            EngineDeps {
                alerts: backends.alerts,
                tracking: Arc::clone(&backends.tracking),
                cache: Arc::clone(&backends.cache),
                gateway: Arc::clone(&gateway),
                notifier: backends.notifier,
                directory: backends.directory,
            },
            engine_settings,
        );

        let pipeline = LocationPipeline::new(
            backends.tracking,
            backends.cache,
            Arc::clone(&gateway),
            config.pipeline_settings(),
        )
        .with_alert_engine(alerts.clone());

        // Rate limiting is disabled with rate_limit_per_minute = 0
        let rate_limiter = (config.security.rate_limit_per_minute > 0).then(|| {
            Arc::new(RateLimiterState::new(config.security.rate_limit_per_minute))
        });

        Ok(Self {
            config: Arc::new(config),
            pool: backends.pool,
            jwt: Arc::new(jwt),
            gateway,
            pipeline: Arc::new(pipeline),
            alerts,
            rate_limiter,
        })
    }
}

pub fn create_app(state: AppState) -> Router {
    let config = Arc::clone(&state.config);

    let cors = if config.security.cors_origins.is_empty() {
        // Default: allow any origin (for development)
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        use tower_http::cors::AllowOrigin;
        let origins: Vec<_> = config
            .security
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(Any)
            .allow_headers(Any)
    };

    // Middleware order: auth runs first, then rate limiting (keyed by identity)
    let protected_routes = Router::new()
        .route("/api/v1/alerts", post(alerts::create_alert))
        .route("/api/v1/alerts/active", get(alerts::list_active_alerts))
        .route("/api/v1/alerts/:alert_id", get(alerts::get_alert))
        .route(
            "/api/v1/alerts/:alert_id/acknowledge",
            post(alerts::acknowledge_alert),
        )
        .route("/api/v1/alerts/:alert_id/resolve", post(alerts::resolve_alert))
        .route("/api/v1/locations", post(locations::submit_location))
        .route(
            "/api/v1/tracked-persons/:tracked_person_id/locations",
            get(locations::get_location_history),
        )
        .route(
            "/api/v1/tracked-persons/:tracked_person_id/position",
            get(locations::get_current_position),
        )
        .route(
            "/api/v1/perimeters/:perimeter_id/check",
            post(perimeters::check_perimeter),
        )
        .route("/api/v1/realtime", get(realtime::realtime_handler))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    let public_routes = Router::new()
        .route("/api/health", get(health::health_check))
        .route("/api/health/ready", get(health::ready))
        .route("/api/health/live", get(health::live))
        .route("/metrics", get(metrics_handler));

    Router::new()
        .merge(protected_routes)
        .merge(public_routes)
        .layer(DefaultBodyLimit::max(config.server.max_body_size))
        .layer(CompressionLayer::new())
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.server.request_timeout_secs,
        )))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(trace_id))
        .layer(cors)
        .with_state(state)
}
