//! Common test utilities for integration tests.
//!
//! The router runs against the in-memory adapters from `domain::services::memory`,
//! so these tests need no database.

#![allow(dead_code)]

use axum::{
    body::Body,
    http::{header, Method, Request},
    response::Response,
    Router,
};
use chrono::{Duration, Utc};
use fake::{faker::name::en::Name, Fake};
use field_safety_api::app::{create_app, AppState, Backends};
use field_safety_api::config::{
    Config, DatabaseConfig, EscalationConfig, GeofenceConfig, InfrastructureConfig,
    JwtAuthConfig, LimitsConfig, LoggingConfig, NotificationsConfig, RealtimeConfig,
    SecurityConfig, ServerConfig,
};
use domain::models::{Assignment, Coordinate, Identity, Perimeter, Role, TrackedPerson};
use domain::services::{InMemoryCache, InMemoryStore, LocalBroker, MockExternalNotifier};
use shared::jwt::{IdentityClaims, JwtConfig};
use std::sync::Arc;
use uuid::Uuid;

pub const TEST_JWT_SECRET: &str = "integration-test-secret-0123456789";

/// Site perimeter used by the fixtures: 100 m around a point in Bratislava.
pub const SITE_CENTER: (f64, f64) = (48.1486, 17.1077);
pub const SITE_RADIUS_METERS: f64 = 100.0;

pub fn test_config() -> Config {
    Config {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 8080,
            request_timeout_secs: 30,
            max_body_size: 1_048_576,
        },
        database: DatabaseConfig {
            url: "postgres://unused".to_string(),
            max_connections: 5,
            min_connections: 1,
            connect_timeout_secs: 10,
            idle_timeout_secs: 600,
        },
        logging: LoggingConfig {
            level: "debug".to_string(),
            format: "pretty".to_string(),
        },
        security: SecurityConfig {
            cors_origins: vec![],
            rate_limit_per_minute: 0, // Disable rate limiting for tests
        },
        limits: LimitsConfig {
            location_retention_days: 30,
            queue_max_age_hours: 24,
            queue_capacity: 100,
            history_default_limit: 100,
            history_max_limit: 500,
            position_ttl_secs: 300,
        },
        jwt: JwtAuthConfig {
            algorithm: "HS256".to_string(),
            public_key: String::new(),
            private_key: None,
            secret: Some(TEST_JWT_SECRET.to_string()),
            access_token_expiry_secs: 3600,
            leeway_secs: 0,
        },
        escalation: EscalationConfig::default(),
        geofence: GeofenceConfig::default(),
        infrastructure: InfrastructureConfig {
            store_timeout_ms: 1000,
            cache_timeout_ms: 200,
            retry_attempts: 2,
            retry_backoff_ms: 1,
        },
        realtime: RealtimeConfig::default(),
        notifications: NotificationsConfig::default(),
    }
}

pub struct TestApp {
    pub app: Router,
    pub state: AppState,
    pub store: Arc<InMemoryStore>,
    pub notifier: Arc<MockExternalNotifier>,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: Config) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let notifier = Arc::new(MockExternalNotifier::recording());
        let backends = Backends {
            tracking: store.clone(),
            alerts: store.clone(),
            directory: Some(store.clone()),
            cache: Arc::new(InMemoryCache::new()),
            broker: Some(Arc::new(LocalBroker::new(64))),
            notifier: notifier.clone(),
            pool: None,
        };
        let state = AppState::new(config, backends).expect("valid test config");
        Self {
            app: create_app(state.clone()),
            state,
            store,
            notifier,
        }
    }

    /// A field agent linked to a freshly registered tracked person.
    pub fn agent(&self, tenant_id: Option<Uuid>) -> Identity {
        let name: String = Name().fake();
        let person = TrackedPerson {
            id: Uuid::new_v4(),
            display_name: name.clone(),
            tenant_id,
        };
        self.store.add_tracked_person(person.clone());

        let mut identity = Identity::new(Uuid::new_v4(), Role::Agent)
            .with_tracked_person(person.id)
            .with_display_name(name);
        identity.tenant_id = tenant_id;
        self.store.add_personnel(identity.clone());
        identity
    }

    pub fn staff(&self, role: Role, tenant_id: Option<Uuid>) -> Identity {
        let name: String = Name().fake();
        let mut identity = Identity::new(Uuid::new_v4(), role).with_display_name(name);
        identity.tenant_id = tenant_id;
        self.store.add_personnel(identity.clone());
        identity
    }

    /// Assigns the agent's tracked person to the site perimeter for the next hour.
    pub fn assign_site(&self, tracked_person_id: Uuid) -> Perimeter {
        let perimeter = Perimeter {
            id: Uuid::new_v4(),
            name: "Main gate".to_string(),
            center: Coordinate::new(SITE_CENTER.0, SITE_CENTER.1),
            radius_meters: SITE_RADIUS_METERS,
            tenant_id: None,
        };
        self.store.add_perimeter(perimeter.clone());
        self.store.add_assignment(Assignment {
            id: Uuid::new_v4(),
            tracked_person_id,
            perimeter_id: perimeter.id,
            starts_at: Utc::now() - Duration::hours(1),
            ends_at: Utc::now() + Duration::hours(1),
        });
        perimeter
    }
}

/// Signs a token carrying the identity's claims.
pub fn token_for(identity: &Identity) -> String {
    JwtConfig::hs256(TEST_JWT_SECRET, 3600, 0)
        .issue(&IdentityClaims {
            identity_id: identity.id,
            role: identity.role.as_str().to_string(),
            tenant_id: identity.tenant_id,
            tracked_person_id: identity.tracked_person_id,
            name: identity.display_name.clone(),
        })
        .expect("token")
}

pub fn json_request_with_auth(
    method: Method,
    uri: &str,
    body: serde_json::Value,
    token: &str,
) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

pub fn post_request_with_auth(uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap()
}

pub fn get_request_with_auth(uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .method(Method::GET)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap()
}

pub fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

pub async fn parse_response_body(response: Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null)
}
