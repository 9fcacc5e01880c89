use serde::Deserialize;
use std::net::SocketAddr;
use std::time::Duration;
use uuid::Uuid;

use domain::models::{EscalationLevel, EscalationPolicy, ViolationSeverity};
use domain::services::{EngineSettings, PipelineSettings, RetryPolicy};
use shared::jwt::JwtConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub security: SecurityConfig,
    pub limits: LimitsConfig,
    /// Identity token verification
    pub jwt: JwtAuthConfig,
    #[serde(default)]
    pub escalation: EscalationConfig,
    #[serde(default)]
    pub geofence: GeofenceConfig,
    #[serde(default)]
    pub infrastructure: InfrastructureConfig,
    #[serde(default)]
    pub realtime: RealtimeConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

impl From<&DatabaseConfig> for persistence::db::DatabaseConfig {
    fn from(config: &DatabaseConfig) -> Self {
        Self {
            url: config.url.clone(),
            max_connections: config.max_connections,
            min_connections: config.min_connections,
            connect_timeout_secs: config.connect_timeout_secs,
            idle_timeout_secs: config.idle_timeout_secs,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// `json`, `pretty` or `compact`
    #[serde(default = "default_log_format")]
    pub format: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    #[serde(default)]
    pub cors_origins: Vec<String>,

    /// Per-identity request budget; 0 disables rate limiting.
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_minute: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_location_retention_days")]
    pub location_retention_days: u32,

    /// Queued offline events older than this are swept.
    #[serde(default = "default_queue_max_age_hours")]
    pub queue_max_age_hours: u64,

    /// Per-recipient offline queue bound; the oldest entry is dropped on overflow.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    #[serde(default = "default_history_page_size")]
    pub history_default_limit: i64,

    #[serde(default = "default_history_max_page_size")]
    pub history_max_limit: i64,

    #[serde(default = "default_position_ttl")]
    pub position_ttl_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtAuthConfig {
    /// `RS256` (production) or `HS256` (development and tests)
    #[serde(default = "default_jwt_algorithm")]
    pub algorithm: String,

    /// RSA public key in PEM format, required for RS256
    #[serde(default)]
    pub public_key: String,

    /// RSA private key in PEM format; only needed to issue tokens from tooling
    #[serde(default)]
    pub private_key: Option<String>,

    /// Shared secret, required for HS256
    #[serde(default)]
    pub secret: Option<String>,

    /// Lifetime of tokens issued by tooling (default: 3600 = 1 hour)
    #[serde(default = "default_access_token_expiry")]
    pub access_token_expiry_secs: i64,

    /// Leeway in seconds for clock skew tolerance (default: 30)
    #[serde(default = "default_jwt_leeway")]
    pub leeway_secs: u64,
}

/// Escalation tiers. An empty list selects the built-in three-level policy.
#[derive(Debug, Clone, Deserialize)]
pub struct EscalationConfig {
    #[serde(default)]
    pub levels: Vec<EscalationLevel>,

    #[serde(default = "default_alert_cache_ttl")]
    pub alert_cache_ttl_secs: u64,

    /// Resolved alerts stay in memory this long before eviction.
    #[serde(default = "default_terminal_retention")]
    pub terminal_retention_secs: u64,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            levels: Vec::new(),
            alert_cache_ttl_secs: default_alert_cache_ttl(),
            terminal_retention_secs: default_terminal_retention(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeofenceConfig {
    /// Raise a SECURITY alert automatically for serious violations.
    #[serde(default = "default_true")]
    pub auto_alert: bool,

    #[serde(default = "default_auto_alert_severity")]
    pub auto_alert_min_severity: ViolationSeverity,
}

impl Default for GeofenceConfig {
    fn default() -> Self {
        Self {
            auto_alert: true,
            auto_alert_min_severity: default_auto_alert_severity(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct InfrastructureConfig {
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,

    #[serde(default = "default_cache_timeout_ms")]
    pub cache_timeout_ms: u64,

    /// Total attempts for idempotent writes, including the first.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl Default for InfrastructureConfig {
    fn default() -> Self {
        Self {
            store_timeout_ms: default_store_timeout_ms(),
            cache_timeout_ms: default_cache_timeout_ms(),
            retry_attempts: default_retry_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RealtimeConfig {
    /// Outbound frames buffered per connection before it counts as saturated.
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,

    #[serde(default = "default_broker_capacity")]
    pub broker_capacity: usize,

    /// Identifies this instance on the broker; random when unset.
    #[serde(default)]
    pub instance_id: Option<Uuid>,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            outbound_buffer: default_outbound_buffer(),
            broker_capacity: default_broker_capacity(),
            instance_id: None,
        }
    }
}

/// Outbound webhook used for push/SMS/email escalation channels.
#[derive(Debug, Clone, Deserialize)]
pub struct NotificationsConfig {
    /// Notifications are logged and skipped when unset.
    #[serde(default)]
    pub webhook_url: Option<String>,

    /// HMAC-SHA256 key for the `X-Webhook-Signature` header.
    #[serde(default)]
    pub webhook_secret: Option<String>,

    #[serde(default = "default_webhook_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            webhook_secret: None,
            timeout_ms: default_webhook_timeout_ms(),
        }
    }
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_request_timeout() -> u64 {
    30
}
fn default_max_body_size() -> usize {
    1_048_576
}
fn default_max_connections() -> u32 {
    20
}
fn default_min_connections() -> u32 {
    5
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_idle_timeout() -> u64 {
    600
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "json".to_string()
}
fn default_rate_limit() -> u32 {
    300
}
fn default_location_retention_days() -> u32 {
    30
}
fn default_queue_max_age_hours() -> u64 {
    24
}
fn default_queue_capacity() -> usize {
    domain::services::message_queue::DEFAULT_CAPACITY
}
fn default_history_page_size() -> i64 {
    100
}
fn default_history_max_page_size() -> i64 {
    500
}
fn default_position_ttl() -> u64 {
    300
}
fn default_jwt_algorithm() -> String {
    "RS256".to_string()
}
fn default_access_token_expiry() -> i64 {
    3600
}
fn default_jwt_leeway() -> u64 {
    shared::jwt::DEFAULT_LEEWAY_SECS
}
fn default_alert_cache_ttl() -> u64 {
    3600
}
fn default_terminal_retention() -> u64 {
    3600
}
fn default_true() -> bool {
    true
}
fn default_auto_alert_severity() -> ViolationSeverity {
    ViolationSeverity::High
}
fn default_store_timeout_ms() -> u64 {
    2000
}
fn default_cache_timeout_ms() -> u64 {
    500
}
fn default_retry_attempts() -> u32 {
    3
}
fn default_retry_backoff_ms() -> u64 {
    100
}
fn default_outbound_buffer() -> usize {
    256
}
fn default_broker_capacity() -> usize {
    1024
}
fn default_webhook_timeout_ms() -> u64 {
    5000
}

/// Configuration validation error
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from files and environment variables.
    ///
    /// Loading order (later sources override earlier):
    /// 1. config/default.toml - base configuration with defaults
    /// 2. config/local.toml - local overrides (optional, not in git)
    /// 3. Environment variables with FS__ prefix
    pub fn load() -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(config::Environment::with_prefix("FS").separator("__"))
            .build()?;

        let cfg: Self = config.try_deserialize()?;
        cfg.validate()
            .map_err(|e| config::ConfigError::Message(e.to_string()))?;
        Ok(cfg)
    }

    /// Load configuration for testing with custom overrides, without touching
    /// the file system.
    #[cfg(test)]
    pub fn load_for_test(overrides: &[(&str, &str)]) -> Result<Self, config::ConfigError> {
        let defaults = r#"
            [server]
            host = "0.0.0.0"
            port = 8080
            request_timeout_secs = 30
            max_body_size = 1048576

            [database]
            url = ""
            max_connections = 20
            min_connections = 5
            connect_timeout_secs = 10
            idle_timeout_secs = 600

            [logging]
            level = "info"
            format = "json"

            [security]
            cors_origins = []
            rate_limit_per_minute = 300

            [limits]
            location_retention_days = 30
            queue_max_age_hours = 24
            queue_capacity = 1000
            history_default_limit = 100
            history_max_limit = 500
            position_ttl_secs = 300

            [jwt]
            algorithm = "HS256"
            secret = "test-secret-that-is-long-enough"
            access_token_expiry_secs = 3600
            leeway_secs = 30
        "#;

        let mut builder = config::Config::builder()
            .add_source(config::File::from_str(defaults, config::FileFormat::Toml));

        for (key, value) in overrides {
            builder = builder.set_override(*key, *value)?;
        }

        // Skip validation in tests to allow partial configs
        builder.build()?.try_deserialize()
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.database.url.is_empty() {
            return Err(ConfigValidationError::MissingRequired(
                "FS__DATABASE__URL environment variable must be set".to_string(),
            ));
        }

        if self.server.port == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "Server port cannot be 0".to_string(),
            ));
        }

        if self.database.min_connections > self.database.max_connections {
            return Err(ConfigValidationError::InvalidValue(
                "min_connections cannot exceed max_connections".to_string(),
            ));
        }

        if self.limits.history_default_limit < 1
            || self.limits.history_default_limit > self.limits.history_max_limit
        {
            return Err(ConfigValidationError::InvalidValue(
                "history_default_limit must be between 1 and history_max_limit".to_string(),
            ));
        }

        if self.realtime.outbound_buffer == 0 || self.realtime.broker_capacity == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "realtime buffers must be greater than 0".to_string(),
            ));
        }

        self.jwt_verifier()?;
        self.escalation_policy()?;
        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigValidationError> {
        format!("{}:{}", self.server.host, self.server.port)
            .parse()
            .map_err(|e| {
                ConfigValidationError::InvalidValue(format!("Invalid socket address: {}", e))
            })
    }

    /// Token verifier for the configured algorithm.
    pub fn jwt_verifier(&self) -> Result<JwtConfig, ConfigValidationError> {
        let jwt = &self.jwt;
        match jwt.algorithm.to_ascii_uppercase().as_str() {
            "RS256" => {
                if jwt.public_key.trim().is_empty() {
                    return Err(ConfigValidationError::MissingRequired(
                        "FS__JWT__PUBLIC_KEY must be set for RS256".to_string(),
                    ));
                }
                JwtConfig::rs256(
                    &jwt.public_key,
                    jwt.private_key.as_deref(),
                    jwt.access_token_expiry_secs,
                    jwt.leeway_secs,
                )
                .map_err(|e| ConfigValidationError::InvalidValue(e.to_string()))
            }
            "HS256" => match jwt.secret.as_deref() {
                Some(secret) if secret.len() >= 16 => Ok(JwtConfig::hs256(
                    secret,
                    jwt.access_token_expiry_secs,
                    jwt.leeway_secs,
                )),
                Some(_) => Err(ConfigValidationError::InvalidValue(
                    "jwt.secret must be at least 16 characters".to_string(),
                )),
                None => Err(ConfigValidationError::MissingRequired(
                    "FS__JWT__SECRET must be set for HS256".to_string(),
                )),
            },
            other => Err(ConfigValidationError::InvalidValue(format!(
                "Unsupported jwt.algorithm '{}'",
                other
            ))),
        }
    }

    pub fn escalation_policy(&self) -> Result<EscalationPolicy, ConfigValidationError> {
        if self.escalation.levels.is_empty() {
            return Ok(EscalationPolicy::v1());
        }
        EscalationPolicy::new(self.escalation.levels.clone())
            .map_err(|e| ConfigValidationError::InvalidValue(e.to_string()))
    }

    fn retry_policy(&self) -> RetryPolicy {
        let infra = &self.infrastructure;
        RetryPolicy::new(
            infra.retry_attempts,
            Duration::from_millis(infra.retry_backoff_ms),
            self.store_timeout(),
        )
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.infrastructure.store_timeout_ms)
    }

    pub fn cache_timeout(&self) -> Duration {
        Duration::from_millis(self.infrastructure.cache_timeout_ms)
    }

    pub fn engine_settings(&self) -> Result<EngineSettings, ConfigValidationError> {
        Ok(EngineSettings {
            policy: self.escalation_policy()?,
            retry: self.retry_policy(),
            store_timeout: self.store_timeout(),
            cache_timeout: self.cache_timeout(),
            alert_cache_ttl: Duration::from_secs(self.escalation.alert_cache_ttl_secs),
        })
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            position_ttl: Duration::from_secs(self.limits.position_ttl_secs),
            store_timeout: self.store_timeout(),
            cache_timeout: self.cache_timeout(),
            auto_alert: self.geofence.auto_alert,
            auto_alert_min_severity: self.geofence.auto_alert_min_severity,
            history_default_limit: self.limits.history_default_limit,
            history_max_limit: self.limits.history_max_limit,
        }
    }
}
