//! Health check endpoint handlers.

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::app::AppState;

/// Health check response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<DatabaseHealth>,
    pub realtime: RealtimeHealth,
    pub alerts: AlertsHealth,
}

/// Database health status.
#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct DatabaseHealth {
    pub connected: bool,
    pub latency_ms: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct RealtimeHealth {
    pub connections: usize,
    pub identities_online: usize,
    pub offline_queue_depth: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct AlertsHealth {
    pub in_memory: usize,
    pub escalating: usize,
}

/// Simple status response for liveness/readiness probes.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: String,
}

async fn database_health(state: &AppState) -> Option<DatabaseHealth> {
    let pool = state.pool.as_ref()?;
    let start = std::time::Instant::now();
    let connected = persistence::db::ping(pool).await.is_ok();
    Some(DatabaseHealth {
        connected,
        latency_ms: connected.then(|| start.elapsed().as_millis() as u64),
    })
}

/// Full health check endpoint.
///
/// Without a database attached (in-memory adapters) the service reports
/// healthy on its realtime state alone.
pub async fn health_check(
    State(state): State<AppState>,
) -> (StatusCode, Json<HealthResponse>) {
    let database = database_health(&state).await;
    let healthy = database.as_ref().map_or(true, |db| db.connected);

    let registry = state.gateway.registry();
    let response = HealthResponse {
        status: if healthy { "healthy" } else { "unhealthy" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database,
        realtime: RealtimeHealth {
            connections: registry.connection_count(),
            identities_online: registry.online_count(),
            offline_queue_depth: state.gateway.queue().total_depth(),
        },
        alerts: AlertsHealth {
            in_memory: state.alerts.tracked_alerts(),
            escalating: state.alerts.armed_alerts(),
        },
    };

    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(response))
}

/// Liveness probe endpoint.
///
/// Returns 200 OK if the process is running.
pub async fn live() -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "alive".to_string(),
    })
}

/// Readiness probe endpoint.
///
/// Returns 200 OK if the service can accept traffic (database connected).
pub async fn ready(State(state): State<AppState>) -> Result<Json<StatusResponse>, StatusCode> {
    let db_connected = match &state.pool {
        Some(pool) => persistence::db::ping(pool).await.is_ok(),
        None => true,
    };

    if db_connected {
        Ok(Json(StatusResponse {
            status: "ready".to_string(),
        }))
    } else {
        Err(StatusCode::SERVICE_UNAVAILABLE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_response_without_database_omits_section() {
        let response = HealthResponse {
            status: "healthy".to_string(),
            version: "0.1.0".to_string(),
            database: None,
            realtime: RealtimeHealth {
                connections: 2,
                identities_online: 1,
                offline_queue_depth: 0,
            },
            alerts: AlertsHealth {
                in_memory: 0,
                escalating: 0,
            },
        };
        let json = serde_json::to_value(&response).unwrap();
        assert!(json.get("database").is_none());
        assert_eq!(json["realtime"]["identities_online"], 1);
    }

    #[test]
    fn test_database_health_serializes_latency() {
        let json = serde_json::to_value(DatabaseHealth {
            connected: false,
            latency_ms: None,
        })
        .unwrap();
        assert_eq!(json["connected"], false);
        assert!(json["latency_ms"].is_null());
    }

    #[tokio::test]
    async fn test_live_probe() {
        let Json(response) = live().await;
        assert_eq!(response.status, "alive");
    }
}
