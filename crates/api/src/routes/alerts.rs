//! Emergency alert endpoint handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use super::subject_person;
use crate::app::AppState;
use crate::error::ApiError;
use crate::extractors::AuthIdentity;
use domain::models::emergency_alert::{
    ActiveAlertsResponse, CreateAlertRequest, ResolveAlertRequest,
};
use domain::models::EmergencyAlert;
use domain::services::RaiseAlert;

/// Raise an emergency alert.
///
/// POST /api/v1/alerts
pub async fn create_alert(
    State(state): State<AppState>,
    AuthIdentity(identity): AuthIdentity,
    Json(request): Json<CreateAlertRequest>,
) -> Result<(StatusCode, Json<EmergencyAlert>), ApiError> {
    request.validate()?;
    let tracked_person_id = subject_person(&identity, request.tracked_person_id)?;

    let alert = state
        .alerts
        .create(
            RaiseAlert {
                category: request.category,
                tracked_person_id,
                location: request.location,
                description: request.description,
            },
            Some(identity.id),
        )
        .await?;

    Ok((StatusCode::CREATED, Json(alert)))
}

/// GET /api/v1/alerts/active
pub async fn list_active_alerts(
    State(state): State<AppState>,
    AuthIdentity(_identity): AuthIdentity,
) -> Result<Json<ActiveAlertsResponse>, ApiError> {
    let alerts = state.alerts.list_active().await?;
    Ok(Json(ActiveAlertsResponse {
        count: alerts.len(),
        alerts,
    }))
}

/// GET /api/v1/alerts/:alert_id
pub async fn get_alert(
    State(state): State<AppState>,
    AuthIdentity(_identity): AuthIdentity,
    Path(alert_id): Path<Uuid>,
) -> Result<Json<EmergencyAlert>, ApiError> {
    Ok(Json(state.alerts.get(alert_id).await?))
}

/// Acknowledge an active alert, stopping escalation. Supervisors and admins only.
///
/// POST /api/v1/alerts/:alert_id/acknowledge
pub async fn acknowledge_alert(
    State(state): State<AppState>,
    AuthIdentity(identity): AuthIdentity,
    Path(alert_id): Path<Uuid>,
) -> Result<Json<EmergencyAlert>, ApiError> {
    let alert = state.alerts.acknowledge(alert_id, &identity).await?;
    info!(alert_id = %alert_id, by = %identity.id, "Alert acknowledged via API");
    Ok(Json(alert))
}

/// Resolve an alert, optionally as a false alarm. Supervisors and admins only.
///
/// POST /api/v1/alerts/:alert_id/resolve
pub async fn resolve_alert(
    State(state): State<AppState>,
    AuthIdentity(identity): AuthIdentity,
    Path(alert_id): Path<Uuid>,
    request: Option<Json<ResolveAlertRequest>>,
) -> Result<Json<EmergencyAlert>, ApiError> {
    let outcome = request
        .map(|Json(r)| r.outcome)
        .unwrap_or(domain::models::ResolutionOutcome::Resolved);
    let alert = state.alerts.resolve(alert_id, &identity, outcome).await?;
    info!(alert_id = %alert_id, by = %identity.id, outcome = ?outcome, "Alert resolved via API");
    Ok(Json(alert))
}
