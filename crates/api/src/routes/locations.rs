//! Location endpoint handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;
use validator::Validate;

use super::{authorize_person, subject_person};
use crate::app::AppState;
use crate::error::ApiError;
use crate::extractors::AuthIdentity;
use domain::models::location::{
    LocationHistoryQuery, LocationHistoryResponse, SubmitLocationRequest,
};
use domain::models::{GeofenceViolation, LocationRecord, LocationSample};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitLocationResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<LocationRecord>,
    pub violations: Vec<GeofenceViolation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert_id: Option<Uuid>,
}

/// Submit a single location sample.
///
/// POST /api/v1/locations
pub async fn submit_location(
    State(state): State<AppState>,
    AuthIdentity(identity): AuthIdentity,
    Json(request): Json<SubmitLocationRequest>,
) -> Result<(StatusCode, Json<SubmitLocationResponse>), ApiError> {
    request.validate()?;
    let tracked_person_id = subject_person(&identity, request.tracked_person_id)?;

    let outcome = state
        .pipeline
        .ingest(request.into_sample(tracked_person_id, Utc::now()))
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(SubmitLocationResponse {
            location: outcome.record,
            violations: outcome.violations,
            alert_id: outcome.alert_id,
        }),
    ))
}

/// Location history, oldest first, paginated by opaque cursor.
///
/// GET /api/v1/tracked-persons/:tracked_person_id/locations
pub async fn get_location_history(
    State(state): State<AppState>,
    AuthIdentity(identity): AuthIdentity,
    Path(tracked_person_id): Path<Uuid>,
    Query(query): Query<LocationHistoryQuery>,
) -> Result<Json<LocationHistoryResponse>, ApiError> {
    authorize_person(&identity, tracked_person_id)?;

    let page = state
        .pipeline
        .history(
            tracked_person_id,
            query.from,
            query.to,
            query.limit,
            query.cursor.as_deref(),
        )
        .await?;
    Ok(Json(page))
}

/// GET /api/v1/tracked-persons/:tracked_person_id/position
pub async fn get_current_position(
    State(state): State<AppState>,
    AuthIdentity(identity): AuthIdentity,
    Path(tracked_person_id): Path<Uuid>,
) -> Result<Json<LocationSample>, ApiError> {
    authorize_person(&identity, tracked_person_id)?;
    Ok(Json(state.pipeline.current_position(tracked_person_id).await?))
}
