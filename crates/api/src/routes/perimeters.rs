//! Perimeter check handler.

use axum::{
    extract::{Path, State},
    Json,
};
use uuid::Uuid;
use validator::Validate;

use crate::app::AppState;
use crate::error::ApiError;
use crate::extractors::AuthIdentity;
use domain::models::perimeter::PerimeterCheckRequest;
use domain::models::PerimeterCheck;

/// Evaluate a coordinate against a perimeter without recording anything.
///
/// POST /api/v1/perimeters/:perimeter_id/check
pub async fn check_perimeter(
    State(state): State<AppState>,
    AuthIdentity(_identity): AuthIdentity,
    Path(perimeter_id): Path<Uuid>,
    Json(request): Json<PerimeterCheckRequest>,
) -> Result<Json<PerimeterCheck>, ApiError> {
    request.validate()?;
    let check = state
        .pipeline
        .check_perimeter(perimeter_id, request.coordinate())
        .await?;
    Ok(Json(check))
}
