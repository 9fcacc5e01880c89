//! Geofence violation entity (database row mapping).

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use domain::models::{Coordinate, GeofenceViolation};
use domain::StoreError;

/// Database row mapping for the geofence_violations table.
#[derive(Debug, Clone, FromRow)]
pub struct GeofenceViolationEntity {
    pub id: Uuid,
    pub tracked_person_id: Uuid,
    pub perimeter_id: Uuid,
    pub latitude: f64,
    pub longitude: f64,
    pub distance_meters: f64,
    pub tolerance_meters: f64,
    pub severity: String,
    pub occurred_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<GeofenceViolationEntity> for GeofenceViolation {
    type Error = StoreError;

    fn try_from(entity: GeofenceViolationEntity) -> Result<Self, Self::Error> {
        Ok(Self {
            id: entity.id,
            tracked_person_id: entity.tracked_person_id,
            perimeter_id: entity.perimeter_id,
            location: Coordinate::new(entity.latitude, entity.longitude),
            distance_meters: entity.distance_meters,
            tolerance_meters: entity.tolerance_meters,
            severity: entity.severity.parse().map_err(StoreError::Serialization)?,
            occurred_at: entity.occurred_at,
        })
    }
}
