//! Perimeter and assignment entities (database row mapping).

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use domain::models::{Assignment, Coordinate, Perimeter};

/// Database row mapping for the perimeters table.
#[derive(Debug, Clone, FromRow)]
pub struct PerimeterEntity {
    pub id: Uuid,
    pub name: String,
    pub center_latitude: f64,
    pub center_longitude: f64,
    pub radius_meters: f64,
    pub tenant_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl From<PerimeterEntity> for Perimeter {
    fn from(entity: PerimeterEntity) -> Self {
        Self {
            id: entity.id,
            name: entity.name,
            center: Coordinate::new(entity.center_latitude, entity.center_longitude),
            radius_meters: entity.radius_meters,
            tenant_id: entity.tenant_id,
        }
    }
}

/// Database row mapping for the perimeter_assignments table.
#[derive(Debug, Clone, FromRow)]
pub struct AssignmentEntity {
    pub id: Uuid,
    pub tracked_person_id: Uuid,
    pub perimeter_id: Uuid,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

impl From<AssignmentEntity> for Assignment {
    fn from(entity: AssignmentEntity) -> Self {
        Self {
            id: entity.id,
            tracked_person_id: entity.tracked_person_id,
            perimeter_id: entity.perimeter_id,
            starts_at: entity.starts_at,
            ends_at: entity.ends_at,
        }
    }
}
