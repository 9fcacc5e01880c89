//! Location sample entity (database row mapping).

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use domain::models::{LocationRecord, LocationSample};

/// Database row mapping for the location_samples table.
#[derive(Debug, Clone, FromRow)]
pub struct LocationEntity {
    pub id: i64,
    pub tracked_person_id: Uuid,
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: f64,
    pub battery_level: Option<i32>,
    pub speed: Option<f64>,
    pub heading: Option<f64>,
    pub captured_at: DateTime<Utc>,
    pub received_at: DateTime<Utc>,
}

impl From<LocationEntity> for LocationRecord {
    fn from(entity: LocationEntity) -> Self {
        Self {
            id: entity.id,
            sample: LocationSample {
                tracked_person_id: entity.tracked_person_id,
                latitude: entity.latitude,
                longitude: entity.longitude,
                accuracy: entity.accuracy,
                captured_at: entity.captured_at,
                battery_level: entity.battery_level,
                speed: entity.speed,
                heading: entity.heading,
            },
            received_at: entity.received_at,
        }
    }
}
