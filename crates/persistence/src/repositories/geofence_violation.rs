//! Geofence violation repository.

use sqlx::PgPool;
use uuid::Uuid;

use crate::entities::GeofenceViolationEntity;
use crate::metrics::QueryTimer;
use domain::models::GeofenceViolation;

#[derive(Clone)]
pub struct GeofenceViolationRepository {
    pool: PgPool,
}

impl GeofenceViolationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Appends a violation. Re-inserting the same id is a no-op.
    pub async fn insert(&self, violation: &GeofenceViolation) -> Result<(), sqlx::Error> {
        let timer = QueryTimer::new("insert_geofence_violation");
        let result = sqlx::query(
            r#"
            INSERT INTO geofence_violations (
                id, tracked_person_id, perimeter_id, latitude, longitude,
                distance_meters, tolerance_meters, severity, occurred_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(violation.id)
        .bind(violation.tracked_person_id)
        .bind(violation.perimeter_id)
        .bind(violation.location.latitude)
        .bind(violation.location.longitude)
        .bind(violation.distance_meters)
        .bind(violation.tolerance_meters)
        .bind(violation.severity.as_str())
        .bind(violation.occurred_at)
        .execute(&self.pool)
        .await;
        timer.finish(&result);
        result.map(|_| ())
    }

    /// Most recent violations for a tracked person.
    pub async fn recent_for(
        &self,
        tracked_person_id: Uuid,
        limit: i64,
    ) -> Result<Vec<GeofenceViolationEntity>, sqlx::Error> {
        let timer = QueryTimer::new("recent_geofence_violations");
        let result = sqlx::query_as::<_, GeofenceViolationEntity>(
            r#"
            SELECT * FROM geofence_violations
            WHERE tracked_person_id = $1
            ORDER BY occurred_at DESC
            LIMIT $2
            "#,
        )
        .bind(tracked_person_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await;
        timer.finish(&result);
        result
    }
}
