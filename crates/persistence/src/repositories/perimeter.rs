//! Perimeter and assignment repository.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::entities::PerimeterEntity;
use crate::metrics::QueryTimer;

#[derive(Clone)]
pub struct PerimeterRepository {
    pool: PgPool,
}

impl PerimeterRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<PerimeterEntity>, sqlx::Error> {
        let timer = QueryTimer::new("find_perimeter");
        let result = sqlx::query_as::<_, PerimeterEntity>(
            r#"
            SELECT id, name, center_latitude, center_longitude, radius_meters, tenant_id, created_at
            FROM perimeters
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await;
        timer.finish(&result);
        result
    }

    /// Perimeter of the assignment whose `[starts_at, ends_at)` window contains `at`.
    /// The most recently started assignment wins when windows overlap.
    pub async fn find_active_for(
        &self,
        tracked_person_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<PerimeterEntity>, sqlx::Error> {
        let timer = QueryTimer::new("find_active_perimeter");
        let result = sqlx::query_as::<_, PerimeterEntity>(
            r#"
            SELECT p.id, p.name, p.center_latitude, p.center_longitude, p.radius_meters,
                   p.tenant_id, p.created_at
            FROM perimeter_assignments a
            JOIN perimeters p ON p.id = a.perimeter_id
            WHERE a.tracked_person_id = $1
              AND a.starts_at <= $2
              AND a.ends_at > $2
            ORDER BY a.starts_at DESC
            LIMIT 1
            "#,
        )
        .bind(tracked_person_id)
        .bind(at)
        .fetch_optional(&self.pool)
        .await;
        timer.finish(&result);
        result
    }
}
