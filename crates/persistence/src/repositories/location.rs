//! Location history repository.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::entities::LocationEntity;
use crate::metrics::QueryTimer;
use domain::models::LocationSample;

/// Keyset filter for history reads, ordered by `(captured_at, id)`.
#[derive(Debug, Clone)]
pub struct LocationHistoryFilter {
    pub tracked_person_id: Uuid,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub after: Option<(DateTime<Utc>, i64)>,
    pub limit: i64,
}

#[derive(Clone)]
pub struct LocationRepository {
    pool: PgPool,
}

impl LocationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert(
        &self,
        sample: &LocationSample,
        received_at: DateTime<Utc>,
    ) -> Result<LocationEntity, sqlx::Error> {
        let timer = QueryTimer::new("insert_location");
        let result = sqlx::query_as::<_, LocationEntity>(
            r#"
            INSERT INTO location_samples (
                tracked_person_id, latitude, longitude, accuracy,
                battery_level, speed, heading, captured_at, received_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *
            "#,
        )
        .bind(sample.tracked_person_id)
        .bind(sample.latitude)
        .bind(sample.longitude)
        .bind(sample.accuracy)
        .bind(sample.battery_level)
        .bind(sample.speed)
        .bind(sample.heading)
        .bind(sample.captured_at)
        .bind(received_at)
        .fetch_one(&self.pool)
        .await;
        timer.finish(&result);
        result
    }

    pub async fn latest(
        &self,
        tracked_person_id: Uuid,
    ) -> Result<Option<LocationEntity>, sqlx::Error> {
        let timer = QueryTimer::new("latest_location");
        let result = sqlx::query_as::<_, LocationEntity>(
            r#"
            SELECT * FROM location_samples
            WHERE tracked_person_id = $1
            ORDER BY captured_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(tracked_person_id)
        .fetch_optional(&self.pool)
        .await;
        timer.finish(&result);
        result
    }

    pub async fn history(
        &self,
        filter: &LocationHistoryFilter,
    ) -> Result<Vec<LocationEntity>, sqlx::Error> {
        let timer = QueryTimer::new("location_history");
        let (after_time, after_id) = filter.after.unzip();
        let result = sqlx::query_as::<_, LocationEntity>(
            r#"
            SELECT * FROM location_samples
            WHERE tracked_person_id = $1
              AND ($2::timestamptz IS NULL OR captured_at >= $2)
              AND ($3::timestamptz IS NULL OR captured_at <= $3)
              AND ($4::timestamptz IS NULL OR (captured_at, id) > ($4, $5))
            ORDER BY captured_at ASC, id ASC
            LIMIT $6
            "#,
        )
        .bind(filter.tracked_person_id)
        .bind(filter.from)
        .bind(filter.to)
        .bind(after_time)
        .bind(after_id)
        .bind(filter.limit)
        .fetch_all(&self.pool)
        .await;
        timer.finish(&result);
        result
    }

    /// Deletes samples captured before `cutoff`.
    pub async fn delete_before(&self, cutoff: DateTime<Utc>) -> Result<u64, sqlx::Error> {
        let timer = QueryTimer::new("prune_locations");
        let result = sqlx::query(
            r#"
            DELETE FROM location_samples
            WHERE captured_at < $1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await;
        timer.finish(&result);
        Ok(result?.rows_affected())
    }
}
