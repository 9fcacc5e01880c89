//! Tracked person repository.

use sqlx::PgPool;
use uuid::Uuid;

use crate::entities::TrackedPersonEntity;
use crate::metrics::QueryTimer;

#[derive(Clone)]
pub struct TrackedPersonRepository {
    pool: PgPool,
}

impl TrackedPersonRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<TrackedPersonEntity>, sqlx::Error> {
        let timer = QueryTimer::new("find_tracked_person");
        let result = sqlx::query_as::<_, TrackedPersonEntity>(
            r#"
            SELECT id, display_name, tenant_id, created_at
            FROM tracked_persons
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await;
        timer.finish(&result);
        result
    }

    /// Inserts or renames a tracked person.
    pub async fn upsert(
        &self,
        id: Uuid,
        display_name: &str,
        tenant_id: Option<Uuid>,
    ) -> Result<TrackedPersonEntity, sqlx::Error> {
        let timer = QueryTimer::new("upsert_tracked_person");
        let result = sqlx::query_as::<_, TrackedPersonEntity>(
            r#"
            INSERT INTO tracked_persons (id, display_name, tenant_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE
            SET display_name = EXCLUDED.display_name,
                tenant_id = EXCLUDED.tenant_id
            RETURNING id, display_name, tenant_id, created_at
            "#,
        )
        .bind(id)
        .bind(display_name)
        .bind(tenant_id)
        .fetch_one(&self.pool)
        .await;
        timer.finish(&result);
        result
    }
}
