//! Personnel directory repository.
//!
//! Backs group membership lookups for offline recipients.

use sqlx::PgPool;
use uuid::Uuid;

use crate::entities::PersonnelEntity;
use crate::metrics::QueryTimer;

#[derive(Clone)]
pub struct PersonnelRepository {
    pool: PgPool,
}

impl PersonnelRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Active personnel ids with the given role.
    pub async fn ids_by_role(&self, role: &str) -> Result<Vec<Uuid>, sqlx::Error> {
        let timer = QueryTimer::new("personnel_by_role");
        let result = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT id FROM personnel
            WHERE role = $1 AND active
            "#,
        )
        .bind(role)
        .fetch_all(&self.pool)
        .await;
        timer.finish(&result);
        result
    }

    /// Active personnel ids belonging to a tenant.
    pub async fn ids_by_tenant(&self, tenant_id: Uuid) -> Result<Vec<Uuid>, sqlx::Error> {
        let timer = QueryTimer::new("personnel_by_tenant");
        let result = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT id FROM personnel
            WHERE tenant_id = $1 AND active
            "#,
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await;
        timer.finish(&result);
        result
    }

    /// Active personnel ids linked to a tracked person.
    pub async fn ids_by_tracked_person(
        &self,
        tracked_person_id: Uuid,
    ) -> Result<Vec<Uuid>, sqlx::Error> {
        let timer = QueryTimer::new("personnel_by_tracked_person");
        let result = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT id FROM personnel
            WHERE tracked_person_id = $1 AND active
            "#,
        )
        .bind(tracked_person_id)
        .fetch_all(&self.pool)
        .await;
        timer.finish(&result);
        result
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<PersonnelEntity>, sqlx::Error> {
        let timer = QueryTimer::new("find_personnel");
        let result = sqlx::query_as::<_, PersonnelEntity>(
            r#"
            SELECT id, role, tenant_id, tracked_person_id, display_name, active, created_at
            FROM personnel
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await;
        timer.finish(&result);
        result
    }
}
