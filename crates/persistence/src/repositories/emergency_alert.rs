//! Emergency alert repository.

use sqlx::PgPool;
use uuid::Uuid;

use crate::entities::emergency_alert::outcome_to_str;
use crate::entities::EmergencyAlertEntity;
use crate::metrics::QueryTimer;
use domain::models::EmergencyAlert;

#[derive(Clone)]
pub struct EmergencyAlertRepository {
    pool: PgPool,
}

impl EmergencyAlertRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Inserts an alert. Re-inserting an existing id is a no-op, so retries are safe.
    pub async fn insert(
        &self,
        alert: &EmergencyAlert,
        dispatches: serde_json::Value,
    ) -> Result<(), sqlx::Error> {
        let timer = QueryTimer::new("insert_emergency_alert");
        let result = sqlx::query(
            r#"
            INSERT INTO emergency_alerts (
                id, category, priority, tracked_person_id, tracked_person_name,
                latitude, longitude, description, status, escalation_level,
                acknowledged_by, acknowledged_at, resolved_by, resolved_at, outcome,
                dispatches, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(alert.id)
        .bind(alert.category.as_str())
        .bind(alert.priority.as_str())
        .bind(alert.tracked_person_id)
        .bind(&alert.tracked_person_name)
        .bind(alert.location.map(|c| c.latitude))
        .bind(alert.location.map(|c| c.longitude))
        .bind(&alert.description)
        .bind(alert.status.as_str())
        .bind(alert.escalation_level as i32)
        .bind(alert.acknowledged_by)
        .bind(alert.acknowledged_at)
        .bind(alert.resolved_by)
        .bind(alert.resolved_at)
        .bind(alert.outcome.map(outcome_to_str))
        .bind(dispatches)
        .bind(alert.created_at)
        .bind(alert.updated_at)
        .execute(&self.pool)
        .await;
        timer.finish(&result);
        result.map(|_| ())
    }

    /// Overwrites the mutable columns of an alert.
    pub async fn update(
        &self,
        alert: &EmergencyAlert,
        dispatches: serde_json::Value,
    ) -> Result<u64, sqlx::Error> {
        let timer = QueryTimer::new("update_emergency_alert");
        let result = sqlx::query(
            r#"
            UPDATE emergency_alerts
            SET status = $2,
                escalation_level = $3,
                acknowledged_by = $4,
                acknowledged_at = $5,
                resolved_by = $6,
                resolved_at = $7,
                outcome = $8,
                dispatches = $9,
                updated_at = $10
            WHERE id = $1
            "#,
        )
        .bind(alert.id)
        .bind(alert.status.as_str())
        .bind(alert.escalation_level as i32)
        .bind(alert.acknowledged_by)
        .bind(alert.acknowledged_at)
        .bind(alert.resolved_by)
        .bind(alert.resolved_at)
        .bind(alert.outcome.map(outcome_to_str))
        .bind(dispatches)
        .bind(alert.updated_at)
        .execute(&self.pool)
        .await;
        timer.finish(&result);
        Ok(result?.rows_affected())
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<EmergencyAlertEntity>, sqlx::Error> {
        let timer = QueryTimer::new("find_emergency_alert");
        let result = sqlx::query_as::<_, EmergencyAlertEntity>(
            r#"
            SELECT * FROM emergency_alerts
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await;
        timer.finish(&result);
        result
    }

    /// ACTIVE and ACKNOWLEDGED alerts, oldest first.
    pub async fn find_open(&self) -> Result<Vec<EmergencyAlertEntity>, sqlx::Error> {
        let timer = QueryTimer::new("open_emergency_alerts");
        let result = sqlx::query_as::<_, EmergencyAlertEntity>(
            r#"
            SELECT * FROM emergency_alerts
            WHERE status IN ('ACTIVE', 'ACKNOWLEDGED')
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await;
        timer.finish(&result);
        result
    }

    /// ACTIVE alerts only, oldest first.
    pub async fn find_active(&self) -> Result<Vec<EmergencyAlertEntity>, sqlx::Error> {
        let timer = QueryTimer::new("active_emergency_alerts");
        let result = sqlx::query_as::<_, EmergencyAlertEntity>(
            r#"
            SELECT * FROM emergency_alerts
            WHERE status = 'ACTIVE'
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await;
        timer.finish(&result);
        result
    }
}
