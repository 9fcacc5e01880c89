//! Tracked person entity (database row mapping).

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use domain::models::TrackedPerson;

/// Database row mapping for the tracked_persons table.
#[derive(Debug, Clone, FromRow)]
pub struct TrackedPersonEntity {
    pub id: Uuid,
    pub display_name: String,
    pub tenant_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl From<TrackedPersonEntity> for TrackedPerson {
    fn from(entity: TrackedPersonEntity) -> Self {
        Self {
            id: entity.id,
            display_name: entity.display_name,
            tenant_id: entity.tenant_id,
        }
    }
}
