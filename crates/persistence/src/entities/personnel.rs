//! Personnel directory entity (database row mapping).

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use domain::models::{Identity, Role};
use domain::StoreError;

/// Database row mapping for the personnel table.
#[derive(Debug, Clone, FromRow)]
pub struct PersonnelEntity {
    pub id: Uuid,
    pub role: String,
    pub tenant_id: Option<Uuid>,
    pub tracked_person_id: Option<Uuid>,
    pub display_name: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<PersonnelEntity> for Identity {
    type Error = StoreError;

    fn try_from(entity: PersonnelEntity) -> Result<Self, Self::Error> {
        let role = Role::parse(&entity.role).ok_or_else(|| {
            StoreError::Serialization(format!("Unknown role '{}'", entity.role))
        })?;
        Ok(Self {
            id: entity.id,
            role,
            tenant_id: entity.tenant_id,
            tracked_person_id: entity.tracked_person_id,
            display_name: entity.display_name,
        })
    }
}
