//! Emergency alert entity (database row mapping).

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use domain::models::{Coordinate, EmergencyAlert, NotificationDispatch, ResolutionOutcome};
use domain::StoreError;

/// Database row mapping for the emergency_alerts table.
#[derive(Debug, Clone, FromRow)]
pub struct EmergencyAlertEntity {
    pub id: Uuid,
    pub category: String,
    pub priority: String,
    pub tracked_person_id: Uuid,
    pub tracked_person_name: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub description: Option<String>,
    pub status: String,
    pub escalation_level: i32,
    pub acknowledged_by: Option<Uuid>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<Uuid>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub outcome: Option<String>,
    pub dispatches: serde_json::Value, // JSONB array of NotificationDispatch
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub fn outcome_to_str(outcome: ResolutionOutcome) -> &'static str {
    match outcome {
        ResolutionOutcome::Resolved => "RESOLVED",
        ResolutionOutcome::FalseAlarm => "FALSE_ALARM",
    }
}

fn parse_outcome(value: &str) -> Result<ResolutionOutcome, StoreError> {
    match value {
        "RESOLVED" => Ok(ResolutionOutcome::Resolved),
        "FALSE_ALARM" => Ok(ResolutionOutcome::FalseAlarm),
        other => Err(StoreError::Serialization(format!(
            "Unknown resolution outcome '{}'",
            other
        ))),
    }
}

impl TryFrom<EmergencyAlertEntity> for EmergencyAlert {
    type Error = StoreError;

    fn try_from(entity: EmergencyAlertEntity) -> Result<Self, Self::Error> {
        let location = match (entity.latitude, entity.longitude) {
            (Some(lat), Some(lon)) => Some(Coordinate::new(lat, lon)),
            _ => None,
        };
        let escalation_level = u32::try_from(entity.escalation_level).map_err(|_| {
            StoreError::Serialization(format!(
                "Invalid escalation level {}",
                entity.escalation_level
            ))
        })?;
        let dispatches: Vec<NotificationDispatch> = serde_json::from_value(entity.dispatches)?;

        Ok(Self {
            id: entity.id,
            category: entity.category.parse().map_err(StoreError::Serialization)?,
            priority: entity.priority.parse().map_err(StoreError::Serialization)?,
            tracked_person_id: entity.tracked_person_id,
            tracked_person_name: entity.tracked_person_name,
            location,
            description: entity.description,
            created_at: entity.created_at,
            status: entity.status.parse().map_err(StoreError::Serialization)?,
            escalation_level,
            acknowledged_by: entity.acknowledged_by,
            acknowledged_at: entity.acknowledged_at,
            resolved_by: entity.resolved_by,
            resolved_at: entity.resolved_at,
            outcome: entity.outcome.as_deref().map(parse_outcome).transpose()?,
            dispatches,
            updated_at: entity.updated_at,
        })
    }
}
