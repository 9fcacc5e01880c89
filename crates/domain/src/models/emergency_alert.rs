//! Emergency alert domain model and its state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;
use validator::Validate;

use super::escalation_policy::DeliveryChannel;
use super::identity::Role;
use super::location::Coordinate;
use crate::error::CoreError;

/// What triggered the alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertCategory {
    Panic,
    Medical,
    Security,
    Fire,
    General,
}

impl AlertCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertCategory::Panic => "PANIC",
            AlertCategory::Medical => "MEDICAL",
            AlertCategory::Security => "SECURITY",
            AlertCategory::Fire => "FIRE",
            AlertCategory::General => "GENERAL",
        }
    }

    /// PANIC and MEDICAL are life-threatening by default.
    pub fn priority(&self) -> AlertPriority {
        match self {
            AlertCategory::Panic | AlertCategory::Medical => AlertPriority::Critical,
            _ => AlertPriority::High,
        }
    }
}

impl fmt::Display for AlertCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PANIC" => Ok(AlertCategory::Panic),
            "MEDICAL" => Ok(AlertCategory::Medical),
            "SECURITY" => Ok(AlertCategory::Security),
            "FIRE" => Ok(AlertCategory::Fire),
            "GENERAL" => Ok(AlertCategory::General),
            other => Err(format!("Unknown alert category: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertPriority {
    High,
    Critical,
}

impl AlertPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertPriority::High => "HIGH",
            AlertPriority::Critical => "CRITICAL",
        }
    }
}

impl FromStr for AlertPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "HIGH" => Ok(AlertPriority::High),
            "CRITICAL" => Ok(AlertPriority::Critical),
            other => Err(format!("Unknown alert priority: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertStatus {
    Active,
    Acknowledged,
    Resolved,
    FalseAlarm,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::Active => "ACTIVE",
            AlertStatus::Acknowledged => "ACKNOWLEDGED",
            AlertStatus::Resolved => "RESOLVED",
            AlertStatus::FalseAlarm => "FALSE_ALARM",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AlertStatus::Resolved | AlertStatus::FalseAlarm)
    }
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(AlertStatus::Active),
            "ACKNOWLEDGED" => Ok(AlertStatus::Acknowledged),
            "RESOLVED" => Ok(AlertStatus::Resolved),
            "FALSE_ALARM" => Ok(AlertStatus::FalseAlarm),
            other => Err(format!("Unknown alert status: {}", other)),
        }
    }
}

/// How a resolved alert ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResolutionOutcome {
    Resolved,
    FalseAlarm,
}

impl From<ResolutionOutcome> for AlertStatus {
    fn from(outcome: ResolutionOutcome) -> Self {
        match outcome {
            ResolutionOutcome::Resolved => AlertStatus::Resolved,
            ResolutionOutcome::FalseAlarm => AlertStatus::FalseAlarm,
        }
    }
}

/// One delivery of an alert at some escalation level over one channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationDispatch {
    pub level: u32,
    pub channel: DeliveryChannel,
    pub audience: Vec<Role>,
    /// Live deliveries (in-app) or accepted external sends.
    pub delivered: usize,
    /// Recipients that were offline and got a queued copy.
    pub queued: usize,
    pub dispatched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmergencyAlert {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub category: AlertCategory,
    pub priority: AlertPriority,
    pub tracked_person_id: Uuid,
    pub tracked_person_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<Coordinate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub status: AlertStatus,
    pub escalation_level: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acknowledged_by: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acknowledged_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_by: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<ResolutionOutcome>,
    #[serde(default)]
    pub dispatches: Vec<NotificationDispatch>,
    pub updated_at: DateTime<Utc>,
}

impl EmergencyAlert {
    /// A fresh ACTIVE alert at escalation level 1.
    pub fn new(
        category: AlertCategory,
        tracked_person_id: Uuid,
        tracked_person_name: impl Into<String>,
        location: Option<Coordinate>,
        description: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            category,
            priority: category.priority(),
            tracked_person_id,
            tracked_person_name: tracked_person_name.into(),
            location,
            description,
            created_at: now,
            status: AlertStatus::Active,
            escalation_level: 1,
            acknowledged_by: None,
            acknowledged_at: None,
            resolved_by: None,
            resolved_at: None,
            outcome: None,
            dispatches: Vec::new(),
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == AlertStatus::Active
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// ACTIVE → ACKNOWLEDGED.
    pub fn acknowledge(&mut self, by: Uuid, at: DateTime<Utc>) -> Result<(), CoreError> {
        if self.status != AlertStatus::Active {
            return Err(CoreError::StateConflict(format!(
                "Alert {} is {} and cannot be acknowledged",
                self.id, self.status
            )));
        }
        self.status = AlertStatus::Acknowledged;
        self.acknowledged_by = Some(by);
        self.acknowledged_at = Some(at);
        self.updated_at = at;
        Ok(())
    }

    /// Any non-terminal state → RESOLVED or FALSE_ALARM.
    pub fn resolve(
        &mut self,
        by: Uuid,
        outcome: ResolutionOutcome,
        at: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        if self.is_terminal() {
            return Err(CoreError::StateConflict(format!(
                "Alert {} is already {}",
                self.id, self.status
            )));
        }
        self.status = outcome.into();
        self.resolved_by = Some(by);
        self.resolved_at = Some(at);
        self.outcome = Some(outcome);
        self.updated_at = at;
        Ok(())
    }

    /// Raises the escalation level. Only an ACTIVE alert moves forward.
    pub fn advance_to(&mut self, level: u32, at: DateTime<Utc>) -> bool {
        if !self.is_active() || level <= self.escalation_level {
            return false;
        }
        self.escalation_level = level;
        self.updated_at = at;
        true
    }

    pub fn record_dispatch(&mut self, dispatch: NotificationDispatch) {
        self.updated_at = self.updated_at.max(dispatch.dispatched_at);
        self.dispatches.push(dispatch);
    }

    pub fn has_dispatched(&self, level: u32) -> bool {
        self.dispatches.iter().any(|d| d.level == level)
    }

    /// Every role reached by any dispatch so far.
    pub fn notified_roles(&self) -> Vec<Role> {
        let mut roles: Vec<Role> = Vec::new();
        for role in self.dispatches.iter().flat_map(|d| d.audience.iter()) {
            if !roles.contains(role) {
                roles.push(*role);
            }
        }
        roles
    }
}

/// Request payload for raising an alert over HTTP.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateAlertRequest {
    #[serde(rename = "type")]
    pub category: AlertCategory,

    /// Defaults to the caller's own tracked person.
    pub tracked_person_id: Option<Uuid>,

    #[validate(nested)]
    pub location: Option<Coordinate>,

    #[validate(length(max = 2000, message = "Description must be at most 2000 characters"))]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveAlertRequest {
    #[serde(default = "default_outcome")]
    pub outcome: ResolutionOutcome,
}

fn default_outcome() -> ResolutionOutcome {
    ResolutionOutcome::Resolved
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveAlertsResponse {
    pub alerts: Vec<EmergencyAlert>,
    pub count: usize,
}
