//! Boundaries between the core and its infrastructure.
//!
//! The durable store, the cache, the cross-instance broker and the external
//! notification providers are reached only through these traits. Adapters live
//! in `services::memory` (in-process) and in the `persistence` crate (PostgreSQL).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::pagination::HistoryCursor;
use std::time::Duration;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{
    AlertCategory, AlertPriority, DeliveryChannel, EmergencyAlert, GeofenceViolation, GroupKey,
    LocationRecord, LocationSample, OutboundEvent, Perimeter, Role, TrackedPerson,
};

/// Filter for one page of location history.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryQuery {
    pub tracked_person_id: Uuid,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: i64,
    /// Return only samples strictly after this position.
    pub after: Option<HistoryCursor>,
}

/// Location history, tracked persons and their perimeters.
#[async_trait]
pub trait TrackingStore: Send + Sync {
    async fn tracked_person(&self, id: Uuid) -> Result<Option<TrackedPerson>, StoreError>;

    async fn append_location(
        &self,
        sample: &LocationSample,
        received_at: DateTime<Utc>,
    ) -> Result<LocationRecord, StoreError>;

    async fn latest_location(
        &self,
        tracked_person_id: Uuid,
    ) -> Result<Option<LocationRecord>, StoreError>;

    /// Samples ordered by `(captured_at, id)` ascending, at most `limit`.
    async fn location_history(&self, query: &HistoryQuery)
        -> Result<Vec<LocationRecord>, StoreError>;

    /// Perimeter of the assignment whose window contains `at`.
    async fn active_perimeter(
        &self,
        tracked_person_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<Perimeter>, StoreError>;

    async fn perimeter(&self, id: Uuid) -> Result<Option<Perimeter>, StoreError>;

    async fn record_violation(&self, violation: &GeofenceViolation) -> Result<(), StoreError>;

    /// Deletes samples captured before `cutoff`; returns how many went.
    async fn prune_locations(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;
}

/// Durable copy of emergency alerts.
#[async_trait]
pub trait AlertStore: Send + Sync {
    /// Inserts a new alert. Inserting an id that already exists is a no-op.
    async fn insert_alert(&self, alert: &EmergencyAlert) -> Result<(), StoreError>;

    async fn update_alert(&self, alert: &EmergencyAlert) -> Result<(), StoreError>;

    async fn find_alert(&self, id: Uuid) -> Result<Option<EmergencyAlert>, StoreError>;

    /// Every ACTIVE or ACKNOWLEDGED alert, oldest first.
    async fn open_alerts(&self) -> Result<Vec<EmergencyAlert>, StoreError>;

    /// Every ACTIVE alert, oldest first.
    async fn active_alerts(&self) -> Result<Vec<EmergencyAlert>, StoreError>;
}

/// Who belongs to a group, whether connected or not.
#[async_trait]
pub trait Directory: Send + Sync {
    async fn members_of(&self, group: &GroupKey) -> Result<Vec<Uuid>, StoreError>;
}

/// Performance-only key/value mirror with expiry.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError>;

    async fn set(&self, key: &str, value: serde_json::Value, ttl: Duration)
        -> Result<(), StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// Cache key layout.
pub mod cache_keys {
    use uuid::Uuid;

    pub const ACTIVE_ALERTS: &str = "alerts:active";

    pub fn position(tracked_person_id: Uuid) -> String {
        format!("position:{}", tracked_person_id)
    }

    pub fn alert(alert_id: Uuid) -> String {
        format!("alert:{}", alert_id)
    }

    pub fn escalation(alert_id: Uuid, level: u32) -> String {
        format!("escalation:{}:{}", alert_id, level)
    }
}

/// Who an event is addressed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Audience {
    Groups(Vec<GroupKey>),
    Identity(Uuid),
}

impl Audience {
    /// Group audience with duplicates removed.
    pub fn groups(groups: impl IntoIterator<Item = GroupKey>) -> Self {
        let mut keys: Vec<GroupKey> = Vec::new();
        for key in groups {
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
        Audience::Groups(keys)
    }

    pub fn roles(roles: &[Role]) -> Self {
        Self::groups(roles.iter().copied().map(GroupKey::Role))
    }
}

/// A notification republished for other instances of the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub origin_instance: Uuid,
    pub audience: Audience,
    pub event: OutboundEvent,
}

/// Cross-instance pub/sub.
#[async_trait]
pub trait MessageBroker: Send + Sync {
    async fn publish(&self, envelope: Envelope) -> Result<(), StoreError>;

    fn subscribe(&self) -> broadcast::Receiver<Envelope>;
}

/// Payload handed to a push/SMS/email provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalNotification {
    pub alert_id: Uuid,
    pub level: u32,
    pub channel: DeliveryChannel,
    pub category: AlertCategory,
    pub priority: AlertPriority,
    pub roles: Vec<Role>,
    pub recipients: Vec<Uuid>,
    pub tracked_person_name: String,
    pub message: String,
}

/// Result of an external send attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExternalDelivery {
    /// Provider accepted the notification.
    Sent,
    /// Nothing to send (no recipients, channel disabled).
    Skipped,
    /// Provider rejected or was unreachable.
    Failed(String),
}

#[async_trait]
pub trait ExternalNotifier: Send + Sync {
    async fn send(&self, notification: &ExternalNotification) -> ExternalDelivery;
}

/// Wall-clock source.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
