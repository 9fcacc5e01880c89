//! Realtime wire protocol.
//!
//! Every frame is a JSON object `{"event": <name>, "data": {...}}`. Inbound and
//! outbound frames are closed enums so dispatch is an exhaustive `match`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::emergency_alert::{AlertCategory, AlertStatus, EmergencyAlert, ResolutionOutcome};
use super::geofence_violation::GeofenceViolation;
use super::location::{Coordinate, LocationSample};

/// Frames sent by clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum InboundEvent {
    LocationUpdate(LocationUpdatePayload),
    EmergencyAlert(RaiseAlertPayload),
    JoinRoom(RoomPayload),
    LeaveRoom(RoomPayload),
    StatusUpdate(StatusUpdatePayload),
    Ping,
}

impl InboundEvent {
    pub fn name(&self) -> &'static str {
        match self {
            InboundEvent::LocationUpdate(_) => "location_update",
            InboundEvent::EmergencyAlert(_) => "emergency_alert",
            InboundEvent::JoinRoom(_) => "join_room",
            InboundEvent::LeaveRoom(_) => "leave_room",
            InboundEvent::StatusUpdate(_) => "status_update",
            InboundEvent::Ping => "ping",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationUpdatePayload {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub battery_level: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
    /// Capture time; receipt time when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl LocationUpdatePayload {
    pub fn into_sample(self, tracked_person_id: Uuid, now: DateTime<Utc>) -> LocationSample {
        LocationSample {
            tracked_person_id,
            latitude: self.latitude,
            longitude: self.longitude,
            accuracy: self.accuracy,
            captured_at: self.timestamp.unwrap_or(now),
            battery_level: self.battery_level,
            speed: self.speed,
            heading: self.heading,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RaiseAlertPayload {
    #[serde(rename = "type")]
    pub category: AlertCategory,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Coordinate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomPayload {
    pub room_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdatePayload {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Frames sent to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum OutboundEvent {
    LocationUpdate(LocationSample),
    GeofenceViolation(GeofenceViolation),
    EmergencyAlert(EmergencyAlert),
    AlertAcknowledged(AlertStatusChange),
    AlertResolved(AlertStatusChange),
    UserStatusChange(UserStatusChange),
    LocationUpdateReceived(LocationReceipt),
    EmergencyAlertSent(AlertReceipt),
    RoomJoined(RoomPayload),
    RoomLeft(RoomPayload),
    Pong,
    Error(ErrorPayload),
}

impl OutboundEvent {
    pub fn name(&self) -> &'static str {
        match self {
            OutboundEvent::LocationUpdate(_) => "location_update",
            OutboundEvent::GeofenceViolation(_) => "geofence_violation",
            OutboundEvent::EmergencyAlert(_) => "emergency_alert",
            OutboundEvent::AlertAcknowledged(_) => "alert_acknowledged",
            OutboundEvent::AlertResolved(_) => "alert_resolved",
            OutboundEvent::UserStatusChange(_) => "user_status_change",
            OutboundEvent::LocationUpdateReceived(_) => "location_update_received",
            OutboundEvent::EmergencyAlertSent(_) => "emergency_alert_sent",
            OutboundEvent::RoomJoined(_) => "room_joined",
            OutboundEvent::RoomLeft(_) => "room_left",
            OutboundEvent::Pong => "pong",
            OutboundEvent::Error(_) => "error",
        }
    }

    /// Alert and violation events must survive a dropped connection; the rest
    /// are only meaningful live.
    pub fn is_durable(&self) -> bool {
        matches!(
            self,
            OutboundEvent::GeofenceViolation(_)
                | OutboundEvent::EmergencyAlert(_)
                | OutboundEvent::AlertAcknowledged(_)
                | OutboundEvent::AlertResolved(_)
        )
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        OutboundEvent::Error(ErrorPayload {
            code: code.into(),
            message: message.into(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertStatusChange {
    pub alert_id: Uuid,
    pub tracked_person_id: Uuid,
    pub status: AlertStatus,
    pub by: Uuid,
    pub at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<ResolutionOutcome>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStatusChange {
    pub identity_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationReceipt {
    pub violations: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertReceipt {
    pub alert_id: Uuid,
    pub escalation_level: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
}
