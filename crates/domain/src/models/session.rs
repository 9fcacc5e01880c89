//! Realtime session identifiers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::identity::Identity;

/// Identifies one live transport connection. An identity may own several.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Connection-level presence transition of an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Presence {
    /// First live connection of the identity.
    CameOnline,
    /// Another connection of an identity that was already online.
    AlreadyOnline,
    /// Last live connection closed.
    WentOffline,
    /// A connection closed but the identity still has others.
    StillOnline,
}

/// Presence change published to in-process subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceChange {
    pub identity: Identity,
    pub presence: Presence,
    pub at: DateTime<Utc>,
}
