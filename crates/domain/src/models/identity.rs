//! Identities, roles and fan-out group keys.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::CoreError;

/// Role carried by an authenticated identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Agent,
    Supervisor,
    Admin,
    EmergencyContact,
    Client,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Agent => "agent",
            Role::Supervisor => "supervisor",
            Role::Admin => "admin",
            Role::EmergencyContact => "emergency_contact",
            Role::Client => "client",
        }
    }

    /// Parses a role name (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "agent" | "guard" => Some(Role::Agent),
            "supervisor" => Some(Role::Supervisor),
            "admin" => Some(Role::Admin),
            "emergency_contact" => Some(Role::EmergencyContact),
            "client" => Some(Role::Client),
            _ => None,
        }
    }

    /// Supervisors and admins may acknowledge and resolve alerts.
    pub fn manages_alerts(&self) -> bool {
        matches!(self, Role::Supervisor | Role::Admin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An already-authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub id: Uuid,
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tracked_person_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl Identity {
    pub fn new(id: Uuid, role: Role) -> Self {
        Self {
            id,
            role,
            tenant_id: None,
            tracked_person_id: None,
            display_name: None,
        }
    }

    pub fn with_tenant(mut self, tenant_id: Uuid) -> Self {
        self.tenant_id = Some(tenant_id);
        self
    }

    pub fn with_tracked_person(mut self, tracked_person_id: Uuid) -> Self {
        self.tracked_person_id = Some(tracked_person_id);
        self
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Group memberships derived from the identity. Nothing else can add to them.
    pub fn group_keys(&self) -> HashSet<GroupKey> {
        let mut groups = HashSet::with_capacity(4);
        groups.insert(GroupKey::Role(self.role));
        groups.insert(GroupKey::Identity(self.id));
        if let Some(tenant_id) = self.tenant_id {
            groups.insert(GroupKey::Tenant(tenant_id));
        }
        if let Some(tracked_person_id) = self.tracked_person_id {
            groups.insert(GroupKey::TrackedPerson(tracked_person_id));
        }
        groups
    }

    /// Returns the tracked person this identity reports for, or a validation error.
    pub fn require_tracked_person(&self) -> Result<Uuid, CoreError> {
        self.tracked_person_id.ok_or_else(|| {
            CoreError::Validation("Identity is not linked to a tracked person".to_string())
        })
    }
}

/// A tracked person (field agent/guard) as known to the external directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedPerson {
    pub id: Uuid,
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<Uuid>,
}

lazy_static::lazy_static! {
    static ref ROOM_NAME_REGEX: regex::Regex =
        regex::Regex::new(r"^[A-Za-z0-9_.:-]{1,64}$").unwrap();
}

const PRIVILEGED_PREFIXES: [&str; 4] = ["role:", "identity:", "tenant:", "trackedPerson:"];

/// Fan-out audience key.
///
/// Rendered as `role:supervisor`, `identity:<uuid>`, `tenant:<uuid>`,
/// `trackedPerson:<uuid>` or `room:<name>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GroupKey {
    Role(Role),
    Identity(Uuid),
    Tenant(Uuid),
    TrackedPerson(Uuid),
    Room(String),
}

impl GroupKey {
    /// Builds a room key from a client-supplied room id.
    ///
    /// Rooms are voluntary subscriptions and must not impersonate a derived group.
    pub fn room(room_id: &str) -> Result<Self, CoreError> {
        if PRIVILEGED_PREFIXES
            .iter()
            .any(|prefix| room_id.starts_with(prefix))
        {
            return Err(CoreError::Forbidden(format!(
                "Room id '{}' uses a reserved namespace",
                room_id
            )));
        }
        if !ROOM_NAME_REGEX.is_match(room_id) {
            return Err(CoreError::Validation(
                "Room id must be 1-64 characters of letters, digits, '_', '.', ':' or '-'"
                    .to_string(),
            ));
        }
        Ok(GroupKey::Room(room_id.to_string()))
    }

    pub fn is_room(&self) -> bool {
        matches!(self, GroupKey::Room(_))
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupKey::Role(role) => write!(f, "role:{}", role),
            GroupKey::Identity(id) => write!(f, "identity:{}", id),
            GroupKey::Tenant(id) => write!(f, "tenant:{}", id),
            GroupKey::TrackedPerson(id) => write!(f, "trackedPerson:{}", id),
            GroupKey::Room(name) => write!(f, "room:{}", name),
        }
    }
}

impl FromStr for GroupKey {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CoreError::Validation(format!("Invalid group key '{}'", s));
        let (namespace, value) = s.split_once(':').ok_or_else(invalid)?;
        let uuid = |v: &str| Uuid::parse_str(v).map_err(|_| invalid());

        match namespace {
            "role" => Role::parse(value).map(GroupKey::Role).ok_or_else(invalid),
            "identity" => uuid(value).map(GroupKey::Identity),
            "tenant" => uuid(value).map(GroupKey::Tenant),
            "trackedPerson" => uuid(value).map(GroupKey::TrackedPerson),
            "room" => GroupKey::room(value),
            _ => Err(invalid()),
        }
    }
}

impl Serialize for GroupKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for GroupKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parse_and_display() {
        assert_eq!(Role::parse("Supervisor"), Some(Role::Supervisor));
        assert_eq!(Role::parse("guard"), Some(Role::Agent));
        assert_eq!(Role::parse("emergency_contact"), Some(Role::EmergencyContact));
        assert_eq!(Role::parse("root"), None);
        assert_eq!(Role::EmergencyContact.to_string(), "emergency_contact");
    }

    #[test]
    fn test_group_keys_minimal_identity() {
        let id = Uuid::new_v4();
        let groups = Identity::new(id, Role::Supervisor).group_keys();
        assert_eq!(groups.len(), 2);
        assert!(groups.contains(&GroupKey::Role(Role::Supervisor)));
        assert!(groups.contains(&GroupKey::Identity(id)));
    }

    #[test]
    fn test_group_keys_full_identity() {
        let tenant = Uuid::new_v4();
        let person = Uuid::new_v4();
        let groups = Identity::new(Uuid::new_v4(), Role::Agent)
            .with_tenant(tenant)
            .with_tracked_person(person)
            .group_keys();
        assert_eq!(groups.len(), 4);
        assert!(groups.contains(&GroupKey::Tenant(tenant)));
        assert!(groups.contains(&GroupKey::TrackedPerson(person)));
    }

    #[test]
    fn test_group_key_string_forms() {
        let id = Uuid::nil();
        assert_eq!(GroupKey::Role(Role::Admin).to_string(), "role:admin");
        assert_eq!(
            GroupKey::TrackedPerson(id).to_string(),
            format!("trackedPerson:{}", id)
        );

        let parsed: GroupKey = format!("tenant:{}", id).parse().unwrap();
        assert_eq!(parsed, GroupKey::Tenant(id));
        let parsed: GroupKey = "role:supervisor".parse().unwrap();
        assert_eq!(parsed, GroupKey::Role(Role::Supervisor));
        assert!("role:overlord".parse::<GroupKey>().is_err());
        assert!("nonsense".parse::<GroupKey>().is_err());
    }

    #[test]
    fn test_room_rejects_privileged_namespace() {
        assert!(matches!(
            GroupKey::room("role:admin"),
            Err(CoreError::Forbidden(_))
        ));
        assert!(matches!(
            GroupKey::room("trackedPerson:abc"),
            Err(CoreError::Forbidden(_))
        ));
    }

    #[test]
    fn test_room_validates_characters() {
        assert!(GroupKey::room("site-42").is_ok());
        assert!(GroupKey::room("incident:7f").is_ok());
        assert!(GroupKey::room("").is_err());
        assert!(GroupKey::room("has space").is_err());
        assert!(GroupKey::room(&"x".repeat(65)).is_err());
    }

    #[test]
    fn test_group_key_serde_as_string() {
        let key = GroupKey::Role(Role::EmergencyContact);
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, "\"role:emergency_contact\"");
        let back: GroupKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
    }

    #[test]
    fn test_require_tracked_person() {
        let identity = Identity::new(Uuid::new_v4(), Role::Supervisor);
        assert!(matches!(
            identity.require_tracked_person(),
            Err(CoreError::Validation(_))
        ));
        let person = Uuid::new_v4();
        let identity = identity.with_tracked_person(person);
        assert_eq!(identity.require_tracked_person().unwrap(), person);
    }
}
