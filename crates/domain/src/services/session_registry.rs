//! Live connections, their owners and their group memberships.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

use crate::error::CoreError;
use crate::models::{ConnectionId, GroupKey, Identity, OutboundEvent, Presence, PresenceChange};

/// Outbound half of a connection as seen by the core.
pub type OutboundSender = mpsc::Sender<OutboundEvent>;

struct Session {
    identity: Identity,
    /// Derived groups plus joined rooms.
    groups: HashSet<GroupKey>,
    connected_at: DateTime<Utc>,
    sender: OutboundSender,
}

#[derive(Default)]
struct RegistryState {
    sessions: HashMap<ConnectionId, Session>,
    by_identity: HashMap<Uuid, HashSet<ConnectionId>>,
    by_group: HashMap<GroupKey, HashSet<ConnectionId>>,
}

impl RegistryState {
    fn index_group(&mut self, group: GroupKey, connection_id: ConnectionId) {
        self.by_group.entry(group).or_default().insert(connection_id);
    }

    fn unindex_group(&mut self, group: &GroupKey, connection_id: &ConnectionId) {
        if let Some(members) = self.by_group.get_mut(group) {
            members.remove(connection_id);
            if members.is_empty() {
                self.by_group.remove(group);
            }
        }
    }

    fn remove(&mut self, connection_id: &ConnectionId) -> Option<(Session, Presence)> {
        let session = self.sessions.remove(connection_id)?;
        for group in &session.groups {
            self.unindex_group(group, connection_id);
        }

        let identity_id = session.identity.id;
        let presence = match self.by_identity.get_mut(&identity_id) {
            Some(connections) => {
                connections.remove(connection_id);
                if connections.is_empty() {
                    self.by_identity.remove(&identity_id);
                    Presence::WentOffline
                } else {
                    Presence::StillOnline
                }
            }
            None => Presence::WentOffline,
        };
        Some((session, presence))
    }
}

/// Snapshot of one live connection.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub connection_id: ConnectionId,
    pub identity: Identity,
    pub groups: HashSet<GroupKey>,
    pub connected_at: DateTime<Utc>,
}

/// Registry of live sessions.
///
/// Every index sits behind one lock so a reader never sees a connection in
/// `by_group` that is missing from `sessions`. The lock is never held across `.await`.
pub struct SessionRegistry {
    state: RwLock<RegistryState>,
    presence_tx: broadcast::Sender<PresenceChange>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        let (presence_tx, _) = broadcast::channel(256);
        Self {
            state: RwLock::new(RegistryState::default()),
            presence_tx,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, identity: Identity, presence: Presence) {
        if matches!(presence, Presence::CameOnline | Presence::WentOffline) {
            let _ = self.presence_tx.send(PresenceChange {
                identity,
                presence,
                at: Utc::now(),
            });
        }
    }

    /// Registers a connection with groups derived from its identity.
    ///
    /// Re-registering an existing connection id replaces the previous session.
    pub fn register(
        &self,
        connection_id: ConnectionId,
        identity: Identity,
        sender: OutboundSender,
    ) -> Presence {
        let groups = identity.group_keys();
        let identity_id = identity.id;

        let presence = {
            let mut state = self.write();
            state.remove(&connection_id);

            for group in &groups {
                state.index_group(group.clone(), connection_id);
            }
            let connections = state.by_identity.entry(identity_id).or_default();
            let presence = if connections.is_empty() {
                Presence::CameOnline
            } else {
                Presence::AlreadyOnline
            };
            connections.insert(connection_id);
            state.sessions.insert(
                connection_id,
                Session {
                    identity: identity.clone(),
                    groups,
                    connected_at: Utc::now(),
                    sender,
                },
            );
            presence
        };

        tracing::debug!(
            connection_id = %connection_id,
            identity_id = %identity_id,
            presence = ?presence,
            "Session registered"
        );
        self.publish(identity, presence);
        presence
    }

    /// Removes a connection. Unknown ids are a no-op and return `None`.
    pub fn unregister(&self, connection_id: &ConnectionId) -> Option<Presence> {
        let (session, presence) = self.write().remove(connection_id)?;
        tracing::debug!(
            connection_id = %connection_id,
            identity_id = %session.identity.id,
            presence = ?presence,
            "Session unregistered"
        );
        self.publish(session.identity, presence);
        Some(presence)
    }

    pub fn is_online(&self, identity_id: Uuid) -> bool {
        self.read().by_identity.contains_key(&identity_id)
    }

    /// Union of the groups (rooms included) held by the identity's live connections.
    pub fn groups_of(&self, identity_id: Uuid) -> HashSet<GroupKey> {
        let state = self.read();
        state
            .by_identity
            .get(&identity_id)
            .into_iter()
            .flatten()
            .filter_map(|c| state.sessions.get(c))
            .flat_map(|s| s.groups.iter().cloned())
            .collect()
    }

    pub fn connections_for(&self, identity_id: Uuid) -> Vec<ConnectionId> {
        self.read()
            .by_identity
            .get(&identity_id)
            .map(|c| c.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Online identities holding the group on at least one connection.
    pub fn members_of(&self, group: &GroupKey) -> HashSet<Uuid> {
        let state = self.read();
        state
            .by_group
            .get(group)
            .into_iter()
            .flatten()
            .filter_map(|c| state.sessions.get(c))
            .map(|s| s.identity.id)
            .collect()
    }

    pub fn senders_for(&self, identity_id: Uuid) -> Vec<(ConnectionId, OutboundSender)> {
        let state = self.read();
        state
            .by_identity
            .get(&identity_id)
            .into_iter()
            .flatten()
            .filter_map(|c| state.sessions.get(c).map(|s| (*c, s.sender.clone())))
            .collect()
    }

    pub fn session(&self, connection_id: &ConnectionId) -> Option<SessionInfo> {
        self.read().sessions.get(connection_id).map(|s| SessionInfo {
            connection_id: *connection_id,
            identity: s.identity.clone(),
            groups: s.groups.clone(),
            connected_at: s.connected_at,
        })
    }

    /// Subscribes a connection to a room. Returns `false` if already joined.
    pub fn join_room(&self, connection_id: &ConnectionId, room: GroupKey) -> Result<bool, CoreError> {
        if !room.is_room() {
            return Err(CoreError::Forbidden(format!(
                "Group '{}' cannot be joined",
                room
            )));
        }
        let mut state = self.write();
        let session = state
            .sessions
            .get_mut(connection_id)
            .ok_or_else(|| CoreError::NotFound(format!("Connection {}", connection_id)))?;
        if !session.groups.insert(room.clone()) {
            return Ok(false);
        }
        state.index_group(room, *connection_id);
        Ok(true)
    }

    /// Unsubscribes a connection from a room. Returns `false` if it was not joined.
    pub fn leave_room(&self, connection_id: &ConnectionId, room: &GroupKey) -> Result<bool, CoreError> {
        if !room.is_room() {
            return Err(CoreError::Forbidden(format!(
                "Group '{}' cannot be left",
                room
            )));
        }
        let mut state = self.write();
        let session = state
            .sessions
            .get_mut(connection_id)
            .ok_or_else(|| CoreError::NotFound(format!("Connection {}", connection_id)))?;
        if !session.groups.remove(room) {
            return Ok(false);
        }
        state.unindex_group(room, connection_id);
        Ok(true)
    }

    pub fn online_count(&self) -> usize {
        self.read().by_identity.len()
    }

    pub fn connection_count(&self) -> usize {
        self.read().sessions.len()
    }

    pub fn subscribe_presence(&self) -> broadcast::Receiver<PresenceChange> {
        self.presence_tx.subscribe()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;
    use std::sync::Arc;

    fn channel() -> OutboundSender {
        mpsc::channel(8).0
    }

    fn supervisor() -> Identity {
        Identity::new(Uuid::new_v4(), Role::Supervisor).with_tenant(Uuid::new_v4())
    }

    #[test]
    fn test_register_derives_groups() {
        let registry = SessionRegistry::new();
        let identity = supervisor();
        let conn = ConnectionId::new();

        assert_eq!(
            registry.register(conn, identity.clone(), channel()),
            Presence::CameOnline
        );
        assert!(registry.is_online(identity.id));
        assert!(registry
            .members_of(&GroupKey::Role(Role::Supervisor))
            .contains(&identity.id));
        assert!(registry
            .members_of(&GroupKey::Tenant(identity.tenant_id.unwrap()))
            .contains(&identity.id));
        assert_eq!(registry.groups_of(identity.id), identity.group_keys());
    }

    #[test]
    fn test_presence_transitions_across_connections() {
        let registry = SessionRegistry::new();
        let identity = supervisor();
        let first = ConnectionId::new();
        let second = ConnectionId::new();

        assert_eq!(
            registry.register(first, identity.clone(), channel()),
            Presence::CameOnline
        );
        assert_eq!(
            registry.register(second, identity.clone(), channel()),
            Presence::AlreadyOnline
        );
        assert_eq!(registry.connections_for(identity.id).len(), 2);
        assert_eq!(registry.online_count(), 1);
        assert_eq!(registry.connection_count(), 2);

        assert_eq!(registry.unregister(&first), Some(Presence::StillOnline));
        assert!(registry.is_online(identity.id));
        assert_eq!(registry.unregister(&second), Some(Presence::WentOffline));
        assert!(!registry.is_online(identity.id));
        assert!(registry
            .members_of(&GroupKey::Role(Role::Supervisor))
            .is_empty());
    }

    #[test]
    fn test_unregister_is_idempotent() {
        let registry = SessionRegistry::new();
        let conn = ConnectionId::new();
        assert_eq!(registry.unregister(&conn), None);

        registry.register(conn, supervisor(), channel());
        assert!(registry.unregister(&conn).is_some());
        assert_eq!(registry.unregister(&conn), None);
        assert_eq!(registry.connection_count(), 0);
    }

    #[test]
    fn test_rooms_join_and_leave() {
        let registry = SessionRegistry::new();
        let identity = supervisor();
        let conn = ConnectionId::new();
        registry.register(conn, identity.clone(), channel());

        let room = GroupKey::room("site-1").unwrap();
        assert!(registry.join_room(&conn, room.clone()).unwrap());
        assert!(!registry.join_room(&conn, room.clone()).unwrap());
        assert!(registry.members_of(&room).contains(&identity.id));

        assert!(registry.leave_room(&conn, &room).unwrap());
        assert!(!registry.leave_room(&conn, &room).unwrap());
        assert!(registry.members_of(&room).is_empty());
    }

    #[test]
    fn test_cannot_join_privileged_group() {
        let registry = SessionRegistry::new();
        let conn = ConnectionId::new();
        registry.register(
            conn,
            Identity::new(Uuid::new_v4(), Role::Agent),
            channel(),
        );
        let result = registry.join_room(&conn, GroupKey::Role(Role::Admin));
        assert!(matches!(result, Err(CoreError::Forbidden(_))));
        assert!(registry
            .members_of(&GroupKey::Role(Role::Admin))
            .is_empty());
    }

    #[test]
    fn test_join_room_unknown_connection() {
        let registry = SessionRegistry::new();
        let room = GroupKey::room("lobby").unwrap();
        assert!(matches!(
            registry.join_room(&ConnectionId::new(), room),
            Err(CoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_presence_changes_are_published() {
        let registry = SessionRegistry::new();
        let mut rx = registry.subscribe_presence();
        let identity = supervisor();
        let conn = ConnectionId::new();

        registry.register(conn, identity.clone(), channel());
        registry.unregister(&conn);

        let first = rx.recv().await.unwrap();
        assert_eq!(first.identity.id, identity.id);
        assert_eq!(first.presence, Presence::CameOnline);
        assert_eq!(rx.recv().await.unwrap().presence, Presence::WentOffline);
    }

    #[test]
    fn test_concurrent_register_unregister_leaves_consistent_state() {
        let registry = Arc::new(SessionRegistry::new());
        let identity = supervisor();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let identity = identity.clone();
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        let conn = ConnectionId::new();
                        registry.register(conn, identity.clone(), mpsc::channel(1).0);
                        registry.unregister(&conn);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(registry.connection_count(), 0);
        assert!(!registry.is_online(identity.id));
        assert!(registry
            .members_of(&GroupKey::Role(Role::Supervisor))
            .is_empty());
    }
}
