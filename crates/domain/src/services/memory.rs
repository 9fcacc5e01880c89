//! In-process adapters for the infrastructure ports.
//!
//! Used by tests throughout the workspace, and at runtime for the cache and
//! broker when no external server is configured.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use uuid::Uuid;

use super::ports::{
    AlertStore, Cache, Clock, Directory, Envelope, ExternalDelivery, ExternalNotification,
    ExternalNotifier, HistoryQuery, MessageBroker, TrackingStore,
};
use crate::error::StoreError;
use crate::models::{
    Assignment, EmergencyAlert, GeofenceViolation, GroupKey, Identity, LocationRecord,
    LocationSample, Perimeter, TrackedPerson,
};

#[derive(Default)]
struct StoreState {
    persons: HashMap<Uuid, TrackedPerson>,
    personnel: HashMap<Uuid, Identity>,
    perimeters: HashMap<Uuid, Perimeter>,
    assignments: Vec<Assignment>,
    locations: Vec<LocationRecord>,
    next_location_id: i64,
    violations: Vec<GeofenceViolation>,
    alerts: HashMap<Uuid, EmergencyAlert>,
}

/// Durable-store stand-in implementing `TrackingStore`, `AlertStore` and `Directory`.
#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<StoreState>,
    fail_writes: AtomicBool,
    fail_next_writes: AtomicU32,
    fail_reads: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, StoreState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, StoreState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_write(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("store writes disabled".to_string()));
        }
        let pending = self
            .fail_next_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if pending.is_ok() {
            return Err(StoreError::Unavailable("injected write failure".to_string()));
        }
        Ok(())
    }

    fn check_read(&self) -> Result<(), StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("store reads disabled".to_string()))
        } else {
            Ok(())
        }
    }

    /// Makes every write fail with `Unavailable` until switched back.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Makes the next `count` writes fail with `Unavailable`.
    pub fn fail_next_writes(&self, count: u32) {
        self.fail_next_writes.store(count, Ordering::SeqCst);
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn add_tracked_person(&self, person: TrackedPerson) {
        self.write().persons.insert(person.id, person);
    }

    /// Registers a directory member (used for offline fan-out).
    pub fn add_personnel(&self, identity: Identity) {
        self.write().personnel.insert(identity.id, identity);
    }

    pub fn add_perimeter(&self, perimeter: Perimeter) {
        self.write().perimeters.insert(perimeter.id, perimeter);
    }

    pub fn add_assignment(&self, assignment: Assignment) {
        self.write().assignments.push(assignment);
    }

    pub fn locations(&self) -> Vec<LocationRecord> {
        self.read().locations.clone()
    }

    pub fn violations(&self) -> Vec<GeofenceViolation> {
        self.read().violations.clone()
    }

    pub fn stored_alert(&self, id: Uuid) -> Option<EmergencyAlert> {
        self.read().alerts.get(&id).cloned()
    }

    pub fn alert_count(&self) -> usize {
        self.read().alerts.len()
    }
}

#[async_trait]
impl TrackingStore for InMemoryStore {
    async fn tracked_person(&self, id: Uuid) -> Result<Option<TrackedPerson>, StoreError> {
        self.check_read()?;
        Ok(self.read().persons.get(&id).cloned())
    }

    async fn append_location(
        &self,
        sample: &LocationSample,
        received_at: DateTime<Utc>,
    ) -> Result<LocationRecord, StoreError> {
        self.check_write()?;
        let mut state = self.write();
        state.next_location_id += 1;
        let record = LocationRecord {
            id: state.next_location_id,
            sample: sample.clone(),
            received_at,
        };
        state.locations.push(record.clone());
        Ok(record)
    }

    async fn latest_location(
        &self,
        tracked_person_id: Uuid,
    ) -> Result<Option<LocationRecord>, StoreError> {
        self.check_read()?;
        Ok(self
            .read()
            .locations
            .iter()
            .filter(|r| r.sample.tracked_person_id == tracked_person_id)
            .max_by_key(|r| (r.sample.captured_at, r.id))
            .cloned())
    }

    async fn location_history(
        &self,
        query: &HistoryQuery,
    ) -> Result<Vec<LocationRecord>, StoreError> {
        self.check_read()?;
        let state = self.read();
        let mut records: Vec<LocationRecord> = state
            .locations
            .iter()
            .filter(|r| r.sample.tracked_person_id == query.tracked_person_id)
            .filter(|r| query.from.map_or(true, |from| r.sample.captured_at >= from))
            .filter(|r| query.to.map_or(true, |to| r.sample.captured_at <= to))
            .filter(|r| {
                query.after.map_or(true, |after| {
                    (r.sample.captured_at, r.id) > (after.captured_at, after.id)
                })
            })
            .cloned()
            .collect();
        records.sort_by_key(|r| (r.sample.captured_at, r.id));
        records.truncate(query.limit.max(0) as usize);
        Ok(records)
    }

    async fn active_perimeter(
        &self,
        tracked_person_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<Perimeter>, StoreError> {
        self.check_read()?;
        let state = self.read();
        Ok(state
            .assignments
            .iter()
            .filter(|a| a.tracked_person_id == tracked_person_id && a.is_active_at(at))
            .max_by_key(|a| a.starts_at)
            .and_then(|a| state.perimeters.get(&a.perimeter_id).cloned()))
    }

    async fn perimeter(&self, id: Uuid) -> Result<Option<Perimeter>, StoreError> {
        self.check_read()?;
        Ok(self.read().perimeters.get(&id).cloned())
    }

    async fn record_violation(&self, violation: &GeofenceViolation) -> Result<(), StoreError> {
        self.check_write()?;
        self.write().violations.push(violation.clone());
        Ok(())
    }

    async fn prune_locations(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        self.check_write()?;
        let mut state = self.write();
        let before = state.locations.len();
        state.locations.retain(|r| r.sample.captured_at >= cutoff);
        Ok((before - state.locations.len()) as u64)
    }
}

#[async_trait]
impl AlertStore for InMemoryStore {
    async fn insert_alert(&self, alert: &EmergencyAlert) -> Result<(), StoreError> {
        self.check_write()?;
        self.write()
            .alerts
            .entry(alert.id)
            .or_insert_with(|| alert.clone());
        Ok(())
    }

    async fn update_alert(&self, alert: &EmergencyAlert) -> Result<(), StoreError> {
        self.check_write()?;
        self.write().alerts.insert(alert.id, alert.clone());
        Ok(())
    }

    async fn find_alert(&self, id: Uuid) -> Result<Option<EmergencyAlert>, StoreError> {
        self.check_read()?;
        Ok(self.read().alerts.get(&id).cloned())
    }

    async fn open_alerts(&self) -> Result<Vec<EmergencyAlert>, StoreError> {
        self.check_read()?;
        let mut alerts: Vec<EmergencyAlert> = self
            .read()
            .alerts
            .values()
            .filter(|a| !a.is_terminal())
            .cloned()
            .collect();
        alerts.sort_by_key(|a| a.created_at);
        Ok(alerts)
    }

    async fn active_alerts(&self) -> Result<Vec<EmergencyAlert>, StoreError> {
        let mut alerts = self.open_alerts().await?;
        alerts.retain(EmergencyAlert::is_active);
        Ok(alerts)
    }
}

#[async_trait]
impl Directory for InMemoryStore {
    async fn members_of(&self, group: &GroupKey) -> Result<Vec<Uuid>, StoreError> {
        self.check_read()?;
        let state = self.read();
        let members = state.personnel.values().filter(|identity| match group {
            GroupKey::Role(role) => identity.role == *role,
            GroupKey::Identity(id) => identity.id == *id,
            GroupKey::Tenant(tenant) => identity.tenant_id == Some(*tenant),
            GroupKey::TrackedPerson(person) => identity.tracked_person_id == Some(*person),
            GroupKey::Room(_) => false,
        });
        Ok(members.map(|identity| identity.id).collect())
    }
}

struct CacheEntry {
    value: serde_json::Value,
    expires_at: Instant,
}

/// Expiring key/value cache on `tokio::time::Instant`, so paused-clock tests see expiry.
#[derive(Default)]
pub struct InMemoryCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    unavailable: AtomicBool,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates an unreachable cache server.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("cache unavailable".to_string()))
        } else {
            Ok(())
        }
    }

    /// Time-to-live left on a key, ignoring the availability switch.
    pub fn remaining_ttl(&self, key: &str) -> Option<Duration> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        entries
            .get(key)
            .filter(|e| e.expires_at > now)
            .map(|e| e.expires_at - now)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.remaining_ttl(key).is_some()
    }
}

#[async_trait]
impl Cache for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError> {
        self.check()?;
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(
        &self,
        key: &str,
        value: serde_json::Value,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        self.check()?;
        let entry = CacheEntry {
            value,
            expires_at: Instant::now() + ttl,
        };
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.check()?;
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        Ok(())
    }
}

/// Single-process broker over a tokio broadcast channel.
#[derive(Clone)]
pub struct LocalBroker {
    tx: broadcast::Sender<Envelope>,
}

impl LocalBroker {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        tracing::info!(capacity, "Local message broker initialized");
        Self { tx }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[async_trait]
impl MessageBroker for LocalBroker {
    async fn publish(&self, envelope: Envelope) -> Result<(), StoreError> {
        // No subscribers is not an error.
        let _ = self.tx.send(envelope);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.tx.subscribe()
    }
}

/// External notifier for development and testing.
///
/// Logs notifications but doesn't actually send them.
#[derive(Debug, Default)]
pub struct MockExternalNotifier {
    /// Whether to simulate failures for testing.
    pub simulate_failure: bool,
    record: bool,
    sent: Mutex<Vec<ExternalNotification>>,
}

impl MockExternalNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// A notifier that keeps every notification it was given.
    pub fn recording() -> Self {
        Self {
            record: true,
            ..Self::default()
        }
    }

    /// A notifier that rejects every notification.
    pub fn failing() -> Self {
        Self {
            simulate_failure: true,
            record: true,
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<ExternalNotification> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl ExternalNotifier for MockExternalNotifier {
    async fn send(&self, notification: &ExternalNotification) -> ExternalDelivery {
        if self.record {
            self.sent
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(notification.clone());
        }

        if self.simulate_failure {
            tracing::warn!(
                alert_id = %notification.alert_id,
                channel = %notification.channel,
                "Mock notifier simulating failure"
            );
            return ExternalDelivery::Failed("Simulated failure".to_string());
        }

        if notification.recipients.is_empty() {
            return ExternalDelivery::Skipped;
        }

        tracing::info!(
            alert_id = %notification.alert_id,
            level = notification.level,
            channel = %notification.channel,
            recipients = notification.recipients.len(),
            "Mock: Would send alert notification"
        );
        ExternalDelivery::Sent
    }
}

/// Clock driven by tokio's (pausable) timer, anchored at construction time.
#[derive(Debug, Clone)]
pub struct TokioClock {
    origin: DateTime<Utc>,
    started: Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self {
            origin: Utc::now(),
            started: Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.started.elapsed())
            .unwrap_or_else(|_| chrono::Duration::zero());
        self.origin + elapsed
    }
}
