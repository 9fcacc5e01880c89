//! Emergency alert state machine with timed, cancellable escalation.
//!
//! The engine owns the authoritative in-process copy of each open alert behind
//! its own async mutex. The durable store gets every mutation, and the cache
//! mirrors alerts for fast reads only.
//!
//! Timer discipline: each open ACTIVE alert has a parent cancellation token in
//! `timers`. Arming a level takes a child of that token, and only happens while
//! an entry exists. Acknowledge/resolve remove the entry and cancel the parent
//! while holding the alert lock, so no level can be armed afterwards and a timer
//! that already fired re-checks the status under the same lock.

use chrono::Duration as ChronoDuration;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::gateway::{Delivery, NotificationGateway};
use super::ports::{
    cache_keys, AlertStore, Audience, Cache, Clock, Directory, ExternalDelivery,
    ExternalNotification, ExternalNotifier, SystemClock, TrackingStore,
};
use super::resilience::{bounded, retry, RetryPolicy};
use super::scheduler::{Scheduler, TimerHandle, TimerId, TimerTask, TokioScheduler};
use crate::error::{CoreError, StoreError};
use crate::models::events::AlertStatusChange;
use crate::models::{
    AlertCategory, AlertStatus, Coordinate, DeliveryChannel, EmergencyAlert, EscalationPolicy,
    GeofenceViolation, GroupKey, Identity, NotificationDispatch, OutboundEvent, ResolutionOutcome,
    Role,
};

/// Default lifetime of the `alert:<id>` and `alerts:active` cache entries.
pub const ALERT_CACHE_TTL: Duration = Duration::from_secs(3600);

/// Tunables for the engine.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub policy: EscalationPolicy,
    /// Budget for idempotent store/cache writes and external sends.
    pub retry: RetryPolicy,
    pub store_timeout: Duration,
    pub cache_timeout: Duration,
    pub alert_cache_ttl: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            policy: EscalationPolicy::v1(),
            retry: RetryPolicy::default(),
            store_timeout: Duration::from_secs(2),
            cache_timeout: Duration::from_millis(500),
            alert_cache_ttl: ALERT_CACHE_TTL,
        }
    }
}

/// What a caller wants raised.
#[derive(Debug, Clone, PartialEq)]
pub struct RaiseAlert {
    pub category: AlertCategory,
    pub tracked_person_id: Uuid,
    pub location: Option<Coordinate>,
    pub description: Option<String>,
}

/// Infrastructure the engine talks to.
pub struct EngineDeps {
    pub alerts: Arc<dyn AlertStore>,
    pub tracking: Arc<dyn TrackingStore>,
    pub cache: Arc<dyn Cache>,
    pub gateway: Arc<NotificationGateway>,
    pub notifier: Arc<dyn ExternalNotifier>,
    pub directory: Option<Arc<dyn Directory>>,
}

struct AlertTimers {
    parent: CancellationToken,
    handles: Vec<TimerHandle>,
}

impl AlertTimers {
    fn new() -> Self {
        Self {
            parent: CancellationToken::new(),
            handles: Vec::new(),
        }
    }
}

type AlertCell = Arc<tokio::sync::Mutex<EmergencyAlert>>;

struct Inner {
    alerts: Mutex<HashMap<Uuid, AlertCell>>,
    timers: Mutex<HashMap<Uuid, AlertTimers>>,
    /// Tracked persons with an automatic alert being created.
    auto_reservations: Mutex<HashSet<Uuid>>,
    /// Serializes read-modify-write of the active index in the cache.
    index_lock: tokio::sync::Mutex<()>,
    store: Arc<dyn AlertStore>,
    tracking: Arc<dyn TrackingStore>,
    cache: Arc<dyn Cache>,
    gateway: Arc<NotificationGateway>,
    notifier: Arc<dyn ExternalNotifier>,
    directory: Option<Arc<dyn Directory>>,
    scheduler: Arc<dyn Scheduler>,
    clock: Arc<dyn Clock>,
    settings: EngineSettings,
}

/// Timer body for one escalation level. Boxed behind a concrete type so the
/// `arm`/`process_escalation` recursion type-checks as `Send`.
fn escalation_task(engine: AlertEngine, id: TimerId) -> TimerTask {
    Box::pin(async move {
        engine.process_escalation(id.alert_id, id.level).await;
    })
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Alert escalation engine. Cheap to clone.
#[derive(Clone)]
pub struct AlertEngine {
    inner: Arc<Inner>,
}

impl AlertEngine {
    pub fn new(deps: EngineDeps, settings: EngineSettings) -> Self {
        Self::with_runtime(deps, settings, Arc::new(TokioScheduler), Arc::new(SystemClock))
    }

    pub fn with_runtime(
        deps: EngineDeps,
        settings: EngineSettings,
        scheduler: Arc<dyn Scheduler>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                alerts: Mutex::new(HashMap::new()),
                timers: Mutex::new(HashMap::new()),
                auto_reservations: Mutex::new(HashSet::new()),
                index_lock: tokio::sync::Mutex::new(()),
                store: deps.alerts,
                tracking: deps.tracking,
                cache: deps.cache,
                gateway: deps.gateway,
                notifier: deps.notifier,
                directory: deps.directory,
                scheduler,
                clock,
                settings,
            }),
        }
    }

    pub fn policy(&self) -> &EscalationPolicy {
        &self.inner.settings.policy
    }

    /// Creates an ACTIVE alert, dispatches level 1 and arms level 2.
    pub async fn create(
        &self,
        request: RaiseAlert,
        actor: Option<Uuid>,
    ) -> Result<EmergencyAlert, CoreError> {
        let inner = &self.inner;
        let person = bounded(
            inner.settings.store_timeout,
            inner.tracking.tracked_person(request.tracked_person_id),
        )
        .await?
        .ok_or_else(|| {
            CoreError::NotFound(format!("Tracked person {}", request.tracked_person_id))
        })?;

        let alert = EmergencyAlert::new(
            request.category,
            person.id,
            person.display_name,
            request.location,
            request.description,
            inner.clock.now(),
        );

        let store = &inner.store;
        let alert_ref = &alert;
        if let Err(e) = retry(&inner.settings.retry, "insert_alert", move || {
            store.insert_alert(alert_ref)
        })
        .await
        {
            tracing::error!(
                alert_id = %alert.id,
                tracked_person_id = %alert.tracked_person_id,
                error = %e,
                "Emergency alert could not be persisted"
            );
            return Err(e.into());
        }

        let alert_id = alert.id;
        let cell: AlertCell = Arc::new(tokio::sync::Mutex::new(alert));
        lock(&inner.timers).insert(alert_id, AlertTimers::new());
        let mut guard = cell.lock().await;
        lock(&inner.alerts).insert(alert_id, Arc::clone(&cell));

        tracing::warn!(
            alert_id = %alert_id,
            category = %guard.category,
            tracked_person_id = %guard.tracked_person_id,
            actor = ?actor,
            "Emergency alert raised"
        );
        metrics::counter!("alerts_created_total", "category" => guard.category.as_str())
            .increment(1);

        self.dispatch_level(&mut guard, 1).await;
        self.persist(&guard).await;
        self.mirror(&guard).await;
        if inner.settings.policy.max_level() >= 2 {
            self.arm(&guard, 2).await;
        }
        Ok(guard.clone())
    }

    /// Fires escalation `level` for an alert. Stale or redundant firings are
    /// no-ops; returns whether the alert escalated.
    pub async fn process_escalation(&self, alert_id: Uuid, level: u32) -> bool {
        let Some(cell) = self.cell(alert_id) else {
            return false;
        };
        let mut alert = cell.lock().await;

        if !alert.is_active()
            || level <= alert.escalation_level
            || level > self.inner.settings.policy.max_level()
        {
            tracing::debug!(
                alert_id = %alert_id,
                level,
                status = %alert.status,
                current_level = alert.escalation_level,
                "Stale escalation ignored"
            );
            return false;
        }

        alert.advance_to(level, self.inner.clock.now());
        tracing::warn!(alert_id = %alert_id, level, "Emergency alert escalated");
        metrics::counter!("alert_escalations_total", "level" => level.to_string()).increment(1);

        self.dispatch_level(&mut alert, level).await;
        self.persist(&alert).await;
        self.mirror(&alert).await;
        self.forget_cache_key(&cache_keys::escalation(alert_id, level))
            .await;
        if level < self.inner.settings.policy.max_level() {
            self.arm(&alert, level + 1).await;
        }
        true
    }

    /// ACTIVE → ACKNOWLEDGED. Cancels every pending escalation.
    pub async fn acknowledge(
        &self,
        alert_id: Uuid,
        by: &Identity,
    ) -> Result<EmergencyAlert, CoreError> {
        Self::authorize(by)?;
        let cell = self.load(alert_id).await?;
        let mut alert = cell.lock().await;

        alert.acknowledge(by.id, self.inner.clock.now())?;
        self.cancel_timers(&alert).await;
        self.persist(&alert).await;
        self.mirror(&alert).await;
        let snapshot = alert.clone();
        drop(alert);

        tracing::info!(alert_id = %alert_id, by = %by.id, "Emergency alert acknowledged");
        metrics::counter!("alerts_acknowledged_total").increment(1);
        self.broadcast_status(&snapshot, OutboundEvent::AlertAcknowledged)
            .await;
        Ok(snapshot)
    }

    /// Any non-terminal state → RESOLVED / FALSE_ALARM.
    pub async fn resolve(
        &self,
        alert_id: Uuid,
        by: &Identity,
        outcome: ResolutionOutcome,
    ) -> Result<EmergencyAlert, CoreError> {
        Self::authorize(by)?;
        let cell = self.load(alert_id).await?;
        let mut alert = cell.lock().await;

        alert.resolve(by.id, outcome, self.inner.clock.now())?;
        self.cancel_timers(&alert).await;
        self.persist(&alert).await;
        self.mirror(&alert).await;
        let snapshot = alert.clone();
        drop(alert);

        tracing::info!(
            alert_id = %alert_id,
            by = %by.id,
            outcome = ?outcome,
            "Emergency alert resolved"
        );
        metrics::counter!("alerts_resolved_total", "outcome" => snapshot.status.as_str())
            .increment(1);
        self.broadcast_status(&snapshot, OutboundEvent::AlertResolved)
            .await;
        Ok(snapshot)
    }

    /// ACTIVE alerts, read from the cache index when it is complete, otherwise
    /// from the store (which then repopulates the cache).
    pub async fn list_active(&self) -> Result<Vec<EmergencyAlert>, CoreError> {
        if let Some(alerts) = self.cached_active().await {
            return Ok(alerts);
        }

        let inner = &self.inner;
        let alerts = bounded(inner.settings.store_timeout, inner.store.active_alerts()).await?;
        tracing::debug!(count = alerts.len(), "Active alerts loaded from store");

        let _index = inner.index_lock.lock().await;
        for alert in &alerts {
            self.cache_set(&cache_keys::alert(alert.id), alert).await;
        }
        let ids: Vec<Uuid> = alerts.iter().map(|a| a.id).collect();
        self.cache_set(cache_keys::ACTIVE_ALERTS, &ids).await;
        Ok(alerts)
    }

    /// The in-process copy, then the cache mirror, then the store.
    pub async fn get(&self, alert_id: Uuid) -> Result<EmergencyAlert, CoreError> {
        if let Some(cell) = self.cell(alert_id) {
            return Ok(cell.lock().await.clone());
        }
        if let Some(alert) = self
            .cache_get::<EmergencyAlert>(&cache_keys::alert(alert_id))
            .await
        {
            return Ok(alert);
        }
        bounded(
            self.inner.settings.store_timeout,
            self.inner.store.find_alert(alert_id),
        )
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("Alert {}", alert_id)))
    }

    /// Creates a SECURITY alert for a geofence violation unless the tracked
    /// person already has one open. Returns `None` when deduplicated.
    pub async fn raise_for_violation(
        &self,
        violation: &GeofenceViolation,
    ) -> Result<Option<EmergencyAlert>, CoreError> {
        let person = violation.tracked_person_id;
        if self.has_open_alert(person, AlertCategory::Security).await {
            return Ok(None);
        }
        if !lock(&self.inner.auto_reservations).insert(person) {
            return Ok(None);
        }

        let description = format!(
            "Left perimeter {} by {:.0} m ({} severity)",
            violation.perimeter_id,
            violation.distance_meters - violation.tolerance_meters,
            violation.severity
        );
        let result = self
            .create(
                RaiseAlert {
                    category: AlertCategory::Security,
                    tracked_person_id: person,
                    location: Some(violation.location),
                    description: Some(description),
                },
                None,
            )
            .await;
        lock(&self.inner.auto_reservations).remove(&person);
        result.map(Some)
    }

    /// Whether the tracked person has a non-terminal alert of `category` in process.
    pub async fn has_open_alert(&self, tracked_person_id: Uuid, category: AlertCategory) -> bool {
        let cells: Vec<AlertCell> = lock(&self.inner.alerts).values().cloned().collect();
        for cell in cells {
            let alert = cell.lock().await;
            if alert.tracked_person_id == tracked_person_id
                && alert.category == category
                && !alert.is_terminal()
            {
                return true;
            }
        }
        false
    }

    /// Reloads open alerts from the store and re-arms pending escalation.
    /// Returns how many alerts had a timer armed.
    pub async fn recover(&self) -> Result<usize, CoreError> {
        let inner = &self.inner;
        let open = bounded(inner.settings.store_timeout, inner.store.open_alerts()).await?;
        let mut armed = 0;

        for alert in open {
            let alert_id = alert.id;
            if self.cell(alert_id).is_some() {
                continue;
            }
            let is_active = alert.is_active();
            let cell: AlertCell = Arc::new(tokio::sync::Mutex::new(alert));
            if is_active {
                lock(&inner.timers).insert(alert_id, AlertTimers::new());
            }
            let mut guard = cell.lock().await;
            lock(&inner.alerts).insert(alert_id, Arc::clone(&cell));

            if is_active {
                let level = guard.escalation_level;
                if !guard.has_dispatched(level) {
                    // Crashed between persisting and dispatching this level.
                    self.dispatch_level(&mut guard, level).await;
                    self.persist(&guard).await;
                }
                if level < inner.settings.policy.max_level() {
                    self.arm(&guard, level + 1).await;
                    armed += 1;
                }
            }
            self.mirror(&guard).await;
        }

        tracing::info!(armed, "Escalation state recovered");
        Ok(armed)
    }

    /// Drops terminal alerts last touched more than `older_than` ago from memory.
    pub fn evict_terminal(&self, older_than: Duration) -> usize {
        let cutoff = self.inner.clock.now()
            - ChronoDuration::from_std(older_than).unwrap_or_else(|_| ChronoDuration::zero());
        let mut alerts = lock(&self.inner.alerts);
        let before = alerts.len();
        alerts.retain(|_, cell| match cell.try_lock() {
            Ok(alert) => !(alert.is_terminal() && alert.updated_at < cutoff),
            Err(_) => true,
        });
        before - alerts.len()
    }

    /// Number of alerts held in process.
    pub fn tracked_alerts(&self) -> usize {
        lock(&self.inner.alerts).len()
    }

    /// Number of alerts with escalation still armed.
    pub fn armed_alerts(&self) -> usize {
        lock(&self.inner.timers).len()
    }

    fn authorize(by: &Identity) -> Result<(), CoreError> {
        if by.role.manages_alerts() {
            Ok(())
        } else {
            Err(CoreError::Forbidden(
                "Only supervisors and admins can change alert status".to_string(),
            ))
        }
    }

    fn cell(&self, alert_id: Uuid) -> Option<AlertCell> {
        lock(&self.inner.alerts).get(&alert_id).cloned()
    }

    /// In-process copy, loading it from the store when absent.
    async fn load(&self, alert_id: Uuid) -> Result<AlertCell, CoreError> {
        if let Some(cell) = self.cell(alert_id) {
            return Ok(cell);
        }
        let alert = bounded(
            self.inner.settings.store_timeout,
            self.inner.store.find_alert(alert_id),
        )
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("Alert {}", alert_id)))?;

        let mut alerts = lock(&self.inner.alerts);
        let cell = alerts
            .entry(alert_id)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(alert)));
        Ok(Arc::clone(cell))
    }

    async fn arm(&self, alert: &EmergencyAlert, level: u32) {
        let inner = &self.inner;
        let Some(delay) = inner
            .settings
            .policy
            .remaining_delay(level, alert.created_at, inner.clock.now())
        else {
            return;
        };

        let id = TimerId {
            alert_id: alert.id,
            level,
        };
        {
            let mut timers = lock(&inner.timers);
            let Some(entry) = timers.get_mut(&alert.id) else {
                return;
            };
            let task = escalation_task(self.clone(), id);
            let handle = inner
                .scheduler
                .schedule(id, delay, entry.parent.child_token(), task);
            entry.handles.retain(|h| !h.is_cancelled());
            entry.handles.push(handle);
        }

        tracing::debug!(
            alert_id = %alert.id,
            level,
            delay_secs = delay.as_secs(),
            "Escalation armed"
        );
        let ttl = delay.max(Duration::from_secs(1));
        self.cache_set_with_ttl(&cache_keys::escalation(alert.id, level), &level, ttl)
            .await;
    }

    async fn cancel_timers(&self, alert: &EmergencyAlert) {
        let removed = lock(&self.inner.timers).remove(&alert.id);
        let Some(timers) = removed else {
            return;
        };
        for handle in &timers.handles {
            self.inner.scheduler.cancel(handle);
        }
        timers.parent.cancel();

        for level in alert.escalation_level + 1..=self.inner.settings.policy.max_level() {
            self.forget_cache_key(&cache_keys::escalation(alert.id, level))
                .await;
        }
    }

    async fn dispatch_level(&self, alert: &mut EmergencyAlert, level: u32) {
        let Some(config) = self.inner.settings.policy.level(level).cloned() else {
            return;
        };

        for channel in &config.channels {
            let (delivered, queued) = match channel {
                DeliveryChannel::InApp => {
                    let report = self
                        .inner
                        .gateway
                        .notify(
                            Audience::roles(&config.recipients),
                            OutboundEvent::EmergencyAlert(alert.clone()),
                            Delivery::Reliable,
                        )
                        .await;
                    (report.delivered, report.queued)
                }
                external => (self.send_external(alert, level, *external, &config.recipients).await, 0),
            };

            alert.record_dispatch(NotificationDispatch {
                level,
                channel: *channel,
                audience: config.recipients.clone(),
                delivered,
                queued,
                dispatched_at: self.inner.clock.now(),
            });
        }
    }

    /// Hands a level to an external provider; returns how many recipients it covered.
    async fn send_external(
        &self,
        alert: &EmergencyAlert,
        level: u32,
        channel: DeliveryChannel,
        roles: &[Role],
    ) -> usize {
        let mut recipients: Vec<Uuid> = Vec::new();
        if let Some(directory) = &self.inner.directory {
            for role in roles {
                let group = GroupKey::Role(*role);
                match bounded(self.inner.settings.store_timeout, directory.members_of(&group)).await
                {
                    Ok(members) => {
                        for member in members {
                            if !recipients.contains(&member) {
                                recipients.push(member);
                            }
                        }
                    }
                    Err(e) => tracing::warn!(
                        alert_id = %alert.id,
                        group = %group,
                        error = %e,
                        "Directory lookup failed for external notification"
                    ),
                }
            }
        }

        let notification = ExternalNotification {
            alert_id: alert.id,
            level,
            channel,
            category: alert.category,
            priority: alert.priority,
            roles: roles.to_vec(),
            recipients,
            tracked_person_name: alert.tracked_person_name.clone(),
            message: format!(
                "{} alert for {} (level {})",
                alert.category, alert.tracked_person_name, level
            ),
        };

        let notifier = &self.inner.notifier;
        let notification_ref = &notification;
        let result = retry(&self.inner.settings.retry, "external_notify", move || async move {
            match notifier.send(notification_ref).await {
                ExternalDelivery::Sent => Ok(true),
                ExternalDelivery::Skipped => Ok(false),
                ExternalDelivery::Failed(reason) => Err(StoreError::Unavailable(reason)),
            }
        })
        .await;

        match result {
            Ok(true) => notification.recipients.len(),
            Ok(false) => 0,
            Err(e) => {
                tracing::error!(
                    alert_id = %alert.id,
                    level,
                    channel = %channel,
                    error = %e,
                    "External notification failed"
                );
                0
            }
        }
    }

    async fn broadcast_status<F>(&self, alert: &EmergencyAlert, event: F)
    where
        F: FnOnce(AlertStatusChange) -> OutboundEvent,
    {
        let (by, at) = match alert.status {
            AlertStatus::Acknowledged => (alert.acknowledged_by, alert.acknowledged_at),
            _ => (alert.resolved_by, alert.resolved_at),
        };
        let (Some(by), Some(at)) = (by, at) else {
            return;
        };

        let mut audience: Vec<GroupKey> = alert
            .notified_roles()
            .into_iter()
            .map(GroupKey::Role)
            .collect();
        audience.push(GroupKey::TrackedPerson(alert.tracked_person_id));

        let change = AlertStatusChange {
            alert_id: alert.id,
            tracked_person_id: alert.tracked_person_id,
            status: alert.status,
            by,
            at,
            outcome: alert.outcome,
        };
        self.inner
            .gateway
            .notify(Audience::groups(audience), event(change), Delivery::Reliable)
            .await;
    }

    /// Writes the alert to the store. Failures are logged; the in-process copy
    /// stays authoritative.
    async fn persist(&self, alert: &EmergencyAlert) {
        let store = &self.inner.store;
        if let Err(e) = retry(&self.inner.settings.retry, "update_alert", move || {
            store.update_alert(alert)
        })
        .await
        {
            tracing::error!(
                alert_id = %alert.id,
                status = %alert.status,
                error = %e,
                "Failed to persist emergency alert"
            );
        }
    }

    /// Refreshes `alert:<id>` and the active index.
    async fn mirror(&self, alert: &EmergencyAlert) {
        self.cache_set(&cache_keys::alert(alert.id), alert).await;

        let _index = self.inner.index_lock.lock().await;
        let cache = &self.inner.cache;
        let current = bounded(
            self.inner.settings.cache_timeout,
            cache.get(cache_keys::ACTIVE_ALERTS),
        )
        .await;

        let mut ids: Vec<Uuid> = match current {
            Ok(Some(value)) => serde_json::from_value(value).unwrap_or_default(),
            // A cold index is rebuilt by the next `list_active`.
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(error = %e, "Active alert index unavailable");
                self.forget_cache_key(cache_keys::ACTIVE_ALERTS).await;
                return;
            }
        };

        let active = alert.is_active();
        let listed = ids.contains(&alert.id);
        if active == listed {
            return;
        }
        if active {
            ids.push(alert.id);
        } else {
            ids.retain(|id| *id != alert.id);
        }
        if !self.cache_set(cache_keys::ACTIVE_ALERTS, &ids).await {
            self.forget_cache_key(cache_keys::ACTIVE_ALERTS).await;
        }
    }

    async fn cached_active(&self) -> Option<Vec<EmergencyAlert>> {
        let ids: Vec<Uuid> = self.cache_get(cache_keys::ACTIVE_ALERTS).await?;
        let mut alerts = Vec::with_capacity(ids.len());
        for id in ids {
            let alert: EmergencyAlert = self.cache_get(&cache_keys::alert(id)).await?;
            if !alert.is_active() {
                return None;
            }
            alerts.push(alert);
        }
        alerts.sort_by_key(|a| a.created_at);
        Some(alerts)
    }

    async fn cache_get<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        match bounded(self.inner.settings.cache_timeout, self.inner.cache.get(key)).await {
            Ok(Some(value)) => serde_json::from_value(value).ok(),
            Ok(None) => None,
            Err(e) => {
                tracing::debug!(key, error = %e, "Cache read failed");
                None
            }
        }
    }

    async fn cache_set<T: serde::Serialize>(&self, key: &str, value: &T) -> bool {
        self.cache_set_with_ttl(key, value, self.inner.settings.alert_cache_ttl)
            .await
    }

    async fn cache_set_with_ttl<T: serde::Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> bool {
        let value = match serde_json::to_value(value) {
            Ok(value) => value,
            Err(e) => {
                tracing::error!(key, error = %e, "Failed to serialize cache value");
                return false;
            }
        };
        let cache = &self.inner.cache;
        let mut policy = self.inner.settings.retry;
        policy.timeout = self.inner.settings.cache_timeout;
        match retry(&policy, "cache_set", || cache.set(key, value.clone(), ttl)).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(key, error = %e, "Cache write failed");
                false
            }
        }
    }

    async fn forget_cache_key(&self, key: &str) {
        let cache = &self.inner.cache;
        if let Err(e) = bounded(self.inner.settings.cache_timeout, cache.delete(key)).await {
            tracing::debug!(key, error = %e, "Cache delete failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::models::{ConnectionId, TrackedPerson, ViolationSeverity};
    use crate::services::memory::{InMemoryCache, InMemoryStore, MockExternalNotifier, TokioClock};
    use crate::services::message_queue::OfflineQueue;
    use crate::services::session_registry::SessionRegistry;

    use chrono::DateTime;
    use tokio::sync::mpsc;

    struct Harness {
        engine: AlertEngine,
        store: Arc<InMemoryStore>,
        cache: Arc<InMemoryCache>,
        gateway: Arc<NotificationGateway>,
        notifier: Arc<MockExternalNotifier>,
        person: TrackedPerson,
    }

    fn harness() -> Harness {
        harness_with(MockExternalNotifier::recording())
    }

    fn harness_with(notifier: MockExternalNotifier) -> Harness {
        let store = Arc::new(InMemoryStore::new());
        let cache = Arc::new(InMemoryCache::new());
        let gateway = Arc::new(NotificationGateway::new(
            Arc::new(SessionRegistry::new()),
            Arc::new(OfflineQueue::new(100)),
        ));
        let notifier = Arc::new(notifier);
        let person = TrackedPerson {
            id: Uuid::new_v4(),
            display_name: "Jordan".to_string(),
            tenant_id: None,
        };
        store.add_tracked_person(person.clone());

        let settings = EngineSettings {
            retry: RetryPolicy::new(2, Duration::from_millis(10), Duration::from_millis(200)),
            ..EngineSettings::default()
        };
        let engine = AlertEngine::with_runtime(
            EngineDeps {
                alerts: store.clone(),
                tracking: store.clone(),
                cache: cache.clone(),
                gateway: gateway.clone(),
                notifier: notifier.clone(),
                directory: Some(store.clone()),
            },
            settings,
            Arc::new(TokioScheduler),
            Arc::new(TokioClock::new()),
        );

        Harness {
            engine,
            store,
            cache,
            gateway,
            notifier,
            person,
        }
    }

    fn raise(person: Uuid, category: AlertCategory) -> RaiseAlert {
        RaiseAlert {
            category,
            tracked_person_id: person,
            location: None,
            description: None,
        }
    }

    fn supervisor() -> Identity {
        Identity::new(Uuid::new_v4(), Role::Supervisor)
    }

    /// Lets spawned timer tasks run after the clock moved.
    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_dispatches_level_one_to_supervisors() {
        let h = harness();
        let (tx, mut rx) = mpsc::channel(8);
        h.gateway
            .connect(ConnectionId::new(), supervisor(), tx);

        let alert = h
            .engine
            .create(raise(h.person.id, AlertCategory::Panic), None)
            .await
            .unwrap();

        assert_eq!(alert.escalation_level, 1);
        assert_eq!(alert.tracked_person_name, "Jordan");
        assert!(alert.has_dispatched(1));
        match rx.recv().await.unwrap() {
            OutboundEvent::EmergencyAlert(received) => assert_eq!(received.id, alert.id),
            other => panic!("Unexpected event {other:?}"),
        }
        assert!(h.store.stored_alert(alert.id).unwrap().has_dispatched(1));
        assert!(h.cache.contains_key(&cache_keys::alert(alert.id)));
        assert!(h.cache.contains_key(&cache_keys::escalation(alert.id, 2)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_for_unknown_person_is_not_found() {
        let h = harness();
        let result = h
            .engine
            .create(raise(Uuid::new_v4(), AlertCategory::General), None)
            .await;
        assert!(matches!(result, Err(CoreError::NotFound(_))));
        assert_eq!(h.store.alert_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_fails_when_store_stays_down() {
        let h = harness();
        h.store.set_fail_writes(true);
        let result = h
            .engine
            .create(raise(h.person.id, AlertCategory::Fire), None)
            .await;
        assert!(matches!(result, Err(CoreError::Infrastructure(_))));
        assert_eq!(h.engine.tracked_alerts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_survives_transient_store_failure() {
        let h = harness();
        h.store.fail_next_writes(1);
        let alert = h
            .engine
            .create(raise(h.person.id, AlertCategory::Fire), None)
            .await
            .unwrap();
        assert!(h.store.stored_alert(alert.id).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unacknowledged_alert_escalates_on_schedule() {
        let h = harness();
        let alert = h
            .engine
            .create(raise(h.person.id, AlertCategory::Medical), None)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(4 * 60 + 59)).await;
        settle().await;
        assert_eq!(h.engine.get(alert.id).await.unwrap().escalation_level, 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        settle().await;
        let current = h.engine.get(alert.id).await.unwrap();
        assert_eq!(current.escalation_level, 2);
        assert!(current.notified_roles().contains(&Role::Admin));

        tokio::time::sleep(Duration::from_secs(10 * 60)).await;
        settle().await;
        let current = h.engine.get(alert.id).await.unwrap();
        assert_eq!(current.escalation_level, 3);
        assert!(current.notified_roles().contains(&Role::EmergencyContact));
        assert!(current
            .dispatches
            .iter()
            .any(|d| d.level == 3 && d.channel == DeliveryChannel::Sms));
        assert_eq!(h.engine.armed_alerts(), 1);

        tokio::time::sleep(Duration::from_secs(3600)).await;
        settle().await;
        assert_eq!(h.engine.get(alert.id).await.unwrap().escalation_level, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acknowledge_stops_escalation() {
        let h = harness();
        let alert = h
            .engine
            .create(raise(h.person.id, AlertCategory::Panic), None)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(60)).await;
        let acked = h.engine.acknowledge(alert.id, &supervisor()).await.unwrap();
        assert_eq!(acked.status, AlertStatus::Acknowledged);
        assert_eq!(h.engine.armed_alerts(), 0);
        assert!(!h.cache.contains_key(&cache_keys::escalation(alert.id, 2)));

        tokio::time::sleep(Duration::from_secs(30 * 60)).await;
        settle().await;
        let current = h.engine.get(alert.id).await.unwrap();
        assert_eq!(current.escalation_level, 1);
        assert!(!current.has_dispatched(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_acknowledge_conflicts() {
        let h = harness();
        let alert = h
            .engine
            .create(raise(h.person.id, AlertCategory::General), None)
            .await
            .unwrap();
        let first = supervisor();
        h.engine.acknowledge(alert.id, &first).await.unwrap();

        let second = h.engine.acknowledge(alert.id, &supervisor()).await;
        assert!(matches!(second, Err(CoreError::StateConflict(_))));
        assert_eq!(
            h.engine.get(alert.id).await.unwrap().acknowledged_by,
            Some(first.id)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_acknowledge_exactly_one_wins() {
        let h = harness();
        let alert = h
            .engine
            .create(raise(h.person.id, AlertCategory::Panic), None)
            .await
            .unwrap();

        let tasks: Vec<_> = (0..5)
            .map(|_| {
                let engine = h.engine.clone();
                let by = supervisor();
                tokio::spawn(async move { engine.acknowledge(alert.id, &by).await })
            })
            .collect();
        let mut wins = 0;
        for task in tasks {
            if task.await.unwrap().is_ok() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_agent_cannot_acknowledge() {
        let h = harness();
        let alert = h
            .engine
            .create(raise(h.person.id, AlertCategory::Panic), None)
            .await
            .unwrap();
        let agent = Identity::new(Uuid::new_v4(), Role::Agent);
        assert!(matches!(
            h.engine.acknowledge(alert.id, &agent).await,
            Err(CoreError::Forbidden(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolve_from_active_and_terminal_conflict() {
        let h = harness();
        let alert = h
            .engine
            .create(raise(h.person.id, AlertCategory::Security), None)
            .await
            .unwrap();
        let resolved = h
            .engine
            .resolve(alert.id, &supervisor(), ResolutionOutcome::FalseAlarm)
            .await
            .unwrap();
        assert_eq!(resolved.status, AlertStatus::FalseAlarm);
        assert_eq!(h.engine.armed_alerts(), 0);

        assert!(matches!(
            h.engine
                .resolve(alert.id, &supervisor(), ResolutionOutcome::Resolved)
                .await,
            Err(CoreError::StateConflict(_))
        ));
        assert!(matches!(
            h.engine.acknowledge(alert.id, &supervisor()).await,
            Err(CoreError::StateConflict(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolution_notifies_origin_and_notified_roles() {
        let h = harness();
        let origin = Identity::new(Uuid::new_v4(), Role::Agent).with_tracked_person(h.person.id);
        let (tx, mut rx) = mpsc::channel(8);
        h.gateway.connect(ConnectionId::new(), origin, tx);

        let alert = h
            .engine
            .create(raise(h.person.id, AlertCategory::Panic), None)
            .await
            .unwrap();
        h.engine
            .resolve(alert.id, &supervisor(), ResolutionOutcome::Resolved)
            .await
            .unwrap();

        match rx.recv().await.unwrap() {
            OutboundEvent::AlertResolved(change) => {
                assert_eq!(change.alert_id, alert.id);
                assert_eq!(change.outcome, Some(ResolutionOutcome::Resolved));
            }
            other => panic!("Unexpected event {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_escalation_is_noop() {
        let h = harness();
        let alert = h
            .engine
            .create(raise(h.person.id, AlertCategory::Panic), None)
            .await
            .unwrap();
        h.engine.acknowledge(alert.id, &supervisor()).await.unwrap();

        assert!(!h.engine.process_escalation(alert.id, 2).await);
        assert!(!h.engine.process_escalation(Uuid::new_v4(), 2).await);
        assert!(!h.engine.get(alert.id).await.unwrap().has_dispatched(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_level_firing_is_noop() {
        let h = harness();
        let alert = h
            .engine
            .create(raise(h.person.id, AlertCategory::Panic), None)
            .await
            .unwrap();
        assert!(h.engine.process_escalation(alert.id, 2).await);
        assert!(!h.engine.process_escalation(alert.id, 2).await);
        let level_two = h
            .engine
            .get(alert.id)
            .await
            .unwrap()
            .dispatches
            .iter()
            .filter(|d| d.level == 2)
            .count();
        assert_eq!(level_two, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_external_channels_use_notifier() {
        let h = harness();
        h.store.add_personnel(supervisor());
        let alert = h
            .engine
            .create(raise(h.person.id, AlertCategory::Panic), None)
            .await
            .unwrap();
        let sent = h.notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].channel, DeliveryChannel::Push);
        assert_eq!(sent[0].alert_id, alert.id);
        assert_eq!(sent[0].recipients.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_external_failure_is_retried_then_recorded() {
        let h = harness_with(MockExternalNotifier::failing());
        h.store.add_personnel(supervisor());
        let alert = h
            .engine
            .create(raise(h.person.id, AlertCategory::Panic), None)
            .await
            .unwrap();
        assert_eq!(h.notifier.sent().len(), 2);
        let push = alert
            .dispatches
            .iter()
            .find(|d| d.channel == DeliveryChannel::Push)
            .unwrap();
        assert_eq!(push.delivered, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_list_active_cold_cache_rebuilds_from_store() {
        let h = harness();
        let a = h
            .engine
            .create(raise(h.person.id, AlertCategory::Panic), None)
            .await
            .unwrap();
        let b = h
            .engine
            .create(raise(h.person.id, AlertCategory::Fire), None)
            .await
            .unwrap();
        h.engine
            .resolve(b.id, &supervisor(), ResolutionOutcome::Resolved)
            .await
            .unwrap();

        assert!(!h.cache.contains_key(cache_keys::ACTIVE_ALERTS));
        let active = h.engine.list_active().await.unwrap();
        assert_eq!(active.iter().map(|x| x.id).collect::<Vec<_>>(), vec![a.id]);
        assert!(h.cache.contains_key(cache_keys::ACTIVE_ALERTS));

        // Served from the cache now, and kept in sync by later mutations.
        let c = h
            .engine
            .create(raise(h.person.id, AlertCategory::Medical), None)
            .await
            .unwrap();
        h.store.set_fail_reads(true);
        let active = h.engine.list_active().await.unwrap();
        assert_eq!(
            active.iter().map(|x| x.id).collect::<Vec<_>>(),
            vec![a.id, c.id]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_list_active_with_cache_down_uses_store() {
        let h = harness();
        let a = h
            .engine
            .create(raise(h.person.id, AlertCategory::Panic), None)
            .await
            .unwrap();
        h.cache.set_unavailable(true);
        let active = h.engine.list_active().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, a.id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acknowledged_alert_leaves_active_list() {
        let h = harness();
        let acked = h
            .engine
            .create(raise(h.person.id, AlertCategory::Panic), None)
            .await
            .unwrap();
        let open = h
            .engine
            .create(raise(h.person.id, AlertCategory::Medical), None)
            .await
            .unwrap();

        // Warm the index, then acknowledge one of the two.
        assert_eq!(h.engine.list_active().await.unwrap().len(), 2);
        h.engine.acknowledge(acked.id, &supervisor()).await.unwrap();

        let warm = h.engine.list_active().await.unwrap();
        assert_eq!(warm.iter().map(|a| a.id).collect::<Vec<_>>(), vec![open.id]);
        assert!(warm.iter().all(EmergencyAlert::is_active));

        h.cache.delete(cache_keys::ACTIVE_ALERTS).await.unwrap();
        let cold = h.engine.list_active().await.unwrap();
        assert_eq!(cold.iter().map(|a| a.id).collect::<Vec<_>>(), vec![open.id]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_falls_back_to_store() {
        let h = harness();
        let stored = EmergencyAlert::new(
            AlertCategory::General,
            h.person.id,
            "Jordan",
            None,
            None,
            DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        );
        h.store.insert_alert(&stored).await.unwrap();
        assert_eq!(h.engine.get(stored.id).await.unwrap().id, stored.id);
        assert!(matches!(
            h.engine.get(Uuid::new_v4()).await,
            Err(CoreError::NotFound(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recover_rearms_active_alerts() {
        let h = harness();
        let clock = TokioClock::new();
        let mut pending = EmergencyAlert::new(
            AlertCategory::Panic,
            h.person.id,
            "Jordan",
            None,
            None,
            clock.now() - ChronoDuration::minutes(4),
        );
        pending.record_dispatch(NotificationDispatch {
            level: 1,
            channel: DeliveryChannel::InApp,
            audience: vec![Role::Supervisor],
            delivered: 1,
            queued: 0,
            dispatched_at: pending.created_at,
        });
        let mut acked = pending.clone();
        acked.id = Uuid::new_v4();
        acked.acknowledge(Uuid::new_v4(), clock.now()).unwrap();
        h.store.insert_alert(&pending).await.unwrap();
        h.store.insert_alert(&acked).await.unwrap();

        assert_eq!(h.engine.recover().await.unwrap(), 1);
        assert_eq!(h.engine.tracked_alerts(), 2);

        // Level 2 is due one minute after restart (five minutes after creation).
        tokio::time::sleep(Duration::from_secs(61)).await;
        settle().await;
        assert_eq!(h.engine.get(pending.id).await.unwrap().escalation_level, 2);
        assert_eq!(h.engine.get(acked.id).await.unwrap().escalation_level, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_violation_alert_is_deduplicated() {
        let h = harness();
        let violation = GeofenceViolation {
            id: Uuid::new_v4(),
            tracked_person_id: h.person.id,
            perimeter_id: Uuid::new_v4(),
            location: Coordinate::new(0.01, 0.0),
            distance_meters: 1100.0,
            tolerance_meters: 100.0,
            severity: ViolationSeverity::High,
            occurred_at: TokioClock::new().now(),
        };

        let first = h.engine.raise_for_violation(&violation).await.unwrap();
        assert_eq!(first.unwrap().category, AlertCategory::Security);
        assert!(h.engine.raise_for_violation(&violation).await.unwrap().is_none());
        assert!(h
            .engine
            .has_open_alert(h.person.id, AlertCategory::Security)
            .await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_evict_terminal_only_drops_old_terminal() {
        let h = harness();
        let open = h
            .engine
            .create(raise(h.person.id, AlertCategory::Panic), None)
            .await
            .unwrap();
        let done = h
            .engine
            .create(raise(h.person.id, AlertCategory::Fire), None)
            .await
            .unwrap();
        h.engine
            .resolve(done.id, &supervisor(), ResolutionOutcome::Resolved)
            .await
            .unwrap();

        assert_eq!(h.engine.evict_terminal(Duration::from_secs(3600)), 0);
        tokio::time::sleep(Duration::from_secs(7200)).await;
        assert_eq!(h.engine.evict_terminal(Duration::from_secs(3600)), 1);
        assert_eq!(h.engine.tracked_alerts(), 1);
        assert!(h.engine.get(open.id).await.is_ok());
        // Evicted alerts are still readable from the store.
        assert_eq!(
            h.engine.get(done.id).await.unwrap().status,
            AlertStatus::Resolved
        );
    }
}
