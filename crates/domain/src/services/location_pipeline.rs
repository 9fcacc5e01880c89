//! Location ingestion: validate, persist, cache, evaluate the active perimeter,
//! record violations and fan them out.

use chrono::{Duration as ChronoDuration, SubsecRound};
use shared::pagination::HistoryCursor;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;
use validator::Validate;

use super::escalation::AlertEngine;
use super::gateway::{Delivery, NotificationGateway};
use super::geospatial;
use super::ports::{cache_keys, Audience, Cache, Clock, HistoryQuery, SystemClock, TrackingStore};
use super::resilience::bounded;
use crate::error::CoreError;
use crate::models::{
    Coordinate, GeofenceViolation, GroupKey, LocationHistoryResponse, LocationRecord,
    LocationSample, OutboundEvent, PerimeterCheck, Role, ViolationSeverity,
};

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub position_ttl: Duration,
    pub store_timeout: Duration,
    pub cache_timeout: Duration,
    /// Raise a SECURITY alert for violations at or above `auto_alert_min_severity`.
    pub auto_alert: bool,
    pub auto_alert_min_severity: ViolationSeverity,
    pub history_default_limit: i64,
    pub history_max_limit: i64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            position_ttl: Duration::from_secs(300),
            store_timeout: Duration::from_secs(2),
            cache_timeout: Duration::from_millis(500),
            auto_alert: true,
            auto_alert_min_severity: ViolationSeverity::High,
            history_default_limit: 100,
            history_max_limit: 500,
        }
    }
}

/// Result of ingesting one sample.
#[derive(Debug, Clone, Default)]
pub struct IngestOutcome {
    /// The stored history entry, absent if the history log was unavailable.
    pub record: Option<LocationRecord>,
    pub violations: Vec<GeofenceViolation>,
    /// Alert raised automatically for a violation.
    pub alert_id: Option<Uuid>,
}

pub struct LocationPipeline {
    store: Arc<dyn TrackingStore>,
    cache: Arc<dyn Cache>,
    gateway: Arc<NotificationGateway>,
    alerts: Option<AlertEngine>,
    clock: Arc<dyn Clock>,
    settings: PipelineSettings,
}

impl LocationPipeline {
    pub fn new(
        store: Arc<dyn TrackingStore>,
        cache: Arc<dyn Cache>,
        gateway: Arc<NotificationGateway>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            store,
            cache,
            gateway,
            alerts: None,
            clock: Arc::new(SystemClock),
            settings,
        }
    }

    /// Enables automatic SECURITY alerts for serious violations.
    pub fn with_alert_engine(mut self, engine: AlertEngine) -> Self {
        self.alerts = Some(engine);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Ingests one sample. Malformed input and a tracked person the store does
    /// not know are errors; infrastructure failures are logged and yield
    /// best-effort results.
    ///
    /// Capture times are kept to microseconds, the precision of stored rows and
    /// history cursors.
    pub async fn ingest(&self, mut sample: LocationSample) -> Result<IngestOutcome, CoreError> {
        let now = self.clock.now();
        sample.captured_at = sample.captured_at.trunc_subsecs(6);
        sample.validate(now)?;
        let person_id = sample.tracked_person_id;

        let tenant_id = match bounded(
            self.settings.store_timeout,
            self.store.tracked_person(person_id),
        )
        .await
        {
            Ok(Some(person)) => person.tenant_id,
            Ok(None) => {
                return Err(CoreError::NotFound(format!("Tracked person {}", person_id)));
            }
            Err(e) => {
                tracing::warn!(
                    tracked_person_id = %person_id,
                    error = %e,
                    "Tracked person lookup failed, ingesting without tenant"
                );
                None
            }
        };
        metrics::counter!("locations_ingested_total").increment(1);

        let record = match bounded(
            self.settings.store_timeout,
            self.store.append_location(&sample, now),
        )
        .await
        {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::error!(
                    tracked_person_id = %person_id,
                    error = %e,
                    "Failed to persist location sample"
                );
                None
            }
        };

        self.cache_position(&sample).await;

        let perimeter = match bounded(
            self.settings.store_timeout,
            self.store.active_perimeter(person_id, sample.captured_at),
        )
        .await
        {
            Ok(perimeter) => perimeter,
            Err(e) => {
                tracing::warn!(
                    tracked_person_id = %person_id,
                    error = %e,
                    "Active perimeter lookup failed, skipping geofence check"
                );
                None
            }
        };

        let mut outcome = IngestOutcome {
            record,
            ..IngestOutcome::default()
        };

        if let Some(perimeter) = perimeter {
            let check = geospatial::evaluate(&perimeter, sample.coordinate());
            if let Some(severity) = check.severity {
                let violation = GeofenceViolation {
                    id: Uuid::new_v4(),
                    tracked_person_id: person_id,
                    perimeter_id: perimeter.id,
                    location: sample.coordinate(),
                    distance_meters: check.distance_meters,
                    tolerance_meters: check.tolerance_meters,
                    severity,
                    occurred_at: sample.captured_at,
                };
                self.handle_violation(&violation).await;
                if let Some(alert_id) = self.auto_alert(&violation).await {
                    outcome.alert_id = Some(alert_id);
                }
                outcome.violations.push(violation);
            }
        }

        let mut groups = vec![GroupKey::Role(Role::Supervisor), GroupKey::Role(Role::Admin)];
        groups.extend(tenant_id.map(GroupKey::Tenant));
        self.gateway
            .notify(
                Audience::groups(groups),
                OutboundEvent::LocationUpdate(sample),
                Delivery::LiveOnly,
            )
            .await;

        Ok(outcome)
    }

    /// Location history ordered by capture time, paginated by opaque cursor.
    pub async fn history(
        &self,
        tracked_person_id: Uuid,
        from: Option<chrono::DateTime<chrono::Utc>>,
        to: Option<chrono::DateTime<chrono::Utc>>,
        limit: Option<i64>,
        cursor: Option<&str>,
    ) -> Result<LocationHistoryResponse, CoreError> {
        if let (Some(from), Some(to)) = (from, to) {
            if from > to {
                return Err(CoreError::Validation(
                    "from must not be after to".to_string(),
                ));
            }
        }
        let limit = limit
            .unwrap_or(self.settings.history_default_limit)
            .clamp(1, self.settings.history_max_limit);
        let after = cursor
            .map(HistoryCursor::decode)
            .transpose()
            .map_err(|e| CoreError::Validation(format!("cursor: {}", e)))?;

        self.require_person(tracked_person_id).await?;

        let query = HistoryQuery {
            tracked_person_id,
            from,
            to,
            limit: limit + 1,
            after,
        };
        let mut locations =
            bounded(self.settings.store_timeout, self.store.location_history(&query)).await?;

        let next_cursor = if locations.len() as i64 > limit {
            locations.truncate(limit as usize);
            locations
                .last()
                .map(|r| HistoryCursor::new(r.sample.captured_at, r.id).encode())
        } else {
            None
        };
        Ok(LocationHistoryResponse {
            locations,
            next_cursor,
        })
    }

    /// Latest known position: the cache first, then the newest stored sample.
    pub async fn current_position(
        &self,
        tracked_person_id: Uuid,
    ) -> Result<LocationSample, CoreError> {
        let key = cache_keys::position(tracked_person_id);
        match bounded(self.settings.cache_timeout, self.cache.get(&key)).await {
            Ok(Some(value)) => match serde_json::from_value::<LocationSample>(value) {
                Ok(sample) => return Ok(sample),
                Err(e) => tracing::warn!(key = %key, error = %e, "Corrupt cached position"),
            },
            Ok(None) => {}
            Err(e) => tracing::debug!(key = %key, error = %e, "Position cache unavailable"),
        }

        let latest = bounded(
            self.settings.store_timeout,
            self.store.latest_location(tracked_person_id),
        )
        .await?;
        latest.map(|record| record.sample).ok_or_else(|| {
            CoreError::NotFound(format!("Position for tracked person {}", tracked_person_id))
        })
    }

    /// Evaluates a coordinate against a named perimeter.
    pub async fn check_perimeter(
        &self,
        perimeter_id: Uuid,
        point: Coordinate,
    ) -> Result<PerimeterCheck, CoreError> {
        point.validate()?;
        let perimeter = bounded(self.settings.store_timeout, self.store.perimeter(perimeter_id))
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("Perimeter {}", perimeter_id)))?;
        Ok(geospatial::evaluate(&perimeter, point))
    }

    /// Deletes samples captured more than `retention` ago.
    pub async fn prune(&self, retention: ChronoDuration) -> Result<u64, CoreError> {
        let cutoff = self.clock.now() - retention;
        let removed = self.store.prune_locations(cutoff).await?;
        tracing::info!(removed, cutoff = %cutoff, "Pruned location history");
        Ok(removed)
    }

    async fn require_person(&self, tracked_person_id: Uuid) -> Result<(), CoreError> {
        bounded(
            self.settings.store_timeout,
            self.store.tracked_person(tracked_person_id),
        )
        .await?
        .map(|_| ())
        .ok_or_else(|| CoreError::NotFound(format!("Tracked person {}", tracked_person_id)))
    }

    async fn cache_position(&self, sample: &LocationSample) {
        let key = cache_keys::position(sample.tracked_person_id);
        let value = match serde_json::to_value(sample) {
            Ok(value) => value,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize position");
                return;
            }
        };
        if let Err(e) = bounded(
            self.settings.cache_timeout,
            self.cache.set(&key, value, self.settings.position_ttl),
        )
        .await
        {
            tracing::warn!(key = %key, error = %e, "Failed to cache current position");
        }
    }

    async fn handle_violation(&self, violation: &GeofenceViolation) {
        tracing::warn!(
            tracked_person_id = %violation.tracked_person_id,
            perimeter_id = %violation.perimeter_id,
            distance_meters = violation.distance_meters,
            tolerance_meters = violation.tolerance_meters,
            severity = %violation.severity,
            "Geofence violation detected"
        );
        metrics::counter!("geofence_violations_total", "severity" => violation.severity.as_str())
            .increment(1);

        if let Err(e) = bounded(
            self.settings.store_timeout,
            self.store.record_violation(violation),
        )
        .await
        {
            tracing::error!(
                violation_id = %violation.id,
                error = %e,
                "Failed to persist geofence violation"
            );
        }

        self.gateway
            .notify(
                Audience::roles(&[Role::Supervisor, Role::Admin]),
                OutboundEvent::GeofenceViolation(violation.clone()),
                Delivery::Reliable,
            )
            .await;
    }

    async fn auto_alert(&self, violation: &GeofenceViolation) -> Option<Uuid> {
        let engine = self.alerts.as_ref()?;
        if !self.settings.auto_alert || violation.severity < self.settings.auto_alert_min_severity
        {
            return None;
        }
        match engine.raise_for_violation(violation).await {
            Ok(alert) => alert.map(|a| a.id),
            Err(e) => {
                tracing::error!(
                    tracked_person_id = %violation.tracked_person_id,
                    error = %e,
                    "Automatic security alert failed"
                );
                None
            }
        }
    }
}
