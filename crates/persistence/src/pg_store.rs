//! PostgreSQL implementation of the domain store ports.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::entities::EmergencyAlertEntity;
use crate::repositories::{
    EmergencyAlertRepository, GeofenceViolationRepository, LocationHistoryFilter,
    LocationRepository, PerimeterRepository, PersonnelRepository, TrackedPersonRepository,
};
use domain::models::{
    EmergencyAlert, GeofenceViolation, GroupKey, LocationRecord, LocationSample, Perimeter,
    TrackedPerson,
};
use domain::services::ports::{AlertStore, Directory, HistoryQuery, TrackingStore};
use domain::StoreError;

/// Maps driver errors onto the port taxonomy. Connectivity problems are
/// transient and may be retried; everything else is not.
pub fn store_error(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StoreError::Unavailable(err.to_string())
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            StoreError::Serialization(err.to_string())
        }
        other => StoreError::Backend(other.to_string()),
    }
}

fn readable_alerts(rows: Vec<EmergencyAlertEntity>) -> Vec<EmergencyAlert> {
    let mut alerts = Vec::with_capacity(rows.len());
    for row in rows {
        match EmergencyAlert::try_from(row) {
            Ok(alert) => alerts.push(alert),
            Err(e) => tracing::error!(error = %e, "Skipping unreadable emergency alert row"),
        }
    }
    alerts
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    persons: TrackedPersonRepository,
    personnel: PersonnelRepository,
    perimeters: PerimeterRepository,
    locations: LocationRepository,
    violations: GeofenceViolationRepository,
    alerts: EmergencyAlertRepository,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            persons: TrackedPersonRepository::new(pool.clone()),
            personnel: PersonnelRepository::new(pool.clone()),
            perimeters: PerimeterRepository::new(pool.clone()),
            locations: LocationRepository::new(pool.clone()),
            violations: GeofenceViolationRepository::new(pool.clone()),
            alerts: EmergencyAlertRepository::new(pool.clone()),
            pool,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl TrackingStore for PgStore {
    async fn tracked_person(&self, id: Uuid) -> Result<Option<TrackedPerson>, StoreError> {
        let entity = self.persons.find_by_id(id).await.map_err(store_error)?;
        Ok(entity.map(TrackedPerson::from))
    }

    async fn append_location(
        &self,
        sample: &LocationSample,
        received_at: DateTime<Utc>,
    ) -> Result<LocationRecord, StoreError> {
        let entity = self
            .locations
            .insert(sample, received_at)
            .await
            .map_err(store_error)?;
        Ok(entity.into())
    }

    async fn latest_location(
        &self,
        tracked_person_id: Uuid,
    ) -> Result<Option<LocationRecord>, StoreError> {
        let entity = self
            .locations
            .latest(tracked_person_id)
            .await
            .map_err(store_error)?;
        Ok(entity.map(LocationRecord::from))
    }

    async fn location_history(
        &self,
        query: &HistoryQuery,
    ) -> Result<Vec<LocationRecord>, StoreError> {
        let filter = LocationHistoryFilter {
            tracked_person_id: query.tracked_person_id,
            from: query.from,
            to: query.to,
            after: query.after.map(|c| (c.captured_at, c.id)),
            limit: query.limit,
        };
        let rows = self.locations.history(&filter).await.map_err(store_error)?;
        Ok(rows.into_iter().map(LocationRecord::from).collect())
    }

    async fn active_perimeter(
        &self,
        tracked_person_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<Perimeter>, StoreError> {
        let entity = self
            .perimeters
            .find_active_for(tracked_person_id, at)
            .await
            .map_err(store_error)?;
        Ok(entity.map(Perimeter::from))
    }

    async fn perimeter(&self, id: Uuid) -> Result<Option<Perimeter>, StoreError> {
        let entity = self.perimeters.find_by_id(id).await.map_err(store_error)?;
        Ok(entity.map(Perimeter::from))
    }

    async fn record_violation(&self, violation: &GeofenceViolation) -> Result<(), StoreError> {
        self.violations.insert(violation).await.map_err(store_error)
    }

    async fn prune_locations(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        self.locations
            .delete_before(cutoff)
            .await
            .map_err(store_error)
    }
}

#[async_trait]
impl AlertStore for PgStore {
    async fn insert_alert(&self, alert: &EmergencyAlert) -> Result<(), StoreError> {
        let dispatches = serde_json::to_value(&alert.dispatches)?;
        self.alerts
            .insert(alert, dispatches)
            .await
            .map_err(store_error)
    }

    async fn update_alert(&self, alert: &EmergencyAlert) -> Result<(), StoreError> {
        let dispatches = serde_json::to_value(&alert.dispatches)?;
        let updated = self
            .alerts
            .update(alert, dispatches)
            .await
            .map_err(store_error)?;
        if updated == 0 {
            return Err(StoreError::Backend(format!(
                "Alert {} does not exist",
                alert.id
            )));
        }
        Ok(())
    }

    async fn find_alert(&self, id: Uuid) -> Result<Option<EmergencyAlert>, StoreError> {
        self.alerts
            .find_by_id(id)
            .await
            .map_err(store_error)?
            .map(EmergencyAlert::try_from)
            .transpose()
    }

    async fn open_alerts(&self) -> Result<Vec<EmergencyAlert>, StoreError> {
        let rows = self.alerts.find_open().await.map_err(store_error)?;
        Ok(readable_alerts(rows))
    }

    async fn active_alerts(&self) -> Result<Vec<EmergencyAlert>, StoreError> {
        let rows = self.alerts.find_active().await.map_err(store_error)?;
        Ok(readable_alerts(rows))
    }
}

#[async_trait]
impl Directory for PgStore {
    async fn members_of(&self, group: &GroupKey) -> Result<Vec<Uuid>, StoreError> {
        let result = match group {
            GroupKey::Role(role) => self.personnel.ids_by_role(role.as_str()).await,
            GroupKey::Tenant(tenant_id) => self.personnel.ids_by_tenant(*tenant_id).await,
            GroupKey::TrackedPerson(person_id) => {
                self.personnel.ids_by_tracked_person(*person_id).await
            }
            GroupKey::Identity(id) => {
                return Ok(vec![*id]);
            }
            GroupKey::Room(_) => return Ok(Vec::new()),
        };
        result.map_err(store_error)
    }
}
