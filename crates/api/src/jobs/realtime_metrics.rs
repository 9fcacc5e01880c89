//! Background job to record realtime and connection pool gauges.

use sqlx::PgPool;
use std::sync::Arc;

use domain::services::{AlertEngine, NotificationGateway};

use super::scheduler::{Job, JobFrequency};

/// Publishes session, queue and escalation gauges, plus pool metrics when a
/// database is attached.
pub struct RealtimeMetricsJob {
    gateway: Arc<NotificationGateway>,
    engine: AlertEngine,
    pool: Option<PgPool>,
}

impl RealtimeMetricsJob {
    pub fn new(gateway: Arc<NotificationGateway>, engine: AlertEngine, pool: Option<PgPool>) -> Self {
        Self {
            gateway,
            engine,
            pool,
        }
    }

    fn record(&self) {
        let registry = self.gateway.registry();
        metrics::gauge!("realtime_sessions").set(registry.connection_count() as f64);
        metrics::gauge!("realtime_identities_online").set(registry.online_count() as f64);
        metrics::gauge!("offline_queue_depth").set(self.gateway.queue().total_depth() as f64);
        metrics::gauge!("alerts_escalating").set(self.engine.armed_alerts() as f64);
        metrics::gauge!("alerts_in_memory").set(self.engine.tracked_alerts() as f64);

        if let Some(pool) = &self.pool {
            persistence::metrics::record_pool_metrics(pool);
        }
    }
}

#[async_trait::async_trait]
impl Job for RealtimeMetricsJob {
    fn name(&self) -> &'static str {
        "realtime_metrics"
    }

    fn frequency(&self) -> JobFrequency {
        JobFrequency::Minutes(1)
    }

    async fn execute(&self) -> Result<(), String> {
        self.record();
        Ok(())
    }
}
