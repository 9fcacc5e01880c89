//! Drops resolved alerts from the engine's in-process map.

use std::time::Duration;
use tracing::info;

use domain::services::AlertEngine;

use super::scheduler::{Job, JobFrequency};

pub struct AlertEvictionJob {
    engine: AlertEngine,
    older_than: Duration,
}

impl AlertEvictionJob {
    pub fn new(engine: AlertEngine, older_than: Duration) -> Self {
        Self { engine, older_than }
    }
}

#[async_trait::async_trait]
impl Job for AlertEvictionJob {
    fn name(&self) -> &'static str {
        "alert_eviction"
    }

    fn frequency(&self) -> JobFrequency {
        JobFrequency::Minutes(10)
    }

    async fn execute(&self) -> Result<(), String> {
        let evicted = self.engine.evict_terminal(self.older_than);
        if evicted > 0 {
            info!(
                evicted,
                remaining = self.engine.tracked_alerts(),
                "Evicted terminal alerts"
            );
        }
        Ok(())
    }
}
