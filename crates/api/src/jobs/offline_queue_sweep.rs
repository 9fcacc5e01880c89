//! Expires offline-queue entries nobody came back for.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use domain::services::OfflineQueue;

use super::scheduler::{Job, JobFrequency};

pub struct OfflineQueueSweepJob {
    queue: Arc<OfflineQueue>,
    max_age: Duration,
}

impl OfflineQueueSweepJob {
    pub fn new(queue: Arc<OfflineQueue>, max_age: Duration) -> Self {
        Self { queue, max_age }
    }
}

#[async_trait::async_trait]
impl Job for OfflineQueueSweepJob {
    fn name(&self) -> &'static str {
        "offline_queue_sweep"
    }

    fn frequency(&self) -> JobFrequency {
        JobFrequency::Minutes(15)
    }

    async fn execute(&self) -> Result<(), String> {
        let max_age = chrono::Duration::from_std(self.max_age)
            .map_err(|e| format!("Invalid queue max age: {}", e))?;
        let removed = self.queue.sweep(max_age, chrono::Utc::now());

        if removed > 0 {
            metrics::counter!("offline_queue_expired_total").increment(removed as u64);
            info!(
                removed,
                max_age_secs = self.max_age.as_secs(),
                "Expired offline queue messages"
            );
        } else {
            debug!("No offline queue messages expired");
        }
        Ok(())
    }
}
