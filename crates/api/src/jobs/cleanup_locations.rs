//! Location cleanup background job.

use std::sync::Arc;
use tracing::info;

use domain::services::LocationPipeline;

use super::scheduler::{Job, JobFrequency};

/// Deletes location samples captured before the retention window.
pub struct CleanupLocationsJob {
    pipeline: Arc<LocationPipeline>,
    retention_days: u32,
}

impl CleanupLocationsJob {
    pub fn new(pipeline: Arc<LocationPipeline>, retention_days: u32) -> Self {
        Self {
            pipeline,
            retention_days,
        }
    }
}

#[async_trait::async_trait]
impl Job for CleanupLocationsJob {
    fn name(&self) -> &'static str {
        "cleanup_locations"
    }

    fn frequency(&self) -> JobFrequency {
        JobFrequency::Hourly
    }

    async fn execute(&self) -> Result<(), String> {
        let deleted = self
            .pipeline
            .prune(chrono::Duration::days(i64::from(self.retention_days)))
            .await
            .map_err(|e| format!("Failed to delete old locations: {}", e))?;

        info!(
            deleted,
            retention_days = self.retention_days,
            "Cleaned up old locations"
        );
        Ok(())
    }
}
