//! Background job scheduler and job implementations.

mod alert_eviction;
mod cleanup_locations;
mod offline_queue_sweep;
mod realtime_metrics;
mod scheduler;

pub use alert_eviction::AlertEvictionJob;
pub use cleanup_locations::CleanupLocationsJob;
pub use offline_queue_sweep::OfflineQueueSweepJob;
pub use realtime_metrics::RealtimeMetricsJob;
pub use scheduler::{Job, JobFrequency, JobScheduler};
