//! Core services for field safety.
//!
//! Services own the business rules and talk to infrastructure only through
//! the traits in [`ports`].

pub mod escalation;
pub mod gateway;
pub mod geospatial;
pub mod location_pipeline;
pub mod memory;
pub mod message_queue;
pub mod ports;
pub mod resilience;
pub mod scheduler;
pub mod session_registry;

pub use escalation::{AlertEngine, EngineDeps, EngineSettings, RaiseAlert};
pub use gateway::{Connected, Delivery, DeliveryReport, NotificationGateway, Unsent};
pub use location_pipeline::{IngestOutcome, LocationPipeline, PipelineSettings};
pub use memory::{InMemoryCache, InMemoryStore, LocalBroker, MockExternalNotifier};
pub use message_queue::{OfflineQueue, QueuedMessage};
pub use ports::{
    AlertStore, Audience, Cache, Clock, Directory, Envelope, ExternalDelivery,
    ExternalNotification, ExternalNotifier, HistoryQuery, MessageBroker, SystemClock,
    TrackingStore,
};
pub use resilience::RetryPolicy;
pub use scheduler::{Scheduler, TimerHandle, TimerId, TokioScheduler};
pub use session_registry::{OutboundSender, SessionInfo, SessionRegistry};
