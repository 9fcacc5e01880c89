//! Domain models for the field safety core.

pub mod emergency_alert;
pub mod escalation_policy;
pub mod events;
pub mod geofence_violation;
pub mod identity;
pub mod location;
pub mod perimeter;
pub mod session;

pub use emergency_alert::{
    AlertCategory, AlertPriority, AlertStatus, EmergencyAlert, NotificationDispatch,
    ResolutionOutcome,
};
pub use escalation_policy::{DeliveryChannel, EscalationLevel, EscalationPolicy};
pub use events::{InboundEvent, OutboundEvent};
pub use geofence_violation::{GeofenceViolation, ViolationSeverity};
pub use identity::{GroupKey, Identity, Role, TrackedPerson};
pub use location::{Coordinate, LocationHistoryResponse, LocationRecord, LocationSample};
pub use perimeter::{Assignment, Perimeter, PerimeterCheck};
pub use session::{ConnectionId, Presence, PresenceChange};
