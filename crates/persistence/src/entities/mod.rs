//! Database entity definitions.
//!
//! Entities are direct mappings to database rows.

pub mod emergency_alert;
pub mod geofence_violation;
pub mod location;
pub mod perimeter;
pub mod personnel;
pub mod tracked_person;

pub use emergency_alert::EmergencyAlertEntity;
pub use geofence_violation::GeofenceViolationEntity;
pub use location::LocationEntity;
pub use perimeter::{AssignmentEntity, PerimeterEntity};
pub use personnel::PersonnelEntity;
pub use tracked_person::TrackedPersonEntity;
