//! Repository implementations for database operations.

pub mod emergency_alert;
pub mod geofence_violation;
pub mod location;
pub mod perimeter;
pub mod personnel;
pub mod tracked_person;

pub use emergency_alert::EmergencyAlertRepository;
pub use geofence_violation::GeofenceViolationRepository;
pub use location::{LocationHistoryFilter, LocationRepository};
pub use perimeter::PerimeterRepository;
pub use personnel::PersonnelRepository;
pub use tracked_person::TrackedPersonRepository;
