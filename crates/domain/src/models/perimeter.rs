//! Perimeter (authorized geofence) reference data.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::geofence_violation::ViolationSeverity;
use super::location::Coordinate;

/// A circular authorized area.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Perimeter {
    pub id: Uuid,
    pub name: String,
    pub center: Coordinate,
    pub radius_meters: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<Uuid>,
}

/// Links a tracked person to a perimeter for a time window `[starts_at, ends_at)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub id: Uuid,
    pub tracked_person_id: Uuid,
    pub perimeter_id: Uuid,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

impl Assignment {
    pub fn is_active_at(&self, at: DateTime<Utc>) -> bool {
        self.starts_at <= at && at < self.ends_at
    }
}

/// Request payload for checking a coordinate against a perimeter.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PerimeterCheckRequest {
    #[validate(custom(function = "shared::validation::validate_latitude"))]
    pub latitude: f64,

    #[validate(custom(function = "shared::validation::validate_longitude"))]
    pub longitude: f64,
}

impl PerimeterCheckRequest {
    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.latitude, self.longitude)
    }
}

/// Outcome of evaluating a coordinate against a perimeter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerimeterCheck {
    pub perimeter_id: Uuid,
    pub inside: bool,
    pub distance_meters: f64,
    pub tolerance_meters: f64,
    /// Distance beyond the tolerance radius, zero when inside.
    pub excess_meters: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<ViolationSeverity>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_assignment_window_is_half_open() {
        let start = Utc::now();
        let assignment = Assignment {
            id: Uuid::new_v4(),
            tracked_person_id: Uuid::new_v4(),
            perimeter_id: Uuid::new_v4(),
            starts_at: start,
            ends_at: start + Duration::hours(8),
        };
        assert!(assignment.is_active_at(start));
        assert!(assignment.is_active_at(start + Duration::hours(4)));
        assert!(!assignment.is_active_at(start + Duration::hours(8)));
        assert!(!assignment.is_active_at(start - Duration::seconds(1)));
    }

    #[test]
    fn test_check_request_validation() {
        use validator::Validate;
        let ok = PerimeterCheckRequest {
            latitude: 10.0,
            longitude: 20.0,
        };
        assert!(ok.validate().is_ok());
        let bad = PerimeterCheckRequest {
            latitude: 10.0,
            longitude: 200.0,
        };
        assert!(bad.validate().is_err());
    }
}
