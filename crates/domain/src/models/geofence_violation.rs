//! Geofence violation audit records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::location::Coordinate;

/// How far outside its tolerance a sample landed. Ordered LOW < MEDIUM < HIGH.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ViolationSeverity {
    Low,
    Medium,
    High,
}

impl ViolationSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationSeverity::Low => "LOW",
            ViolationSeverity::Medium => "MEDIUM",
            ViolationSeverity::High => "HIGH",
        }
    }
}

impl fmt::Display for ViolationSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ViolationSeverity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "LOW" => Ok(ViolationSeverity::Low),
            "MEDIUM" => Ok(ViolationSeverity::Medium),
            "HIGH" => Ok(ViolationSeverity::High),
            other => Err(format!("Unknown severity: {}", other)),
        }
    }
}

/// A sample that fell outside the tracked person's active perimeter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeofenceViolation {
    pub id: Uuid,
    pub tracked_person_id: Uuid,
    pub perimeter_id: Uuid,
    pub location: Coordinate,
    pub distance_meters: f64,
    pub tolerance_meters: f64,
    pub severity: ViolationSeverity,
    /// Capture time of the violating sample.
    pub occurred_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(ViolationSeverity::Low < ViolationSeverity::Medium);
        assert!(ViolationSeverity::Medium < ViolationSeverity::High);
    }

    #[test]
    fn test_severity_wire_form() {
        assert_eq!(
            serde_json::to_string(&ViolationSeverity::Medium).unwrap(),
            "\"MEDIUM\""
        );
        assert_eq!("high".parse::<ViolationSeverity>(), Ok(ViolationSeverity::High));
        assert!("extreme".parse::<ViolationSeverity>().is_err());
    }
}
