//! Location domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::error::CoreError;
use shared::validation;

/// A WGS84 coordinate pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct Coordinate {
    #[validate(custom(function = "shared::validation::validate_latitude"))]
    pub latitude: f64,

    #[validate(custom(function = "shared::validation::validate_longitude"))]
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// A single position report for a tracked person.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationSample {
    pub tracked_person_id: Uuid,
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: f64,
    pub captured_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub battery_level: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
}

impl LocationSample {
    pub fn new(
        tracked_person_id: Uuid,
        latitude: f64,
        longitude: f64,
        accuracy: f64,
        captured_at: DateTime<Utc>,
    ) -> Self {
        Self {
            tracked_person_id,
            latitude,
            longitude,
            accuracy,
            captured_at,
            battery_level: None,
            speed: None,
            heading: None,
        }
    }

    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.latitude, self.longitude)
    }

    /// Checks ranges of every field. Samples reach the pipeline both from HTTP
    /// DTOs and from the realtime socket, so this runs regardless of origin.
    pub fn validate(&self, now: DateTime<Utc>) -> Result<(), CoreError> {
        let mut problems = Vec::new();
        let mut check = |field: &str, result: Result<(), validator::ValidationError>| {
            if let Err(e) = result {
                problems.push(format!("{}: {}", field, validation::describe(&e)));
            }
        };

        check("latitude", validation::validate_latitude(self.latitude));
        check("longitude", validation::validate_longitude(self.longitude));
        check("accuracy", validation::validate_accuracy(self.accuracy));
        check(
            "capturedAt",
            validation::validate_capture_time(self.captured_at, now),
        );
        if let Some(level) = self.battery_level {
            check("batteryLevel", validation::validate_battery_level(level));
        }
        if let Some(speed) = self.speed {
            check("speed", validation::validate_speed(speed));
        }
        if let Some(heading) = self.heading {
            check("heading", validation::validate_heading(heading));
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(CoreError::Validation(problems.join(", ")))
        }
    }
}

/// A stored sample. `id` orders samples that share a capture time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationRecord {
    pub id: i64,
    #[serde(flatten)]
    pub sample: LocationSample,
    pub received_at: DateTime<Utc>,
}

/// Request payload for submitting a sample over HTTP.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SubmitLocationRequest {
    /// Defaults to the caller's own tracked person.
    pub tracked_person_id: Option<Uuid>,

    #[validate(custom(function = "shared::validation::validate_latitude"))]
    pub latitude: f64,

    #[validate(custom(function = "shared::validation::validate_longitude"))]
    pub longitude: f64,

    #[validate(custom(function = "shared::validation::validate_accuracy"))]
    pub accuracy: f64,

    /// Capture time; receipt time when absent.
    pub timestamp: Option<DateTime<Utc>>,

    #[validate(custom(function = "shared::validation::validate_battery_level"))]
    pub battery_level: Option<i32>,

    #[validate(custom(function = "shared::validation::validate_speed"))]
    pub speed: Option<f64>,

    #[validate(custom(function = "shared::validation::validate_heading"))]
    pub heading: Option<f64>,
}

impl SubmitLocationRequest {
    pub fn into_sample(self, tracked_person_id: Uuid, now: DateTime<Utc>) -> LocationSample {
        LocationSample {
            tracked_person_id,
            latitude: self.latitude,
            longitude: self.longitude,
            accuracy: self.accuracy,
            captured_at: self.timestamp.unwrap_or(now),
            battery_level: self.battery_level,
            speed: self.speed,
            heading: self.heading,
        }
    }
}

/// Query parameters for location history.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LocationHistoryQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
    pub cursor: Option<String>,
}

/// A page of location history.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationHistoryResponse {
    pub locations: Vec<LocationRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}
