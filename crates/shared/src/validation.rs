//! Common validation utilities for position reports.
//!
//! Every function here is usable both as a `validator` custom function on request
//! DTOs and directly from the location pipeline, which validates samples that arrive
//! over the realtime socket without going through a DTO.

use chrono::{DateTime, Duration, Utc};
use validator::ValidationError;

/// Maximum age of a capture timestamp in days.
pub const MAX_CAPTURE_AGE_DAYS: i64 = 7;

/// Maximum allowed future capture timestamp in seconds (clock skew on handsets).
pub const MAX_FUTURE_TOLERANCE_SECS: i64 = 300;

fn error(code: &'static str, message: &'static str) -> ValidationError {
    let mut err = ValidationError::new(code);
    err.message = Some(message.into());
    err
}

/// Validates that a latitude value is finite and within -90..=90.
pub fn validate_latitude(lat: f64) -> Result<(), ValidationError> {
    if lat.is_finite() && (-90.0..=90.0).contains(&lat) {
        Ok(())
    } else {
        Err(error("latitude_range", "Latitude must be between -90 and 90"))
    }
}

/// Validates that a longitude value is finite and within -180..=180.
pub fn validate_longitude(lon: f64) -> Result<(), ValidationError> {
    if lon.is_finite() && (-180.0..=180.0).contains(&lon) {
        Ok(())
    } else {
        Err(error(
            "longitude_range",
            "Longitude must be between -180 and 180",
        ))
    }
}

/// Validates that accuracy (meters) is non-negative.
pub fn validate_accuracy(accuracy: f64) -> Result<(), ValidationError> {
    if accuracy.is_finite() && accuracy >= 0.0 {
        Ok(())
    } else {
        Err(error("accuracy_range", "Accuracy must be non-negative"))
    }
}

/// Validates that heading is within 0..=360 degrees.
pub fn validate_heading(heading: f64) -> Result<(), ValidationError> {
    if (0.0..=360.0).contains(&heading) {
        Ok(())
    } else {
        Err(error("heading_range", "Heading must be between 0 and 360"))
    }
}

/// Validates that speed is non-negative.
pub fn validate_speed(speed: f64) -> Result<(), ValidationError> {
    if speed.is_finite() && speed >= 0.0 {
        Ok(())
    } else {
        Err(error("speed_range", "Speed must be non-negative"))
    }
}

/// Validates that battery level is within 0..=100.
pub fn validate_battery_level(level: i32) -> Result<(), ValidationError> {
    if (0..=100).contains(&level) {
        Ok(())
    } else {
        Err(error(
            "battery_range",
            "Battery level must be between 0 and 100",
        ))
    }
}

/// Validates a capture timestamp against `now`.
///
/// A sample may be up to five minutes in the future and at most seven days old;
/// handsets buffer reports while offline, so older-than-receipt is normal.
pub fn validate_capture_time(
    captured_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<(), ValidationError> {
    if captured_at > now + Duration::seconds(MAX_FUTURE_TOLERANCE_SECS) {
        return Err(error(
            "captured_at_future",
            "Capture time cannot be in the future",
        ));
    }
    if captured_at < now - Duration::days(MAX_CAPTURE_AGE_DAYS) {
        return Err(error(
            "captured_at_old",
            "Capture time cannot be older than 7 days",
        ));
    }
    Ok(())
}

/// Validates a tolerance radius in meters.
pub fn validate_radius(radius: f64) -> Result<(), ValidationError> {
    if radius.is_finite() && radius > 0.0 {
        Ok(())
    } else {
        Err(error("radius_range", "Radius must be greater than zero"))
    }
}

/// Returns the message attached to a validation error, or its code.
pub fn describe(err: &ValidationError) -> String {
    err.message
        .as_ref()
        .map(|m| m.to_string())
        .unwrap_or_else(|| err.code.to_string())
}
