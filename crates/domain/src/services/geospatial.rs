//! Distance and geofence severity calculations.

use crate::models::{Coordinate, Perimeter, PerimeterCheck, ViolationSeverity};

/// Mean earth radius used by the haversine formula.
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Great-circle distance in meters between two coordinates.
pub fn distance_meters(a: Coordinate, b: Coordinate) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_METERS * c
}

/// Severity of a sample `distance` meters from center with a `tolerance` radius.
///
/// Only meaningful when `distance > tolerance`.
pub fn classify_severity(distance: f64, tolerance: f64) -> ViolationSeverity {
    let excess_pct = (distance - tolerance) / tolerance * 100.0;
    if excess_pct > 100.0 {
        ViolationSeverity::High
    } else if excess_pct > 50.0 {
        ViolationSeverity::Medium
    } else {
        ViolationSeverity::Low
    }
}

/// Evaluates a point against a perimeter.
pub fn evaluate(perimeter: &Perimeter, point: Coordinate) -> PerimeterCheck {
    let distance = distance_meters(perimeter.center, point);
    let tolerance = perimeter.radius_meters;
    let inside = distance <= tolerance;

    PerimeterCheck {
        perimeter_id: perimeter.id,
        inside,
        distance_meters: distance,
        tolerance_meters: tolerance,
        excess_meters: (distance - tolerance).max(0.0),
        severity: (!inside).then(|| classify_severity(distance, tolerance)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn perimeter(radius: f64) -> Perimeter {
        Perimeter {
            id: Uuid::new_v4(),
            name: "Warehouse".to_string(),
            center: Coordinate::new(0.0, 0.0),
            radius_meters: radius,
            tenant_id: None,
        }
    }

    #[test]
    fn test_distance_zero_for_same_point() {
        let p = Coordinate::new(48.1486, 17.1077);
        assert_eq!(distance_meters(p, p), 0.0);
    }

    #[test]
    fn test_distance_one_degree_latitude() {
        let d = distance_meters(Coordinate::new(0.0, 0.0), Coordinate::new(1.0, 0.0));
        assert!((d - 111_195.0).abs() < 1.0, "got {d}");
    }

    #[test]
    fn test_distance_is_symmetric() {
        let a = Coordinate::new(40.7128, -74.0060);
        let b = Coordinate::new(51.5074, -0.1278);
        let ab = distance_meters(a, b);
        assert!((ab - distance_meters(b, a)).abs() < 1e-6);
        assert!((ab - 5_570_000.0).abs() < 10_000.0, "got {ab}");
    }

    #[test]
    fn test_classify_severity_thresholds() {
        assert_eq!(classify_severity(120.0, 100.0), ViolationSeverity::Low);
        assert_eq!(classify_severity(150.0, 100.0), ViolationSeverity::Low);
        assert_eq!(classify_severity(151.0, 100.0), ViolationSeverity::Medium);
        assert_eq!(classify_severity(200.0, 100.0), ViolationSeverity::Medium);
        assert_eq!(classify_severity(201.0, 100.0), ViolationSeverity::High);
    }

    #[test]
    fn test_evaluate_inside() {
        let check = evaluate(&perimeter(500.0), Coordinate::new(0.001, 0.0));
        assert!(check.inside);
        assert_eq!(check.excess_meters, 0.0);
        assert!(check.severity.is_none());
    }

    #[test]
    fn test_evaluate_outside_high() {
        // ~0.009 degrees of latitude is about 1 km.
        let check = evaluate(&perimeter(100.0), Coordinate::new(0.009, 0.0));
        assert!(!check.inside);
        assert!(check.distance_meters > 990.0);
        assert_eq!(check.severity, Some(ViolationSeverity::High));
        assert!((check.excess_meters - (check.distance_meters - 100.0)).abs() < 1e-9);
    }
}
