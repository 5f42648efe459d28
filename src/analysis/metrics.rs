//! Error measures between a recovered transform and the one actually applied.

use crate::data::Point;
use crate::registration::{normalize_angle, Transform};

/// Absolute rotation difference in degrees, wrapped into `[0, 180]`.
pub fn rotation_error_degrees(recovered: &Transform, truth: &Transform) -> f64 {
    normalize_angle(recovered.rotation - truth.rotation).abs().to_degrees()
}

/// Relative scale error, `|s - s*| / s*`.
pub fn scale_error_ratio(recovered: &Transform, truth: &Transform) -> f64 {
    if truth.scale.abs() <= f64::EPSILON {
        return f64::INFINITY;
    }
    (recovered.scale - truth.scale).abs() / truth.scale
}

pub fn translation_error(recovered: &Transform, truth: &Transform) -> f64 {
    let dx = recovered.translation.0 - truth.translation.0;
    let dy = recovered.translation.1 - truth.translation.1;
    (dx * dx + dy * dy).sqrt()
}

/// Mean distance between where the two transforms send each point.
///
/// Unlike [`translation_error`] this does not grow with the distance of the
/// cloud from the origin.
pub fn mean_point_error(recovered: &Transform, truth: &Transform, points: &[Point]) -> f64 {
    if points.is_empty() {
        return 0.0;
    }
    points
        .iter()
        .map(|p| {
            let a = recovered.apply_xy(p.x, p.y);
            let b = truth.apply_xy(p.x, p.y);
            ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt()
        })
        .sum::<f64>()
        / points.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotation_error_wraps() {
        let a = Transform::new(179f64.to_radians(), 1.0, (0.0, 0.0), false);
        let b = Transform::new(-179f64.to_radians(), 1.0, (0.0, 0.0), false);
        assert!((rotation_error_degrees(&a, &b) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_scale_and_translation_errors() {
        let a = Transform::new(0.0, 1.1, (3.0, 4.0), false);
        let b = Transform::identity();
        assert!((scale_error_ratio(&a, &b) - 0.1).abs() < 1e-12);
        assert!((translation_error(&a, &b) - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_mean_point_error_of_pure_shift() {
        let a = Transform::new(0.0, 1.0, (0.0, 2.0), false);
        let points = vec![Point::new(100.0, 0.0), Point::new(-50.0, 7.0)];
        assert!((mean_point_error(&a, &Transform::identity(), &points) - 2.0).abs() < 1e-12);
    }
}
