//! Deterministic synthetic point clouds for tests, benchmarks and the
//! recovery self-test.

use crate::data::Point;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Minimum spacing between generated sole features, in pixels.
pub const SOLE_MIN_SEPARATION: f64 = 38.0;

const FOREFOOT_CENTER: (f64, f64) = (0.0, -250.0);
const FOREFOOT_RADII: (f64, f64) = (180.0, 300.0);
const HEEL_CENTER: (f64, f64) = (0.0, 330.0);
const HEEL_RADII: (f64, f64) = (130.0, 200.0);
const MAX_ATTEMPTS_PER_POINT: usize = 500;

fn inside_ellipse(x: f64, y: f64, center: (f64, f64), radii: (f64, f64)) -> bool {
    let dx = (x - center.0) / radii.0;
    let dy = (y - center.1) / radii.1;
    dx * dx + dy * dy <= 1.0
}

/// Sole-shaped pattern: forefoot and heel ellipses filled with well separated
/// tread features. Returns fewer than `count` points only when the outline is
/// saturated.
pub fn synthetic_sole(count: usize, seed: u64) -> Vec<Point> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut points: Vec<Point> = Vec::with_capacity(count);

    let min_x = -FOREFOOT_RADII.0.max(HEEL_RADII.0);
    let max_x = -min_x;
    let min_y = FOREFOOT_CENTER.1 - FOREFOOT_RADII.1;
    let max_y = HEEL_CENTER.1 + HEEL_RADII.1;

    let mut attempts = 0;
    while points.len() < count && attempts < count * MAX_ATTEMPTS_PER_POINT {
        attempts += 1;
        let x = rng.gen_range(min_x..max_x);
        let y = rng.gen_range(min_y..max_y);
        if !inside_ellipse(x, y, FOREFOOT_CENTER, FOREFOOT_RADII) && !inside_ellipse(x, y, HEEL_CENTER, HEEL_RADII) {
            continue;
        }
        let candidate = Point::new(x, y);
        if points.iter().any(|p| p.distance_to(&candidate) < SOLE_MIN_SEPARATION) {
            continue;
        }
        let confidence = rng.gen_range(0.6..0.95);
        let index = points.len();
        points.push(
            candidate
                .with_confidence(confidence)
                .with_id(format!("sole-{}", index))
                .with_source("synthetic"),
        );
    }
    points
}

/// Uniformly scattered points in a `width` × `height` box.
pub fn random_points(count: usize, width: f64, height: f64, seed: u64) -> Vec<Point> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|i| {
            Point::new(rng.gen_range(0.0..width), rng.gen_range(0.0..height))
                .with_confidence(rng.gen_range(0.3..0.9))
                .with_id(format!("rand-{}", i))
                .with_source("random")
        })
        .collect()
}

/// Regular lattice with `cols` × `rows` points.
pub fn grid_points(cols: usize, rows: usize, spacing: f64) -> Vec<Point> {
    let mut points = Vec::with_capacity(cols * rows);
    for r in 0..rows {
        for c in 0..cols {
            points.push(
                Point::new(c as f64 * spacing, r as f64 * spacing)
                    .with_confidence(0.8)
                    .with_id(format!("grid-{}-{}", r, c))
                    .with_source("grid"),
            );
        }
    }
    points
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sole_is_deterministic_and_separated() {
        let a = synthetic_sole(60, 42);
        let b = synthetic_sole(60, 42);
        assert_eq!(a.len(), 60);
        assert_eq!(a, b);
        for i in 0..a.len() {
            for j in (i + 1)..a.len() {
                assert!(a[i].distance_to(&a[j]) >= SOLE_MIN_SEPARATION);
            }
        }
    }

    #[test]
    fn test_different_seeds_differ() {
        assert_ne!(synthetic_sole(30, 1), synthetic_sole(30, 2));
    }

    #[test]
    fn test_grid_layout() {
        let grid = grid_points(4, 3, 25.0);
        assert_eq!(grid.len(), 12);
        assert_eq!(grid[5].x, 25.0);
        assert_eq!(grid[5].y, 25.0);
    }

    #[test]
    fn test_random_points_inside_box() {
        let points = random_points(100, 300.0, 200.0, 5);
        assert!(points.iter().all(|p| p.x >= 0.0 && p.x < 300.0 && p.y >= 0.0 && p.y < 200.0));
    }
}
