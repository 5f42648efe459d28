use crate::data::Point;
use crate::registration::Transform;
use rand::Rng;
use rand_distr::{Distribution, Normal};

pub struct PointTransformer;

impl PointTransformer {
    /// Rotate every point about the origin by the specified angle (in degrees)
    pub fn rotate(points: &[Point], angle_degrees: f64) -> Vec<Point> {
        let (sin_a, cos_a) = angle_degrees.to_radians().sin_cos();
        Self::map(points, |x, y| (x * cos_a - y * sin_a, x * sin_a + y * cos_a))
    }

    pub fn translate(points: &[Point], dx: f64, dy: f64) -> Vec<Point> {
        Self::map(points, |x, y| (x + dx, y + dy))
    }

    /// Scale every point about the origin
    pub fn scale(points: &[Point], factor: f64) -> Vec<Point> {
        Self::map(points, |x, y| (x * factor, y * factor))
    }

    /// Reflect across the y axis (`x -> -x`)
    pub fn mirror(points: &[Point]) -> Vec<Point> {
        Self::map(points, |x, y| (-x, y))
    }

    pub fn apply(points: &[Point], transform: &Transform) -> Vec<Point> {
        transform.apply_all(points)
    }

    /// Shift each coordinate by an independent uniform offset in `[-amplitude, amplitude]`
    pub fn jitter<R: Rng + ?Sized>(points: &[Point], amplitude: f64, rng: &mut R) -> Vec<Point> {
        if amplitude <= 0.0 {
            return points.to_vec();
        }
        points
            .iter()
            .map(|p| {
                let mut moved = p.clone();
                moved.x += rng.gen_range(-amplitude..=amplitude);
                moved.y += rng.gen_range(-amplitude..=amplitude);
                moved
            })
            .collect()
    }

    /// Add zero-mean gaussian noise with the given standard deviation
    pub fn gaussian_noise<R: Rng + ?Sized>(points: &[Point], sigma: f64, rng: &mut R) -> crate::Result<Vec<Point>> {
        let normal = Normal::new(0.0, sigma).map_err(|e| anyhow::anyhow!("invalid noise sigma {}: {}", sigma, e))?;
        Ok(points
            .iter()
            .map(|p| {
                let mut moved = p.clone();
                moved.x += normal.sample(rng);
                moved.y += normal.sample(rng);
                moved
            })
            .collect())
    }

    /// Randomly remove roughly `fraction` of the points
    pub fn drop_points<R: Rng + ?Sized>(points: &[Point], fraction: f64, rng: &mut R) -> Vec<Point> {
        let fraction = fraction.clamp(0.0, 1.0);
        points.iter().filter(|_| !rng.gen_bool(fraction)).cloned().collect()
    }

    /// Append `count` uniformly placed spurious detections inside the bounding box
    pub fn add_outliers<R: Rng + ?Sized>(points: &[Point], count: usize, rng: &mut R) -> Vec<Point> {
        let mut result = points.to_vec();
        if points.is_empty() {
            return result;
        }
        let (min_x, max_x) = bounds(points.iter().map(|p| p.x));
        let (min_y, max_y) = bounds(points.iter().map(|p| p.y));
        for i in 0..count {
            let x = if max_x > min_x { rng.gen_range(min_x..max_x) } else { min_x };
            let y = if max_y > min_y { rng.gen_range(min_y..max_y) } else { min_y };
            result.push(
                Point::new(x, y)
                    .with_confidence(rng.gen_range(0.2..0.6))
                    .with_id(format!("outlier-{}", i)),
            );
        }
        result
    }

    fn map(points: &[Point], f: impl Fn(f64, f64) -> (f64, f64)) -> Vec<Point> {
        points
            .iter()
            .map(|p| {
                let (x, y) = f(p.x, p.y);
                let mut moved = p.clone();
                moved.x = x;
                moved.y = y;
                moved
            })
            .collect()
    }
}

fn bounds(values: impl Iterator<Item = f64>) -> (f64, f64) {
    values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)))
}

/// Ground truth transformation for validation
#[derive(Debug, Clone, PartialEq)]
pub struct GroundTruth {
    pub rotation_degrees: f64,
    pub translation: (f64, f64),
    pub scale: f64,
    pub mirrored: bool,
}

impl Default for GroundTruth {
    fn default() -> Self {
        Self::new()
    }
}

impl GroundTruth {
    pub fn new() -> Self {
        Self {
            rotation_degrees: 0.0,
            translation: (0.0, 0.0),
            scale: 1.0,
            mirrored: false,
        }
    }

    pub fn rotation(angle: f64) -> Self {
        Self {
            rotation_degrees: angle,
            ..Self::new()
        }
    }

    pub fn translation(dx: f64, dy: f64) -> Self {
        Self {
            translation: (dx, dy),
            ..Self::new()
        }
    }

    pub fn with_scale(mut self, scale: f64) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_mirror(mut self, mirrored: bool) -> Self {
        self.mirrored = mirrored;
        self
    }

    pub fn to_transform(&self) -> Transform {
        Transform {
            rotation: self.rotation_degrees.to_radians(),
            scale: self.scale,
            translation: self.translation,
            mirrored: self.mirrored,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_rotate_quarter_turn() {
        let rotated = PointTransformer::rotate(&[Point::new(10.0, 0.0)], 90.0);
        assert!(rotated[0].x.abs() < 1e-9);
        assert!((rotated[0].y - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_ground_truth_matches_manual_steps() {
        let points = vec![Point::new(3.0, 4.0).with_id("p"), Point::new(-2.0, 7.0)];
        let truth = GroundTruth::rotation(30.0).with_scale(2.0).with_mirror(true);
        let truth = GroundTruth {
            translation: (5.0, -1.0),
            ..truth
        };

        let manual = PointTransformer::translate(
            &PointTransformer::scale(&PointTransformer::rotate(&PointTransformer::mirror(&points), 30.0), 2.0),
            5.0,
            -1.0,
        );
        let applied = PointTransformer::apply(&points, &truth.to_transform());
        for (m, a) in manual.iter().zip(applied.iter()) {
            assert!((m.x - a.x).abs() < 1e-9 && (m.y - a.y).abs() < 1e-9);
        }
        assert_eq!(applied[0].id, "p");
    }

    #[test]
    fn test_jitter_stays_within_amplitude() {
        let mut rng = StdRng::seed_from_u64(3);
        let points = vec![Point::new(0.0, 0.0); 50];
        let moved = PointTransformer::jitter(&points, 10.0, &mut rng);
        assert!(moved.iter().all(|p| p.x.abs() <= 10.0 && p.y.abs() <= 10.0));
        assert!(moved.iter().any(|p| p.x != 0.0));
    }

    #[test]
    fn test_gaussian_noise_rejects_bad_sigma() {
        let mut rng = StdRng::seed_from_u64(3);
        assert!(PointTransformer::gaussian_noise(&[Point::new(0.0, 0.0)], -1.0, &mut rng).is_err());
        assert_eq!(PointTransformer::gaussian_noise(&[Point::new(0.0, 0.0)], 2.0, &mut rng).unwrap().len(), 1);
    }

    #[test]
    fn test_outliers_are_appended() {
        let mut rng = StdRng::seed_from_u64(9);
        let points = vec![Point::new(0.0, 0.0), Point::new(100.0, 100.0)];
        let noisy = PointTransformer::add_outliers(&points, 5, &mut rng);
        assert_eq!(noisy.len(), 7);
        assert!(noisy[2..].iter().all(|p| (0.0..=100.0).contains(&p.x)));
    }
}
