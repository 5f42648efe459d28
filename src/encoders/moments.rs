//! Hu moment invariants of a point cloud.
//!
//! Each point contributes unit mass. Central moments are normalized by the
//! point count and by the cloud's RMS radius raised to the moment order, which
//! makes the seven Hu invariants independent of translation, rotation and
//! uniform scale. The sign of the seventh invariant flips under reflection.

use crate::data::Point;
use crate::encoders::Encoder;
use serde::{Deserialize, Serialize};

/// Minimum number of points for a meaningful moment set.
pub const MIN_POINTS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct RawMoments {
    pub m00: f64,
    pub m10: f64,
    pub m01: f64,
    pub m20: f64,
    pub m11: f64,
    pub m02: f64,
    pub m30: f64,
    pub m21: f64,
    pub m12: f64,
    pub m03: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct CentralMoments {
    pub mu20: f64,
    pub mu11: f64,
    pub mu02: f64,
    pub mu30: f64,
    pub mu21: f64,
    pub mu12: f64,
    pub mu03: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct MomentEncoder {
    pub raw: Option<RawMoments>,
    pub central: Option<CentralMoments>,
    /// Scale-normalized central moments, same layout as `central`
    pub normalized: Option<CentralMoments>,
    pub hu: Option<[f64; 7]>,
}

impl RawMoments {
    pub fn from_points(points: &[Point]) -> Self {
        let mut m = RawMoments::default();
        for p in points {
            let (x, y) = (p.x, p.y);
            m.m00 += 1.0;
            m.m10 += x;
            m.m01 += y;
            m.m20 += x * x;
            m.m11 += x * y;
            m.m02 += y * y;
            m.m30 += x * x * x;
            m.m21 += x * x * y;
            m.m12 += x * y * y;
            m.m03 += y * y * y;
        }
        m
    }

    pub fn centroid(&self) -> Option<(f64, f64)> {
        if self.m00 <= 0.0 {
            return None;
        }
        Some((self.m10 / self.m00, self.m01 / self.m00))
    }
}

impl CentralMoments {
    /// Central moments computed directly about the centroid (numerically
    /// steadier than expanding the raw moments for large coordinates).
    pub fn from_points(points: &[Point], centroid: (f64, f64)) -> Self {
        let mut c = CentralMoments::default();
        for p in points {
            let dx = p.x - centroid.0;
            let dy = p.y - centroid.1;
            c.mu20 += dx * dx;
            c.mu11 += dx * dy;
            c.mu02 += dy * dy;
            c.mu30 += dx * dx * dx;
            c.mu21 += dx * dx * dy;
            c.mu12 += dx * dy * dy;
            c.mu03 += dy * dy * dy;
        }
        c
    }

    fn normalize(&self, m00: f64) -> Option<CentralMoments> {
        let spread = (self.mu20 + self.mu02) / m00;
        if m00 <= 0.0 || spread <= f64::EPSILON {
            return None;
        }
        let s = spread.sqrt();
        let second = m00 * s * s;
        let third = m00 * s * s * s;
        Some(CentralMoments {
            mu20: self.mu20 / second,
            mu11: self.mu11 / second,
            mu02: self.mu02 / second,
            mu30: self.mu30 / third,
            mu21: self.mu21 / third,
            mu12: self.mu12 / third,
            mu03: self.mu03 / third,
        })
    }
}

/// The seven Hu invariants of a set of normalized central moments.
pub fn hu_invariants(n: &CentralMoments) -> [f64; 7] {
    let (n20, n11, n02) = (n.mu20, n.mu11, n.mu02);
    let (n30, n21, n12, n03) = (n.mu30, n.mu21, n.mu12, n.mu03);

    let a = n30 + n12;
    let b = n21 + n03;
    let c = n30 - 3.0 * n12;
    let d = 3.0 * n21 - n03;

    [
        n20 + n02,
        (n20 - n02).powi(2) + 4.0 * n11 * n11,
        c * c + d * d,
        a * a + b * b,
        c * a * (a * a - 3.0 * b * b) + d * b * (3.0 * a * a - b * b),
        (n20 - n02) * (a * a - b * b) + 4.0 * n11 * a * b,
        d * a * (a * a - 3.0 * b * b) - c * b * (3.0 * a * a - b * b),
    ]
}

impl MomentEncoder {
    /// Euclidean distance between the Hu vectors, `None` when either side is
    /// missing its invariants.
    pub fn distance(&self, other: &Self) -> Option<f64> {
        let (a, b) = (self.hu.as_ref()?, other.hu.as_ref()?);
        let sum: f64 = a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum();
        Some(sum.sqrt())
    }

    /// Eccentricity-like second invariant, useful for logging.
    pub fn elongation(&self) -> Option<f64> {
        self.hu.map(|h| h[1])
    }
}

impl Encoder for MomentEncoder {
    type Config = ();

    fn name(&self) -> &'static str {
        "moments"
    }

    fn encode(points: &[Point], _config: &()) -> Self {
        let raw = RawMoments::from_points(points);
        if points.len() < MIN_POINTS {
            return Self {
                raw: Some(raw),
                ..Self::default()
            };
        }

        let Some(centroid) = raw.centroid() else {
            return Self::default();
        };
        let central = CentralMoments::from_points(points, centroid);
        let normalized = central.normalize(raw.m00);
        let hu = normalized.as_ref().map(hu_invariants);

        Self {
            raw: Some(raw),
            central: Some(central),
            normalized,
            hu,
        }
    }

    fn similarity(&self, other: &Self) -> f64 {
        match self.distance(other) {
            Some(d) => 1.0 / (1.0 + d),
            None => 0.0,
        }
    }

    fn is_valid(&self) -> bool {
        self.hu.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape() -> Vec<Point> {
        vec![
            Point::new(0.0, 0.0),
            Point::new(40.0, 5.0),
            Point::new(90.0, -10.0),
            Point::new(20.0, 160.0),
            Point::new(-30.0, 220.0),
            Point::new(55.0, 300.0),
            Point::new(10.0, 80.0),
        ]
    }

    fn transform(points: &[Point], angle: f64, scale: f64, dx: f64, dy: f64, mirror: bool) -> Vec<Point> {
        let (s, c) = angle.sin_cos();
        points
            .iter()
            .map(|p| {
                let x = if mirror { -p.x } else { p.x };
                Point::new(scale * (c * x - s * p.y) + dx, scale * (s * x + c * p.y) + dy)
            })
            .collect()
    }

    #[test]
    fn test_first_invariant_is_unit() {
        let encoder = MomentEncoder::encode(&shape(), &());
        let hu = encoder.hu.unwrap();
        assert!((hu[0] - 1.0).abs() < 1e-12);
        assert!(hu[1] > 0.0);
    }

    #[test]
    fn test_similarity_invariance() {
        let a = MomentEncoder::encode(&shape(), &());
        let b = MomentEncoder::encode(&transform(&shape(), 0.7, 2.5, 300.0, -40.0, false), &());
        let d = a.distance(&b).unwrap();
        assert!(d < 1e-9, "distance {}", d);
        assert!(a.similarity(&b) > 0.999);
    }

    #[test]
    fn test_mirror_flips_seventh_invariant() {
        let a = MomentEncoder::encode(&shape(), &());
        let b = MomentEncoder::encode(&transform(&shape(), 0.0, 1.0, 0.0, 0.0, true), &());
        let (ha, hb) = (a.hu.unwrap(), b.hu.unwrap());
        for i in 0..6 {
            assert!((ha[i] - hb[i]).abs() < 1e-9);
        }
        assert!((ha[6] + hb[6]).abs() < 1e-9);
    }

    #[test]
    fn test_too_few_points_has_no_invariants() {
        let encoder = MomentEncoder::encode(&shape()[..2], &());
        assert!(!encoder.is_valid());
        assert!(encoder.raw.is_some());
        let full = MomentEncoder::encode(&shape(), &());
        assert_eq!(encoder.distance(&full), None);
        assert_eq!(encoder.similarity(&full), 0.0);
    }

    #[test]
    fn test_coincident_points_are_degenerate() {
        let points = vec![Point::new(3.0, 3.0); 5];
        assert!(!MomentEncoder::encode(&points, &()).is_valid());
    }
}
