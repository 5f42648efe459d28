use crate::data::Point;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Similarity transform with optional reflection: `p' = s·R(θ)·M·p + t`,
/// where `M` reflects across the y axis (`x -> -x`) when `mirrored` is set.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    /// Rotation in radians
    pub rotation: f64,
    pub scale: f64,
    pub translation: (f64, f64),
    pub mirrored: bool,
}

impl Default for Transform {
    fn default() -> Self {
        Self::identity()
    }
}

impl Transform {
    pub fn identity() -> Self {
        Self {
            rotation: 0.0,
            scale: 1.0,
            translation: (0.0, 0.0),
            mirrored: false,
        }
    }

    pub fn new(rotation: f64, scale: f64, translation: (f64, f64), mirrored: bool) -> Self {
        Self {
            rotation,
            scale,
            translation,
            mirrored,
        }
    }

    pub fn apply_xy(&self, x: f64, y: f64) -> (f64, f64) {
        let x = if self.mirrored { -x } else { x };
        let (sin, cos) = self.rotation.sin_cos();
        (
            self.scale * (cos * x - sin * y) + self.translation.0,
            self.scale * (sin * x + cos * y) + self.translation.1,
        )
    }

    /// Transformed copy of `point`; id, source and confidence are kept.
    pub fn apply(&self, point: &Point) -> Point {
        let (x, y) = self.apply_xy(point.x, point.y);
        let mut moved = point.clone();
        moved.x = x;
        moved.y = y;
        moved
    }

    pub fn apply_all(&self, points: &[Point]) -> Vec<Point> {
        points.iter().map(|p| self.apply(p)).collect()
    }

    pub fn rotation_degrees(&self) -> f64 {
        self.rotation.to_degrees()
    }

    /// Rotation wrapped into `(-π, π]`
    pub fn normalized_rotation(&self) -> f64 {
        normalize_angle(self.rotation)
    }
}

impl fmt::Display for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rot={:.2}° scale={:.3} t=({:.1}, {:.1}){}",
            self.normalized_rotation().to_degrees(),
            self.scale,
            self.translation.0,
            self.translation.1,
            if self.mirrored { " mirrored" } else { "" }
        )
    }
}

pub fn normalize_angle(angle: f64) -> f64 {
    let mut a = angle.rem_euclid(std::f64::consts::TAU);
    if a > std::f64::consts::PI {
        a -= std::f64::consts::TAU;
    }
    a
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AlignmentQuality {
    Failed,
    Poor,
    Acceptable,
    Good,
    Excellent,
}

impl AlignmentQuality {
    pub fn from_score(score: f64) -> Self {
        if score >= 0.8 {
            AlignmentQuality::Excellent
        } else if score >= 0.6 {
            AlignmentQuality::Good
        } else if score >= 0.4 {
            AlignmentQuality::Acceptable
        } else {
            AlignmentQuality::Poor
        }
    }
}

impl fmt::Display for AlignmentQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AlignmentQuality::Failed => "failed",
            AlignmentQuality::Poor => "poor",
            AlignmentQuality::Acceptable => "acceptable",
            AlignmentQuality::Good => "good",
            AlignmentQuality::Excellent => "excellent",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InlierMatch {
    pub source_index: usize,
    pub target_index: usize,
    pub source: Point,
    pub target: Point,
    /// Residual between the transformed source and the target
    pub distance: f64,
}

/// Outcome of a registration attempt. Failures are reported as values with
/// `transform = None`, `score = 0` and a reason.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlignmentResult {
    pub transform: Option<Transform>,
    pub score: f64,
    pub inliers: Vec<InlierMatch>,
    pub mirrored: bool,
    pub quality: AlignmentQuality,
    pub iterations: usize,
    pub elapsed_ms: f64,
    pub timed_out: bool,
    pub reason: Option<String>,
}

impl AlignmentResult {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            transform: None,
            score: 0.0,
            inliers: Vec::new(),
            mirrored: false,
            quality: AlignmentQuality::Failed,
            iterations: 0,
            elapsed_ms: 0.0,
            timed_out: false,
            reason: Some(reason.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.transform.is_some() && self.quality != AlignmentQuality::Failed
    }

    pub fn inlier_count(&self) -> usize {
        self.inliers.len()
    }

    pub fn mean_residual(&self) -> f64 {
        if self.inliers.is_empty() {
            return 0.0;
        }
        self.inliers.iter().map(|m| m.distance).sum::<f64>() / self.inliers.len() as f64
    }

    pub fn with_timing(mut self, iterations: usize, elapsed_ms: f64, timed_out: bool) -> Self {
        self.iterations = iterations;
        self.elapsed_ms = elapsed_ms;
        self.timed_out = timed_out;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mirror_precedes_rotation() {
        let t = Transform::new(std::f64::consts::FRAC_PI_2, 2.0, (1.0, 1.0), true);
        let (x, y) = t.apply_xy(1.0, 0.0);
        // (1,0) -> mirror (-1,0) -> rotate 90° (0,-1) -> scale (0,-2) -> translate (1,-1)
        assert!((x - 1.0).abs() < 1e-12);
        assert!((y + 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_quality_tiers() {
        assert_eq!(AlignmentQuality::from_score(0.85), AlignmentQuality::Excellent);
        assert_eq!(AlignmentQuality::from_score(0.6), AlignmentQuality::Good);
        assert_eq!(AlignmentQuality::from_score(0.45), AlignmentQuality::Acceptable);
        assert_eq!(AlignmentQuality::from_score(0.1), AlignmentQuality::Poor);
        assert!(AlignmentQuality::Good > AlignmentQuality::Poor);
    }

    #[test]
    fn test_failed_sentinel() {
        let result = AlignmentResult::failed("too few points");
        assert!(!result.is_success());
        assert_eq!(result.score, 0.0);
        assert_eq!(result.quality, AlignmentQuality::Failed);
        assert_eq!(result.reason.as_deref(), Some("too few points"));
    }

    #[test]
    fn test_normalize_angle() {
        assert!((normalize_angle(2.5 * std::f64::consts::PI) - std::f64::consts::FRAC_PI_2).abs() < 1e-12);
        assert!((normalize_angle(-0.5) + 0.5).abs() < 1e-12);
    }
}
