//! Heuristics that cap scores of alignments which look like chance agreement.
//!
//! Dense inlier thresholds make it easy to line up unrelated or highly regular
//! point sets. Any hypothesis matching one of the patterns below is capped at
//! the configured ceiling unless it is an otherwise excellent fit.

use crate::config::AlignerConfig;
use crate::data::{Point, SpatialIndex};
use crate::encoders::vector_signature::nearest_neighbors;
use std::collections::BTreeSet;

const ANGLE_BUCKET_DEGREES: f64 = 10.0;
const GRID_SPACING_CV: f64 = 0.1;
const GRID_ORIENTATION_COHERENCE: f64 = 0.9;
const EXCELLENT_MIN_INLIERS: usize = 6;

/// Properties of the target set, computed once per alignment.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetTraits {
    /// Distinct 10° buckets of interior angles in nearest-neighbour triangles
    pub angle_buckets: usize,
    /// Coefficient of variation of nearest-neighbour distances
    pub spacing_cv: f64,
    pub regular_grid: bool,
}

impl TargetTraits {
    pub fn analyze(points: &[Point]) -> Self {
        Self::analyze_indexed(points, &SpatialIndex::new(points))
    }

    pub fn analyze_indexed(points: &[Point], spatial: &SpatialIndex) -> Self {
        let nn: Vec<(usize, f64)> = (0..points.len())
            .filter_map(|i| nearest_neighbors(points, spatial, i, 1).first().copied())
            .collect();

        let spacing_cv = coefficient_of_variation(nn.iter().map(|(_, d)| *d));

        // Lattices have nearest-neighbour directions at multiples of 90°,
        // which collapse onto one direction under angle quadrupling.
        let (mut sx, mut sy) = (0.0, 0.0);
        for (i, (j, _)) in nn.iter().enumerate() {
            let theta = (points[*j].y - points[i].y).atan2(points[*j].x - points[i].x);
            sx += (4.0 * theta).cos();
            sy += (4.0 * theta).sin();
        }
        let coherence = if nn.is_empty() {
            0.0
        } else {
            (sx * sx + sy * sy).sqrt() / nn.len() as f64
        };

        Self {
            angle_buckets: angle_buckets(points, spatial),
            spacing_cv,
            regular_grid: !nn.is_empty() && spacing_cv < GRID_SPACING_CV && coherence > GRID_ORIENTATION_COHERENCE,
        }
    }
}

fn coefficient_of_variation(values: impl Iterator<Item = f64>) -> f64 {
    let values: Vec<f64> = values.collect();
    if values.is_empty() {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    if mean <= f64::EPSILON {
        return 0.0;
    }
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt() / mean
}

fn angle_buckets(points: &[Point], spatial: &SpatialIndex) -> usize {
    let mut buckets = BTreeSet::new();
    for i in 0..points.len() {
        let neighbors = nearest_neighbors(points, spatial, i, 2);
        if neighbors.len() < 2 {
            continue;
        }
        let triangle = [&points[i], &points[neighbors[0].0], &points[neighbors[1].0]];
        for k in 0..3 {
            let p = triangle[k];
            let q = triangle[(k + 1) % 3];
            let r = triangle[(k + 2) % 3];
            let (v1, v2) = ((q.x - p.x, q.y - p.y), (r.x - p.x, r.y - p.y));
            let (n1, n2) = (v1.0.hypot(v1.1), v2.0.hypot(v2.1));
            if n1 <= f64::EPSILON || n2 <= f64::EPSILON {
                continue;
            }
            let cos = ((v1.0 * v2.0 + v1.1 * v2.1) / (n1 * n2)).clamp(-1.0, 1.0);
            buckets.insert((cos.acos().to_degrees() / ANGLE_BUCKET_DEGREES) as u32);
        }
    }
    buckets.len()
}

/// Inlier statistics of one hypothesis, as seen by the guard.
#[derive(Debug, Clone, Copy)]
pub struct HypothesisStats {
    pub inliers: usize,
    pub inlier_ratio: f64,
    pub mean_residual: f64,
    pub spread: f64,
    pub threshold: f64,
}

pub struct RandomnessGuard<'a> {
    config: &'a AlignerConfig,
    target: TargetTraits,
}

impl<'a> RandomnessGuard<'a> {
    pub fn new(config: &'a AlignerConfig, target: TargetTraits) -> Self {
        Self { config, target }
    }

    pub fn target(&self) -> &TargetTraits {
        &self.target
    }

    /// First suspicious pattern matched by the hypothesis, if any.
    pub fn suspicion(&self, stats: &HypothesisStats) -> Option<&'static str> {
        if stats.spread < self.config.min_inlier_spread {
            Some("clustered_inliers")
        } else if self.target.angle_buckets < self.config.min_angle_buckets {
            Some("few_angle_buckets")
        } else if self.target.spacing_cv < self.config.min_spacing_cv {
            Some("uniform_spacing")
        } else if self.target.regular_grid {
            Some("regular_grid")
        } else if stats.mean_residual > self.config.max_residual_fraction * stats.threshold {
            Some("loose_residuals")
        } else {
            None
        }
    }

    fn is_excellent(&self, stats: &HypothesisStats) -> bool {
        stats.inliers >= EXCELLENT_MIN_INLIERS
            && stats.inlier_ratio > self.config.min_inlier_ratio
            && stats.mean_residual <= stats.threshold / 4.0
            && !self.target.regular_grid
    }

    /// Capped score and the pattern responsible, when the cap applied.
    pub fn apply(&self, score: f64, stats: &HypothesisStats) -> (f64, Option<&'static str>) {
        match self.suspicion(stats) {
            Some(reason) if !self.is_excellent(stats) && score > self.config.random_score_ceiling => {
                (self.config.random_score_ceiling, Some(reason))
            }
            _ => (score, None),
        }
    }
}
