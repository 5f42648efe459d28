//! Pairwise distance matrix in a rotation-independent point order.
//!
//! Points are ordered counter-clockwise around the centroid starting from the
//! point farthest from it, so rotating, translating or scaling the cloud leaves
//! the normalized matrix unchanged. Reflection reverses the cyclic order, which
//! is why comparison also tries the reversed order of the other matrix.

use crate::config::EncoderConfig;
use crate::data::point::{centroid, distance};
use crate::data::Point;
use crate::encoders::Encoder;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;

/// Reversed order must beat the direct order by this much to report mirroring.
const MIRROR_PREFERENCE: f64 = 0.01;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistanceMatrixEncoder {
    /// Distances normalized by the largest entry, rows in canonical order
    matrix: Array2<f64>,
    max_distance: f64,
    settings: EncoderConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MatrixComparison {
    pub similarity: f64,
    pub mean_difference: f64,
    /// Cyclic offset into the other matrix's order that matched best
    pub best_shift: usize,
    pub mirrored: bool,
    pub direct_similarity: f64,
    pub mirrored_similarity: f64,
}

/// Block-averaged matrix kept in persisted documents.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ReducedMatrix {
    pub size: usize,
    /// Row-major cell averages
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MatrixSummary {
    pub count: usize,
    pub max_distance: f64,
    pub mean: f64,
    pub std_dev: f64,
}

/// Indices of `points` in canonical order: anchor first, then by
/// counter-clockwise angle around the centroid.
pub fn canonical_order(points: &[Point]) -> Vec<usize> {
    if points.is_empty() {
        return Vec::new();
    }
    let c = centroid(points);

    let mut anchor = 0;
    let mut anchor_radius = f64::NEG_INFINITY;
    for (i, p) in points.iter().enumerate() {
        let r = distance(p.xy(), c);
        if r > anchor_radius {
            anchor_radius = r;
            anchor = i;
        }
    }
    let base = (points[anchor].y - c.1).atan2(points[anchor].x - c.0);

    let mut keyed: Vec<(f64, f64, usize)> = points
        .iter()
        .enumerate()
        .map(|(i, p)| {
            let angle = if i == anchor {
                0.0
            } else {
                ((p.y - c.1).atan2(p.x - c.0) - base).rem_euclid(TAU)
            };
            (angle, distance(p.xy(), c), i)
        })
        .collect();

    keyed.sort_by(|a, b| {
        a.0.total_cmp(&b.0)
            .then_with(|| a.1.total_cmp(&b.1))
            .then_with(|| a.2.cmp(&b.2))
    });
    keyed.into_iter().map(|(_, _, i)| i).collect()
}

/// Evenly spaced subsequence of `order` holding at most `limit` entries.
fn subsample(order: Vec<usize>, limit: usize) -> Vec<usize> {
    let n = order.len();
    if limit == 0 || n <= limit {
        return order;
    }
    (0..limit).map(|i| order[i * n / limit]).collect()
}

impl DistanceMatrixEncoder {
    pub fn point_count(&self) -> usize {
        self.matrix.nrows()
    }

    pub fn matrix(&self) -> &Array2<f64> {
        &self.matrix
    }

    pub fn max_distance(&self) -> f64 {
        self.max_distance
    }

    /// Full comparison, searching cyclic offsets of `other` in both the
    /// direct and reversed orders.
    pub fn compare(&self, other: &Self) -> MatrixComparison {
        if !self.is_valid() || !other.is_valid() {
            return MatrixComparison::default();
        }

        let na = self.point_count();
        let nb = other.point_count();
        let block = self.settings.matrix_compare_block.max(3).min(na).min(nb);
        let shifts = if self.settings.matrix_cyclic_search { nb } else { 1 };

        let mut best_direct = (f64::INFINITY, 0usize);
        let mut best_reversed = (f64::INFINITY, 0usize);
        for shift in 0..shifts {
            let direct = self.block_difference(other, block, |i| (i + shift) % nb);
            if direct < best_direct.0 {
                best_direct = (direct, shift);
            }
            let reversed = self.block_difference(other, block, |i| (shift + nb - i % nb) % nb);
            if reversed < best_reversed.0 {
                best_reversed = (reversed, shift);
            }
        }

        let scale = self.settings.matrix_difference_scale;
        let direct_similarity = (1.0 - scale * best_direct.0).max(0.0);
        let mirrored_similarity = (1.0 - scale * best_reversed.0).max(0.0);
        let mirrored = mirrored_similarity > direct_similarity + MIRROR_PREFERENCE;
        let (mean_difference, best_shift) = if mirrored { best_reversed } else { best_direct };

        MatrixComparison {
            similarity: direct_similarity.max(mirrored_similarity),
            mean_difference,
            best_shift,
            mirrored,
            direct_similarity,
            mirrored_similarity,
        }
    }

    fn block_difference(&self, other: &Self, block: usize, map: impl Fn(usize) -> usize) -> f64 {
        let mut total = 0.0;
        for i in 0..block {
            let bi = map(i);
            for j in 0..block {
                total += (self.matrix[[i, j]] - other.matrix[[bi, map(j)]]).abs();
            }
        }
        total / (block * block) as f64
    }

    pub fn reduce(&self) -> ReducedMatrix {
        let n = self.point_count();
        let size = self.settings.matrix_reduced_size.min(n);
        if size == 0 {
            return ReducedMatrix::default();
        }

        let bounds = |k: usize| {
            let start = k * n / size;
            let end = ((k + 1) * n / size).max(start + 1);
            start..end
        };

        let mut values = Vec::with_capacity(size * size);
        for r in 0..size {
            for c in 0..size {
                let mut sum = 0.0;
                let mut count = 0usize;
                for i in bounds(r) {
                    for j in bounds(c) {
                        sum += self.matrix[[i, j]];
                        count += 1;
                    }
                }
                values.push(sum / count as f64);
            }
        }
        ReducedMatrix { size, values }
    }

    pub fn summary(&self) -> MatrixSummary {
        let n = self.point_count();
        let entries: Vec<f64> = (0..n)
            .flat_map(|i| ((i + 1)..n).map(move |j| (i, j)))
            .map(|(i, j)| self.matrix[[i, j]])
            .collect();
        if entries.is_empty() {
            return MatrixSummary {
                count: n,
                max_distance: self.max_distance,
                ..MatrixSummary::default()
            };
        }
        let mean = entries.iter().sum::<f64>() / entries.len() as f64;
        let variance = entries.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / entries.len() as f64;
        MatrixSummary {
            count: n,
            max_distance: self.max_distance,
            mean,
            std_dev: variance.sqrt(),
        }
    }
}

impl Encoder for DistanceMatrixEncoder {
    type Config = EncoderConfig;

    fn name(&self) -> &'static str {
        "distance_matrix"
    }

    fn encode(points: &[Point], config: &EncoderConfig) -> Self {
        let empty = Self {
            matrix: Array2::zeros((0, 0)),
            max_distance: 0.0,
            settings: config.clone(),
        };
        if points.len() < 3 {
            return empty;
        }

        let order = subsample(canonical_order(points), config.matrix_max_points);
        let n = order.len();
        let mut matrix = Array2::<f64>::zeros((n, n));
        let mut max_distance = 0.0f64;
        for i in 0..n {
            for j in (i + 1)..n {
                let d = points[order[i]].distance_to(&points[order[j]]);
                matrix[[i, j]] = d;
                matrix[[j, i]] = d;
                max_distance = max_distance.max(d);
            }
        }

        if max_distance <= f64::EPSILON {
            return empty;
        }
        matrix.mapv_inplace(|d| d / max_distance);

        Self {
            matrix,
            max_distance,
            settings: config.clone(),
        }
    }

    fn similarity(&self, other: &Self) -> f64 {
        self.compare(other).similarity
    }

    fn is_valid(&self) -> bool {
        self.point_count() >= 3
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern() -> Vec<Point> {
        vec![
            Point::new(0.0, -200.0),
            Point::new(60.0, -150.0),
            Point::new(-70.0, -120.0),
            Point::new(30.0, -40.0),
            Point::new(-40.0, 10.0),
            Point::new(50.0, 90.0),
            Point::new(-20.0, 160.0),
            Point::new(35.0, 230.0),
            Point::new(-55.0, 250.0),
        ]
    }

    fn similarity_transform(points: &[Point], angle: f64, scale: f64, mirror: bool) -> Vec<Point> {
        let (s, c) = angle.sin_cos();
        points
            .iter()
            .map(|p| {
                let x = if mirror { -p.x } else { p.x };
                Point::new(scale * (c * x - s * p.y) + 400.0, scale * (s * x + c * p.y) + 120.0)
            })
            .collect()
    }

    #[test]
    fn test_matrix_is_symmetric_and_normalized() {
        let encoder = DistanceMatrixEncoder::encode(&pattern(), &EncoderConfig::default());
        let m = encoder.matrix();
        assert_eq!(m.nrows(), 9);
        let max = m.iter().cloned().fold(0.0, f64::max);
        assert!((max - 1.0).abs() < 1e-12);
        for i in 0..9 {
            assert_eq!(m[[i, i]], 0.0);
            for j in 0..9 {
                assert_eq!(m[[i, j]], m[[j, i]]);
            }
        }
    }

    #[test]
    fn test_rotation_and_scale_invariance() {
        let config = EncoderConfig::default();
        let a = DistanceMatrixEncoder::encode(&pattern(), &config);
        let b = DistanceMatrixEncoder::encode(&similarity_transform(&pattern(), 1.1, 0.6, false), &config);
        let result = a.compare(&b);
        assert!(result.similarity > 0.999, "similarity {}", result.similarity);
        assert!(!result.mirrored);
    }

    #[test]
    fn test_reflection_is_detected() {
        let config = EncoderConfig::default();
        let a = DistanceMatrixEncoder::encode(&pattern(), &config);
        let b = DistanceMatrixEncoder::encode(&similarity_transform(&pattern(), 0.4, 1.0, true), &config);
        let result = a.compare(&b);
        assert!(result.mirrored);
        assert!(result.mirrored_similarity > 0.999);
    }

    #[test]
    fn test_shuffled_input_order_does_not_matter() {
        let config = EncoderConfig::default();
        let mut shuffled = pattern();
        shuffled.reverse();
        shuffled.swap(0, 4);
        let a = DistanceMatrixEncoder::encode(&pattern(), &config);
        let b = DistanceMatrixEncoder::encode(&shuffled, &config);
        assert!(a.similarity(&b) > 0.999);
    }

    #[test]
    fn test_large_clouds_are_subsampled() {
        let points: Vec<Point> = (0..120)
            .map(|i| {
                let t = i as f64 * 0.37;
                Point::new(t.cos() * (100.0 + i as f64), t.sin() * (80.0 + 2.0 * i as f64))
            })
            .collect();
        let encoder = DistanceMatrixEncoder::encode(&points, &EncoderConfig::default());
        assert_eq!(encoder.point_count(), 50);

        let reduced = encoder.reduce();
        assert_eq!(reduced.size, 12);
        assert_eq!(reduced.values.len(), 144);
        assert!(reduced.values.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_summary_and_degenerate_input() {
        let encoder = DistanceMatrixEncoder::encode(&pattern(), &EncoderConfig::default());
        let summary = encoder.summary();
        assert_eq!(summary.count, 9);
        assert!(summary.mean > 0.0 && summary.mean < 1.0);
        assert!(summary.std_dev > 0.0);

        let tiny = DistanceMatrixEncoder::encode(&pattern()[..2], &EncoderConfig::default());
        assert!(!tiny.is_valid());
        assert_eq!(tiny.similarity(&encoder), 0.0);
    }
}
