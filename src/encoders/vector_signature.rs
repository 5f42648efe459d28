//! Local star signatures built from each point's nearest neighbours.
//!
//! A signature keeps the sorted neighbour distances (normalized by the cloud's
//! median nearest-neighbour spacing) and the sorted angular gaps between the
//! neighbour directions. Both lists are unchanged by rotation, uniform scale and
//! reflection, so signatures can be matched across impressions before any
//! alignment is known.

use crate::config::EncoderConfig;
use crate::data::{Point, SpatialIndex};
use crate::encoders::Encoder;
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StarSignature {
    pub point_index: usize,
    /// Normalized neighbour distances, ascending
    pub distances: Vec<f64>,
    /// Angular gaps between consecutive neighbour directions, ascending
    pub gaps: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VectorSignatureEncoder {
    pub signatures: Vec<StarSignature>,
    pub neighbors: usize,
    /// Median nearest-neighbour distance used for normalization
    pub scale: f64,
    pub match_threshold: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SignatureComparison {
    pub similarity: f64,
    pub match_count: usize,
    /// Matched `(self index, other index, signature distance)` triples
    pub matches: Vec<(usize, usize, f64)>,
}

/// The `k` nearest neighbours of `points[index]` as `(index, distance)`,
/// nearest first.
pub fn nearest_neighbors(points: &[Point], spatial: &SpatialIndex, index: usize, k: usize) -> Vec<(usize, f64)> {
    let origin = &points[index];
    spatial.neighbors_of(index, origin.x, origin.y, k)
}

/// Median distance from each point to its nearest neighbour.
pub fn median_nn_distance(points: &[Point], spatial: &SpatialIndex) -> f64 {
    let mut nn: Vec<f64> = (0..points.len())
        .filter_map(|i| nearest_neighbors(points, spatial, i, 1).first().map(|(_, d)| *d))
        .collect();
    if nn.is_empty() {
        return 0.0;
    }
    nn.sort_by(|a, b| a.total_cmp(b));
    nn[nn.len() / 2]
}

impl StarSignature {
    fn build(points: &[Point], spatial: &SpatialIndex, index: usize, k: usize, scale: f64) -> Self {
        let origin = &points[index];
        let neighbors = nearest_neighbors(points, spatial, index, k);

        let mut distances: Vec<f64> = neighbors.iter().map(|(_, d)| d / scale).collect();
        distances.sort_by(|a, b| a.total_cmp(b));

        let mut angles: Vec<f64> = neighbors
            .iter()
            .map(|(j, _)| (points[*j].y - origin.y).atan2(points[*j].x - origin.x))
            .collect();
        angles.sort_by(|a, b| a.total_cmp(b));

        let mut gaps = Vec::with_capacity(angles.len());
        for i in 0..angles.len() {
            let next = if i + 1 < angles.len() {
                angles[i + 1]
            } else {
                angles[0] + TAU
            };
            gaps.push(next - angles[i]);
        }
        gaps.sort_by(|a, b| a.total_cmp(b));

        Self {
            point_index: index,
            distances,
            gaps,
        }
    }

    /// Dissimilarity of two signatures; 0 for identical stars.
    pub fn distance(&self, other: &StarSignature) -> f64 {
        let k = self.distances.len().min(other.distances.len());
        if k == 0 {
            return f64::INFINITY;
        }

        let mean_abs = |a: &[f64], b: &[f64]| {
            let len = a.len().min(b.len()).max(1);
            a.iter().zip(b.iter()).map(|(x, y)| (x - y).abs()).sum::<f64>() / len as f64
        };

        let scale_a = self.distances[..k].iter().sum::<f64>() / k as f64;
        let scale_b = other.distances[..k].iter().sum::<f64>() / k as f64;
        let mean_distance = 0.5 * (scale_a + scale_b);
        let distance_term = if mean_distance > f64::EPSILON {
            mean_abs(&self.distances[..k], &other.distances[..k]) / mean_distance
        } else {
            0.0
        };

        let g = self.gaps.len().min(other.gaps.len());
        let gap_term = if g > 0 {
            mean_abs(&self.gaps[..g], &other.gaps[..g]) / (TAU / g as f64)
        } else {
            0.0
        };

        0.5 * distance_term + 0.5 * gap_term
    }
}

impl VectorSignatureEncoder {
    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }

    /// Greedy one-to-one signature matching on ascending distance.
    pub fn compare(&self, other: &Self) -> SignatureComparison {
        if self.is_empty() || other.is_empty() {
            return SignatureComparison::default();
        }

        let mut pairs: Vec<(usize, usize, f64)> = Vec::new();
        for (i, a) in self.signatures.iter().enumerate() {
            for (j, b) in other.signatures.iter().enumerate() {
                let d = a.distance(b);
                if d < self.match_threshold {
                    pairs.push((i, j, d));
                }
            }
        }
        pairs.sort_by(|a, b| a.2.total_cmp(&b.2));

        let mut used_a = vec![false; self.len()];
        let mut used_b = vec![false; other.len()];
        let mut matches = Vec::new();
        for (i, j, d) in pairs {
            if used_a[i] || used_b[j] {
                continue;
            }
            used_a[i] = true;
            used_b[j] = true;
            matches.push((self.signatures[i].point_index, other.signatures[j].point_index, d));
        }

        let denominator = self.len().min(other.len()) as f64;
        SignatureComparison {
            similarity: (matches.len() as f64 / denominator).min(1.0),
            match_count: matches.len(),
            matches,
        }
    }

    /// For each point of `self`, the `per_point` most similar points of
    /// `other`, best first.
    pub fn candidates(&self, other: &Self, per_point: usize) -> Vec<Vec<usize>> {
        (0..self.len())
            .map(|point_index| self.candidates_for(point_index, other, per_point))
            .collect()
    }

    /// The `per_point` points of `other` whose signatures are closest to the
    /// signature of `point_index`, best first.
    pub fn candidates_for(&self, point_index: usize, other: &Self, per_point: usize) -> Vec<usize> {
        let Some(signature) = self.signature(point_index) else {
            return Vec::new();
        };
        let keep = per_point.max(1);
        let mut best: Vec<(usize, f64)> = Vec::with_capacity(keep + 1);
        for b in &other.signatures {
            let d = signature.distance(b);
            if best.len() == keep && best.last().is_some_and(|(_, worst)| d >= *worst) {
                continue;
            }
            let at = best.partition_point(|(_, existing)| *existing <= d);
            best.insert(at, (b.point_index, d));
            best.truncate(keep);
        }
        best.into_iter().map(|(j, _)| j).collect()
    }

    fn signature(&self, point_index: usize) -> Option<&StarSignature> {
        match self.signatures.get(point_index) {
            Some(sig) if sig.point_index == point_index => Some(sig),
            _ => self.signatures.iter().find(|sig| sig.point_index == point_index),
        }
    }
}

impl Encoder for VectorSignatureEncoder {
    type Config = EncoderConfig;

    fn name(&self) -> &'static str {
        "vector_signature"
    }

    fn encode(points: &[Point], config: &EncoderConfig) -> Self {
        let spatial = SpatialIndex::new(points);
        Self::encode_indexed(points, &spatial, config)
    }

    fn similarity(&self, other: &Self) -> f64 {
        self.compare(other).similarity
    }

    fn is_valid(&self) -> bool {
        !self.is_empty()
    }
}

impl VectorSignatureEncoder {
    /// Encode with a prebuilt index over `points`.
    pub fn encode_indexed(points: &[Point], spatial: &SpatialIndex, config: &EncoderConfig) -> Self {
        let n = points.len();
        let neighbors = config.vector_neighbors.min(n.saturating_sub(1));
        let scale = median_nn_distance(points, spatial);
        if n < 3 || scale <= f64::EPSILON {
            return Self {
                neighbors,
                scale,
                match_threshold: config.vector_match_threshold,
                ..Self::default()
            };
        }

        let signatures = (0..n)
            .map(|i| StarSignature::build(points, spatial, i, neighbors, scale))
            .collect();

        Self {
            signatures,
            neighbors,
            scale,
            match_threshold: config.vector_match_threshold,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scatter() -> Vec<Point> {
        let coords = [
            (0.0, 0.0),
            (52.0, 8.0),
            (110.0, -14.0),
            (18.0, 61.0),
            (83.0, 70.0),
            (140.0, 45.0),
            (-35.0, 120.0),
            (40.0, 135.0),
            (101.0, 150.0),
            (8.0, 205.0),
            (77.0, 220.0),
            (150.0, 210.0),
        ];
        coords.iter().map(|&(x, y)| Point::new(x, y)).collect()
    }

    fn transform(points: &[Point], angle: f64, scale: f64, mirror: bool) -> Vec<Point> {
        let (s, c) = angle.sin_cos();
        points
            .iter()
            .map(|p| {
                let x = if mirror { -p.x } else { p.x };
                Point::new(scale * (c * x - s * p.y) - 30.0, scale * (s * x + c * p.y) + 75.0)
            })
            .collect()
    }

    #[test]
    fn test_signature_shape() {
        let encoder = VectorSignatureEncoder::encode(&scatter(), &EncoderConfig::default());
        assert_eq!(encoder.len(), 12);
        assert_eq!(encoder.neighbors, 5);
        for sig in &encoder.signatures {
            assert_eq!(sig.distances.len(), 5);
            let total: f64 = sig.gaps.iter().sum();
            assert!((total - TAU).abs() < 1e-9);
        }
    }

    #[test]
    fn test_identical_clouds_match_fully() {
        let config = EncoderConfig::default();
        let a = VectorSignatureEncoder::encode(&scatter(), &config);
        let b = VectorSignatureEncoder::encode(&transform(&scatter(), 2.0, 1.7, false), &config);
        let result = a.compare(&b);
        assert_eq!(result.match_count, 12);
        assert!((result.similarity - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_mirror_invariance() {
        let config = EncoderConfig::default();
        let a = VectorSignatureEncoder::encode(&scatter(), &config);
        let b = VectorSignatureEncoder::encode(&transform(&scatter(), 0.3, 1.0, true), &config);
        assert!(a.similarity(&b) > 0.99);
    }

    #[test]
    fn test_candidates_rank_true_partner_first() {
        let config = EncoderConfig::default();
        let a = VectorSignatureEncoder::encode(&scatter(), &config);
        let b = VectorSignatureEncoder::encode(&transform(&scatter(), -0.8, 1.2, false), &config);
        let candidates = a.candidates(&b, 3);
        assert_eq!(candidates.len(), 12);
        let hits = candidates
            .iter()
            .enumerate()
            .filter(|(i, c)| c.first() == Some(i))
            .count();
        assert!(hits >= 10, "only {} first-rank hits", hits);
    }

    #[test]
    fn test_small_inputs_have_no_signatures() {
        let encoder = VectorSignatureEncoder::encode(&scatter()[..2], &EncoderConfig::default());
        assert!(!encoder.is_valid());
        let full = VectorSignatureEncoder::encode(&scatter(), &EncoderConfig::default());
        assert_eq!(encoder.compare(&full).match_count, 0);
    }
}
