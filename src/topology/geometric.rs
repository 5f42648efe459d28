//! Nearest-neighbour point merge used when structural fusion is refused.

use crate::data::{Point, SpatialIndex};
use crate::topology::merger::unique_id;
use std::collections::HashSet;

#[derive(Debug, Clone)]
pub struct GeometricMergeOutcome {
    pub points: Vec<Point>,
    /// `(base index, other index)` pairs that were averaged
    pub pairs: Vec<(usize, usize)>,
}

/// Merge `other` (already in `base`'s frame) into `base`.
///
/// Points closer than `max_distance` are paired greedily by ascending
/// distance and averaged; the pair keeps the base id and the higher
/// confidence. Everything else is carried over unchanged.
pub fn geometric_merge(base: &[Point], other: &[Point], max_distance: f64) -> GeometricMergeOutcome {
    let spatial = SpatialIndex::new(other);
    let mut candidates: Vec<(usize, usize, f64)> = Vec::new();
    for (i, a) in base.iter().enumerate() {
        for (j, d) in spatial.within(a.x, a.y, max_distance) {
            candidates.push((i, j, d));
        }
    }
    candidates.sort_by(|x, y| x.2.total_cmp(&y.2));

    let mut points = base.to_vec();
    let mut paired_other = vec![false; other.len()];
    let mut paired_base = vec![false; base.len()];
    let mut pairs = Vec::new();
    for (i, j, _) in candidates {
        if paired_base[i] || paired_other[j] {
            continue;
        }
        paired_base[i] = true;
        paired_other[j] = true;
        let merged = &mut points[i];
        merged.x = (merged.x + other[j].x) / 2.0;
        merged.y = (merged.y + other[j].y) / 2.0;
        merged.confidence = merged.confidence.max(other[j].confidence).clamp(0.0, 1.0);
        pairs.push((i, j));
    }

    let mut ids: HashSet<String> = points.iter().map(|p| p.id.clone()).collect();
    for (j, point) in other.iter().enumerate() {
        if paired_other[j] {
            continue;
        }
        let mut point = point.clone();
        if point.id.is_empty() {
            point.id = unique_id("geo", &ids);
        } else if ids.contains(&point.id) {
            point.id = unique_id(&point.id, &ids);
        }
        ids.insert(point.id.clone());
        points.push(point);
    }

    tracing::debug!(
        base_points = base.len(),
        other_points = other.len(),
        pairs = pairs.len(),
        merged_points = points.len(),
        "Geometric merge completed"
    );

    GeometricMergeOutcome { points, pairs }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_points_are_averaged() {
        let base = vec![
            Point::new(0.0, 0.0).with_id("a").with_confidence(0.4),
            Point::new(100.0, 0.0).with_id("b"),
        ];
        let other = vec![
            Point::new(4.0, 2.0).with_id("a").with_confidence(0.9),
            Point::new(300.0, 0.0).with_id("b"),
        ];
        let outcome = geometric_merge(&base, &other, 20.0);
        assert_eq!(outcome.pairs, vec![(0, 0)]);
        assert_eq!(outcome.points.len(), 3);
        assert_eq!(outcome.points[0].xy(), (2.0, 1.0));
        assert_eq!(outcome.points[0].confidence, 0.9);
        // The unpaired "b" collides with a base id and is renamed.
        assert_eq!(outcome.points[2].id, "b-m1");
        assert_eq!(outcome.points[2].x, 300.0);
    }

    #[test]
    fn test_pairing_is_one_to_one() {
        let base = vec![Point::new(0.0, 0.0).with_id("a")];
        let other = vec![Point::new(1.0, 0.0).with_id("x"), Point::new(2.0, 0.0).with_id("y")];
        let outcome = geometric_merge(&base, &other, 20.0);
        assert_eq!(outcome.pairs, vec![(0, 0)]);
        assert_eq!(outcome.points.len(), 2);
        assert_eq!(outcome.points[1].id, "y");
    }

    #[test]
    fn test_renamed_ids_never_collide() {
        let base = vec![
            Point::new(0.0, 0.0).with_id("b"),
            Point::new(50.0, 0.0).with_id("b-m1"),
            Point::new(100.0, 0.0).with_id("geo-m1"),
        ];
        let other = vec![
            Point::new(300.0, 0.0).with_id("b"),
            Point::new(400.0, 0.0).with_id(""),
            Point::new(500.0, 0.0).with_id(""),
        ];
        let outcome = geometric_merge(&base, &other, 20.0);
        let ids: Vec<&str> = outcome.points.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "b-m1", "geo-m1", "b-m2", "geo-m2", "geo-m3"]);
    }
}
