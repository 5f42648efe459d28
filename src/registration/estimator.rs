//! Closed-form similarity estimates used by the RANSAC loop.

use crate::registration::Transform;

type Xy = (f64, f64);

/// Limits applied to a minimal three-point sample.
#[derive(Debug, Clone, Copy)]
pub struct SampleLimits {
    /// Shortest acceptable triangle edge, in pixels
    pub min_separation: f64,
    /// Largest tolerated `max_ratio / min_ratio - 1` across the three edges
    pub max_ratio_spread: f64,
}

fn centroid(points: &[Xy]) -> Xy {
    let n = points.len().max(1) as f64;
    let (sx, sy) = points.iter().fold((0.0, 0.0), |(sx, sy), p| (sx + p.0, sy + p.1));
    (sx / n, sy / n)
}

fn length(a: Xy, b: Xy) -> f64 {
    ((b.0 - a.0).powi(2) + (b.1 - a.1).powi(2)).sqrt()
}

fn translation_for(rotation: f64, scale: f64, src_center: Xy, dst_center: Xy) -> Xy {
    let (sin, cos) = rotation.sin_cos();
    (
        dst_center.0 - scale * (cos * src_center.0 - sin * src_center.1),
        dst_center.1 - scale * (sin * src_center.0 + cos * src_center.1),
    )
}

/// Similarity mapping the triangle `src` onto `dst`.
///
/// Scale is the median of the three edge-length ratios, rotation the circular
/// mean of the per-edge angle differences, translation the centroid offset.
/// Degenerate or non-similar triangles yield `None`.
pub fn solve_from_triples(src: &[Xy; 3], dst: &[Xy; 3], limits: &SampleLimits) -> Option<Transform> {
    let mut ratios = [0.0f64; 3];
    let (mut sin_sum, mut cos_sum) = (0.0, 0.0);

    for (k, (i, j)) in [(0, 1), (1, 2), (2, 0)].into_iter().enumerate() {
        let ls = length(src[i], src[j]);
        let ld = length(dst[i], dst[j]);
        if ls < limits.min_separation || ld < limits.min_separation {
            return None;
        }
        ratios[k] = ld / ls;

        let angle_src = (src[j].1 - src[i].1).atan2(src[j].0 - src[i].0);
        let angle_dst = (dst[j].1 - dst[i].1).atan2(dst[j].0 - dst[i].0);
        let delta = angle_dst - angle_src;
        sin_sum += delta.sin();
        cos_sum += delta.cos();
    }

    ratios.sort_by(|a, b| a.total_cmp(b));
    if ratios[2] / ratios[0] > 1.0 + limits.max_ratio_spread {
        return None;
    }

    let scale = ratios[1];
    let rotation = sin_sum.atan2(cos_sum);
    let translation = translation_for(rotation, scale, centroid(src), centroid(dst));
    Some(Transform::new(rotation, scale, translation, false))
}

/// Least-squares similarity (rotation, uniform scale, translation) over
/// corresponding point pairs.
pub fn least_squares_similarity(src: &[Xy], dst: &[Xy]) -> Option<Transform> {
    if src.len() < 2 || src.len() != dst.len() {
        return None;
    }

    let cs = centroid(src);
    let cd = centroid(dst);
    let (mut a, mut b, mut norm) = (0.0, 0.0, 0.0);
    for (p, q) in src.iter().zip(dst.iter()) {
        let (px, py) = (p.0 - cs.0, p.1 - cs.1);
        let (qx, qy) = (q.0 - cd.0, q.1 - cd.1);
        a += px * qx + py * qy;
        b += px * qy - py * qx;
        norm += px * px + py * py;
    }
    if norm <= f64::EPSILON {
        return None;
    }

    let rotation = b.atan2(a);
    let scale = (a * a + b * b).sqrt() / norm;
    if !scale.is_finite() || scale <= 0.0 {
        return None;
    }
    let translation = translation_for(rotation, scale, cs, cd);
    Some(Transform::new(rotation, scale, translation, false))
}
