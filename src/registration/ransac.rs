//! RANSAC registration of two unordered point sets under a similarity
//! transform with optional reflection.

use crate::config::{AlignerConfig, EncoderConfig};
use crate::data::point::rms_radius;
use crate::data::Point;
use crate::data::SpatialIndex;
use crate::encoders::{Encoder, VectorSignatureEncoder};
use crate::logging::{get_correlation_id, AlignmentSpan, Timer};
use crate::registration::estimator::{least_squares_similarity, solve_from_triples, SampleLimits};
use crate::registration::guard::{HypothesisStats, RandomnessGuard, TargetTraits};
use crate::registration::{AlignmentQuality, AlignmentResult, InlierMatch, Transform};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::cell::OnceCell;
use std::time::{Duration, Instant};

/// Target points used to estimate the mean pairwise distance.
const THRESHOLD_SAMPLE: usize = 100;
const LARGE_RESIDUAL_PX: f64 = 20.0;
const LARGE_RESIDUAL_PENALTY: f64 = 0.8;
const LOW_RATIO: f64 = 0.5;
const LOW_RATIO_PENALTY: f64 = 0.7;
const LEAST_SQUARES_ROUNDS: usize = 2;

#[derive(Debug, Clone)]
struct Hypothesis {
    transform: Transform,
    score: f64,
    /// `(source index, target index, residual)`
    pairs: Vec<(usize, usize, f64)>,
    guard_reason: Option<&'static str>,
}

#[derive(Debug, Default)]
struct SearchOutcome {
    best: Option<Hypothesis>,
    iterations: usize,
    timed_out: bool,
}

impl SearchOutcome {
    fn score(&self) -> f64 {
        self.best.as_ref().map(|h| h.score).unwrap_or(0.0)
    }
}

/// Per-alignment state shared by both orientation searches.
struct SearchContext<'a> {
    target: &'a [Point],
    target_index: SpatialIndex,
    threshold: f64,
    guard: RandomnessGuard<'a>,
    source_signatures: VectorSignatureEncoder,
    target_signatures: VectorSignatureEncoder,
    /// Signature candidates per source point, filled on first use
    candidates: Vec<OnceCell<Vec<usize>>>,
    candidates_per_point: usize,
    scale_hint: f64,
    limits: SampleLimits,
    deadline: Instant,
}

impl SearchContext<'_> {
    fn candidates(&self, source_index: usize) -> &[usize] {
        match self.candidates.get(source_index) {
            Some(cell) => cell.get_or_init(|| {
                self.source_signatures
                    .candidates_for(source_index, &self.target_signatures, self.candidates_per_point)
            }).as_slice(),
            None => &[],
        }
    }
}

pub struct PointCloudAligner {
    config: AlignerConfig,
    encoder_config: EncoderConfig,
}

impl PointCloudAligner {
    pub fn new(config: AlignerConfig) -> Self {
        Self {
            config,
            encoder_config: EncoderConfig::default(),
        }
    }

    /// Signature settings used for correspondence seeding
    pub fn with_encoder_config(mut self, encoder_config: EncoderConfig) -> Self {
        self.encoder_config = encoder_config;
        self
    }

    pub fn config(&self) -> &AlignerConfig {
        &self.config
    }

    /// Align `source` onto `target`; the returned transform maps source
    /// coordinates into the target frame. Uses the configured seed when set.
    pub fn align(&self, source: &[Point], target: &[Point], initial_guess: Option<&Transform>) -> AlignmentResult {
        let mut rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        self.align_with_rng(source, target, initial_guess, &mut rng)
    }

    pub fn align_with_rng<R: Rng + ?Sized>(
        &self,
        source: &[Point],
        target: &[Point],
        initial_guess: Option<&Transform>,
        rng: &mut R,
    ) -> AlignmentResult {
        let correlation_id = get_correlation_id();
        let span = AlignmentSpan::new(source.len(), target.len(), correlation_id);
        let _enter = span.enter();
        let timer = Timer::global("alignment", correlation_id);
        let start = Instant::now();

        let min_points = self.config.min_points.max(3);
        if source.len() < min_points || target.len() < min_points {
            let reason = format!(
                "need at least {} points per set, got {} and {}",
                min_points,
                source.len(),
                target.len()
            );
            span.record_failure(&reason);
            timer.with_metadata("success", serde_json::json!(false)).stop();
            return AlignmentResult::failed(reason);
        }

        let deadline = start + Duration::from_millis(self.config.timeout_ms);
        let threshold = self.inlier_threshold(target);
        span.record_threshold(threshold);

        let target_index = SpatialIndex::new(target);
        let source_signatures = VectorSignatureEncoder::encode(source, &self.encoder_config);
        if Instant::now() >= deadline {
            return setup_timed_out(&span, timer, start);
        }
        let target_signatures = VectorSignatureEncoder::encode_indexed(target, &target_index, &self.encoder_config);
        let traits = TargetTraits::analyze_indexed(target, &target_index);
        if Instant::now() >= deadline {
            return setup_timed_out(&span, timer, start);
        }
        let scale_hint = match (source_signatures.scale, target_signatures.scale) {
            (s, t) if s > f64::EPSILON && t > f64::EPSILON => t / s,
            _ => 1.0,
        };

        let ctx = SearchContext {
            target,
            target_index,
            threshold,
            guard: RandomnessGuard::new(&self.config, traits),
            candidates: (0..source.len()).map(|_| OnceCell::new()).collect(),
            candidates_per_point: self.config.candidates_per_point,
            source_signatures,
            target_signatures,
            scale_hint,
            limits: SampleLimits {
                min_separation: self.config.min_sample_separation,
                max_ratio_spread: self.config.max_edge_ratio_spread,
            },
            deadline,
        };

        let direct = self.search(&ctx, source, false, initial_guess, rng);
        span.record_hypothesis(false, direct.score(), direct.best.as_ref().map_or(0, |h| h.pairs.len()), direct.iterations);

        // A mirrored fit can only win by the margin; skip it when that is out of reach.
        let mirror_reachable = direct.score() + self.config.mirror_margin < 1.0;
        let mirrored = if self.config.check_mirror && mirror_reachable && !direct.timed_out {
            let reflected: Vec<Point> = source.iter().map(reflect).collect();
            let outcome = self.search(&ctx, &reflected, true, initial_guess, rng);
            span.record_hypothesis(true, outcome.score(), outcome.best.as_ref().map_or(0, |h| h.pairs.len()), outcome.iterations);
            Some(outcome)
        } else {
            None
        };

        let iterations = direct.iterations + mirrored.as_ref().map_or(0, |m| m.iterations);
        let timed_out = direct.timed_out || mirrored.as_ref().is_some_and(|m| m.timed_out);
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

        let (chosen, is_mirrored) = match mirrored {
            Some(m)
                if m.score() > direct.score() + self.config.mirror_margin
                    && m.score() > self.config.min_mirror_score =>
            {
                (m.best, true)
            }
            _ => (direct.best, false),
        };

        let result = match chosen {
            Some(hypothesis) => {
                if let Some(reason) = hypothesis.guard_reason {
                    span.record_guard(reason, hypothesis.score);
                }
                self.build_result(hypothesis, source, target, is_mirrored)
                    .with_timing(iterations, elapsed_ms, timed_out)
            }
            None => AlignmentResult::failed("no consistent transformation found").with_timing(
                iterations,
                elapsed_ms,
                timed_out,
            ),
        };

        match result.reason {
            Some(ref reason) => span.record_failure(reason),
            None => span.record_result(result.score, result.inliers.len(), iterations, result.mirrored, timed_out),
        }
        timer
            .with_metadata("success", serde_json::json!(result.is_success()))
            .with_metadata("score", serde_json::json!(result.score))
            .stop();
        result
    }

    /// `max(min, min(max, factor × mean pairwise distance of the target))`
    pub fn inlier_threshold(&self, target: &[Point]) -> f64 {
        let sample = &target[..target.len().min(THRESHOLD_SAMPLE)];
        let mut total = 0.0;
        let mut count = 0usize;
        for i in 0..sample.len() {
            for j in (i + 1)..sample.len() {
                total += sample[i].distance_to(&sample[j]);
                count += 1;
            }
        }
        let mean = if count > 0 { total / count as f64 } else { 0.0 };
        (self.config.inlier_threshold_factor * mean)
            .min(self.config.inlier_threshold_max)
            .max(self.config.inlier_threshold_min)
    }

    fn search<R: Rng + ?Sized>(
        &self,
        ctx: &SearchContext<'_>,
        source: &[Point],
        mirrored: bool,
        initial_guess: Option<&Transform>,
        rng: &mut R,
    ) -> SearchOutcome {
        let mut outcome = SearchOutcome::default();
        let source_radius = rms_radius(source);

        if let Some(guess) = initial_guess.filter(|g| g.mirrored == mirrored) {
            let unmirrored = Transform {
                mirrored: false,
                ..*guess
            };
            consider(self.evaluate(ctx, source, source_radius, unmirrored), &mut outcome.best);
        }

        for _ in 0..self.config.max_iterations {
            if Instant::now() >= ctx.deadline {
                outcome.timed_out = true;
                break;
            }
            if outcome.score() > self.config.early_exit_score {
                break;
            }
            outcome.iterations += 1;

            let seeded = self.config.correspondence_seeding && rng.gen::<f64>() >= self.config.uniform_sample_ratio;
            let sample = if seeded {
                self.seeded_sample(ctx, source, rng)
            } else {
                uniform_sample(source.len(), ctx.target.len(), rng)
            };
            let Some((ia, ib)) = sample else { continue };

            let src = [source[ia[0]].xy(), source[ia[1]].xy(), source[ia[2]].xy()];
            let dst = [ctx.target[ib[0]].xy(), ctx.target[ib[1]].xy(), ctx.target[ib[2]].xy()];
            let Some(transform) = solve_from_triples(&src, &dst, &ctx.limits) else { continue };
            if transform.scale < self.config.min_scale || transform.scale > self.config.max_scale {
                continue;
            }
            consider(self.evaluate(ctx, source, source_radius, transform), &mut outcome.best);
        }

        if let Some(best) = outcome.best.take() {
            outcome.best = Some(self.refine(ctx, source, source_radius, best, rng));
        }
        outcome
    }

    /// Resample minimal solves from the inliers, then fit least squares over
    /// all of them; keep whichever improves the score.
    fn refine<R: Rng + ?Sized>(
        &self,
        ctx: &SearchContext<'_>,
        source: &[Point],
        source_radius: f64,
        mut best: Hypothesis,
        rng: &mut R,
    ) -> Hypothesis {
        for _ in 0..self.config.refinement_iterations {
            if best.pairs.len() < 3 || Instant::now() >= ctx.deadline {
                break;
            }
            let picks = rand::seq::index::sample(rng, best.pairs.len(), 3).into_vec();
            let pairs: Vec<(usize, usize)> = picks.iter().map(|&k| (best.pairs[k].0, best.pairs[k].1)).collect();
            let src = [source[pairs[0].0].xy(), source[pairs[1].0].xy(), source[pairs[2].0].xy()];
            let dst = [ctx.target[pairs[0].1].xy(), ctx.target[pairs[1].1].xy(), ctx.target[pairs[2].1].xy()];
            if let Some(transform) = solve_from_triples(&src, &dst, &ctx.limits) {
                if let Some(candidate) = self.evaluate(ctx, source, source_radius, transform) {
                    if candidate.score > best.score {
                        best = candidate;
                    }
                }
            }
        }

        for _ in 0..LEAST_SQUARES_ROUNDS {
            if Instant::now() >= ctx.deadline {
                break;
            }
            let src: Vec<(f64, f64)> = best.pairs.iter().map(|p| source[p.0].xy()).collect();
            let dst: Vec<(f64, f64)> = best.pairs.iter().map(|p| ctx.target[p.1].xy()).collect();
            let Some(transform) = least_squares_similarity(&src, &dst) else { break };
            match self.evaluate(ctx, source, source_radius, transform) {
                Some(candidate) if candidate.score > best.score => best = candidate,
                _ => break,
            }
        }
        best
    }

    /// Draw source triples uniformly and pick target partners from each
    /// source point's best signature candidates, preferring partners whose
    /// mutual distances agree with the source under the scale hint.
    fn seeded_sample<R: Rng + ?Sized>(
        &self,
        ctx: &SearchContext<'_>,
        source: &[Point],
        rng: &mut R,
    ) -> Option<([usize; 3], [usize; 3])> {
        let picks = rand::seq::index::sample(rng, source.len(), 3).into_vec();
        let ia = [picks[0], picks[1], picks[2]];

        let first = ctx.candidates(ia[0]);
        if first.is_empty() {
            return None;
        }
        // Nested draw biases the rank toward the best candidates.
        let upper = rng.gen_range(0..first.len());
        let b0 = first[rng.gen_range(0..=upper)];

        let b1 = self.consistent_partner(ctx, source, ia[1], &[(ia[0], b0)])?;
        let b2 = self.consistent_partner(ctx, source, ia[2], &[(ia[0], b0), (ia[1], b1)])?;
        Some((ia, [b0, b1, b2]))
    }

    fn consistent_partner(
        &self,
        ctx: &SearchContext<'_>,
        source: &[Point],
        a: usize,
        anchors: &[(usize, usize)],
    ) -> Option<usize> {
        ctx.candidates(a)
            .iter()
            .filter(|b| anchors.iter().all(|(_, used)| used != *b))
            .map(|&b| {
                let error: f64 = anchors
                    .iter()
                    .map(|&(ra, rb)| {
                        let expected = ctx.scale_hint * source[a].distance_to(&source[ra]);
                        (ctx.target[b].distance_to(&ctx.target[rb]) - expected).abs()
                    })
                    .sum();
                (b, error)
            })
            .min_by(|x, y| x.1.total_cmp(&y.1))
            .map(|(b, _)| b)
    }

    /// Score a transform over all points with greedy one-to-one matching.
    fn evaluate(&self, ctx: &SearchContext<'_>, source: &[Point], source_radius: f64, transform: Transform) -> Option<Hypothesis> {
        let threshold = ctx.threshold;
        let mut candidates: Vec<(usize, usize, f64)> = Vec::new();
        for (i, p) in source.iter().enumerate() {
            let (x, y) = transform.apply_xy(p.x, p.y);
            for (j, d) in ctx.target_index.within(x, y, threshold) {
                if d < threshold && (p.confidence + ctx.target[j].confidence) / 2.0 >= self.config.min_avg_confidence {
                    candidates.push((i, j, d));
                }
            }
        }
        candidates.sort_by(|a, b| a.2.total_cmp(&b.2));

        let mut used_source = vec![false; source.len()];
        let mut used_target = vec![false; ctx.target.len()];
        let mut pairs = Vec::new();
        for (i, j, d) in candidates {
            if used_source[i] || used_target[j] {
                continue;
            }
            used_source[i] = true;
            used_target[j] = true;
            pairs.push((i, j, d));
        }

        let inliers = pairs.len();
        let ratio = inliers as f64 / source.len().min(ctx.target.len()) as f64;
        if inliers < self.config.min_inliers.max(3) || ratio < self.config.min_inlier_ratio {
            return None;
        }

        let ratio_term = if ratio > 0.6 {
            (ratio * (1.0 + 0.5 * (ratio - 0.6))).min(1.0)
        } else {
            ratio
        };
        let mean_residual = pairs.iter().map(|p| p.2).sum::<f64>() / inliers as f64;
        let residual_term = (-mean_residual / (threshold / 3.0)).exp();
        let inlier_points: Vec<Point> = pairs.iter().map(|p| source[p.0].clone()).collect();
        let spread = if source_radius > f64::EPSILON {
            (rms_radius(&inlier_points) / source_radius).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let confidence = pairs
            .iter()
            .map(|p| (source[p.0].confidence + ctx.target[p.1].confidence) / 2.0)
            .sum::<f64>()
            / inliers as f64;

        let mut score = 0.4 * ratio_term + 0.3 * residual_term + 0.2 * spread + 0.1 * confidence;
        if mean_residual > LARGE_RESIDUAL_PX {
            score *= LARGE_RESIDUAL_PENALTY;
        }
        if ratio < LOW_RATIO {
            score *= LOW_RATIO_PENALTY;
        }

        let stats = HypothesisStats {
            inliers,
            inlier_ratio: ratio,
            mean_residual,
            spread,
            threshold,
        };
        let (score, guard_reason) = ctx.guard.apply(score.clamp(0.0, 1.0), &stats);

        Some(Hypothesis {
            transform,
            score,
            pairs,
            guard_reason,
        })
    }

    fn build_result(&self, hypothesis: Hypothesis, source: &[Point], target: &[Point], mirrored: bool) -> AlignmentResult {
        let transform = Transform {
            mirrored,
            ..hypothesis.transform
        };
        let inliers = hypothesis
            .pairs
            .iter()
            .map(|&(i, j, d)| InlierMatch {
                source_index: i,
                target_index: j,
                source: source[i].clone(),
                target: target[j].clone(),
                distance: d,
            })
            .collect();

        AlignmentResult {
            transform: Some(transform),
            score: hypothesis.score,
            inliers,
            mirrored,
            quality: AlignmentQuality::from_score(hypothesis.score),
            iterations: 0,
            elapsed_ms: 0.0,
            timed_out: false,
            reason: None,
        }
    }
}

fn consider(candidate: Option<Hypothesis>, best: &mut Option<Hypothesis>) {
    if let Some(c) = candidate {
        if best.as_ref().map_or(true, |b| c.score > b.score) {
            *best = Some(c);
        }
    }
}

fn setup_timed_out(span: &AlignmentSpan, timer: Timer, start: Instant) -> AlignmentResult {
    let reason = "deadline reached before sampling started";
    span.record_failure(reason);
    timer.with_metadata("success", serde_json::json!(false)).stop();
    AlignmentResult::failed(reason).with_timing(0, start.elapsed().as_secs_f64() * 1000.0, true)
}

fn reflect(point: &Point) -> Point {
    let mut reflected = point.clone();
    reflected.x = -reflected.x;
    reflected
}

fn uniform_sample<R: Rng + ?Sized>(source_len: usize, target_len: usize, rng: &mut R) -> Option<([usize; 3], [usize; 3])> {
    if source_len < 3 || target_len < 3 {
        return None;
    }
    let a = rand::seq::index::sample(rng, source_len, 3).into_vec();
    let b = rand::seq::index::sample(rng, target_len, 3).into_vec();
    Some(([a[0], a[1], a[2]], [b[0], b[1], b[2]]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::synthetic::{grid_points, random_points, synthetic_sole};
    use crate::data::PointTransformer;

    fn aligner() -> PointCloudAligner {
        PointCloudAligner::new(AlignerConfig::default().with_seed(17))
    }

    #[test]
    fn test_self_alignment_is_identity() {
        let points = synthetic_sole(40, 1);
        let result = aligner().align(&points, &points, None);
        let t = result.transform.unwrap();
        assert!(result.score >= 0.9, "score {}", result.score);
        assert!(t.normalized_rotation().abs() < 1e-6);
        assert!((t.scale - 1.0).abs() < 1e-6);
        assert!(!result.mirrored);
        assert_eq!(result.inliers.len(), 40);
    }

    #[test]
    fn test_known_similarity_is_recovered() {
        let points = synthetic_sole(40, 3);
        let truth = Transform::new(0.5, 1.2, (140.0, -60.0), false);
        let result = aligner().align(&points, &truth.apply_all(&points), None);
        let t = result.transform.unwrap();
        assert!(result.score > 0.8, "score {}", result.score);
        assert!((t.rotation_degrees() - 0.5f64.to_degrees()).abs() < 10.0);
        assert!((t.scale - 1.2).abs() < 0.12);
        assert!(!t.mirrored);
    }

    #[test]
    fn test_mirrored_copy_is_detected() {
        let points = synthetic_sole(40, 5);
        let truth = Transform::new(-0.3, 1.0, (25.0, 40.0), true);
        let result = aligner().align(&points, &truth.apply_all(&points), None);
        assert!(result.mirrored);
        assert!(result.score > 0.8, "score {}", result.score);
        let t = result.transform.unwrap();
        assert!(t.mirrored);
        assert!((t.rotation_degrees() + 0.3f64.to_degrees()).abs() < 10.0);
    }

    #[test]
    fn test_too_few_points_fails_gracefully() {
        let points = synthetic_sole(3, 1);
        let result = aligner().align(&points, &points, None);
        assert_eq!(result.quality, AlignmentQuality::Failed);
        assert!(result.transform.is_none());
        assert!(result.reason.is_some());
    }

    #[test]
    fn test_initial_guess_is_evaluated() {
        let points = synthetic_sole(30, 4);
        let truth = Transform::new(0.4, 1.1, (80.0, -25.0), false);
        let moved = truth.apply_all(&points);
        let config = AlignerConfig::default().with_seed(1).with_max_iterations(1).with_mirror_check(false);
        let result = PointCloudAligner::new(config).align(&points, &moved, Some(&truth));
        assert!(result.score > 0.9);
        assert!((result.transform.unwrap().rotation - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_random_clouds_stay_below_ceiling() {
        let a = random_points(30, 500.0, 500.0, 1);
        let b = random_points(30, 500.0, 500.0, 2);
        let result = aligner().align(&a, &b, None);
        assert!(result.score <= 0.3, "score {}", result.score);
    }

    #[test]
    fn test_grid_target_is_capped() {
        let grid = grid_points(6, 6, 40.0);
        let moved = PointTransformer::translate(&PointTransformer::rotate(&grid, 12.0), 10.0, 10.0);
        let result = aligner().align(&grid, &moved, None);
        assert!(result.score <= 0.3, "score {}", result.score);
    }

    #[test]
    fn test_threshold_is_clamped() {
        let a = aligner();
        assert_eq!(a.inlier_threshold(&synthetic_sole(30, 2)), 30.0);
        assert_eq!(a.inlier_threshold(&grid_points(3, 3, 5.0)), 15.0);
    }
}
