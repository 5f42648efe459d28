use crate::config::Config;
use crate::data::point::rms_radius;
use crate::encoders::Encoder;
use crate::pipeline::traits::{CascadeContext, CascadeStage};
use crate::pipeline::types::StageOutcome;
use crate::registration::PointCloudAligner;
use crate::topology::TopologyMerger;

/// Rejects pairs whose point counts are too far apart
pub struct CountRatioStage;

impl CascadeStage for CountRatioStage {
    fn name(&self) -> &'static str {
        "count_ratio"
    }

    fn evaluate(&self, ctx: &mut CascadeContext<'_>) -> StageOutcome {
        let (na, nb) = (ctx.first.points().len(), ctx.second.points().len());
        let ratio = match na.max(nb) {
            0 => 0.0,
            larger => na.min(nb) as f64 / larger as f64,
        };
        ctx.scores.count_ratio = Some(ratio);

        let (ra, rb) = (rms_radius(ctx.first.points()), rms_radius(ctx.second.points()));
        if ra.max(rb) > f64::EPSILON {
            ctx.scores.size_ratio = Some(ra.min(rb) / ra.max(rb));
        }

        if ratio < ctx.config.cascade.min_count_ratio {
            ctx.fast_reject = true;
            return StageOutcome::rejected(
                Some(ratio),
                format!("point counts {} and {} differ too much (ratio {:.2})", na, nb, ratio),
            );
        }
        StageOutcome::passed(ratio, format!("{} vs {} points", na, nb))
    }
}

/// Occupancy grid similarity; informative only
pub struct BitmaskStage;

impl CascadeStage for BitmaskStage {
    fn name(&self) -> &'static str {
        "bitmask"
    }

    fn evaluate(&self, ctx: &mut CascadeContext<'_>) -> StageOutcome {
        let a = &ctx.first.encoders().bitmask;
        let b = &ctx.second.encoders().bitmask;
        let similarity = a.similarity(b);
        ctx.scores.bitmask = Some(similarity);
        StageOutcome::advisory(similarity, format!("hamming distance {}", a.distance(b)))
    }
}

pub struct MomentStage;

impl CascadeStage for MomentStage {
    fn name(&self) -> &'static str {
        "moments"
    }

    fn evaluate(&self, ctx: &mut CascadeContext<'_>) -> StageOutcome {
        let a = &ctx.first.encoders().moments;
        let b = &ctx.second.encoders().moments;
        let Some(distance) = a.distance(b) else {
            return StageOutcome::skipped("moments unavailable for fewer than 3 points");
        };

        let similarity = 1.0 / (1.0 + distance);
        ctx.scores.moments = Some(similarity);
        if distance > ctx.config.cascade.max_moment_distance {
            return StageOutcome::rejected(
                Some(similarity),
                format!("Hu distance {:.3} above {:.3}", distance, ctx.config.cascade.max_moment_distance),
            );
        }
        StageOutcome::passed(similarity, format!("Hu distance {:.3}", distance))
    }
}

pub struct DistanceMatrixStage;

impl CascadeStage for DistanceMatrixStage {
    fn name(&self) -> &'static str {
        "distance_matrix"
    }

    fn evaluate(&self, ctx: &mut CascadeContext<'_>) -> StageOutcome {
        let a = &ctx.first.encoders().matrix;
        let b = &ctx.second.encoders().matrix;
        if !a.is_valid() || !b.is_valid() {
            return StageOutcome::skipped("distance matrix unavailable for fewer than 3 points");
        }

        let comparison = a.compare(b);
        ctx.scores.matrix = Some(comparison.similarity);
        let detail = format!(
            "similarity {:.3}, shift {}{}",
            comparison.similarity,
            comparison.best_shift,
            if comparison.mirrored { ", reflected order" } else { "" }
        );
        if comparison.similarity < ctx.config.cascade.min_matrix_similarity {
            return StageOutcome::rejected(Some(comparison.similarity), detail);
        }
        StageOutcome::passed(comparison.similarity, detail)
    }
}

pub struct VectorSignatureStage;

impl CascadeStage for VectorSignatureStage {
    fn name(&self) -> &'static str {
        "vector_signature"
    }

    fn evaluate(&self, ctx: &mut CascadeContext<'_>) -> StageOutcome {
        let comparison = ctx.first.encoders().vector.compare(&ctx.second.encoders().vector);
        ctx.scores.vector = Some(comparison.similarity);

        let cascade = &ctx.config.cascade;
        let detail = format!("similarity {:.3}, {} matches", comparison.similarity, comparison.match_count);
        if comparison.similarity < cascade.min_vector_similarity || comparison.match_count < cascade.min_vector_matches {
            return StageOutcome::rejected(Some(comparison.similarity), detail);
        }
        StageOutcome::passed(comparison.similarity, detail)
    }
}

/// Aligns the first set onto the second and measures how well the two
/// proximity graphs agree. Runs only behind a strong vector signature match.
pub struct TopologyStage {
    aligner: PointCloudAligner,
    merger: TopologyMerger,
}

impl TopologyStage {
    pub fn new(config: &Config) -> Self {
        Self {
            aligner: PointCloudAligner::new(config.aligner.clone()).with_encoder_config(config.encoders.clone()),
            merger: TopologyMerger::new(config.merge.clone(), config.graph.clone()),
        }
    }
}

impl CascadeStage for TopologyStage {
    fn name(&self) -> &'static str {
        "topology"
    }

    fn evaluate(&self, ctx: &mut CascadeContext<'_>) -> StageOutcome {
        let gate = ctx.config.cascade.topology_gate;
        match ctx.scores.vector {
            Some(vector) if vector > gate => {}
            _ => return StageOutcome::skipped(format!("vector similarity not above {:.2}", gate)),
        }

        let alignment = self.aligner.align(ctx.first.points(), ctx.second.points(), None);
        ctx.alignment_score = Some(alignment.score);
        let Some(transform) = alignment.transform else {
            ctx.scores.topology = Some(0.0);
            let reason = alignment.reason.unwrap_or_else(|| "alignment failed".to_string());
            return StageOutcome::passed(0.0, reason);
        };
        ctx.transform = Some(transform);

        let aligned = ctx.first.encoders().graph.transformed(&transform);
        let target = &ctx.second.encoders().graph;
        let matches = self.merger.find_structural_matches(&aligned, target);
        let similarity = self.merger.structural_similarity(&aligned, target, &matches);
        ctx.scores.topology = Some(similarity);

        StageOutcome::passed(
            similarity,
            format!(
                "alignment {:.3} ({}), {} node matches",
                alignment.score,
                alignment.quality,
                matches.len()
            ),
        )
    }
}
