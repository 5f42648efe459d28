//! Merging a second observation of the same sole into a fingerprint.

use crate::config::{AggregateWeights, Config};
use crate::encoders::Encoder;
use crate::fingerprint::{quality_score, EncoderSet, Fingerprint, FingerprintStats, MIN_RELIABLE_POINTS};
use crate::logging::{CorrelationScope, MergeSpan, Timer};
use crate::registration::{PointCloudAligner, Transform};
use crate::topology::{geometric_merge, TopologyMerger};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeStrategy {
    /// Node-by-node graph fusion
    Topology,
    /// Nearest-neighbour point fusion after a structural mismatch
    Geometric,
}

impl MergeStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            MergeStrategy::Topology => "topology",
            MergeStrategy::Geometric => "geometric",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeRecord {
    pub merged_id: String,
    pub merged_at: DateTime<Utc>,
    pub strategy: MergeStrategy,
    pub alignment_score: f64,
    pub points_before: usize,
    pub points_after: usize,
}

/// Components of the post-merge aggregate confidence, each in `[0, 1]`
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AggregateComponents {
    /// Bitmask agreement between the old and merged point sets
    pub bitmask: f64,
    pub moments: f64,
    /// Quality of the merged graph
    pub graph: f64,
    pub matrix: f64,
    /// Vector signature similarity of the two inputs
    pub vector: f64,
    /// Mean tracker rating
    pub tracker: f64,
    pub topology: f64,
}

impl AggregateComponents {
    pub fn blend(&self, weights: &AggregateWeights) -> f64 {
        let c = |v: f64| v.clamp(0.0, 1.0);
        let score = weights.bitmask * c(self.bitmask)
            + weights.moments * c(self.moments)
            + weights.graph * c(self.graph)
            + weights.matrix * c(self.matrix)
            + weights.vector * c(self.vector)
            + weights.tracker * c(self.tracker)
            + weights.topology * c(self.topology);
        score.clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MergeResult {
    pub success: bool,
    pub reason: Option<String>,
    pub strategy: Option<MergeStrategy>,
    pub vector_similarity: f64,
    pub alignment_score: f64,
    /// Structural similarity of the aligned graphs before fusion
    pub topology_similarity: f64,
    pub topology_preservation: Option<f64>,
    pub transform: Option<Transform>,
    pub points_before: usize,
    pub points_after: usize,
    pub components: Option<AggregateComponents>,
    pub confidence: f64,
}

impl MergeResult {
    fn reject(mut self, span: &MergeSpan, reason: String) -> Self {
        span.record_rejection(&reason);
        self.success = false;
        self.reason = Some(reason);
        self
    }
}

impl Fingerprint {
    /// Fuse `other` into this fingerprint; `self` keeps its id and frame.
    ///
    /// Requires a minimal vector signature similarity, a successful alignment
    /// of `other` onto `self` and a structural pre-check. When graph fusion
    /// refuses the pair the points are merged geometrically instead. On
    /// failure `self` is left untouched.
    pub fn merge_with_transformation(&mut self, other: &Fingerprint, config: &Config) -> MergeResult {
        let scope = CorrelationScope::enter();
        let correlation_id = scope.id();
        let span = MergeSpan::new(&self.id, &other.id, Some(correlation_id));
        let _enter = span.enter();
        let timer = Timer::global("merge", Some(correlation_id));

        let result = self.merge_inner(other, config, &span);

        timer
            .with_metadata("success", serde_json::json!(result.success))
            .with_metadata("strategy", serde_json::json!(result.strategy))
            .stop();
        result
    }

    fn merge_inner(&mut self, other: &Fingerprint, config: &Config, span: &MergeSpan) -> MergeResult {
        let merge = &config.merge;
        let mut result = MergeResult {
            points_before: self.point_count(),
            points_after: self.point_count(),
            confidence: self.stats().confidence,
            ..MergeResult::default()
        };

        let vector = self.encoders().vector.compare(&other.encoders().vector).similarity;
        result.vector_similarity = vector;
        span.record_precheck("vector_similarity", vector, merge.min_vector_similarity);
        if vector < merge.min_vector_similarity {
            return result.reject(span, format!("vector similarity {:.3} below {:.3}", vector, merge.min_vector_similarity));
        }

        let aligner = PointCloudAligner::new(config.aligner.clone()).with_encoder_config(config.encoders.clone());
        let alignment = aligner.align(other.points(), self.points(), None);
        result.alignment_score = alignment.score;
        let transform = match alignment.transform {
            Some(transform) if alignment.is_success() => transform,
            _ => {
                let reason = alignment.reason.unwrap_or_else(|| "no transformation found".to_string());
                return result.reject(span, format!("alignment failed: {}", reason));
            }
        };
        result.transform = Some(transform);

        let merger = TopologyMerger::new(merge.clone(), config.graph.clone());
        let base_graph = &self.encoders().graph;
        let aligned = other.encoders().graph.transformed(&transform);
        let matches = merger.find_structural_matches(base_graph, &aligned);
        let topology = merger.structural_similarity(base_graph, &aligned, &matches);
        result.topology_similarity = topology;
        span.record_precheck("topology_similarity", topology, merge.min_topology_similarity);
        if topology < merge.min_topology_similarity {
            return result.reject(
                span,
                format!("topology similarity {:.3} below {:.3}", topology, merge.min_topology_similarity),
            );
        }

        let (points, merged_graph, strategy, topology_term) =
            match merger.merge_graphs(base_graph, &other.encoders().graph, &transform) {
                Ok(outcome) => {
                    result.topology_preservation = Some(outcome.topology_preservation);
                    let points = outcome.graph.to_points();
                    (points, Some(outcome.graph), MergeStrategy::Topology, outcome.topology_preservation)
                }
                Err(mismatch) => {
                    tracing::info!(reason = %mismatch, "Structural merge refused, merging geometrically");
                    let moved = transform.apply_all(other.points());
                    let outcome = geometric_merge(self.points(), &moved, merge.geometric_merge_distance);
                    (outcome.points, None, MergeStrategy::Geometric, topology)
                }
            };

        let mut encoders = EncoderSet::rebuild(&points, config, &self.encoders().tracker);
        // The fused graph keeps per-node confirmation counts
        if let Some(graph) = merged_graph {
            encoders.graph = graph;
        }
        let old = self.encoders();
        let components = AggregateComponents {
            bitmask: encoders.bitmask.similarity(&old.bitmask),
            moments: encoders.moments.similarity(&old.moments),
            graph: encoders.graph.quality_score(config.graph.target_degree),
            matrix: encoders.matrix.compare(&old.matrix).similarity,
            vector,
            tracker: encoders.tracker.mean_rating(),
            topology: topology_term,
        };
        let confidence = components.blend(&merge.weights);

        let mut metadata = self.metadata.clone();
        metadata.photo_count += other.metadata.photo_count.max(1);
        for source in &other.metadata.sources {
            if !metadata.sources.contains(source) {
                metadata.sources.push(source.clone());
            }
        }
        metadata.updated_at = Utc::now();
        metadata.transform_history.push(transform);
        metadata.merge_history.push(MergeRecord {
            merged_id: other.id.clone(),
            merged_at: metadata.updated_at,
            strategy,
            alignment_score: alignment.score,
            points_before: self.point_count(),
            points_after: points.len(),
        });

        let stats = FingerprintStats {
            confidence,
            topology_score: components.graph,
            quality_score: quality_score(confidence, metadata.photo_count),
            low_confidence: points.len() < MIN_RELIABLE_POINTS,
        };

        result.success = true;
        result.strategy = Some(strategy);
        result.points_after = points.len();
        result.components = Some(components);
        result.confidence = confidence;
        span.record_success(strategy.as_str(), points.len(), confidence);

        *self = Fingerprint::from_parts(self.id.clone(), points, encoders, metadata, stats);
        result
    }
}
