//! Fingerprint aggregate: the point list of one sole plus every encoding
//! derived from it.
//!
//! The point list is the single source of truth. Encoders are rebuilt from it
//! whenever it changes and are replaced together.

pub mod document;
pub mod merge;

pub use document::{load_document, save_document, FingerprintDocument, DOCUMENT_VERSION};
pub use merge::{AggregateComponents, MergeRecord, MergeResult, MergeStrategy};

use crate::config::Config;
use crate::data::point::clamp_confidence;
use crate::data::{Point, DEFAULT_CONFIDENCE};
use crate::encoders::{BitmaskEncoder, DistanceMatrixEncoder, Encoder, MomentEncoder, PointTracker, VectorSignatureEncoder};
use crate::pipeline::{Cascade, ComparisonResult};
use crate::registration::Transform;
use crate::topology::TopologyGraph;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Fewer points than this make a low-confidence fingerprint.
pub const MIN_RELIABLE_POINTS: usize = 3;
/// Photos needed before the quality score stops being discounted.
pub const FULL_QUALITY_PHOTOS: f64 = 3.0;

/// One instance of every encoder, all derived from the same point list
#[derive(Debug, Clone)]
pub struct EncoderSet {
    pub bitmask: BitmaskEncoder,
    pub moments: MomentEncoder,
    pub matrix: DistanceMatrixEncoder,
    pub vector: VectorSignatureEncoder,
    pub tracker: PointTracker,
    pub graph: TopologyGraph,
}

impl EncoderSet {
    pub fn build(points: &[Point], config: &Config) -> Self {
        Self {
            tracker: PointTracker::encode(points, &config.tracker),
            ..Self::build_without_tracker(points, config)
        }
    }

    /// Like [`EncoderSet::build`], but the tracker continues from `tracker`
    /// with `points` as a new observation round.
    pub fn rebuild(points: &[Point], config: &Config, tracker: &PointTracker) -> Self {
        let mut tracker = tracker.clone();
        tracker.observe_all(points);
        Self {
            tracker,
            ..Self::build_without_tracker(points, config)
        }
    }

    fn build_without_tracker(points: &[Point], config: &Config) -> Self {
        Self {
            bitmask: BitmaskEncoder::encode(points, &()),
            moments: MomentEncoder::encode(points, &()),
            matrix: DistanceMatrixEncoder::encode(points, &config.encoders),
            vector: VectorSignatureEncoder::encode(points, &config.encoders),
            tracker: PointTracker::new(config.tracker.clone()),
            graph: TopologyGraph::from_points(points, &config.graph),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FingerprintMetadata {
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub photo_count: u32,
    pub sources: Vec<String>,
    #[serde(default)]
    pub merge_history: Vec<MergeRecord>,
    /// Transforms that mapped each merged fingerprint into this one's frame
    #[serde(default)]
    pub transform_history: Vec<Transform>,
}

impl FingerprintMetadata {
    pub fn new(sources: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            created_at: now,
            updated_at: now,
            photo_count: 1,
            sources,
            merge_history: Vec::new(),
            transform_history: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FingerprintStats {
    pub confidence: f64,
    pub topology_score: f64,
    pub quality_score: f64,
    pub low_confidence: bool,
}

#[derive(Debug, Clone)]
pub struct Fingerprint {
    pub id: String,
    points: Vec<Point>,
    encoders: EncoderSet,
    pub metadata: FingerprintMetadata,
    stats: FingerprintStats,
}

impl Fingerprint {
    pub fn create_from_points(id: impl Into<String>, points: Vec<Point>, config: &Config) -> Self {
        let points: Vec<Point> = points
            .into_iter()
            .map(|mut p| {
                p.confidence = clamp_confidence(p.confidence, DEFAULT_CONFIDENCE);
                p
            })
            .collect();
        let encoders = EncoderSet::build(&points, config);
        let metadata = FingerprintMetadata::new(distinct_sources(&points));
        let stats = initial_stats(&points, &encoders, &metadata, config);

        let fingerprint = Self {
            id: id.into(),
            points,
            encoders,
            metadata,
            stats,
        };
        tracing::info!(
            id = %fingerprint.id,
            points = fingerprint.points.len(),
            confidence = fingerprint.stats.confidence,
            low_confidence = fingerprint.stats.low_confidence,
            "Fingerprint created"
        );
        fingerprint
    }

    pub(crate) fn from_parts(
        id: String,
        points: Vec<Point>,
        encoders: EncoderSet,
        metadata: FingerprintMetadata,
        stats: FingerprintStats,
    ) -> Self {
        Self {
            id,
            points,
            encoders,
            metadata,
            stats,
        }
    }

    /// Rebuild every derived structure from the point list, keeping id and metadata.
    pub fn recompute(&mut self, config: &Config) {
        let encoders = EncoderSet::build(&self.points, config);
        let stats = initial_stats(&self.points, &encoders, &self.metadata, config);
        self.encoders = encoders;
        self.stats = stats;
    }

    /// Run the standard comparison cascade against `other`.
    pub fn compare(&self, other: &Fingerprint, config: &Config) -> ComparisonResult {
        Cascade::standard(config).compare(self, other)
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn point_count(&self) -> usize {
        self.points.len()
    }

    pub fn encoders(&self) -> &EncoderSet {
        &self.encoders
    }

    pub fn stats(&self) -> &FingerprintStats {
        &self.stats
    }

    pub fn is_low_confidence(&self) -> bool {
        self.stats.low_confidence
    }

    pub fn photo_count(&self) -> u32 {
        self.metadata.photo_count
    }
}

fn distinct_sources(points: &[Point]) -> Vec<String> {
    let sources: BTreeSet<&str> = points
        .iter()
        .map(|p| p.source.as_str())
        .filter(|s| !s.is_empty())
        .collect();
    sources.into_iter().map(str::to_string).collect()
}

fn mean_confidence(points: &[Point]) -> f64 {
    if points.is_empty() {
        return 0.0;
    }
    points.iter().map(|p| p.confidence).sum::<f64>() / points.len() as f64
}

pub(crate) fn quality_score(confidence: f64, photo_count: u32) -> f64 {
    confidence * (photo_count as f64 / FULL_QUALITY_PHOTOS).min(1.0)
}

/// `0.5 × mean point confidence + 0.5 × graph quality`, halved for
/// low-confidence fingerprints.
pub(crate) fn initial_stats(
    points: &[Point],
    encoders: &EncoderSet,
    metadata: &FingerprintMetadata,
    config: &Config,
) -> FingerprintStats {
    let low_confidence = points.len() < MIN_RELIABLE_POINTS;
    let topology_score = encoders.graph.quality_score(config.graph.target_degree);
    let mut confidence = 0.5 * mean_confidence(points) + 0.5 * topology_score;
    if low_confidence {
        confidence *= 0.5;
    }
    let confidence = confidence.clamp(0.0, 1.0);

    FingerprintStats {
        confidence,
        topology_score,
        quality_score: quality_score(confidence, metadata.photo_count),
        low_confidence,
    }
}
