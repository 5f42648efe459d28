//! Persistence document for fingerprints.
//!
//! Documents carry the point list plus every derived structure in a compact
//! form. Documents written with an older version tag are rebuilt from their
//! points on load.

use crate::config::Config;
use crate::data::Point;
use crate::encoders::{
    BitmaskEncoder, DistanceMatrixEncoder, Encoder, MatrixSummary, MomentEncoder, PointTracker, ReducedMatrix,
    TrackedPoint, VectorSignatureEncoder,
};
use crate::fingerprint::{EncoderSet, Fingerprint, FingerprintMetadata, FingerprintStats};
use crate::topology::{GraphNode, TopologyGraph};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const DOCUMENT_VERSION: u32 = 2;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatrixDocument {
    pub reduced: ReducedMatrix,
    pub summary: MatrixSummary,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrackerDocument {
    pub observation: u64,
    pub entries: Vec<(String, TrackedPoint)>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphDocument {
    pub adjacency: Vec<(String, Vec<String>)>,
    /// Node confirmation counts above one, by id
    #[serde(default)]
    pub confirmations: Vec<(String, u32)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FingerprintDocument {
    #[serde(default)]
    pub version: u32,
    pub id: String,
    pub points: Vec<Point>,
    /// Decimal string so the full `u64` survives JSON readers using doubles
    #[serde(default)]
    pub bitmask: String,
    #[serde(default)]
    pub moments: MomentEncoder,
    #[serde(default)]
    pub distance_matrix: MatrixDocument,
    #[serde(default)]
    pub vector_signature: VectorSignatureEncoder,
    #[serde(default)]
    pub tracker: TrackerDocument,
    #[serde(default)]
    pub graph: GraphDocument,
    pub metadata: Option<FingerprintMetadata>,
    #[serde(default)]
    pub stats: FingerprintStats,
}

impl Fingerprint {
    pub fn to_document(&self) -> FingerprintDocument {
        let encoders = self.encoders();
        FingerprintDocument {
            version: DOCUMENT_VERSION,
            id: self.id.clone(),
            points: self.points().to_vec(),
            bitmask: encoders.bitmask.to_decimal_string(),
            moments: encoders.moments.clone(),
            distance_matrix: MatrixDocument {
                reduced: encoders.matrix.reduce(),
                summary: encoders.matrix.summary(),
            },
            vector_signature: encoders.vector.clone(),
            tracker: TrackerDocument {
                observation: encoders.tracker.observation(),
                entries: encoders.tracker.entries(),
            },
            graph: GraphDocument {
                adjacency: encoders.graph.adjacency_entries(),
                confirmations: encoders
                    .graph
                    .nodes()
                    .iter()
                    .filter(|n| n.confirmations > 1)
                    .map(|n| (n.id.clone(), n.confirmations))
                    .collect(),
            },
            metadata: Some(self.metadata.clone()),
            stats: *self.stats(),
        }
    }

    /// Rebuild a fingerprint from a document.
    ///
    /// Current documents restore the stored bitmask, moments, signatures,
    /// tracker and graph; the full distance matrix is recomputed from the
    /// points since only its reduction is stored. Older documents are
    /// recomputed entirely.
    pub fn from_document(document: FingerprintDocument, config: &Config) -> crate::Result<Self> {
        if document.version > DOCUMENT_VERSION {
            anyhow::bail!(
                "fingerprint {} has unsupported document version {} (newest known is {})",
                document.id,
                document.version,
                DOCUMENT_VERSION
            );
        }

        if document.version < DOCUMENT_VERSION {
            tracing::info!(
                id = %document.id,
                version = document.version,
                "Recomputing fingerprint from an older document"
            );
            let mut fingerprint = Fingerprint::create_from_points(document.id, document.points, config);
            if let Some(metadata) = document.metadata {
                fingerprint.metadata = metadata;
            }
            fingerprint.recompute(config);
            return Ok(fingerprint);
        }

        let points = document.points;
        let bitmask = BitmaskEncoder::from_decimal_string(&document.bitmask)
            .with_context(|| format!("fingerprint {} has a malformed bitmask", document.id))?;

        let nodes = points
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let mut node = GraphNode::from_point(p, i);
                if let Some((_, count)) = document.graph.confirmations.iter().find(|(id, _)| *id == node.id) {
                    node.confirmations = *count;
                }
                node
            })
            .collect();
        let graph = TopologyGraph::from_adjacency_nodes(nodes, &document.graph.adjacency, &config.graph);

        let tracker = if document.tracker.entries.is_empty() {
            PointTracker::encode(&points, &config.tracker)
        } else {
            PointTracker::from_entries(document.tracker.entries, document.tracker.observation, config.tracker.clone())
        };

        let encoders = EncoderSet {
            bitmask,
            moments: document.moments,
            matrix: DistanceMatrixEncoder::encode(&points, &config.encoders),
            vector: document.vector_signature,
            tracker,
            graph,
        };
        let metadata = document
            .metadata
            .unwrap_or_else(|| FingerprintMetadata::new(Vec::new()));

        Ok(Fingerprint::from_parts(document.id, points, encoders, metadata, document.stats))
    }
}

pub fn save_document<P: AsRef<Path>>(fingerprint: &Fingerprint, path: P) -> crate::Result<()> {
    let content = serde_json::to_string_pretty(&fingerprint.to_document())?;
    fs::write(path.as_ref(), content).with_context(|| format!("writing {}", path.as_ref().display()))?;
    Ok(())
}

pub fn load_document<P: AsRef<Path>>(path: P, config: &Config) -> crate::Result<Fingerprint> {
    let content =
        fs::read_to_string(path.as_ref()).with_context(|| format!("reading {}", path.as_ref().display()))?;
    let document: FingerprintDocument = serde_json::from_str(&content)
        .with_context(|| format!("parsing fingerprint document {}", path.as_ref().display()))?;
    Fingerprint::from_document(document, config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::synthetic::synthetic_sole;
    use tempfile::TempDir;

    #[test]
    fn test_document_round_trip() {
        let config = Config::default();
        let fp = Fingerprint::create_from_points("doc-1", synthetic_sole(30, 4), &config);
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc-1.json");

        save_document(&fp, &path).unwrap();
        let loaded = load_document(&path, &config).unwrap();

        assert_eq!(loaded.id, "doc-1");
        assert_eq!(loaded.points(), fp.points());
        assert_eq!(loaded.encoders().bitmask, fp.encoders().bitmask);
        assert_eq!(loaded.encoders().moments, fp.encoders().moments);
        assert_eq!(loaded.encoders().vector, fp.encoders().vector);
        assert_eq!(loaded.encoders().tracker.entries(), fp.encoders().tracker.entries());
        assert_eq!(loaded.encoders().graph.adjacency_entries(), fp.encoders().graph.adjacency_entries());
        assert_eq!(loaded.stats(), fp.stats());
        assert_eq!(loaded.metadata, fp.metadata);
    }

    #[test]
    fn test_bitmask_stored_as_decimal_string() {
        let config = Config::default();
        let fp = Fingerprint::create_from_points("doc-2", synthetic_sole(20, 5), &config);
        let value = serde_json::to_value(fp.to_document()).unwrap();
        assert_eq!(value["version"], DOCUMENT_VERSION);
        assert_eq!(value["bitmask"], serde_json::json!(fp.encoders().bitmask.mask().to_string()));
    }

    #[test]
    fn test_older_document_is_recomputed() {
        let config = Config::default();
        let points = synthetic_sole(25, 7);
        let document = serde_json::json!({
            "id": "legacy",
            "points": points,
        });
        let document: FingerprintDocument = serde_json::from_value(document).unwrap();
        let loaded = Fingerprint::from_document(document, &config).unwrap();
        let fresh = Fingerprint::create_from_points("legacy", points, &config);

        assert_eq!(loaded.point_count(), 25);
        assert_eq!(loaded.encoders().bitmask, fresh.encoders().bitmask);
        assert!((loaded.stats().confidence - fresh.stats().confidence).abs() < 1e-12);
    }

    #[test]
    fn test_newer_document_is_rejected() {
        let config = Config::default();
        let mut document = Fingerprint::create_from_points("future", synthetic_sole(10, 1), &config).to_document();
        document.version = DOCUMENT_VERSION + 1;
        let err = Fingerprint::from_document(document, &config).unwrap_err();
        assert!(err.to_string().contains("unsupported document version"));
    }

    #[test]
    fn test_malformed_bitmask_is_an_error() {
        let config = Config::default();
        let mut document = Fingerprint::create_from_points("bad", synthetic_sole(10, 1), &config).to_document();
        document.bitmask = "not-a-number".to_string();
        assert!(Fingerprint::from_document(document, &config).is_err());
    }
}
