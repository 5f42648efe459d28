//! Structural correspondence and fusion of two proximity graphs.

use crate::config::{GraphConfig, MergeConfig};
use crate::registration::Transform;
use crate::topology::graph::{GraphNode, TopologyGraph};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Pairing of a node of the first graph with a node of the second.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StructuralMatch {
    pub a: usize,
    pub b: usize,
    pub distance: f64,
    pub score: f64,
}

#[derive(Debug, Clone)]
pub struct GraphMergeOutcome {
    pub graph: TopologyGraph,
    pub matches: Vec<StructuralMatch>,
    pub structural_similarity: f64,
    pub topology_preservation: f64,
    /// Nodes of the second graph appended without a partner
    pub added: usize,
}

/// Graphs too different to fuse node by node.
#[derive(Debug, Clone, PartialEq)]
pub struct StructuralMismatch {
    pub similarity: f64,
    pub required: f64,
    pub matches: usize,
}

impl fmt::Display for StructuralMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "structural similarity {:.3} below {:.3} ({} node matches)",
            self.similarity, self.required, self.matches
        )
    }
}

impl std::error::Error for StructuralMismatch {}

pub struct TopologyMerger {
    config: MergeConfig,
    graph_config: GraphConfig,
}

impl TopologyMerger {
    pub fn new(config: MergeConfig, graph_config: GraphConfig) -> Self {
        Self { config, graph_config }
    }

    pub fn config(&self) -> &MergeConfig {
        &self.config
    }

    /// Matching radius derived from the mean node size of both graphs.
    pub fn match_radius(&self, a: &TopologyGraph, b: &TopologyGraph) -> f64 {
        let total = a.node_count() + b.node_count();
        let mean_size = if total == 0 {
            0.0
        } else {
            (a.mean_size() * a.node_count() as f64 + b.mean_size() * b.node_count() as f64) / total as f64
        };
        (self.config.match_radius_factor * mean_size).max(self.config.min_match_radius)
    }

    /// Node correspondences between two graphs already in the same frame.
    ///
    /// Candidate pairs inside the match radius are scored by position,
    /// degree agreement and neighbourhood overlap, then assigned greedily
    /// one-to-one on descending score.
    pub fn find_structural_matches(&self, a: &TopologyGraph, b: &TopologyGraph) -> Vec<StructuralMatch> {
        let radius = self.match_radius(a, b);
        let mut candidates = Vec::new();

        let spatial = b.spatial_index();
        for (i, na) in a.nodes().iter().enumerate() {
            for (j, distance) in spatial.within(na.x, na.y, radius) {
                if distance > radius {
                    continue;
                }
                let position = 1.0 - distance / radius;
                let (da, db) = (a.degree(i) as f64, b.degree(j) as f64);
                let degree = 1.0 - (da - db).abs() / da.max(db).max(1.0);
                let overlap = neighbor_overlap(a, i, b, j, radius);
                let score = 0.5 * position + 0.2 * degree + 0.3 * overlap;
                if score >= self.config.min_match_score {
                    candidates.push(StructuralMatch {
                        a: i,
                        b: j,
                        distance,
                        score,
                    });
                }
            }
        }

        candidates.sort_by(|x, y| y.score.total_cmp(&x.score).then(x.distance.total_cmp(&y.distance)));
        let mut used_a = vec![false; a.node_count()];
        let mut used_b = vec![false; b.node_count()];
        let mut matches = Vec::new();
        for c in candidates {
            if used_a[c.a] || used_b[c.b] {
                continue;
            }
            used_a[c.a] = true;
            used_b[c.b] = true;
            matches.push(c);
        }
        matches
    }

    /// `0.5 × coverage + 0.5 × edge consistency` over the given matches.
    ///
    /// An edge of `a` whose endpoints are both matched earns full credit when
    /// the partners share an edge in `b`, half credit when they are two hops
    /// apart.
    pub fn structural_similarity(&self, a: &TopologyGraph, b: &TopologyGraph, matches: &[StructuralMatch]) -> f64 {
        let smaller = a.node_count().min(b.node_count());
        if smaller == 0 {
            return 0.0;
        }
        let coverage = (matches.len() as f64 / smaller as f64).min(1.0);

        let mut partner = vec![None; a.node_count()];
        for m in matches {
            partner[m.a] = Some(m.b);
        }

        let mut considered = 0usize;
        let mut credit = 0.0;
        for edge in a.edges() {
            let (Some(pa), Some(pb)) = (partner[edge.from], partner[edge.to]) else { continue };
            considered += 1;
            if b.has_edge(pa, pb) {
                credit += 1.0;
            } else if b.within_hops(pa, pb, 2) {
                credit += 0.5;
            }
        }
        let consistency = if considered > 0 { credit / considered as f64 } else { 0.0 };

        0.5 * coverage + 0.5 * consistency
    }

    /// Share of input edges whose endpoints stay within two hops in `merged`.
    /// Each input comes with the index of its nodes in the merged graph.
    pub fn topology_preservation(&self, inputs: &[(&TopologyGraph, &[usize])], merged: &TopologyGraph) -> f64 {
        let mut total = 0usize;
        let mut kept = 0usize;
        for (graph, mapping) in inputs {
            for edge in graph.edges() {
                total += 1;
                if let (Some(&x), Some(&y)) = (mapping.get(edge.from), mapping.get(edge.to)) {
                    if merged.within_hops(x, y, 2) {
                        kept += 1;
                    }
                }
            }
        }
        if total == 0 {
            1.0
        } else {
            kept as f64 / total as f64
        }
    }

    /// Fuse `other` into `base`; `transform` maps `other` into `base`'s frame.
    ///
    /// Matched nodes average their positions weighted by confirmations and
    /// take the boosted confidence; unmatched nodes of both graphs are kept.
    /// Edges are rebuilt over the fused nodes.
    pub fn merge_graphs(
        &self,
        base: &TopologyGraph,
        other: &TopologyGraph,
        transform: &Transform,
    ) -> Result<GraphMergeOutcome, StructuralMismatch> {
        let aligned = other.transformed(transform);
        let matches = self.find_structural_matches(base, &aligned);
        let similarity = self.structural_similarity(base, &aligned, &matches);

        tracing::debug!(
            base_nodes = base.node_count(),
            other_nodes = other.node_count(),
            matches = matches.len(),
            similarity = similarity,
            "Structural matching completed"
        );

        if similarity < self.config.min_structural_similarity {
            return Err(StructuralMismatch {
                similarity,
                required: self.config.min_structural_similarity,
                matches: matches.len(),
            });
        }

        let mut nodes: Vec<GraphNode> = base.nodes().to_vec();
        let mut other_mapping = vec![usize::MAX; aligned.node_count()];
        for m in &matches {
            let fused = fuse_nodes(&nodes[m.a], &aligned.nodes()[m.b], self.config.confidence_boost);
            nodes[m.a] = fused;
            other_mapping[m.b] = m.a;
        }

        let mut ids: HashSet<String> = nodes.iter().map(|n| n.id.clone()).collect();
        let mut added = 0;
        for (j, node) in aligned.nodes().iter().enumerate() {
            if other_mapping[j] != usize::MAX {
                continue;
            }
            let mut node = node.clone();
            if ids.contains(&node.id) {
                node.id = unique_id(&node.id, &ids);
            }
            ids.insert(node.id.clone());
            other_mapping[j] = nodes.len();
            nodes.push(node);
            added += 1;
        }

        let merged = TopologyGraph::from_nodes(nodes, &self.graph_config);
        let base_mapping: Vec<usize> = (0..base.node_count()).collect();
        let preservation = self.topology_preservation(
            &[(base, base_mapping.as_slice()), (other, other_mapping.as_slice())],
            &merged,
        );

        Ok(GraphMergeOutcome {
            graph: merged,
            matches,
            structural_similarity: similarity,
            topology_preservation: preservation,
            added,
        })
    }
}

/// Share of `a`'s neighbours of `i` that have some neighbour of `j` in `b`
/// within `radius`.
fn neighbor_overlap(a: &TopologyGraph, i: usize, b: &TopologyGraph, j: usize, radius: f64) -> f64 {
    let na = a.neighbors(i);
    if na.is_empty() {
        return if b.neighbors(j).is_empty() { 1.0 } else { 0.0 };
    }
    let hits = na
        .iter()
        .filter(|&&ni| {
            let node = &a.nodes()[ni];
            b.neighbors(j).iter().any(|&nj| node.distance_to(&b.nodes()[nj]) <= radius)
        })
        .count();
    hits as f64 / na.len() as f64
}

fn fuse_nodes(base: &GraphNode, other: &GraphNode, boost: f64) -> GraphNode {
    let wa = base.confirmations.max(1) as f64;
    let wb = other.confirmations.max(1) as f64;
    GraphNode {
        id: base.id.clone(),
        x: (wa * base.x + wb * other.x) / (wa + wb),
        y: (wa * base.y + wb * other.y) / (wa + wb),
        confidence: (base.confidence.max(other.confidence) * boost).clamp(0.0, 1.0),
        size: base.size,
        confirmations: base.confirmations.max(1) + other.confirmations.max(1),
        source: base.source.clone(),
    }
}

pub(crate) fn unique_id(id: &str, taken: &HashSet<String>) -> String {
    (1..)
        .map(|n| format!("{}-m{}", id, n))
        .find(|candidate| !taken.contains(candidate))
        .unwrap_or_else(|| id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::synthetic::{random_points, synthetic_sole};
    use crate::data::{Point, PointTransformer};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn merger() -> TopologyMerger {
        TopologyMerger::new(MergeConfig::default(), GraphConfig::default())
    }

    fn graph(points: &[Point]) -> TopologyGraph {
        TopologyGraph::from_points(points, &GraphConfig::default())
    }

    #[test]
    fn test_identical_graphs_match_fully() {
        let g = graph(&synthetic_sole(40, 1));
        let m = merger();
        let matches = m.find_structural_matches(&g, &g);
        assert_eq!(matches.len(), 40);
        assert!(matches.iter().all(|x| x.a == x.b));
        assert!((m.structural_similarity(&g, &g, &matches) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_unrelated_graphs_score_low() {
        let a = graph(&synthetic_sole(40, 1));
        let b = graph(&random_points(40, 300.0, 300.0, 8));
        let m = merger();
        let matches = m.find_structural_matches(&a, &b);
        assert!(m.structural_similarity(&a, &b, &matches) < 0.6);
    }

    #[test]
    fn test_merge_of_jittered_copy() {
        let points = synthetic_sole(40, 3);
        let mut rng = StdRng::seed_from_u64(5);
        let jittered = PointTransformer::jitter(&points, 3.0, &mut rng);
        let truth = Transform::new(0.4, 1.0, (30.0, -20.0), false);
        let other = graph(&truth.apply_all(&jittered));

        // The merge is given the inverse mapping from `other` back into the base frame.
        let inverse = Transform::new(-0.4, 1.0, (0.0, 0.0), false);
        let (tx, ty) = inverse.apply_xy(30.0, -20.0);
        let back = Transform::new(-0.4, 1.0, (-tx, -ty), false);

        let base = graph(&points);
        let outcome = merger().merge_graphs(&base, &other, &back).unwrap();
        assert!(outcome.structural_similarity > 0.9);
        assert!(outcome.matches.len() >= 38);
        assert!(outcome.graph.node_count() <= 80);
        assert_eq!(outcome.graph.node_count(), 40 + outcome.added);
        assert!(outcome.topology_preservation > 0.9);
        assert!(outcome.graph.nodes().iter().all(|n| (0.0..=1.0).contains(&n.confidence)));
        let fused = outcome.graph.nodes().iter().filter(|n| n.confirmations == 2).count();
        assert_eq!(fused, outcome.matches.len());
    }

    #[test]
    fn test_merge_rejects_mismatched_structure() {
        let base = graph(&synthetic_sole(40, 1));
        let other = graph(&random_points(40, 300.0, 300.0, 8));
        let err = merger()
            .merge_graphs(&base, &other, &Transform::identity())
            .unwrap_err();
        assert!(err.similarity < err.required);
        assert!(err.to_string().contains("structural similarity"));
    }

    #[test]
    fn test_duplicate_ids_are_renamed() {
        let taken: HashSet<String> = ["p".to_string(), "p-m1".to_string()].into_iter().collect();
        assert_eq!(unique_id("p", &taken), "p-m2");
    }
}
