//! Proximity graph over a fingerprint's points.
//!
//! Nodes live in a `Vec` and edges refer to them by index. Each node's size is
//! its distance to the k-th nearest neighbour; two nodes are connected when
//! they are closer than the (scaled) mean of their sizes.

use crate::config::GraphConfig;
use crate::data::{Point, SpatialIndex};
use crate::registration::Transform;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub x: f64,
    pub y: f64,
    pub confidence: f64,
    pub size: f64,
    /// Number of observations fused into this node
    pub confirmations: u32,
    #[serde(default)]
    pub source: String,
}

impl GraphNode {
    pub fn from_point(point: &Point, fallback_id: usize) -> Self {
        Self {
            id: if point.id.is_empty() {
                format!("n{}", fallback_id)
            } else {
                point.id.clone()
            },
            x: point.x,
            y: point.y,
            confidence: point.confidence,
            size: 0.0,
            confirmations: 1,
            source: point.source.clone(),
        }
    }

    pub fn to_point(&self) -> Point {
        Point::new(self.x, self.y)
            .with_confidence(self.confidence)
            .with_id(self.id.clone())
            .with_source(self.source.clone())
    }

    pub fn distance_to(&self, other: &GraphNode) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// Undirected edge with `from < to`; weight is the edge length.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub from: usize,
    pub to: usize,
    pub weight: f64,
}

#[derive(Debug, Clone, Default)]
pub struct TopologyGraph {
    nodes: Vec<GraphNode>,
    edges: Vec<GraphEdge>,
    /// Sorted neighbour indices per node
    adjacency: Vec<Vec<usize>>,
}

impl TopologyGraph {
    pub fn from_points(points: &[Point], config: &GraphConfig) -> Self {
        let nodes = points
            .iter()
            .enumerate()
            .map(|(i, p)| GraphNode::from_point(p, i))
            .collect();
        Self::from_nodes(nodes, config)
    }

    /// Recompute node sizes and edges for the given nodes.
    pub fn from_nodes(mut nodes: Vec<GraphNode>, config: &GraphConfig) -> Self {
        let spatial = node_index(&nodes);
        assign_sizes(&mut nodes, &spatial, config.size_neighbors);

        let max_size = nodes.iter().map(|n| n.size).fold(0.0, f64::max);
        let mut edges = Vec::new();
        for (i, node) in nodes.iter().enumerate() {
            // Slightly widened so squared-distance rounding never drops a boundary pair
            let reach = config.connect_factor * (node.size + max_size) / 2.0 * (1.0 + 1e-9);
            for (j, d) in spatial.within(node.x, node.y, reach) {
                if j > i && d <= config.connect_factor * (node.size + nodes[j].size) / 2.0 {
                    edges.push(GraphEdge { from: i, to: j, weight: d });
                }
            }
        }
        Self::with_edges(nodes, edges)
    }

    /// Rebuild a graph from stored `(id, neighbour ids)` entries. Sizes are
    /// recomputed; entries naming unknown ids are skipped.
    pub fn from_adjacency(points: &[Point], entries: &[(String, Vec<String>)], config: &GraphConfig) -> Self {
        let nodes = points
            .iter()
            .enumerate()
            .map(|(i, p)| GraphNode::from_point(p, i))
            .collect();
        Self::from_adjacency_nodes(nodes, entries, config)
    }

    /// Like [`TopologyGraph::from_adjacency`] for nodes that already carry
    /// confirmation counts.
    pub fn from_adjacency_nodes(
        mut nodes: Vec<GraphNode>,
        entries: &[(String, Vec<String>)],
        config: &GraphConfig,
    ) -> Self {
        let spatial = node_index(&nodes);
        assign_sizes(&mut nodes, &spatial, config.size_neighbors);

        let index: HashMap<&str, usize> = nodes.iter().enumerate().map(|(i, n)| (n.id.as_str(), i)).collect();
        let mut edges = Vec::new();
        for (id, neighbors) in entries {
            let Some(&i) = index.get(id.as_str()) else { continue };
            for neighbor in neighbors {
                match index.get(neighbor.as_str()) {
                    Some(&j) if i < j => edges.push(GraphEdge {
                        from: i,
                        to: j,
                        weight: nodes[i].distance_to(&nodes[j]),
                    }),
                    _ => {}
                }
            }
        }
        Self::with_edges(nodes, edges)
    }

    fn with_edges(nodes: Vec<GraphNode>, mut edges: Vec<GraphEdge>) -> Self {
        edges.sort_by_key(|e| (e.from, e.to));
        edges.dedup_by_key(|e| (e.from, e.to));

        let mut adjacency = vec![Vec::new(); nodes.len()];
        for edge in &edges {
            adjacency[edge.from].push(edge.to);
            adjacency[edge.to].push(edge.from);
        }
        for list in &mut adjacency {
            list.sort_unstable();
        }

        Self { nodes, edges, adjacency }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    pub fn edges(&self) -> &[GraphEdge] {
        &self.edges
    }

    pub fn node(&self, index: usize) -> Option<&GraphNode> {
        self.nodes.get(index)
    }

    pub fn neighbors(&self, index: usize) -> &[usize] {
        self.adjacency.get(index).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn degree(&self, index: usize) -> usize {
        self.neighbors(index).len()
    }

    pub fn has_edge(&self, a: usize, b: usize) -> bool {
        self.neighbors(a).binary_search(&b).is_ok()
    }

    /// Whether `b` is reachable from `a` in at most `hops` edges.
    pub fn within_hops(&self, a: usize, b: usize, hops: usize) -> bool {
        if a == b {
            return true;
        }
        if a >= self.nodes.len() || b >= self.nodes.len() {
            return false;
        }

        let mut depth = vec![usize::MAX; self.nodes.len()];
        let mut queue = VecDeque::from([a]);
        depth[a] = 0;
        while let Some(current) = queue.pop_front() {
            if depth[current] == hops {
                continue;
            }
            for &next in self.neighbors(current) {
                if depth[next] != usize::MAX {
                    continue;
                }
                if next == b {
                    return true;
                }
                depth[next] = depth[current] + 1;
                queue.push_back(next);
            }
        }
        false
    }

    pub fn mean_size(&self) -> f64 {
        if self.nodes.is_empty() {
            return 0.0;
        }
        self.nodes.iter().map(|n| n.size).sum::<f64>() / self.nodes.len() as f64
    }

    pub fn mean_degree(&self) -> f64 {
        if self.nodes.is_empty() {
            return 0.0;
        }
        2.0 * self.edges.len() as f64 / self.nodes.len() as f64
    }

    /// Same topology with every node mapped through `transform`; sizes and
    /// edge weights follow the transform's scale.
    pub fn transformed(&self, transform: &Transform) -> Self {
        let nodes = self
            .nodes
            .iter()
            .map(|n| {
                let (x, y) = transform.apply_xy(n.x, n.y);
                GraphNode {
                    x,
                    y,
                    size: n.size * transform.scale,
                    ..n.clone()
                }
            })
            .collect();
        let edges = self
            .edges
            .iter()
            .map(|e| GraphEdge {
                weight: e.weight * transform.scale,
                ..*e
            })
            .collect();
        Self {
            nodes,
            edges,
            adjacency: self.adjacency.clone(),
        }
    }

    /// Node indices of every connected component, largest first.
    pub fn connected_components(&self) -> Vec<Vec<usize>> {
        let mut seen = vec![false; self.nodes.len()];
        let mut components = Vec::new();
        for start in 0..self.nodes.len() {
            if seen[start] {
                continue;
            }
            seen[start] = true;
            let mut component = vec![start];
            let mut queue = VecDeque::from([start]);
            while let Some(current) = queue.pop_front() {
                for &next in self.neighbors(current) {
                    if !seen[next] {
                        seen[next] = true;
                        component.push(next);
                        queue.push_back(next);
                    }
                }
            }
            components.push(component);
        }
        components.sort_by_key(|c| std::cmp::Reverse(c.len()));
        components
    }

    /// Blend of connectivity (largest component share) and how close the mean
    /// degree is to `target_degree`, in `[0, 1]`.
    pub fn quality_score(&self, target_degree: f64) -> f64 {
        if self.nodes.len() < 2 {
            return 0.0;
        }
        let largest = self.connected_components().first().map_or(0, Vec::len);
        let connectivity = largest as f64 / self.nodes.len() as f64;
        let degree_term = if target_degree > 0.0 {
            1.0 - ((self.mean_degree() - target_degree).abs() / target_degree).min(1.0)
        } else {
            0.0
        };
        (0.6 * connectivity + 0.4 * degree_term).clamp(0.0, 1.0)
    }

    pub fn spatial_index(&self) -> SpatialIndex {
        node_index(&self.nodes)
    }

    pub fn to_points(&self) -> Vec<Point> {
        self.nodes.iter().map(GraphNode::to_point).collect()
    }

    /// `(id, neighbour ids)` for every node, in node order
    pub fn adjacency_entries(&self) -> Vec<(String, Vec<String>)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, n)| {
                let neighbors = self.neighbors(i).iter().map(|&j| self.nodes[j].id.clone()).collect();
                (n.id.clone(), neighbors)
            })
            .collect()
    }
}

fn node_index(nodes: &[GraphNode]) -> SpatialIndex {
    SpatialIndex::from_xy(nodes.iter().map(|n| (n.x, n.y)))
}

/// Each node's size is its distance to the k-th nearest other node.
fn assign_sizes(nodes: &mut [GraphNode], spatial: &SpatialIndex, k: usize) {
    let k = k.clamp(1, nodes.len().saturating_sub(1).max(1));
    let sizes: Vec<f64> = nodes
        .iter()
        .enumerate()
        .map(|(i, node)| {
            spatial
                .neighbors_of(i, node.x, node.y, k)
                .last()
                .map_or(0.0, |(_, d)| *d)
        })
        .collect();
    for (node, size) in nodes.iter_mut().zip(sizes) {
        node.size = size;
    }
}
