//! Proximity graphs and topology-aware fusion of aligned graphs

pub mod geometric;
pub mod graph;
pub mod merger;

pub use geometric::{geometric_merge, GeometricMergeOutcome};
pub use graph::{GraphEdge, GraphNode, TopologyGraph};
pub use merger::{GraphMergeOutcome, StructuralMatch, StructuralMismatch, TopologyMerger};
