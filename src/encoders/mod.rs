pub mod bitmask;
pub mod distance_matrix;
pub mod moments;
pub mod point_tracker;
pub mod vector_signature;

pub use bitmask::BitmaskEncoder;
pub use distance_matrix::{DistanceMatrixEncoder, MatrixComparison, MatrixSummary, ReducedMatrix};
pub use moments::MomentEncoder;
pub use point_tracker::{PointTracker, RatingEvent, TrackOutcome, TrackedPoint};
pub use vector_signature::{SignatureComparison, StarSignature, VectorSignatureEncoder};

use crate::data::Point;

/// A compact representation of a point cloud that can be compared cheaply.
///
/// Encoders are derived entirely from a point list; rebuilding from the same
/// points always yields the same encoding.
pub trait Encoder: Sized {
    type Config;

    fn name(&self) -> &'static str;

    fn encode(points: &[Point], config: &Self::Config) -> Self;

    /// Similarity in `[0, 1]`, 1 meaning identical
    fn similarity(&self, other: &Self) -> f64;

    fn is_valid(&self) -> bool {
        true
    }
}
