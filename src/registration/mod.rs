//! Point set registration
//!
//! [`PointCloudAligner`] estimates the similarity transform (optionally
//! mirrored) that maps one feature set onto another.

pub mod estimator;
pub mod guard;
pub mod ransac;
pub mod types;

pub use ransac::PointCloudAligner;
pub use types::{normalize_angle, AlignmentQuality, AlignmentResult, InlierMatch, Transform};
