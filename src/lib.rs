//! Forensic footprint matching.
//!
//! Detected sole features become point clouds, every point cloud is turned into
//! a [`Fingerprint`] carrying several cheap encodings, and fingerprints are
//! compared through a staged cascade or merged after a RANSAC alignment.

pub mod analysis;
pub mod config;
pub mod data;
pub mod encoders;
pub mod fingerprint;
pub mod logging;
pub mod pipeline;
pub mod registration;
pub mod store;
pub mod topology;
pub mod visualization;

pub use config::Config;
pub use data::{Point, PointTransformer};
pub use fingerprint::{Fingerprint, FingerprintDocument, MergeResult};
pub use pipeline::{ComparisonResult, Decision};
pub use registration::{AlignmentResult, PointCloudAligner, Transform};
pub use store::FingerprintStore;

pub type Result<T> = anyhow::Result<T>;
