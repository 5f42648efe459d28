pub mod loader;
pub mod point;
pub mod spatial;
pub mod synthetic;
pub mod transformer;

pub use loader::*;
pub use point::{Point, PointBuilder, ValidationMode, DEFAULT_CONFIDENCE};
pub use spatial::SpatialIndex;
pub use synthetic::{grid_points, random_points, synthetic_sole};
pub use transformer::*;
