//! Comparison cascade: cheap encoders first, each stage able to stop the run.

pub mod builder;
pub mod stage;
pub mod traits;
pub mod types;

pub use builder::*;
pub use stage::*;
pub use traits::*;
pub use types::*;
