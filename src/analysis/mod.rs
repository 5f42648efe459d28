pub mod benchmarks;
pub mod metrics;

pub use benchmarks::{RecoveryBenchmark, RecoveryReport, RecoveryScenario, RecoverySummary};
pub use metrics::{mean_point_error, rotation_error_degrees, scale_error_ratio, translation_error};
