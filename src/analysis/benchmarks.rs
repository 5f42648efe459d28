//! Known-transform recovery benchmark for the aligner.
//!
//! Each scenario moves a point cloud by a ground-truth transform, optionally
//! perturbs the moved copy, then asks the aligner to map the original onto it
//! and measures how far the recovered transform is from the truth.

use crate::analysis::metrics::{mean_point_error, rotation_error_degrees, scale_error_ratio, translation_error};
use crate::config::{AlignerConfig, Config, EncoderConfig};
use crate::data::{GroundTruth, Point, PointTransformer};
use crate::logging::Timer;
use crate::registration::{AlignmentQuality, PointCloudAligner};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct RecoveryScenario {
    pub name: String,
    pub truth: GroundTruth,
    /// Uniform per-axis jitter applied after the transform
    pub jitter: f64,
    pub outliers: usize,
    pub drop_fraction: f64,
}

impl RecoveryScenario {
    pub fn new(name: impl Into<String>, truth: GroundTruth) -> Self {
        Self {
            name: name.into(),
            truth,
            jitter: 0.0,
            outliers: 0,
            drop_fraction: 0.0,
        }
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_outliers(mut self, outliers: usize) -> Self {
        self.outliers = outliers;
        self
    }

    pub fn with_drop_fraction(mut self, fraction: f64) -> Self {
        self.drop_fraction = fraction;
        self
    }

    pub fn is_clean(&self) -> bool {
        self.jitter == 0.0 && self.outliers == 0 && self.drop_fraction == 0.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryReport {
    pub scenario: String,
    /// Aligner returned a usable transform
    pub aligned: bool,
    /// Aligned, mirror flag correct and errors within tolerance
    pub passed: bool,
    pub score: f64,
    pub quality: AlignmentQuality,
    pub inliers: usize,
    pub expected_mirrored: bool,
    pub detected_mirrored: bool,
    pub rotation_error_deg: Option<f64>,
    pub scale_error: Option<f64>,
    pub translation_error: Option<f64>,
    pub point_error: Option<f64>,
    pub processing_time_ms: f64,
    pub failure: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecoverySummary {
    pub total: usize,
    pub passed: usize,
    pub mean_rotation_error_deg: f64,
    pub mean_scale_error: f64,
    pub mean_point_error: f64,
    pub mean_time_ms: f64,
}

impl RecoverySummary {
    pub fn pass_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.passed as f64 / self.total as f64
    }
}

pub struct RecoveryBenchmark {
    aligner: AlignerConfig,
    encoders: EncoderConfig,
    scenarios: Vec<RecoveryScenario>,
    seed: u64,
    pub max_rotation_error_deg: f64,
    pub max_scale_error: f64,
}

impl RecoveryBenchmark {
    pub fn new(config: &Config) -> Self {
        Self {
            aligner: config.aligner.clone(),
            encoders: config.encoders.clone(),
            scenarios: Self::standard_scenarios(),
            seed: config.aligner.seed.unwrap_or(42),
            max_rotation_error_deg: 10.0,
            max_scale_error: 0.1,
        }
    }

    pub fn with_scenarios(mut self, scenarios: Vec<RecoveryScenario>) -> Self {
        self.scenarios = scenarios;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn scenarios(&self) -> &[RecoveryScenario] {
        &self.scenarios
    }

    /// Rotations up to 60°, moderate scale changes, a mirrored copy and a
    /// few perturbed variants.
    pub fn standard_scenarios() -> Vec<RecoveryScenario> {
        vec![
            RecoveryScenario::new("identity", GroundTruth::new()),
            RecoveryScenario::new("translation", GroundTruth::translation(120.0, -75.0)),
            RecoveryScenario::new("rotation_15", GroundTruth::rotation(15.0)),
            RecoveryScenario::new("rotation_45", GroundTruth::rotation(45.0).with_scale(1.1)),
            RecoveryScenario::new(
                "rotation_60_shrink",
                GroundTruth {
                    translation: (40.0, 30.0),
                    ..GroundTruth::rotation(-60.0).with_scale(0.9)
                },
            ),
            RecoveryScenario::new("mirrored", GroundTruth::rotation(30.0).with_mirror(true)),
            RecoveryScenario::new("jitter", GroundTruth::rotation(20.0)).with_jitter(2.0),
            RecoveryScenario::new("outliers", GroundTruth::rotation(-25.0))
                .with_jitter(1.0)
                .with_outliers(6),
            RecoveryScenario::new("partial", GroundTruth::translation(-30.0, 60.0)).with_drop_fraction(0.2),
        ]
    }

    pub fn run(&self, points: &[Point]) -> Vec<RecoveryReport> {
        let timer = Timer::global("recovery_benchmark", None);
        let reports: Vec<RecoveryReport> = self
            .scenarios
            .iter()
            .enumerate()
            .map(|(i, scenario)| self.run_scenario(points, scenario, self.seed.wrapping_add(i as u64)))
            .collect();

        let summary = Self::summarize(&reports);
        info!(
            scenarios = summary.total,
            passed = summary.passed,
            mean_rotation_error = summary.mean_rotation_error_deg,
            "Recovery benchmark finished"
        );
        timer
            .with_metadata("passed", serde_json::json!(summary.passed))
            .with_metadata("total", serde_json::json!(summary.total))
            .stop();
        reports
    }

    fn run_scenario(&self, points: &[Point], scenario: &RecoveryScenario, seed: u64) -> RecoveryReport {
        let mut rng = StdRng::seed_from_u64(seed);
        let truth = scenario.truth.to_transform();

        let mut target = truth.apply_all(points);
        if scenario.jitter > 0.0 {
            target = PointTransformer::jitter(&target, scenario.jitter, &mut rng);
        }
        if scenario.drop_fraction > 0.0 {
            target = PointTransformer::drop_points(&target, scenario.drop_fraction, &mut rng);
        }
        if scenario.outliers > 0 {
            target = PointTransformer::add_outliers(&target, scenario.outliers, &mut rng);
        }

        let aligner = PointCloudAligner::new(self.aligner.clone().with_seed(seed))
            .with_encoder_config(self.encoders.clone());
        let start = Instant::now();
        let result = aligner.align(points, &target, None);
        let processing_time_ms = start.elapsed().as_secs_f64() * 1000.0;

        let mut report = RecoveryReport {
            scenario: scenario.name.clone(),
            aligned: result.is_success(),
            passed: false,
            score: result.score,
            quality: result.quality,
            inliers: result.inlier_count(),
            expected_mirrored: truth.mirrored,
            detected_mirrored: result.mirrored,
            rotation_error_deg: None,
            scale_error: None,
            translation_error: None,
            point_error: None,
            processing_time_ms,
            failure: result.reason.clone(),
        };

        let Some(recovered) = result.transform.filter(|_| result.is_success()) else {
            warn!(scenario = %scenario.name, reason = ?result.reason, "Recovery failed");
            return report;
        };

        let rotation = rotation_error_degrees(&recovered, &truth);
        let scale = scale_error_ratio(&recovered, &truth);
        report.rotation_error_deg = Some(rotation);
        report.scale_error = Some(scale);
        report.translation_error = Some(translation_error(&recovered, &truth));
        report.point_error = Some(mean_point_error(&recovered, &truth, points));
        report.passed = recovered.mirrored == truth.mirrored
            && rotation <= self.max_rotation_error_deg
            && scale <= self.max_scale_error;
        if !report.passed {
            report.failure = Some(format!(
                "rotation error {:.2}° scale error {:.3} mirrored {} (expected {})",
                rotation, scale, recovered.mirrored, truth.mirrored
            ));
        }
        report
    }

    pub fn summarize(reports: &[RecoveryReport]) -> RecoverySummary {
        let aligned: Vec<&RecoveryReport> = reports.iter().filter(|r| r.rotation_error_deg.is_some()).collect();
        let mean = |f: &dyn Fn(&RecoveryReport) -> Option<f64>| {
            if aligned.is_empty() {
                return 0.0;
            }
            aligned.iter().filter_map(|r| f(r)).sum::<f64>() / aligned.len() as f64
        };

        RecoverySummary {
            total: reports.len(),
            passed: reports.iter().filter(|r| r.passed).count(),
            mean_rotation_error_deg: mean(&|r| r.rotation_error_deg),
            mean_scale_error: mean(&|r| r.scale_error),
            mean_point_error: mean(&|r| r.point_error),
            mean_time_ms: if reports.is_empty() {
                0.0
            } else {
                reports.iter().map(|r| r.processing_time_ms).sum::<f64>() / reports.len() as f64
            },
        }
    }
}
