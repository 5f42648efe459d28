use crate::data::ValidationMode;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub input: InputConfig,
    pub aligner: AlignerConfig,
    pub encoders: EncoderConfig,
    pub graph: GraphConfig,
    pub merge: MergeConfig,
    pub cascade: CascadeConfig,
    pub tracker: TrackerConfig,
    pub search: SearchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    pub validation: ValidationMode,
    pub default_confidence: f64,
}

/// RANSAC registration parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignerConfig {
    pub min_points: usize,
    pub max_iterations: usize,
    pub timeout_ms: u64,
    pub check_mirror: bool,
    pub mirror_margin: f64,
    pub min_mirror_score: f64,
    pub min_inliers: usize,
    pub min_inlier_ratio: f64,
    pub min_avg_confidence: f64,
    pub inlier_threshold_min: f64,
    pub inlier_threshold_max: f64,
    pub inlier_threshold_factor: f64,
    pub early_exit_score: f64,
    pub refinement_iterations: usize,
    pub min_sample_separation: f64,
    pub max_edge_ratio_spread: f64,
    pub min_scale: f64,
    pub max_scale: f64,
    pub correspondence_seeding: bool,
    pub candidates_per_point: usize,
    pub uniform_sample_ratio: f64,
    pub random_score_ceiling: f64,
    pub min_inlier_spread: f64,
    pub min_angle_buckets: usize,
    pub min_spacing_cv: f64,
    pub max_residual_fraction: f64,
    /// Fixed RNG seed for reproducible runs; `None` draws from entropy
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    pub matrix_max_points: usize,
    pub matrix_compare_block: usize,
    pub matrix_reduced_size: usize,
    pub matrix_difference_scale: f64,
    pub matrix_cyclic_search: bool,
    pub vector_neighbors: usize,
    pub vector_match_threshold: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Node size is the distance to this nearest neighbour
    pub size_neighbors: usize,
    pub connect_factor: f64,
    pub target_degree: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    pub match_radius_factor: f64,
    pub min_match_radius: f64,
    pub min_match_score: f64,
    pub min_structural_similarity: f64,
    pub confidence_boost: f64,
    pub geometric_merge_distance: f64,
    pub min_vector_similarity: f64,
    pub min_topology_similarity: f64,
    pub weights: AggregateWeights,
}

/// Blend used for a fingerprint's aggregate confidence after a merge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateWeights {
    pub bitmask: f64,
    pub moments: f64,
    pub graph: f64,
    pub matrix: f64,
    pub vector: f64,
    pub tracker: f64,
    pub topology: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CascadeConfig {
    pub min_count_ratio: f64,
    pub max_moment_distance: f64,
    pub min_matrix_similarity: f64,
    pub min_vector_similarity: f64,
    pub min_vector_matches: usize,
    pub topology_gate: f64,
    pub weights: FusionWeights,
}

/// Blend used for the fused comparison score
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusionWeights {
    pub bitmask: f64,
    pub moments: f64,
    pub matrix: f64,
    pub vector: f64,
    pub topology: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub decay: f64,
    pub min_rating: f64,
    pub max_rating: f64,
    pub match_distance: f64,
    pub max_history: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub worker_threads: usize,
    pub max_results: usize,
    pub include_different: bool,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            validation: ValidationMode::Lenient,
            default_confidence: 0.5,
        }
    }
}

impl Default for AlignerConfig {
    fn default() -> Self {
        Self {
            min_points: 4,
            max_iterations: 200,
            timeout_ms: 5000,
            check_mirror: true,
            mirror_margin: 0.12,
            min_mirror_score: 0.3,
            min_inliers: 3,
            min_inlier_ratio: 0.5,
            min_avg_confidence: 0.1,
            inlier_threshold_min: 15.0,
            inlier_threshold_max: 30.0,
            inlier_threshold_factor: 0.3,
            early_exit_score: 0.9,
            refinement_iterations: 30,
            min_sample_separation: 5.0,
            max_edge_ratio_spread: 0.5,
            min_scale: 0.2,
            max_scale: 5.0,
            correspondence_seeding: true,
            candidates_per_point: 5,
            uniform_sample_ratio: 0.2,
            random_score_ceiling: 0.3,
            min_inlier_spread: 0.25,
            min_angle_buckets: 3,
            min_spacing_cv: 0.2,
            max_residual_fraction: 0.55,
            seed: None,
        }
    }
}

impl AlignerConfig {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_max_iterations(mut self, iterations: usize) -> Self {
        self.max_iterations = iterations;
        self
    }

    pub fn with_mirror_check(mut self, enabled: bool) -> Self {
        self.check_mirror = enabled;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            matrix_max_points: 50,
            matrix_compare_block: 20,
            matrix_reduced_size: 12,
            matrix_difference_scale: 2.0,
            matrix_cyclic_search: true,
            vector_neighbors: 5,
            vector_match_threshold: 0.3,
        }
    }
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            size_neighbors: 3,
            connect_factor: 1.0,
            target_degree: 3.0,
        }
    }
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            match_radius_factor: 0.6,
            min_match_radius: 15.0,
            min_match_score: 0.35,
            min_structural_similarity: 0.6,
            confidence_boost: 1.1,
            geometric_merge_distance: 20.0,
            min_vector_similarity: 0.3,
            min_topology_similarity: 0.5,
            weights: AggregateWeights::default(),
        }
    }
}

impl Default for AggregateWeights {
    fn default() -> Self {
        Self {
            bitmask: 0.08,
            moments: 0.12,
            graph: 0.25,
            matrix: 0.20,
            vector: 0.15,
            tracker: 0.10,
            topology: 0.10,
        }
    }
}

impl AggregateWeights {
    pub fn total(&self) -> f64 {
        self.bitmask + self.moments + self.graph + self.matrix + self.vector + self.tracker + self.topology
    }
}

impl Default for CascadeConfig {
    fn default() -> Self {
        Self {
            min_count_ratio: 0.4,
            max_moment_distance: 0.3,
            min_matrix_similarity: 0.6,
            min_vector_similarity: 0.7,
            min_vector_matches: 5,
            topology_gate: 0.75,
            weights: FusionWeights::default(),
        }
    }
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            bitmask: 0.08,
            moments: 0.12,
            matrix: 0.30,
            vector: 0.25,
            topology: 0.25,
        }
    }
}

impl FusionWeights {
    pub fn total(&self) -> f64 {
        self.bitmask + self.moments + self.matrix + self.vector + self.topology
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            decay: 0.8,
            min_rating: 0.05,
            max_rating: 1.0,
            match_distance: 20.0,
            max_history: 16,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            worker_threads: 4,
            max_results: 10,
            include_different: false,
        }
    }
}

impl Config {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let content = fs::read_to_string(path)?;

        if content.trim_start().starts_with('{') {
            Ok(serde_json::from_str(&content)?)
        } else {
            Ok(toml::from_str(&content)?)
        }
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P, format: ConfigFormat) -> crate::Result<()> {
        let content = match format {
            ConfigFormat::Json => serde_json::to_string_pretty(self)?,
            ConfigFormat::Toml => toml::to_string_pretty(self)?,
        };

        fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.aligner.min_points < 3 {
            errors.push("aligner.min_points must be at least 3".to_string());
        }

        if self.aligner.max_iterations == 0 {
            errors.push("aligner.max_iterations must be positive".to_string());
        }

        if self.aligner.inlier_threshold_min > self.aligner.inlier_threshold_max {
            errors.push("aligner inlier threshold bounds are inverted".to_string());
        }

        if self.aligner.min_scale <= 0.0 || self.aligner.min_scale >= self.aligner.max_scale {
            errors.push("aligner scale range must be positive and non-empty".to_string());
        }

        if !(0.0..=1.0).contains(&self.aligner.uniform_sample_ratio) {
            errors.push("aligner.uniform_sample_ratio must be within [0, 1]".to_string());
        }

        if self.encoders.matrix_compare_block > self.encoders.matrix_max_points {
            errors.push("encoders.matrix_compare_block cannot exceed matrix_max_points".to_string());
        }

        if self.encoders.vector_neighbors < 2 {
            errors.push("encoders.vector_neighbors must be at least 2".to_string());
        }

        if (self.cascade.weights.total() - 1.0).abs() > 1e-6 {
            errors.push("cascade fusion weights must sum to 1".to_string());
        }

        if (self.merge.weights.total() - 1.0).abs() > 1e-6 {
            errors.push("merge aggregate weights must sum to 1".to_string());
        }

        if !(0.0..1.0).contains(&self.tracker.decay) {
            errors.push("tracker.decay must be within [0, 1)".to_string());
        }

        if self.tracker.min_rating > self.tracker.max_rating {
            errors.push("tracker rating bounds are inverted".to_string());
        }

        if self.search.worker_threads == 0 {
            errors.push("search.worker_threads must be positive".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[derive(Debug, Clone)]
pub enum ConfigFormat {
    Json,
    Toml,
}

pub fn load_config_or_default(config_path: Option<&Path>) -> Config {
    match config_path {
        Some(path) => match Config::load_from_file(path) {
            Ok(config) => {
                if let Err(errors) = config.validate() {
                    for error in &errors {
                        tracing::warn!(error = %error, "Configuration validation error");
                    }
                    tracing::warn!("Using default configuration instead");
                    Config::default()
                } else {
                    config
                }
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to load config, using defaults");
                Config::default()
            }
        },
        None => Config::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_weights_sum_to_one() {
        assert!((FusionWeights::default().total() - 1.0).abs() < 1e-12);
        assert!((AggregateWeights::default().total() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_invalid_config_reports_errors() {
        let mut config = Config::default();
        config.aligner.max_iterations = 0;
        config.cascade.weights.matrix = 0.9;
        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn test_round_trip_json_and_toml() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.aligner.seed = Some(7);
        config.search.worker_threads = 2;

        let json_path = dir.path().join("config.json");
        config.save_to_file(&json_path, ConfigFormat::Json).unwrap();
        let loaded = Config::load_from_file(&json_path).unwrap();
        assert_eq!(loaded.aligner.seed, Some(7));

        let toml_path = dir.path().join("config.toml");
        config.save_to_file(&toml_path, ConfigFormat::Toml).unwrap();
        let loaded = Config::load_from_file(&toml_path).unwrap();
        assert_eq!(loaded.search.worker_threads, 2);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str("[aligner]\nmax_iterations = 50\n").unwrap();
        assert_eq!(config.aligner.max_iterations, 50);
        assert_eq!(config.aligner.min_points, 4);
        assert_eq!(config.cascade.min_vector_matches, 5);
    }

    #[test]
    fn test_missing_file_falls_back_to_default() {
        let config = load_config_or_default(Some(Path::new("/nonexistent/footprint.toml")));
        assert_eq!(config.aligner.max_iterations, 200);
    }
}
