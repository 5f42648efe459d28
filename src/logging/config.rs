//! Logging configuration
//!
//! Per-component levels for registration, the comparison cascade and graph
//! merging, plus console and file destinations.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const VALID_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Level for everything without a component override
    pub global_level: String,

    pub console_output: bool,

    /// Emit console records as JSON instead of the human readable format
    pub json_console: bool,

    /// Directory for daily rolling JSON log files (None = no file logging)
    pub log_directory: Option<PathBuf>,

    pub include_file_location: bool,

    /// RANSAC aligner
    pub registration_level: String,

    /// Comparison cascade and fingerprint orchestration
    pub cascade_level: String,

    /// Topology merger
    pub merge_level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            global_level: "info".to_string(),
            console_output: true,
            json_console: false,
            log_directory: None,
            include_file_location: false,
            registration_level: "info".to_string(),
            cascade_level: "info".to_string(),
            merge_level: "info".to_string(),
        }
    }
}

impl LoggingConfig {
    /// Verbose console logging with file locations
    pub fn development() -> Self {
        Self {
            global_level: "debug".to_string(),
            console_output: true,
            json_console: false,
            log_directory: Some(PathBuf::from("logs")),
            include_file_location: true,
            registration_level: "trace".to_string(),
            cascade_level: "debug".to_string(),
            merge_level: "debug".to_string(),
        }
    }

    /// Warnings only, JSON files, no console
    pub fn production() -> Self {
        Self {
            global_level: "warn".to_string(),
            console_output: false,
            json_console: false,
            log_directory: Some(PathBuf::from("/var/log/footprint-matcher")),
            include_file_location: false,
            registration_level: "info".to_string(),
            cascade_level: "info".to_string(),
            merge_level: "info".to_string(),
        }
    }

    /// Map a CLI `-v` count onto levels: 0 warn, 1 info, 2 debug, 3+ trace.
    pub fn from_verbosity(verbosity: u8) -> Self {
        let level = match verbosity {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        };
        Self {
            global_level: level.to_string(),
            registration_level: level.to_string(),
            cascade_level: level.to_string(),
            merge_level: level.to_string(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        let levels = [
            ("global_level", &self.global_level),
            ("registration_level", &self.registration_level),
            ("cascade_level", &self.cascade_level),
            ("merge_level", &self.merge_level),
        ];
        for (name, level) in levels {
            if !VALID_LEVELS.contains(&level.as_str()) {
                return Err(format!(
                    "Invalid {}: {}. Must be one of: {:?}",
                    name, level, VALID_LEVELS
                ));
            }
        }

        if let Some(ref log_dir) = self.log_directory {
            if let Some(parent) = log_dir.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    return Err(format!("Log directory parent does not exist: {:?}", parent));
                }
            }
        }

        Ok(())
    }

    pub fn get_component_level(&self, component: &str) -> &str {
        match component {
            "registration" | "aligner" => &self.registration_level,
            "cascade" | "pipeline" | "fingerprint" => &self.cascade_level,
            "merge" | "topology" => &self.merge_level,
            _ => &self.global_level,
        }
    }

    /// `EnvFilter` directives for the crate and its components.
    pub fn filter_directives(&self) -> String {
        let krate = env!("CARGO_PKG_NAME").replace('-', "_");
        format!(
            "{krate}={},{krate}::registration={},{krate}::pipeline={},{krate}::fingerprint={},{krate}::topology={}",
            self.global_level,
            self.registration_level,
            self.cascade_level,
            self.cascade_level,
            self.merge_level,
        )
    }
}
