use crate::config::FusionWeights;
use crate::registration::Transform;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Final verdict of a comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Same,
    Similar,
    Different,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Decision::Same => "same",
            Decision::Similar => "similar",
            Decision::Different => "different",
        };
        f.write_str(name)
    }
}

/// Per-encoder similarities gathered by the cascade; `None` when the stage
/// did not run or had nothing to compare.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComponentScores {
    pub count_ratio: Option<f64>,
    /// Ratio of spatial extents (smaller RMS radius over larger)
    pub size_ratio: Option<f64>,
    pub bitmask: Option<f64>,
    pub moments: Option<f64>,
    pub matrix: Option<f64>,
    pub vector: Option<f64>,
    pub topology: Option<f64>,
}

impl ComponentScores {
    /// Weighted blend of the clamped components; missing ones count as zero.
    pub fn fused(&self, weights: &FusionWeights) -> f64 {
        let c = |v: Option<f64>| v.unwrap_or(0.0).clamp(0.0, 1.0);
        let score = weights.bitmask * c(self.bitmask)
            + weights.moments * c(self.moments)
            + weights.matrix * c(self.matrix)
            + weights.vector * c(self.vector)
            + weights.topology * c(self.topology);
        score.clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageVerdict {
    Passed,
    /// Reported but never able to reject
    Advisory,
    Rejected,
    Skipped,
}

impl StageVerdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageVerdict::Passed => "passed",
            StageVerdict::Advisory => "advisory",
            StageVerdict::Rejected => "rejected",
            StageVerdict::Skipped => "skipped",
        }
    }
}

/// What a stage reports back to the cascade
#[derive(Debug, Clone, PartialEq)]
pub struct StageOutcome {
    pub verdict: StageVerdict,
    pub score: Option<f64>,
    pub detail: String,
}

impl StageOutcome {
    pub fn passed(score: f64, detail: impl Into<String>) -> Self {
        Self {
            verdict: StageVerdict::Passed,
            score: Some(score),
            detail: detail.into(),
        }
    }

    pub fn advisory(score: f64, detail: impl Into<String>) -> Self {
        Self {
            verdict: StageVerdict::Advisory,
            score: Some(score),
            detail: detail.into(),
        }
    }

    pub fn rejected(score: Option<f64>, detail: impl Into<String>) -> Self {
        Self {
            verdict: StageVerdict::Rejected,
            score,
            detail: detail.into(),
        }
    }

    pub fn skipped(detail: impl Into<String>) -> Self {
        Self {
            verdict: StageVerdict::Skipped,
            score: None,
            detail: detail.into(),
        }
    }
}

/// One executed stage, as recorded in the result and sent to observers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: String,
    pub verdict: StageVerdict,
    pub score: Option<f64>,
    pub detail: String,
    pub duration_ms: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonResult {
    pub decision: Decision,
    pub fused_score: f64,
    pub scores: ComponentScores,
    pub stages: Vec<StageRecord>,
    /// Why the comparison stopped early or ended as it did
    pub reason: Option<String>,
    /// Rejected by the point-count guard before any encoder ran
    pub fast_reject: bool,
    /// Alignment found by the topology stage, mapping the first set onto the second
    pub transform: Option<Transform>,
    pub alignment_score: Option<f64>,
    pub correlation_id: Option<Uuid>,
    pub elapsed_ms: f64,
}

impl ComparisonResult {
    pub fn is_match(&self) -> bool {
        self.decision != Decision::Different
    }

    pub fn rejected_at(&self) -> Option<&str> {
        self.stages
            .iter()
            .find(|s| s.verdict == StageVerdict::Rejected)
            .map(|s| s.stage.as_str())
    }

    pub fn stage(&self, name: &str) -> Option<&StageRecord> {
        self.stages.iter().find(|s| s.stage == name)
    }
}
