use crate::config::Config;
use crate::fingerprint::Fingerprint;
use crate::pipeline::types::{ComparisonResult, ComponentScores, StageOutcome, StageRecord};
use crate::registration::Transform;
use std::sync::Mutex;

/// State shared by the stages of one comparison
pub struct CascadeContext<'a> {
    pub first: &'a Fingerprint,
    pub second: &'a Fingerprint,
    pub config: &'a Config,
    pub scores: ComponentScores,
    pub transform: Option<Transform>,
    pub alignment_score: Option<f64>,
    pub fast_reject: bool,
}

impl<'a> CascadeContext<'a> {
    pub fn new(first: &'a Fingerprint, second: &'a Fingerprint, config: &'a Config) -> Self {
        Self {
            first,
            second,
            config,
            scores: ComponentScores::default(),
            transform: None,
            alignment_score: None,
            fast_reject: false,
        }
    }
}

/// One step of the comparison cascade. A stage stores its score in the
/// context and may reject, which stops the cascade.
pub trait CascadeStage: Send + Sync {
    fn name(&self) -> &'static str;

    fn evaluate(&self, ctx: &mut CascadeContext<'_>) -> StageOutcome;
}

/// Receives stage outcomes as the cascade runs
pub trait CascadeObserver: Send + Sync {
    fn on_stage(&self, record: &StageRecord);

    fn on_decision(&self, _result: &ComparisonResult) {}
}

/// Forwards outcomes to `tracing`
#[derive(Debug, Default)]
pub struct TracingObserver;

impl CascadeObserver for TracingObserver {
    fn on_stage(&self, record: &StageRecord) {
        tracing::debug!(
            stage = %record.stage,
            verdict = record.verdict.as_str(),
            score = ?record.score,
            detail = %record.detail,
            duration_ms = record.duration_ms,
            "Cascade stage outcome"
        );
    }

    fn on_decision(&self, result: &ComparisonResult) {
        tracing::info!(
            decision = %result.decision,
            fused_score = result.fused_score,
            fast_reject = result.fast_reject,
            reason = ?result.reason,
            "Comparison decided"
        );
    }
}

/// Keeps every record in memory
#[derive(Debug, Default)]
pub struct RecordingObserver {
    records: Mutex<Vec<StageRecord>>,
    decisions: Mutex<Vec<crate::pipeline::Decision>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<StageRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn decisions(&self) -> Vec<crate::pipeline::Decision> {
        self.decisions.lock().map(|d| d.clone()).unwrap_or_default()
    }

    pub fn stage_names(&self) -> Vec<String> {
        self.records().into_iter().map(|r| r.stage).collect()
    }
}

impl CascadeObserver for RecordingObserver {
    fn on_stage(&self, record: &StageRecord) {
        if let Ok(mut records) = self.records.lock() {
            records.push(record.clone());
        }
    }

    fn on_decision(&self, result: &ComparisonResult) {
        if let Ok(mut decisions) = self.decisions.lock() {
            decisions.push(result.decision);
        }
    }
}
