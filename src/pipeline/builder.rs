use crate::config::Config;
use crate::fingerprint::Fingerprint;
use crate::logging::{CorrelationScope, CascadeSpan, Timer};
use crate::pipeline::stage::{
    BitmaskStage, CountRatioStage, DistanceMatrixStage, MomentStage, TopologyStage, VectorSignatureStage,
};
use crate::pipeline::traits::{CascadeContext, CascadeObserver, CascadeStage, TracingObserver};
use crate::pipeline::types::{ComparisonResult, ComponentScores, Decision, StageRecord, StageVerdict};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Builder for comparison cascades
pub struct CascadeBuilder {
    stages: Vec<Box<dyn CascadeStage>>,
    observers: Vec<Arc<dyn CascadeObserver>>,
    config: Config,
}

impl CascadeBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            stages: Vec::new(),
            observers: Vec::new(),
            config,
        }
    }

    /// Append a stage; stages run in insertion order.
    pub fn add_stage<S>(mut self, stage: S) -> Self
    where
        S: CascadeStage + 'static,
    {
        self.stages.push(Box::new(stage));
        self
    }

    pub fn add_observer(mut self, observer: Arc<dyn CascadeObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Every standard stage, cheapest first
    pub fn with_standard_stages(self) -> Self {
        let topology = TopologyStage::new(&self.config);
        self.add_stage(CountRatioStage)
            .add_stage(BitmaskStage)
            .add_stage(MomentStage)
            .add_stage(DistanceMatrixStage)
            .add_stage(VectorSignatureStage)
            .add_stage(topology)
    }

    pub fn build(self) -> Cascade {
        Cascade {
            stages: self.stages,
            observers: self.observers,
            config: self.config,
        }
    }
}

/// Staged comparison of two fingerprints with early rejection
pub struct Cascade {
    stages: Vec<Box<dyn CascadeStage>>,
    observers: Vec<Arc<dyn CascadeObserver>>,
    config: Config,
}

impl Cascade {
    /// Standard stages reporting to `tracing`
    pub fn standard(config: &Config) -> Self {
        CascadeBuilder::new(config.clone())
            .with_standard_stages()
            .add_observer(Arc::new(TracingObserver))
            .build()
    }

    pub fn num_stages(&self) -> usize {
        self.stages.len()
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn compare(&self, first: &Fingerprint, second: &Fingerprint) -> ComparisonResult {
        let scope = CorrelationScope::enter();
        let correlation_id = scope.id();
        let timer = Timer::global("compare", Some(correlation_id));
        let start = Instant::now();

        debug!(
            first = %first.id,
            second = %second.id,
            first_points = first.points().len(),
            second_points = second.points().len(),
            correlation_id = %correlation_id,
            "Starting comparison cascade"
        );

        let mut ctx = CascadeContext::new(first, second, &self.config);
        let mut records = Vec::with_capacity(self.stages.len());
        let mut rejection = None;

        for stage in &self.stages {
            let span = CascadeSpan::new(stage.name(), Some(correlation_id));
            let _enter = span.enter();

            let outcome = stage.evaluate(&mut ctx);
            span.record_outcome(outcome.score, outcome.verdict.as_str(), &outcome.detail);

            let record = StageRecord {
                stage: stage.name().to_string(),
                verdict: outcome.verdict,
                score: outcome.score,
                detail: outcome.detail,
                duration_ms: span.elapsed_ms(),
            };
            for observer in &self.observers {
                observer.on_stage(&record);
            }
            let rejected = record.verdict == StageVerdict::Rejected;
            if rejected {
                rejection = Some(format!("{}: {}", record.stage, record.detail));
            }
            records.push(record);
            if rejected {
                break;
            }
        }

        let fused_score = ctx.scores.fused(&self.config.cascade.weights);
        let (decision, reason) = match rejection {
            Some(reason) => (Decision::Different, Some(reason)),
            None => {
                let (decision, rule) = decide(&ctx.scores, fused_score);
                (decision, Some(rule.to_string()))
            }
        };

        let result = ComparisonResult {
            decision,
            fused_score,
            scores: ctx.scores,
            stages: records,
            reason,
            fast_reject: ctx.fast_reject,
            transform: ctx.transform,
            alignment_score: ctx.alignment_score,
            correlation_id: Some(correlation_id),
            elapsed_ms: start.elapsed().as_secs_f64() * 1000.0,
        };

        for observer in &self.observers {
            observer.on_decision(&result);
        }
        info!(
            first = %first.id,
            second = %second.id,
            decision = %result.decision,
            fused_score = result.fused_score,
            stages_run = result.stages.len(),
            "Comparison completed"
        );

        timer
            .with_metadata("decision", serde_json::json!(result.decision))
            .with_metadata("fast_reject", serde_json::json!(result.fast_reject))
            .stop();
        result
    }
}

/// Decision rules, first match wins. Missing components count as zero.
pub fn decide(scores: &ComponentScores, fused: f64) -> (Decision, &'static str) {
    let topology = scores.topology.unwrap_or(0.0);
    let moments = scores.moments.unwrap_or(0.0);
    let matrix = scores.matrix.unwrap_or(0.0);
    let size_ratio = scores.size_ratio.unwrap_or(0.0);

    if topology > 0.8 && fused > 0.85 {
        (Decision::Same, "strong topology and fused score")
    } else if moments > 0.9 && matrix > 0.7 && topology > 0.6 && size_ratio > 0.4 && size_ratio < 0.7 {
        (Decision::Similar, "same pattern at a different size")
    } else if matrix > 0.7 && topology > 0.65 && fused > 0.8 {
        (Decision::Same, "consistent distance matrix and topology")
    } else if fused > 0.7 && topology > 0.6 {
        (Decision::Similar, "moderate fused score and topology")
    } else {
        (Decision::Different, "no decision rule matched")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scores(moments: f64, matrix: f64, topology: f64, size_ratio: f64) -> ComponentScores {
        ComponentScores {
            moments: Some(moments),
            matrix: Some(matrix),
            topology: Some(topology),
            size_ratio: Some(size_ratio),
            ..ComponentScores::default()
        }
    }

    #[test]
    fn test_decision_rules_in_order() {
        assert_eq!(decide(&scores(0.9, 0.9, 0.85, 1.0), 0.9).0, Decision::Same);
        assert_eq!(decide(&scores(0.95, 0.8, 0.85, 0.5), 0.84).0, Decision::Similar);
        assert_eq!(decide(&scores(0.5, 0.8, 0.7, 1.0), 0.82).0, Decision::Same);
        assert_eq!(decide(&scores(0.5, 0.6, 0.62, 1.0), 0.75).0, Decision::Similar);
        assert_eq!(decide(&scores(0.9, 0.9, 0.5, 1.0), 0.95).0, Decision::Different);
        assert_eq!(decide(&ComponentScores::default(), 0.0).0, Decision::Different);
    }
}
