//! Span wrappers for registration, comparison and merging
//!
//! Each wrapper declares its result fields up front so they can be recorded
//! once the operation finishes.

use std::time::Instant;
use tracing::field::Empty;
use tracing::{span, Level, Span};
use uuid::Uuid;

/// One registration run of the RANSAC aligner
pub struct AlignmentSpan {
    span: Span,
    start_time: Instant,
}

impl AlignmentSpan {
    pub fn new(source_points: usize, target_points: usize, correlation_id: Option<Uuid>) -> Self {
        let span = span!(
            Level::DEBUG,
            "alignment",
            source_points = source_points,
            target_points = target_points,
            correlation_id = ?correlation_id,
            threshold = Empty,
            iterations = Empty,
            inliers = Empty,
            score = Empty,
            mirrored = Empty,
            timed_out = Empty
        );
        Self {
            span,
            start_time: Instant::now(),
        }
    }

    pub fn record_threshold(&self, threshold: f64) {
        self.span.record("threshold", threshold);
    }

    /// Best hypothesis of one orientation (direct or mirrored)
    pub fn record_hypothesis(&self, mirrored: bool, score: f64, inliers: usize, iterations: usize) {
        tracing::debug!(
            parent: &self.span,
            mirrored = mirrored,
            score = score,
            inliers = inliers,
            iterations = iterations,
            "Orientation search completed"
        );
    }

    pub fn record_guard(&self, reason: &str, raw_score: f64) {
        tracing::trace!(
            parent: &self.span,
            reason = reason,
            raw_score = raw_score,
            "Score capped by randomness guard"
        );
    }

    pub fn record_result(&self, score: f64, inliers: usize, iterations: usize, mirrored: bool, timed_out: bool) {
        let duration = self.start_time.elapsed();
        self.span.record("iterations", iterations);
        self.span.record("inliers", inliers);
        self.span.record("score", score);
        self.span.record("mirrored", mirrored);
        self.span.record("timed_out", timed_out);

        tracing::debug!(
            parent: &self.span,
            score = score,
            inliers = inliers,
            iterations = iterations,
            mirrored = mirrored,
            timed_out = timed_out,
            execution_time_ms = duration.as_millis(),
            "Alignment completed"
        );
    }

    pub fn record_failure(&self, reason: &str) {
        tracing::debug!(parent: &self.span, reason = reason, "Alignment failed");
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }
}

/// One cascade stage evaluation
pub struct CascadeSpan {
    span: Span,
    start_time: Instant,
}

impl CascadeSpan {
    pub fn new(stage_name: &str, correlation_id: Option<Uuid>) -> Self {
        let span = span!(
            Level::INFO,
            "cascade_stage",
            stage = stage_name,
            correlation_id = ?correlation_id,
            score = Empty,
            verdict = Empty
        );
        Self {
            span,
            start_time: Instant::now(),
        }
    }

    pub fn record_outcome(&self, score: Option<f64>, verdict: &str, detail: &str) {
        let duration = self.start_time.elapsed();
        if let Some(score) = score {
            self.span.record("score", score);
        }
        self.span.record("verdict", verdict);

        tracing::debug!(
            parent: &self.span,
            score = score,
            verdict = verdict,
            detail = detail,
            execution_time_ms = duration.as_secs_f64() * 1000.0,
            "Cascade stage completed"
        );
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64() * 1000.0
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }
}

/// A fingerprint merge, from the vector precheck to the final rebuild
pub struct MergeSpan {
    span: Span,
    start_time: Instant,
}

impl MergeSpan {
    pub fn new(target_id: &str, other_id: &str, correlation_id: Option<Uuid>) -> Self {
        let span = span!(
            Level::INFO,
            "fingerprint_merge",
            target = target_id,
            other = other_id,
            correlation_id = ?correlation_id,
            strategy = Empty,
            merged_points = Empty,
            success = Empty
        );
        Self {
            span,
            start_time: Instant::now(),
        }
    }

    pub fn record_precheck(&self, name: &str, value: f64, required: f64) {
        tracing::debug!(
            parent: &self.span,
            check = name,
            value = value,
            required = required,
            passed = value >= required,
            "Merge precheck"
        );
    }

    pub fn record_success(&self, strategy: &str, merged_points: usize, confidence: f64) {
        let duration = self.start_time.elapsed();
        self.span.record("strategy", strategy);
        self.span.record("merged_points", merged_points);
        self.span.record("success", true);

        tracing::info!(
            parent: &self.span,
            strategy = strategy,
            merged_points = merged_points,
            confidence = confidence,
            execution_time_ms = duration.as_millis(),
            "Fingerprints merged"
        );
    }

    pub fn record_rejection(&self, reason: &str) {
        self.span.record("success", false);
        tracing::info!(parent: &self.span, reason = reason, "Merge rejected");
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }
}
