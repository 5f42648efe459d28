//! Plain-text reports for the command line.

use crate::analysis::{RecoveryBenchmark, RecoveryReport};
use crate::fingerprint::MergeResult;
use crate::logging::OperationStats;
use crate::pipeline::ComparisonResult;
use crate::registration::AlignmentResult;
use crate::store::SearchHit;
use anyhow::Context;
use std::fmt::Write as _;
use std::path::Path;

fn opt(value: Option<f64>) -> String {
    value.map(|v| format!("{:.3}", v)).unwrap_or_else(|| "-".to_string())
}

pub fn comparison_report(first: &str, second: &str, result: &ComparisonResult) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Comparison {} vs {}", first, second);
    let _ = writeln!(out, "  decision:    {}", result.decision);
    let _ = writeln!(out, "  fused score: {:.3}", result.fused_score);
    if let Some(reason) = &result.reason {
        let _ = writeln!(out, "  reason:      {}", reason);
    }
    if result.fast_reject {
        out.push_str("  fast reject: point counts too different\n");
    }
    if let Some(transform) = &result.transform {
        let _ = writeln!(
            out,
            "  alignment:   {} (score {})",
            transform,
            opt(result.alignment_score)
        );
    }

    out.push_str("\n  stage              verdict    score    time (ms)\n");
    for stage in &result.stages {
        let _ = writeln!(
            out,
            "  {:<18} {:<10} {:>7} {:>10.2}  {}",
            stage.stage,
            stage.verdict.as_str(),
            opt(stage.score),
            stage.duration_ms,
            stage.detail
        );
    }

    let s = &result.scores;
    let _ = writeln!(
        out,
        "\n  components: count={} size={} bitmask={} moments={} matrix={} vector={} topology={}",
        opt(s.count_ratio),
        opt(s.size_ratio),
        opt(s.bitmask),
        opt(s.moments),
        opt(s.matrix),
        opt(s.vector),
        opt(s.topology)
    );
    out
}

pub fn alignment_report(result: &AlignmentResult) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Alignment: {}", result.quality);
    match &result.transform {
        Some(transform) => {
            let _ = writeln!(out, "  transform:  {}", transform);
        }
        None => out.push_str("  transform:  none\n"),
    }
    let _ = writeln!(out, "  score:      {:.3}", result.score);
    let _ = writeln!(
        out,
        "  inliers:    {} (mean residual {:.2})",
        result.inlier_count(),
        result.mean_residual()
    );
    let _ = writeln!(
        out,
        "  iterations: {} in {:.1} ms{}",
        result.iterations,
        result.elapsed_ms,
        if result.timed_out { " (timed out)" } else { "" }
    );
    if let Some(reason) = &result.reason {
        let _ = writeln!(out, "  reason:     {}", reason);
    }
    out
}

pub fn merge_report(target: &str, other: &str, result: &MergeResult) -> String {
    let mut out = String::new();
    let status = if result.success { "merged" } else { "refused" };
    let _ = writeln!(out, "Merge {} into {}: {}", other, target, status);
    if let Some(strategy) = result.strategy {
        let _ = writeln!(out, "  strategy:          {}", strategy.as_str());
    }
    let _ = writeln!(out, "  vector similarity: {:.3}", result.vector_similarity);
    let _ = writeln!(out, "  alignment score:   {:.3}", result.alignment_score);
    let _ = writeln!(out, "  topology:          {:.3}", result.topology_similarity);
    if let Some(preservation) = result.topology_preservation {
        let _ = writeln!(out, "  preservation:      {:.3}", preservation);
    }
    let _ = writeln!(out, "  points:            {} -> {}", result.points_before, result.points_after);
    let _ = writeln!(out, "  confidence:        {:.3}", result.confidence);
    if let Some(reason) = &result.reason {
        let _ = writeln!(out, "  reason:            {}", reason);
    }
    out
}

pub fn recovery_report(reports: &[RecoveryReport]) -> String {
    let summary = RecoveryBenchmark::summarize(reports);
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Recovery benchmark: {}/{} passed ({:.0}%)",
        summary.passed,
        summary.total,
        summary.pass_rate() * 100.0
    );
    let _ = writeln!(
        out,
        "  mean rotation error {:.2}°, scale error {:.3}, point error {:.2}, time {:.1} ms\n",
        summary.mean_rotation_error_deg, summary.mean_scale_error, summary.mean_point_error, summary.mean_time_ms
    );
    out.push_str("  scenario             result  score  rot err  scale err  pt err  mirror\n");
    for report in reports {
        let _ = writeln!(
            out,
            "  {:<20} {:<7} {:>5.3} {:>8} {:>10} {:>7}  {}/{}",
            report.scenario,
            if report.passed { "pass" } else { "FAIL" },
            report.score,
            opt(report.rotation_error_deg),
            opt(report.scale_error),
            opt(report.point_error),
            report.detected_mirrored,
            report.expected_mirrored
        );
        if let (false, Some(failure)) = (report.passed, &report.failure) {
            let _ = writeln!(out, "      {}", failure);
        }
    }
    out
}

pub fn search_report(query: &str, hits: &[SearchHit]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Search for {}: {} hit(s)", query, hits.len());
    for (rank, hit) in hits.iter().enumerate() {
        let _ = writeln!(
            out,
            "  {:>2}. {:<24} {:<9} fused {:.3}{}",
            rank + 1,
            hit.id,
            hit.decision.to_string(),
            hit.fused_score,
            hit.result
                .rejected_at()
                .map(|stage| format!("  (rejected at {})", stage))
                .unwrap_or_default()
        );
    }
    out
}

pub fn timing_report(stats: &[OperationStats]) -> String {
    let mut out = String::from("Timings\n  operation            count   mean ms    p95 ms   success\n");
    for s in stats {
        let _ = writeln!(
            out,
            "  {:<20} {:>5} {:>9.2} {:>9.2} {:>8.0}%",
            s.operation,
            s.count,
            s.mean_ms,
            s.p95_ms,
            s.success_rate * 100.0
        );
    }
    out
}

pub fn write_report<P: AsRef<Path>>(path: P, content: &str) -> crate::Result<()> {
    std::fs::write(path.as_ref(), content).with_context(|| format!("writing report {}", path.as_ref().display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::data::synthetic::synthetic_sole;
    use crate::fingerprint::Fingerprint;

    #[test]
    fn test_comparison_report_lists_stages() {
        let config = Config::default();
        let a = Fingerprint::create_from_points("a", synthetic_sole(40, 1), &config);
        let b = Fingerprint::create_from_points("b", synthetic_sole(10, 2), &config);
        let result = a.compare(&b, &config);
        let report = comparison_report("a", "b", &result);

        assert!(report.contains("Comparison a vs b"));
        assert!(report.contains("decision:    different"));
        assert!(report.contains("count_ratio"));
        assert!(report.contains("fast reject"));
    }

    #[test]
    fn test_alignment_report_for_failure() {
        let report = alignment_report(&AlignmentResult::failed("too few points"));
        assert!(report.contains("Alignment: failed"));
        assert!(report.contains("transform:  none"));
        assert!(report.contains("too few points"));
    }

    #[test]
    fn test_write_report() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("report.txt");
        write_report(&path, "hello").unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), "hello");
    }
}
