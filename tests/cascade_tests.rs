use footprint_matcher::data::{random_points, synthetic_sole, PointTransformer};
use footprint_matcher::pipeline::{CascadeBuilder, RecordingObserver, StageVerdict};
use footprint_matcher::{Config, Decision, Fingerprint};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;

fn config() -> Config {
    let mut config = Config::default();
    config.aligner.seed = Some(17);
    config
}

/// A second photo of the same sole: shifted, with detector jitter.
fn second_observation(seed: u64) -> (Fingerprint, Fingerprint) {
    let config = config();
    let points = synthetic_sole(40, seed);
    let mut rng = StdRng::seed_from_u64(seed + 1000);
    let moved = PointTransformer::translate(&PointTransformer::jitter(&points, 1.0, &mut rng), 35.0, -20.0);
    (
        Fingerprint::create_from_points("first", points, &config),
        Fingerprint::create_from_points("second", moved, &config),
    )
}

#[test]
fn test_noisy_observations_compare_same() {
    let config = config();
    let (a, b) = second_observation(21);
    let result = a.compare(&b, &config);

    assert_eq!(result.decision, Decision::Same, "{:?}", result.reason);
    assert!(result.fused_score > 0.8, "fused {}", result.fused_score);
    assert!(!result.fast_reject);
    assert!(result.rejected_at().is_none());
    assert_eq!(result.stages.len(), 6);
    assert!(result.transform.is_some());
    assert!(result.correlation_id.is_some());
}

#[test]
fn test_heavily_jittered_observations_compare_same_and_merge() {
    let config = config();
    for seed in 0..3 {
        let points = synthetic_sole(30, seed);
        let mut rng = StdRng::seed_from_u64(seed + 500);
        let moved = PointTransformer::translate(&PointTransformer::jitter(&points, 10.0, &mut rng), 20.0, 15.0);
        let mut a = Fingerprint::create_from_points("first", points, &config);
        let b = Fingerprint::create_from_points("second", moved, &config);

        let result = a.compare(&b, &config);
        assert_eq!(result.decision, Decision::Same, "seed {}: {:?}", seed, result.reason);
        assert!(result.fused_score > 0.8, "seed {}: fused {}", seed, result.fused_score);

        let merge = a.merge_with_transformation(&b, &config);
        assert!(merge.success, "seed {}: {:?}", seed, merge.reason);
        assert!(a.point_count() <= 60);
        assert!(a.points().iter().all(|p| (0.0..=1.0).contains(&p.confidence)));
        assert!((0.0..=1.0).contains(&a.stats().confidence));
        assert!((0.0..=1.0).contains(&merge.confidence));
    }
}

#[test]
fn test_count_ratio_fast_reject() {
    let config = config();
    let a = Fingerprint::create_from_points("large", synthetic_sole(40, 2), &config);
    let b = Fingerprint::create_from_points("small", synthetic_sole(12, 3), &config);
    let result = a.compare(&b, &config);

    assert_eq!(result.decision, Decision::Different);
    assert!(result.fast_reject);
    assert_eq!(result.rejected_at(), Some("count_ratio"));
    assert_eq!(result.stages.len(), 1);
    assert!(result.scores.bitmask.is_none());
    assert!(result.reason.unwrap().starts_with("count_ratio"));
}

#[test]
fn test_unrelated_clouds_are_not_same() {
    let config = config();
    let a = Fingerprint::create_from_points("sole", synthetic_sole(40, 4), &config);
    let b = Fingerprint::create_from_points("noise", random_points(40, 300.0, 300.0, 4), &config);
    let result = a.compare(&b, &config);
    assert_ne!(result.decision, Decision::Same);
}

#[test]
fn test_observer_sees_every_stage() {
    let config = config();
    let observer = Arc::new(RecordingObserver::default());
    let cascade = CascadeBuilder::new(config.clone())
        .with_standard_stages()
        .add_observer(observer.clone())
        .build();
    assert_eq!(cascade.num_stages(), 6);

    let (a, b) = second_observation(8);
    let result = cascade.compare(&a, &b);

    assert_eq!(observer.stage_names(), cascade.stage_names());
    assert_eq!(observer.decisions().len(), 1);
    assert_eq!(observer.decisions()[0], result.decision);
    let bitmask = observer.records().into_iter().find(|r| r.stage == "bitmask").unwrap();
    assert_eq!(bitmask.verdict, StageVerdict::Advisory);
}

#[test]
fn test_observer_stops_at_rejection() {
    let config = config();
    let observer = Arc::new(RecordingObserver::default());
    let cascade = CascadeBuilder::new(config.clone())
        .with_standard_stages()
        .add_observer(observer.clone())
        .build();

    let a = Fingerprint::create_from_points("large", synthetic_sole(40, 2), &config);
    let b = Fingerprint::create_from_points("small", synthetic_sole(10, 3), &config);
    cascade.compare(&a, &b);

    assert_eq!(observer.stage_names(), vec!["count_ratio"]);
    assert_eq!(observer.records()[0].verdict, StageVerdict::Rejected);
}
