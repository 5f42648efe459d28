use footprint_matcher::data::{load_points, synthetic_sole, PointTransformer, ValidationMode};
use footprint_matcher::fingerprint::{load_document, save_document, MergeStrategy};
use footprint_matcher::{Config, Decision, Fingerprint};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tempfile::TempDir;

fn config() -> Config {
    let mut config = Config::default();
    config.aligner.seed = Some(29);
    config
}

#[test]
fn test_document_file_round_trip() {
    let config = config();
    let fp = Fingerprint::create_from_points("round-trip", synthetic_sole(35, 13), &config);
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("fp.json");

    save_document(&fp, &path).unwrap();
    let loaded = load_document(&path, &config).unwrap();

    assert_eq!(loaded.id, fp.id);
    assert_eq!(loaded.points(), fp.points());
    assert_eq!(loaded.stats(), fp.stats());
    assert_eq!(loaded.encoders().bitmask, fp.encoders().bitmask);
    assert_eq!(loaded.encoders().graph.edge_count(), fp.encoders().graph.edge_count());
    assert_eq!(loaded.encoders().matrix.point_count(), fp.encoders().matrix.point_count());

    let self_compare = loaded.compare(&loaded, &config);
    assert_eq!(self_compare.decision, Decision::Same, "{:?}", self_compare.reason);
    assert!(self_compare.fused_score > 0.99, "fused {}", self_compare.fused_score);

    let cross = fp.compare(&loaded, &config);
    assert_eq!(cross.decision, Decision::Same, "{:?}", cross.reason);
    assert!(cross.fused_score > 0.99, "fused {}", cross.fused_score);
}

#[test]
fn test_merged_fingerprint_survives_round_trip() {
    let config = config();
    let points = synthetic_sole(40, 14);
    let mut rng = StdRng::seed_from_u64(14);
    let second = PointTransformer::translate(&PointTransformer::jitter(&points, 1.5, &mut rng), -40.0, 25.0);

    let mut base = Fingerprint::create_from_points("base", points, &config);
    let other = Fingerprint::create_from_points("other", second, &config);
    assert!(base.merge_with_transformation(&other, &config).success);

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("merged.json");
    save_document(&base, &path).unwrap();
    let loaded = load_document(&path, &config).unwrap();

    assert_eq!(loaded.photo_count(), 2);
    assert_eq!(loaded.metadata.merge_history.len(), 1);
    assert_eq!(loaded.metadata.merge_history[0].merged_id, "other");
    assert_eq!(loaded.encoders().tracker.observation(), base.encoders().tracker.observation());
    let confirmed = |fp: &Fingerprint| fp.encoders().graph.nodes().iter().filter(|n| n.confirmations > 1).count();
    assert_eq!(confirmed(&loaded), confirmed(&base));
}

#[test]
fn test_merge_bounds_points_and_confidences() {
    let config = config();
    let points = synthetic_sole(40, 15);
    let mut rng = StdRng::seed_from_u64(15);
    let second = PointTransformer::rotate(&PointTransformer::jitter(&points, 2.0, &mut rng), 12.0);

    let mut base = Fingerprint::create_from_points("a", points, &config);
    let other = Fingerprint::create_from_points("b", second, &config);
    let (na, nb) = (base.point_count(), other.point_count());
    let result = base.merge_with_transformation(&other, &config);

    assert!(result.success, "{:?}", result.reason);
    assert_eq!(result.strategy, Some(MergeStrategy::Topology));
    assert!(base.point_count() <= na + nb);
    assert!(base.points().iter().all(|p| (0.0..=1.0).contains(&p.confidence)));
    assert!((0.0..=1.0).contains(&result.confidence));
    assert!(result.transform.is_some());
}

#[test]
fn test_lenient_and_strict_detection_loading() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("shoe.json");
    std::fs::write(
        &path,
        r#"[{"x": 10.0, "y": 20.0, "confidence": 0.9, "class": "tread"},
            {"y": 5.0},
            {"x": 3.0, "y": 4.0, "confidence": 1.7}]"#,
    )
    .unwrap();

    let mut config = Config::default();
    let points = load_points(&path, &config.input).unwrap();
    assert_eq!(points.len(), 3);
    assert_eq!(points[0].source, "shoe");
    assert_eq!(points[1].x, 0.0);
    assert_eq!(points[1].confidence, config.input.default_confidence);
    assert!(points[2].confidence <= 1.0);

    config.input.validation = ValidationMode::Strict;
    assert!(load_points(&path, &config.input).is_err());
}

#[test]
fn test_missing_document_is_an_error() {
    let dir = TempDir::new().unwrap();
    assert!(load_document(dir.path().join("absent.json"), &config()).is_err());
}
