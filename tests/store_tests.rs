use footprint_matcher::data::{synthetic_sole, PointTransformer};
use footprint_matcher::store::IngestOutcome;
use footprint_matcher::{Config, Decision, Fingerprint, FingerprintStore};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use tempfile::TempDir;

fn config() -> Config {
    let mut config = Config::default();
    config.aligner.seed = Some(31);
    config.search.worker_threads = 3;
    config
}

fn observation(points: &[footprint_matcher::Point], seed: u64) -> Vec<footprint_matcher::Point> {
    let mut rng = StdRng::seed_from_u64(seed);
    PointTransformer::translate(&PointTransformer::jitter(points, 1.0, &mut rng), 25.0, 10.0)
}

#[test]
fn test_ingest_lifecycle() {
    let config = config();
    let store = FingerprintStore::new(config.clone()).unwrap();
    let sole_a = synthetic_sole(40, 101);
    let sole_b = synthetic_sole(40, 202);

    let first = store
        .ingest(Fingerprint::create_from_points("a-1", sole_a.clone(), &config))
        .unwrap();
    assert!(matches!(first, IngestOutcome::Created { .. }));

    let second = store
        .ingest(Fingerprint::create_from_points("a-2", observation(&sole_a, 1), &config))
        .unwrap();
    assert_eq!(second.id(), "a-1");
    assert!(matches!(second, IngestOutcome::Merged { .. }));

    let other = store
        .ingest(Fingerprint::create_from_points("b-1", sole_b, &config))
        .unwrap();
    assert!(matches!(other, IngestOutcome::Created { .. }));

    assert_eq!(store.len(), 2);
    let a = store.get("a-1").unwrap();
    assert_eq!(a.read().unwrap().photo_count(), 2);
}

#[test]
fn test_search_ranks_the_matching_sole_first() {
    let config = config();
    let dir = TempDir::new().unwrap();
    let store = FingerprintStore::new(config.clone()).unwrap();
    let target = synthetic_sole(40, 7);
    store
        .insert(Fingerprint::create_from_points("target", target.clone(), &config))
        .unwrap();
    for seed in [8, 9, 10] {
        store
            .insert(Fingerprint::create_from_points(format!("decoy-{}", seed), synthetic_sole(40, seed), &config))
            .unwrap();
    }
    store.save_dir(dir.path()).unwrap();

    let reloaded = FingerprintStore::new(config.clone()).unwrap();
    assert_eq!(reloaded.load_dir(dir.path()).unwrap(), 4);

    let query = Fingerprint::create_from_points("query", observation(&target, 2), &config);
    let hits = reloaded.find_similar(&query);
    assert!(!hits.is_empty());
    assert_eq!(hits[0].id, "target");
    assert_eq!(hits[0].decision, Decision::Same);
    assert!(hits.len() <= config.search.max_results);
}

#[test]
fn test_concurrent_merges_are_serialized() {
    let config = config();
    let store = Arc::new(FingerprintStore::new(config.clone()).unwrap());
    let sole = synthetic_sole(40, 55);
    store
        .insert(Fingerprint::create_from_points("base", sole.clone(), &config))
        .unwrap();

    let handles: Vec<_> = (0..3)
        .map(|i| {
            let store = Arc::clone(&store);
            let config = config.clone();
            let points = observation(&sole, 60 + i);
            std::thread::spawn(move || {
                let other = Fingerprint::create_from_points(format!("obs-{}", i), points, &config);
                store.merge_into("base", &other).unwrap()
            })
        })
        .collect();
    let successes = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|r| r.success)
        .count() as u32;

    let base = store.get("base").unwrap();
    let base = base.read().unwrap();
    assert_eq!(base.photo_count(), 1 + successes);
    assert_eq!(base.metadata.merge_history.len() as u32, successes);
}

#[test]
fn test_merge_into_unknown_id_fails() {
    let config = config();
    let store = FingerprintStore::new(config.clone()).unwrap();
    let other = Fingerprint::create_from_points("x", synthetic_sole(20, 1), &config);
    assert!(store.merge_into("missing", &other).is_err());
}
