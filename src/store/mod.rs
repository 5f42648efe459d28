//! In-memory collection of fingerprints with parallel similarity search.
//!
//! Each fingerprint sits behind its own `RwLock`: searches take read locks,
//! merges take the write lock of the one fingerprint they modify.

use crate::config::Config;
use crate::fingerprint::{load_document, save_document, Fingerprint, MergeResult};
use crate::logging::Timer;
use crate::pipeline::{Cascade, ComparisonResult, Decision};
use anyhow::{anyhow, bail, Context};
use rayon::prelude::*;
use rayon::ThreadPool;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

pub type SharedFingerprint = Arc<RwLock<Fingerprint>>;

#[derive(Debug, Clone)]
pub struct SearchHit {
    pub id: String,
    pub decision: Decision,
    pub fused_score: f64,
    pub result: ComparisonResult,
}

#[derive(Debug, Clone)]
pub enum IngestOutcome {
    /// Merged into an existing fingerprint
    Merged { id: String, result: MergeResult },
    /// Stored as a new fingerprint
    Created { id: String },
}

impl IngestOutcome {
    pub fn id(&self) -> &str {
        match self {
            IngestOutcome::Merged { id, .. } | IngestOutcome::Created { id } => id,
        }
    }
}

pub struct FingerprintStore {
    config: Config,
    cascade: Cascade,
    fingerprints: RwLock<BTreeMap<String, SharedFingerprint>>,
    pool: ThreadPool,
}

impl FingerprintStore {
    pub fn new(config: Config) -> crate::Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.search.worker_threads.max(1))
            .thread_name(|i| format!("footprint-search-{}", i))
            .build()
            .context("building search thread pool")?;
        Ok(Self {
            cascade: Cascade::standard(&config),
            config,
            fingerprints: RwLock::new(BTreeMap::new()),
            pool,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Add a fingerprint under its own id. Ids must be unique.
    pub fn insert(&self, fingerprint: Fingerprint) -> crate::Result<SharedFingerprint> {
        let mut map = self.fingerprints.write().map_err(|_| anyhow!("fingerprint store lock poisoned"))?;
        if map.contains_key(&fingerprint.id) {
            bail!("fingerprint {} already stored", fingerprint.id);
        }
        let id = fingerprint.id.clone();
        let shared = Arc::new(RwLock::new(fingerprint));
        map.insert(id.clone(), Arc::clone(&shared));
        debug!(id = %id, stored = map.len(), "Fingerprint stored");
        Ok(shared)
    }

    pub fn get(&self, id: &str) -> Option<SharedFingerprint> {
        self.fingerprints.read().ok()?.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.fingerprints.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ids(&self) -> Vec<String> {
        self.fingerprints
            .read()
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn snapshot(&self) -> Vec<(String, SharedFingerprint)> {
        self.fingerprints
            .read()
            .map(|m| m.iter().map(|(id, fp)| (id.clone(), Arc::clone(fp))).collect())
            .unwrap_or_default()
    }

    /// Compare `query` against every stored fingerprint with a different id.
    ///
    /// Hits are ordered best decision first, then by fused score, and capped
    /// at `search.max_results`. `different` hits are dropped unless
    /// `search.include_different` is set.
    pub fn find_similar(&self, query: &Fingerprint) -> Vec<SearchHit> {
        let timer = Timer::global("find_similar", None);
        let entries = self.snapshot();

        let mut hits: Vec<SearchHit> = self.pool.install(|| {
            entries
                .par_iter()
                .filter(|(id, _)| *id != query.id)
                .filter_map(|(id, shared)| {
                    let stored = match shared.read() {
                        Ok(stored) => stored,
                        Err(_) => {
                            warn!(id = %id, "Skipping fingerprint with a poisoned lock");
                            return None;
                        }
                    };
                    let result = self.cascade.compare(query, &stored);
                    Some(SearchHit {
                        id: id.clone(),
                        decision: result.decision,
                        fused_score: result.fused_score,
                        result,
                    })
                })
                .collect()
        });

        if !self.config.search.include_different {
            hits.retain(|hit| hit.decision != Decision::Different);
        }
        hits.sort_by(|a, b| {
            a.decision
                .cmp(&b.decision)
                .then_with(|| b.fused_score.total_cmp(&a.fused_score))
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(self.config.search.max_results);

        info!(
            query = %query.id,
            candidates = entries.len(),
            hits = hits.len(),
            "Search completed"
        );
        timer
            .with_metadata("candidates", serde_json::json!(entries.len()))
            .with_metadata("hits", serde_json::json!(hits.len()))
            .stop();
        hits
    }

    /// Merge `other` into the stored fingerprint `id` under its write lock.
    pub fn merge_into(&self, id: &str, other: &Fingerprint) -> crate::Result<MergeResult> {
        let shared = self.get(id).ok_or_else(|| anyhow!("no fingerprint with id {}", id))?;
        let mut target = shared.write().map_err(|_| anyhow!("fingerprint {} lock poisoned", id))?;
        Ok(target.merge_with_transformation(other, &self.config))
    }

    /// Merge into the best `same` match, or store as a new fingerprint when
    /// there is none or the merge is refused.
    pub fn ingest(&self, fingerprint: Fingerprint) -> crate::Result<IngestOutcome> {
        if self.get(&fingerprint.id).is_some() {
            bail!("fingerprint {} already stored", fingerprint.id);
        }
        let best = self
            .find_similar(&fingerprint)
            .into_iter()
            .find(|hit| hit.decision == Decision::Same);

        if let Some(hit) = best {
            let result = self.merge_into(&hit.id, &fingerprint)?;
            if result.success {
                info!(query = %fingerprint.id, target = %hit.id, "Observation merged into existing fingerprint");
                return Ok(IngestOutcome::Merged { id: hit.id, result });
            }
            warn!(
                query = %fingerprint.id,
                target = %hit.id,
                reason = result.reason.as_deref().unwrap_or("unknown"),
                "Merge refused, storing as a new fingerprint"
            );
        }

        let id = fingerprint.id.clone();
        self.insert(fingerprint)?;
        Ok(IngestOutcome::Created { id })
    }

    /// Load every `*.json` fingerprint document in `dir`; returns how many were stored.
    pub fn load_dir<P: AsRef<Path>>(&self, dir: P) -> crate::Result<usize> {
        let dir = dir.as_ref();
        let mut paths: Vec<_> = std::fs::read_dir(dir)
            .with_context(|| format!("reading directory {}", dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();

        for path in &paths {
            let fingerprint = load_document(path, &self.config)?;
            self.insert(fingerprint)?;
        }
        info!(directory = %dir.display(), loaded = paths.len(), "Fingerprint documents loaded");
        Ok(paths.len())
    }

    /// Write each stored fingerprint to `dir/<id>.json`.
    pub fn save_dir<P: AsRef<Path>>(&self, dir: P) -> crate::Result<usize> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        let entries = self.snapshot();
        for (id, shared) in &entries {
            let fingerprint = shared.read().map_err(|_| anyhow!("fingerprint {} lock poisoned", id))?;
            save_document(&fingerprint, dir.join(format!("{}.json", id)))?;
        }
        Ok(entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::synthetic::{random_points, synthetic_sole};
    use crate::data::PointTransformer;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use tempfile::TempDir;

    fn config() -> Config {
        let mut config = Config::default();
        config.aligner.seed = Some(5);
        config.search.worker_threads = 2;
        config
    }

    #[test]
    fn test_insert_rejects_duplicate_ids() {
        let config = config();
        let store = FingerprintStore::new(config.clone()).unwrap();
        store
            .insert(Fingerprint::create_from_points("a", synthetic_sole(20, 1), &config))
            .unwrap();
        assert!(store
            .insert(Fingerprint::create_from_points("a", synthetic_sole(20, 2), &config))
            .is_err());
        assert_eq!(store.len(), 1);
        assert_eq!(store.ids(), vec!["a".to_string()]);
        assert!(store.get("a").is_some());
        assert!(store.get("b").is_none());
    }

    #[test]
    fn test_find_similar_skips_self_and_filters_different() {
        let mut config = config();
        let store = FingerprintStore::new(config.clone()).unwrap();
        store
            .insert(Fingerprint::create_from_points("noise", random_points(40, 300.0, 300.0, 9), &config))
            .unwrap();
        let query = Fingerprint::create_from_points("query", synthetic_sole(40, 3), &config);
        store.insert(query.clone()).unwrap();

        let hits = store.find_similar(&query);
        assert!(hits.iter().all(|h| h.id != "query"));
        assert!(hits.iter().all(|h| h.decision != Decision::Different));

        config.search.include_different = true;
        let store_all = FingerprintStore::new(config.clone()).unwrap();
        store_all
            .insert(Fingerprint::create_from_points("noise", random_points(40, 300.0, 300.0, 9), &config))
            .unwrap();
        let hits = store_all.find_similar(&query);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "noise");
    }

    #[test]
    fn test_ingest_creates_then_merges() {
        let config = config();
        let store = FingerprintStore::new(config.clone()).unwrap();
        let points = synthetic_sole(40, 11);
        let mut rng = StdRng::seed_from_u64(4);
        let second = PointTransformer::jitter(&points, 1.0, &mut rng);

        let first = store
            .ingest(Fingerprint::create_from_points("first", points, &config))
            .unwrap();
        assert!(matches!(first, IngestOutcome::Created { ref id } if id == "first"));

        let outcome = store
            .ingest(Fingerprint::create_from_points("second", second, &config))
            .unwrap();
        match outcome {
            IngestOutcome::Merged { id, result } => {
                assert_eq!(id, "first");
                assert!(result.success);
            }
            other => panic!("expected a merge, got {:?}", other),
        }
        assert_eq!(store.len(), 1);
        let merged = store.get("first").unwrap();
        assert_eq!(merged.read().unwrap().photo_count(), 2);
    }

    #[test]
    fn test_ingest_rejects_stored_id_before_searching() {
        let config = config();
        let store = FingerprintStore::new(config.clone()).unwrap();
        let points = synthetic_sole(40, 11);
        store
            .insert(Fingerprint::create_from_points("first", points.clone(), &config))
            .unwrap();

        let err = store
            .ingest(Fingerprint::create_from_points("first", points, &config))
            .unwrap_err();
        assert!(err.to_string().contains("already stored"));
        let stored = store.get("first").unwrap();
        assert_eq!(stored.read().unwrap().photo_count(), 1);
        assert!(stored.read().unwrap().metadata.merge_history.is_empty());
    }

    #[test]
    fn test_save_and_load_dir() {
        let config = config();
        let dir = TempDir::new().unwrap();
        let store = FingerprintStore::new(config.clone()).unwrap();
        store
            .insert(Fingerprint::create_from_points("a", synthetic_sole(20, 1), &config))
            .unwrap();
        store
            .insert(Fingerprint::create_from_points("b", synthetic_sole(25, 2), &config))
            .unwrap();
        assert_eq!(store.save_dir(dir.path()).unwrap(), 2);

        let reloaded = FingerprintStore::new(config).unwrap();
        assert_eq!(reloaded.load_dir(dir.path()).unwrap(), 2);
        assert_eq!(reloaded.ids(), vec!["a".to_string(), "b".to_string()]);
    }
}
