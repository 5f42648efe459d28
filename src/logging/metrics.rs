//! Timings of alignments, comparisons, merges and searches.
//!
//! Every [`Timer`] stop becomes one [`Measurement`] tagged with the operation
//! name, the active correlation id and free-form metadata such as the
//! comparison decision or merge strategy. The collector keeps the most recent
//! measurements only.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use uuid::Uuid;

const DEFAULT_CAPACITY: usize = 10_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Measurement {
    pub operation: String,
    pub duration_ms: f64,
    pub recorded_at: chrono::DateTime<chrono::Utc>,
    pub correlation_id: Option<Uuid>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Measurement {
    /// `false` only when the operation tagged itself with `success: false`
    pub fn succeeded(&self) -> bool {
        self.metadata.get("success").and_then(|v| v.as_bool()).unwrap_or(true)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationStats {
    pub operation: String,
    pub count: usize,
    pub mean_ms: f64,
    pub median_ms: f64,
    pub std_dev_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub success_rate: f64,
}

impl OperationStats {
    fn from_durations(operation: &str, mut durations: Vec<f64>, successes: usize) -> Option<Self> {
        if durations.is_empty() {
            return None;
        }
        durations.sort_by(|a, b| a.total_cmp(b));
        let n = durations.len();
        let mean = durations.iter().sum::<f64>() / n as f64;
        let variance = durations.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / n as f64;
        let median = match n % 2 {
            0 => 0.5 * (durations[n / 2 - 1] + durations[n / 2]),
            _ => durations[n / 2],
        };
        let rank = |p: f64| durations[((n as f64 * p) as usize).min(n - 1)];

        Some(Self {
            operation: operation.to_string(),
            count: n,
            mean_ms: mean,
            median_ms: median,
            std_dev_ms: variance.sqrt(),
            min_ms: durations[0],
            max_ms: durations[n - 1],
            p95_ms: rank(0.95),
            p99_ms: rank(0.99),
            success_rate: successes as f64 / n as f64,
        })
    }
}

pub struct MetricsCollector {
    ring: Mutex<VecDeque<Measurement>>,
    capacity: usize,
    enabled: bool,
}

impl MetricsCollector {
    pub fn new(enabled: bool) -> Self {
        Self::with_capacity(enabled, DEFAULT_CAPACITY)
    }

    pub fn with_capacity(enabled: bool, capacity: usize) -> Self {
        Self {
            ring: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
            enabled,
        }
    }

    pub fn record(
        &self,
        operation: &str,
        duration: Duration,
        correlation_id: Option<Uuid>,
        metadata: HashMap<String, serde_json::Value>,
    ) {
        if !self.enabled {
            return;
        }
        let measurement = Measurement {
            operation: operation.to_string(),
            duration_ms: duration.as_secs_f64() * 1000.0,
            recorded_at: chrono::Utc::now(),
            correlation_id,
            metadata,
        };
        if let Ok(mut ring) = self.ring.lock() {
            if ring.len() == self.capacity {
                ring.pop_front();
            }
            ring.push_back(measurement);
        }
    }

    fn select(&self, keep: impl Fn(&Measurement) -> bool) -> Vec<Measurement> {
        self.ring
            .lock()
            .map(|ring| ring.iter().filter(|m| keep(m)).cloned().collect())
            .unwrap_or_default()
    }

    pub fn measurements(&self, operation: &str) -> Vec<Measurement> {
        self.select(|m| m.operation == operation)
    }

    /// Everything recorded while one comparison or merge was running
    pub fn for_correlation(&self, correlation_id: Uuid) -> Vec<Measurement> {
        self.select(|m| m.correlation_id == Some(correlation_id))
    }

    pub fn stats(&self, operation: &str) -> Option<OperationStats> {
        let measurements = self.measurements(operation);
        let successes = measurements.iter().filter(|m| m.succeeded()).count();
        OperationStats::from_durations(operation, measurements.iter().map(|m| m.duration_ms).collect(), successes)
    }

    /// Per-operation statistics, sorted by operation name
    pub fn summary(&self) -> Vec<OperationStats> {
        let mut grouped: BTreeMap<String, (Vec<f64>, usize)> = BTreeMap::new();
        for m in self.select(|_| true) {
            let entry = grouped.entry(m.operation.clone()).or_default();
            entry.0.push(m.duration_ms);
            entry.1 += usize::from(m.succeeded());
        }
        grouped
            .into_iter()
            .filter_map(|(op, (durations, successes))| OperationStats::from_durations(&op, durations, successes))
            .collect()
    }

    /// How often each value of a metadata key occurred for one operation,
    /// e.g. the decisions reached by `compare`.
    pub fn tally(&self, operation: &str, key: &str) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for m in self.measurements(operation) {
            if let Some(value) = m.metadata.get(key) {
                let label = value.as_str().map(str::to_string).unwrap_or_else(|| value.to_string());
                *counts.entry(label).or_insert(0) += 1;
            }
        }
        counts
    }

    pub fn len(&self) -> usize {
        self.ring.lock().map(|ring| ring.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut ring) = self.ring.lock() {
            ring.clear();
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.select(|_| true))
    }
}

/// Measures one operation; records into its collector when stopped.
pub struct Timer {
    start: Instant,
    operation: String,
    correlation_id: Option<Uuid>,
    collector: Option<Arc<MetricsCollector>>,
    metadata: HashMap<String, serde_json::Value>,
}

impl Timer {
    /// Timer that only traces its duration
    pub fn start(operation: &str, correlation_id: Option<Uuid>) -> Self {
        Self {
            start: Instant::now(),
            operation: operation.to_string(),
            correlation_id,
            collector: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_collector(mut self, collector: Arc<MetricsCollector>) -> Self {
        self.collector = Some(collector);
        self
    }

    /// Timer feeding the process-wide collector
    pub fn global(operation: &str, correlation_id: Option<Uuid>) -> Self {
        Self::start(operation, correlation_id).with_collector(global_metrics())
    }

    pub fn with_metadata(mut self, key: &str, value: serde_json::Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    pub fn stop(self) -> Duration {
        let elapsed = self.start.elapsed();
        tracing::trace!(
            operation = %self.operation,
            duration_ms = elapsed.as_secs_f64() * 1000.0,
            correlation_id = ?self.correlation_id,
            "Operation timed"
        );
        if let Some(collector) = self.collector {
            collector.record(&self.operation, elapsed, self.correlation_id, self.metadata);
        }
        elapsed
    }
}

lazy_static::lazy_static! {
    static ref GLOBAL_METRICS: Arc<MetricsCollector> = Arc::new(MetricsCollector::new(true));
}

pub fn global_metrics() -> Arc<MetricsCollector> {
    Arc::clone(&GLOBAL_METRICS)
}
