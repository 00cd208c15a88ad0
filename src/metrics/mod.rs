//! Operation-scoped metrics, system events and the performance summary.
//!
//! One [`MetricsStore`] is created at startup and handed to every component that
//! records results. Completed operations go to an in-memory ring buffer and, when
//! a database is attached, to SQLite.

pub mod report;
pub mod store;

pub use report::{render_summary, write_translation_log, ReportFormat};
pub use store::MetricsDb;

use crate::config::Config;
use crate::error::{DocError, Result};
use crate::pipeline::{FileResult, FileStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Completed operations kept in memory.
pub const RING_CAPACITY: usize = 1000;

const EVENT_CAPACITY: usize = 1000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub kind: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub file: Option<PathBuf>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationMetrics {
    pub operation_id: String,
    pub kind: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub files_processed: usize,
    pub files_succeeded: usize,
    pub files_failed: usize,
    pub files_skipped: usize,
    pub errors: Vec<ErrorRecord>,
    /// Cumulative per-file processing time in seconds.
    pub processing_time: f64,
}

impl OperationMetrics {
    fn new(kind: &str) -> Self {
        Self {
            operation_id: Uuid::new_v4().to_string(),
            kind: kind.to_string(),
            started_at: Utc::now(),
            completed_at: None,
            files_processed: 0,
            files_succeeded: 0,
            files_failed: 0,
            files_skipped: 0,
            errors: Vec::new(),
            processing_time: 0.0,
        }
    }

    fn attempted(&self) -> usize {
        self.files_succeeded + self.files_failed
    }

    /// Successes over attempted (non-skipped) files; 1.0 when nothing was attempted.
    pub fn success_rate(&self) -> f64 {
        match self.attempted() {
            0 => 1.0,
            n => self.files_succeeded as f64 / n as f64,
        }
    }

    pub fn average_processing_time(&self) -> f64 {
        match self.attempted() {
            0 => 0.0,
            n => self.processing_time / n as f64,
        }
    }

    pub fn duration_secs(&self) -> Option<f64> {
        self.completed_at
            .map(|end| (end - self.started_at).num_milliseconds() as f64 / 1000.0)
    }

    pub fn derived(&self) -> Value {
        serde_json::json!({
            "success_rate": self.success_rate(),
            "average_processing_time": self.average_processing_time(),
            "duration": self.duration_secs(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemEvent {
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub message: String,
    #[serde(default)]
    pub details: Value,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct KindBreakdown {
    pub operations: usize,
    pub files_processed: usize,
    pub files_succeeded: usize,
    pub files_failed: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TrendBucket {
    pub operations: usize,
    pub success_rate: f64,
    pub average_processing_time: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Trend {
    pub first_half: TrendBucket,
    pub second_half: TrendBucket,
    /// `improving`, `degrading` or `stable`.
    pub direction: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PerformanceSummary {
    pub generated_at: DateTime<Utc>,
    pub window_hours: f64,
    pub total_operations: usize,
    pub files_processed: usize,
    pub files_succeeded: usize,
    pub files_failed: usize,
    pub files_skipped: usize,
    pub success_rate: f64,
    pub average_processing_time: f64,
    pub by_kind: BTreeMap<String, KindBreakdown>,
    pub error_histogram: BTreeMap<String, usize>,
    pub events: BTreeMap<String, usize>,
    pub trend: Trend,
    pub recent_operations: Vec<OperationMetrics>,
}

fn bucket(ops: &[&OperationMetrics]) -> TrendBucket {
    let succeeded: usize = ops.iter().map(|o| o.files_succeeded).sum();
    let attempted: usize = ops.iter().map(|o| o.attempted()).sum();
    let time: f64 = ops.iter().map(|o| o.processing_time).sum();
    TrendBucket {
        operations: ops.len(),
        success_rate: if attempted == 0 {
            1.0
        } else {
            succeeded as f64 / attempted as f64
        },
        average_processing_time: if attempted == 0 {
            0.0
        } else {
            time / attempted as f64
        },
    }
}

/// Aggregate operations and events that started within `window` before `now`.
pub fn summarize(
    operations: &[OperationMetrics],
    events: &[SystemEvent],
    window: Duration,
    now: DateTime<Utc>,
) -> PerformanceSummary {
    let window_c = chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::days(1));
    let cutoff = now - window_c;
    let midpoint = now - window_c / 2;

    let in_window: Vec<&OperationMetrics> = operations
        .iter()
        .filter(|o| o.started_at >= cutoff)
        .collect();

    let mut summary = PerformanceSummary {
        generated_at: now,
        window_hours: window.as_secs_f64() / 3600.0,
        total_operations: in_window.len(),
        ..Default::default()
    };

    for op in &in_window {
        summary.files_processed += op.files_processed;
        summary.files_succeeded += op.files_succeeded;
        summary.files_failed += op.files_failed;
        summary.files_skipped += op.files_skipped;

        let kind = summary.by_kind.entry(op.kind.clone()).or_default();
        kind.operations += 1;
        kind.files_processed += op.files_processed;
        kind.files_succeeded += op.files_succeeded;
        kind.files_failed += op.files_failed;

        for error in &op.errors {
            *summary.error_histogram.entry(error.kind.clone()).or_default() += 1;
        }
    }

    let overall = bucket(&in_window);
    summary.success_rate = overall.success_rate;
    summary.average_processing_time = overall.average_processing_time;

    let (first, second): (Vec<&OperationMetrics>, Vec<&OperationMetrics>) =
        in_window.iter().copied().partition(|o| o.started_at < midpoint);
    let first = bucket(&first);
    let second = bucket(&second);
    let delta = second.success_rate - first.success_rate;
    let direction = if first.operations == 0 || second.operations == 0 || delta.abs() < 0.05 {
        "stable"
    } else if delta > 0.0 {
        "improving"
    } else {
        "degrading"
    };
    summary.trend = Trend {
        first_half: first,
        second_half: second,
        direction: direction.to_string(),
    };

    for event in events.iter().filter(|e| e.timestamp >= cutoff) {
        *summary.events.entry(event.event_type.clone()).or_default() += 1;
    }

    let mut recent: Vec<OperationMetrics> = in_window.into_iter().cloned().collect();
    recent.sort_by(|a, b| b.started_at.cmp(&a.started_at));
    recent.truncate(20);
    summary.recent_operations = recent;
    summary
}

struct MetricsInner {
    active: HashMap<String, OperationMetrics>,
    completed: VecDeque<OperationMetrics>,
    events: VecDeque<SystemEvent>,
    db: Option<MetricsDb>,
}

/// Process-wide metrics, guarded by one mutex so readers see a consistent snapshot.
pub struct MetricsStore {
    inner: Mutex<MetricsInner>,
}

impl MetricsStore {
    pub fn in_memory() -> Self {
        Self::with_db(None)
    }

    fn with_db(db: Option<MetricsDb>) -> Self {
        Self {
            inner: Mutex::new(MetricsInner {
                active: HashMap::new(),
                completed: VecDeque::new(),
                events: VecDeque::new(),
                db,
            }),
        }
    }

    pub fn open(path: &std::path::Path) -> Result<Self> {
        Ok(Self::with_db(Some(MetricsDb::open(path)?)))
    }

    /// Persistent store at `metrics.database_path`, or in-memory when metrics are disabled.
    pub fn from_config(config: &Config) -> Result<Self> {
        if config.metrics.enabled {
            Self::open(&config.metrics.database_path)
        } else {
            Ok(Self::in_memory())
        }
    }

    fn lock(&self) -> MutexGuard<'_, MetricsInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn start_operation(&self, kind: &str) -> String {
        let op = OperationMetrics::new(kind);
        let id = op.operation_id.clone();
        debug!("Started {} operation {}", kind, id);
        self.lock().active.insert(id.clone(), op);
        id
    }

    pub fn record_file(&self, operation_id: &str, result: &FileResult) {
        let mut inner = self.lock();
        let Some(op) = inner.active.get_mut(operation_id) else {
            warn!("record_file for unknown operation {}", operation_id);
            return;
        };
        op.files_processed += 1;
        op.processing_time += result.processing_time;
        match result.status {
            FileStatus::Success => op.files_succeeded += 1,
            FileStatus::Skipped => op.files_skipped += 1,
            FileStatus::Failed => {
                op.files_failed += 1;
                op.errors.push(ErrorRecord {
                    kind: result.error_kind.clone().unwrap_or_else(|| "unknown".to_string()),
                    message: result.error_message.clone().unwrap_or_default(),
                    file: Some(result.path.clone()),
                    timestamp: Utc::now(),
                });
            }
        }
    }

    pub fn add_error(&self, operation_id: &str, error: &DocError, file: Option<PathBuf>) {
        if let Some(op) = self.lock().active.get_mut(operation_id) {
            op.errors.push(ErrorRecord {
                kind: error.kind().to_string(),
                message: error.to_string(),
                file,
                timestamp: Utc::now(),
            });
        }
    }

    /// Close an operation: move it to the ring buffer and persist it.
    pub fn complete_operation(&self, operation_id: &str) -> Result<OperationMetrics> {
        let mut inner = self.lock();
        let mut op = inner
            .active
            .remove(operation_id)
            .ok_or_else(|| DocError::Config(format!("Unknown operation: {}", operation_id)))?;
        op.completed_at = Some(Utc::now());

        if inner.completed.len() >= RING_CAPACITY {
            inner.completed.pop_front();
        }
        inner.completed.push_back(op.clone());

        if let Some(db) = &inner.db {
            db.insert_operation(&op)?;
        }
        debug!(
            "Completed operation {}: {}/{} succeeded",
            op.operation_id, op.files_succeeded, op.files_processed
        );
        Ok(op)
    }

    /// Append to the event stream. Persistence failures are logged, not raised.
    pub fn record_event(&self, event_type: &str, message: impl Into<String>, details: Value) {
        let event = SystemEvent {
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            message: message.into(),
            details,
        };
        let mut inner = self.lock();
        if let Some(db) = &inner.db {
            if let Err(e) = db.insert_event(&event) {
                warn!("Failed to persist {} event: {}", event_type, e);
            }
        }
        if inner.events.len() >= EVENT_CAPACITY {
            inner.events.pop_front();
        }
        inner.events.push_back(event);
    }

    /// Active or recently completed operation by id.
    pub fn operation(&self, operation_id: &str) -> Option<OperationMetrics> {
        let inner = self.lock();
        inner
            .active
            .get(operation_id)
            .or_else(|| {
                inner
                    .completed
                    .iter()
                    .rev()
                    .find(|o| o.operation_id == operation_id)
            })
            .cloned()
    }

    pub fn completed_operations(&self) -> Vec<OperationMetrics> {
        self.lock().completed.iter().cloned().collect()
    }

    pub fn events(&self) -> Vec<SystemEvent> {
        self.lock().events.iter().cloned().collect()
    }

    pub fn count_events(&self, event_type: &str) -> usize {
        self.lock()
            .events
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }

    /// Summary over `window`, read from the database when one is attached so that
    /// earlier runs are included.
    pub fn performance_summary(&self, window: Duration) -> Result<PerformanceSummary> {
        let now = Utc::now();
        let cutoff = now - chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::days(1));
        let inner = self.lock();
        let (operations, events) = match &inner.db {
            Some(db) => (db.operations_since(cutoff)?, db.events_since(cutoff)?),
            None => (
                inner.completed.iter().cloned().collect(),
                inner.events.iter().cloned().collect(),
            ),
        };
        Ok(summarize(&operations, &events, window, now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::time::Instant;

    fn op_at(kind: &str, hours_ago: i64, succeeded: usize, failed: usize) -> OperationMetrics {
        let mut op = OperationMetrics::new(kind);
        op.started_at = Utc::now() - chrono::Duration::hours(hours_ago);
        op.completed_at = Some(op.started_at + chrono::Duration::seconds(10));
        op.files_succeeded = succeeded;
        op.files_failed = failed;
        op.files_processed = succeeded + failed;
        op.processing_time = (succeeded + failed) as f64 * 2.0;
        for _ in 0..failed {
            op.errors.push(ErrorRecord {
                kind: "transport_error".to_string(),
                message: "timeout".to_string(),
                file: None,
                timestamp: op.started_at,
            });
        }
        op
    }

    #[test]
    fn test_operation_lifecycle() {
        let store = MetricsStore::in_memory();
        let id = store.start_operation("single");

        store.record_file(&id, &FileResult::success(Path::new("a.md"), "a.zh-TW.md".into(), Instant::now()));
        store.record_file(&id, &FileResult::skipped(Path::new("b.md"), "up_to_date"));
        let failure = DocError::ValidationFailure("empty".to_string());
        store.record_file(&id, &FileResult::failed(Path::new("c.md"), &failure, Instant::now()));

        let active = store.operation(&id).unwrap();
        assert!(active.completed_at.is_none());

        let op = store.complete_operation(&id).unwrap();
        assert_eq!(op.files_processed, 3);
        assert_eq!(op.files_succeeded, 1);
        assert_eq!(op.files_skipped, 1);
        assert_eq!(op.files_failed, 1);
        assert_eq!(op.errors[0].kind, "validation_failure");
        assert!((op.success_rate() - 0.5).abs() < f64::EPSILON);
        assert!(store.operation(&id).unwrap().completed_at.is_some());
        assert!(store.complete_operation(&id).is_err());
    }

    #[test]
    fn test_ring_buffer_is_bounded() {
        let store = MetricsStore::in_memory();
        for _ in 0..RING_CAPACITY + 5 {
            let id = store.start_operation("batch");
            store.complete_operation(&id).unwrap();
        }
        assert_eq!(store.completed_operations().len(), RING_CAPACITY);
    }

    #[test]
    fn test_summary_breakdown_and_trend() {
        let ops = vec![
            op_at("batch", 20, 2, 2),
            op_at("batch", 2, 4, 0),
            op_at("single", 1, 1, 0),
            op_at("batch", 48, 0, 9),
        ];
        let events = vec![SystemEvent {
            timestamp: Utc::now(),
            event_type: "watcher_queue_overflow".to_string(),
            message: String::new(),
            details: Value::Null,
        }];
        let summary = summarize(&ops, &events, Duration::from_secs(24 * 3600), Utc::now());

        assert_eq!(summary.total_operations, 3);
        assert_eq!(summary.files_succeeded, 7);
        assert_eq!(summary.files_failed, 2);
        assert_eq!(summary.by_kind["batch"].operations, 2);
        assert_eq!(summary.by_kind["single"].operations, 1);
        assert_eq!(summary.error_histogram["transport_error"], 2);
        assert_eq!(summary.events["watcher_queue_overflow"], 1);
        assert_eq!(summary.trend.first_half.operations, 1);
        assert_eq!(summary.trend.second_half.operations, 2);
        assert_eq!(summary.trend.direction, "improving");
    }

    #[test]
    fn test_events_are_counted() {
        let store = MetricsStore::in_memory();
        store.record_event("migration_rolled_back", "restored", Value::Null);
        assert_eq!(store.count_events("migration_rolled_back"), 1);
        assert_eq!(store.count_events("other"), 0);
    }

    #[test]
    fn test_persistent_store_summarizes_earlier_runs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.db");
        {
            let store = MetricsStore::open(&path).unwrap();
            let id = store.start_operation("batch");
            store.record_file(&id, &FileResult::success(Path::new("a.md"), "a.zh-TW.md".into(), Instant::now()));
            store.complete_operation(&id).unwrap();
        }
        let reopened = MetricsStore::open(&path).unwrap();
        let summary = reopened
            .performance_summary(Duration::from_secs(3600))
            .unwrap();
        assert_eq!(summary.total_operations, 1);
        assert_eq!(summary.files_succeeded, 1);
    }
}
