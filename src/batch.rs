//! Batch Processor: drives a [`TranslationJob`] through a bounded worker pool.

use crate::config::Config;
use crate::error::{DocError, Result};
use crate::metrics::MetricsStore;
use crate::pipeline::{DocumentTranslator, FileResult};
use chrono::{DateTime, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant, SystemTime};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Single,
    Batch,
    Migrate,
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobKind::Single => write!(f, "single"),
            JobKind::Batch => write!(f, "batch"),
            JobKind::Migrate => write!(f, "migrate"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Monotonic per-job counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounters {
    pub total: usize,
    pub processed: usize,
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl JobCounters {
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            self.processed as f64 * 100.0 / self.total as f64
        }
    }

    fn record(&mut self, result: &FileResult) {
        self.processed += 1;
        if result.is_success() {
            self.successful += 1;
        } else if result.is_failed() {
            self.failed += 1;
        } else {
            self.skipped += 1;
        }
    }
}

/// The error that aborted a job, if any.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobError {
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationJob {
    pub id: String,
    pub kind: JobKind,
    pub paths: Vec<PathBuf>,
    pub status: JobStatus,
    pub progress: f64,
    pub counters: JobCounters,
    pub results: Vec<FileResult>,
    pub force: bool,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub operation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<JobError>,
    pub config_snapshot: Value,
}

/// Throughput and timing derived from a finished job.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct JobSummary {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
    pub success_rate: f64,
    /// Seconds per attempted file.
    pub average_time: f64,
    pub throughput_per_minute: f64,
    pub duration: f64,
}

impl TranslationJob {
    /// Repeated paths are dropped, keeping the first occurrence.
    pub fn new(kind: JobKind, paths: Vec<PathBuf>, config: &Config, force: bool) -> Self {
        let paths = dedup_paths(paths);
        let counters = JobCounters {
            total: paths.len(),
            ..Default::default()
        };
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            paths,
            status: JobStatus::Pending,
            progress: 0.0,
            counters,
            results: Vec::new(),
            force,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            operation_id: None,
            error: None,
            config_snapshot: serde_json::to_value(config).unwrap_or(Value::Null),
        }
    }

    pub fn summary(&self) -> JobSummary {
        let attempted = self.counters.successful + self.counters.failed;
        let busy: f64 = self
            .results
            .iter()
            .filter(|r| !r.is_skipped())
            .map(|r| r.processing_time)
            .sum();
        let duration = match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => (end - start).num_milliseconds().max(0) as f64 / 1000.0,
            _ => 0.0,
        };
        JobSummary {
            total: self.counters.total,
            successful: self.counters.successful,
            failed: self.counters.failed,
            skipped: self.counters.skipped,
            success_rate: if attempted == 0 {
                1.0
            } else {
                self.counters.successful as f64 / attempted as f64
            },
            average_time: if attempted == 0 {
                0.0
            } else {
                busy / attempted as f64
            },
            throughput_per_minute: if duration > 0.0 {
                self.counters.processed as f64 * 60.0 / duration
            } else {
                0.0
            },
            duration,
        }
    }

    /// Heuristic advice over the job's outcome.
    pub fn recommendations(&self) -> Vec<String> {
        let summary = self.summary();
        let attempted = summary.successful + summary.failed;
        let mut out = Vec::new();

        if attempted > 0 && summary.failed as f64 / attempted as f64 > 0.2 {
            out.push(format!(
                "Investigate high failure rate: {} of {} attempted files failed",
                summary.failed, attempted
            ));
        }
        if summary.average_time > 30.0 {
            out.push(format!(
                "Optimize processing time: {:.1}s average per file; consider splitting large documents",
                summary.average_time
            ));
        }
        if self
            .results
            .iter()
            .any(|r| r.error_kind.as_deref() == Some("rate_limited"))
        {
            out.push(
                "Review rate-limit configuration: lower max_concurrent_translations or raise retry_delay"
                    .to_string(),
            );
        }
        if summary.total > 0 && summary.skipped == summary.total {
            out.push("All files were skipped; use --force to retranslate up-to-date files".to_string());
        }
        out
    }

    /// JSON report: job metadata, derived metrics, per-file detail and recommendations.
    pub fn report(&self) -> Value {
        serde_json::json!({
            "job": {
                "id": self.id,
                "kind": self.kind,
                "status": self.status,
                "progress": self.progress,
                "force": self.force,
                "created_at": self.created_at,
                "started_at": self.started_at,
                "completed_at": self.completed_at,
                "operation_id": self.operation_id,
                "error": self.error,
            },
            "summary": self.summary(),
            "files": self.results,
            "recommendations": self.recommendations(),
        })
    }

    pub fn write_report(&self, path: &Path) -> Result<()> {
        let body = serde_json::to_string_pretty(&self.report())?;
        crate::files::write_atomically(path, &body)
    }
}

fn dedup_paths(paths: Vec<PathBuf>) -> Vec<PathBuf> {
    let mut seen = HashSet::new();
    paths
        .into_iter()
        .filter(|p| seen.insert(p.clone()))
        .collect()
}

/// Receives counter snapshots while a job runs.
pub trait ProgressReporter: Send + Sync {
    fn update(&self, counters: &JobCounters);

    fn finish(&self, _counters: &JobCounters) {}
}

/// Terminal progress bar.
pub struct BarReporter {
    bar: ProgressBar,
}

impl BarReporter {
    pub fn new(total: usize) -> Self {
        let bar = ProgressBar::new(total as u64);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} files ({eta}) {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        Self { bar }
    }
}

impl ProgressReporter for BarReporter {
    fn update(&self, counters: &JobCounters) {
        self.bar.set_position(counters.processed as u64);
        self.bar.set_message(format!(
            "{} ok, {} failed, {} skipped",
            counters.successful, counters.failed, counters.skipped
        ));
    }

    fn finish(&self, counters: &JobCounters) {
        self.update(counters);
        self.bar.finish();
    }
}

/// Rate-limits notifications to one per interval. Snapshots older than the last
/// one delivered are dropped; the reporter's `finish` carries the final counts.
struct Throttle {
    reporter: Arc<dyn ProgressReporter>,
    interval: Duration,
    last: Mutex<(Option<Instant>, usize)>,
}

impl Throttle {
    fn notify(&self, counters: &JobCounters) {
        let mut last = self.last.lock().unwrap_or_else(|p| p.into_inner());
        let (sent_at, sent_processed) = *last;
        if counters.processed < sent_processed {
            return;
        }
        let due = sent_at.map_or(true, |t| t.elapsed() >= self.interval);
        if due {
            *last = (Some(Instant::now()), counters.processed);
            self.reporter.update(counters);
        }
    }
}

struct JobState {
    job: TranslationJob,
    queue: VecDeque<PathBuf>,
    in_flight: HashSet<PathBuf>,
    fatal: Option<DocError>,
    finalized: bool,
}

type SharedState = Arc<Mutex<JobState>>;

fn lock(state: &SharedState) -> MutexGuard<'_, JobState> {
    state.lock().unwrap_or_else(|p| p.into_inner())
}

/// Runs jobs against a shared [`DocumentTranslator`].
pub struct BatchProcessor {
    translator: Arc<DocumentTranslator>,
    workers: usize,
    metrics: Option<Arc<MetricsStore>>,
    reporter: Option<Arc<dyn ProgressReporter>>,
    progress_interval: Duration,
    job_directory: Option<PathBuf>,
    retention: Duration,
    log_path: Option<PathBuf>,
}

impl BatchProcessor {
    pub fn new(translator: Arc<DocumentTranslator>, workers: usize) -> Self {
        Self {
            translator,
            workers: workers.max(1),
            metrics: None,
            reporter: None,
            progress_interval: Duration::from_millis(500),
            job_directory: None,
            retention: Duration::from_secs(24 * 3600),
            log_path: None,
        }
    }

    /// Workers, progress interval, job persistence and the translation log from config.
    pub fn from_config(translator: Arc<DocumentTranslator>, config: &Config) -> Self {
        let mut processor = Self::new(translator, config.performance.max_concurrent_translations)
            .with_progress_interval(config.progress_interval());
        if config.metrics.enabled {
            processor = processor
                .with_job_directory(config.metrics.job_directory.clone(), config.retention());
            processor.log_path = Some(config.metrics.log_path.clone());
        }
        processor
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsStore>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    pub fn with_job_directory(mut self, dir: PathBuf, retention: Duration) -> Self {
        self.job_directory = Some(dir);
        self.retention = retention;
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn translator(&self) -> &Arc<DocumentTranslator> {
        &self.translator
    }

    /// Start the job in the background.
    pub fn spawn(self: &Arc<Self>, mut job: TranslationJob) -> JobHandle {
        let cancel = Arc::new(AtomicBool::new(false));

        job.paths = dedup_paths(std::mem::take(&mut job.paths));
        job.status = JobStatus::Running;
        job.started_at = Some(Utc::now());
        job.counters = JobCounters {
            total: job.paths.len(),
            ..Default::default()
        };
        if let Some(metrics) = &self.metrics {
            job.operation_id = Some(metrics.start_operation(&job.kind.to_string()));
        }
        info!(
            "Starting {} job {} with {} files ({} workers)",
            job.kind,
            job.id,
            job.paths.len(),
            self.workers
        );

        let state: SharedState = Arc::new(Mutex::new(JobState {
            queue: job.paths.iter().cloned().collect(),
            job,
            in_flight: HashSet::new(),
            fatal: None,
            finalized: false,
        }));

        let processor = Arc::clone(self);
        let task_state = Arc::clone(&state);
        let task_cancel = Arc::clone(&cancel);
        let task = tokio::spawn(async move { processor.execute(task_state, task_cancel).await });

        JobHandle {
            processor: Arc::clone(self),
            state,
            cancel,
            task,
        }
    }

    /// Run a job to completion.
    pub async fn run(self: &Arc<Self>, job: TranslationJob) -> Result<TranslationJob> {
        self.spawn(job).wait().await
    }

    async fn execute(self: Arc<Self>, state: SharedState, cancel: Arc<AtomicBool>) -> TranslationJob {
        let (force, operation_id) = {
            let s = lock(&state);
            (s.job.force, s.job.operation_id.clone())
        };
        let throttle = self.reporter.as_ref().map(|reporter| {
            Arc::new(Throttle {
                reporter: Arc::clone(reporter),
                interval: self.progress_interval,
                last: Mutex::new((None, 0)),
            })
        });

        let mut workers = JoinSet::new();
        for worker_id in 0..self.workers {
            let state = Arc::clone(&state);
            let cancel = Arc::clone(&cancel);
            let translator = Arc::clone(&self.translator);
            let metrics = self.metrics.clone();
            let operation_id = operation_id.clone();
            let throttle = throttle.clone();

            workers.spawn(async move {
                loop {
                    if cancel.load(Ordering::SeqCst) {
                        debug!("Worker {} observed cancellation", worker_id);
                        break;
                    }
                    let next = {
                        let mut s = lock(&state);
                        let next = s.queue.pop_front();
                        if let Some(path) = &next {
                            s.in_flight.insert(path.clone());
                        }
                        next
                    };
                    let Some(path) = next else { break };

                    let result = match translator.translate_file(&path, force).await {
                        Ok(result) => result,
                        Err(fatal) => {
                            warn!("Fatal error on {:?}, stopping job: {}", path, fatal);
                            let result = FileResult::failed(&path, &fatal, Instant::now());
                            cancel.store(true, Ordering::SeqCst);
                            lock(&state).fatal.get_or_insert(fatal);
                            result
                        }
                    };

                    if result.is_failed() {
                        warn!("{}", result.one_line());
                    }
                    let counters = {
                        let mut s = lock(&state);
                        if !s.in_flight.remove(&path) {
                            // Already recorded as terminated.
                            continue;
                        }
                        if let (Some(metrics), Some(id)) = (&metrics, &operation_id) {
                            metrics.record_file(id, &result);
                        }
                        s.job.counters.record(&result);
                        s.job.progress = s.job.counters.percent();
                        s.job.results.push(result);
                        s.job.counters
                    };
                    if let Some(throttle) = &throttle {
                        throttle.notify(&counters);
                    }
                }
            });
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                warn!("Worker task ended abnormally: {}", e);
            }
        }

        self.finalize(&state, cancel.load(Ordering::SeqCst))
    }

    /// Record leftovers, set the final status, persist. Runs once per job.
    fn finalize(&self, state: &SharedState, cancelled: bool) -> TranslationJob {
        let mut s = lock(state);
        if s.finalized {
            return s.job.clone();
        }
        s.finalized = true;

        let leftovers: Vec<PathBuf> = s.queue.drain(..).collect();
        for path in leftovers {
            let result = FileResult::skipped(&path, "cancelled");
            s.job.counters.record(&result);
            if let (Some(metrics), Some(id)) = (&self.metrics, &s.job.operation_id) {
                metrics.record_file(id, &result);
            }
            s.job.results.push(result);
        }
        let terminated: Vec<PathBuf> = s.in_flight.drain().collect();
        for path in terminated {
            let result = FileResult::terminated(&path);
            s.job.counters.record(&result);
            if let (Some(metrics), Some(id)) = (&self.metrics, &s.job.operation_id) {
                metrics.record_file(id, &result);
            }
            s.job.results.push(result);
        }

        if let Some(fatal) = s.fatal.take() {
            s.job.status = JobStatus::Failed;
            s.job.error = Some(JobError {
                kind: fatal.kind().to_string(),
                message: fatal.to_string(),
            });
        } else if cancelled {
            s.job.status = JobStatus::Cancelled;
        } else {
            s.job.status = JobStatus::Completed;
        }
        s.job.progress = s.job.counters.percent();
        s.job.completed_at = Some(Utc::now());
        let job = s.job.clone();
        drop(s);

        if let Some(reporter) = &self.reporter {
            reporter.finish(&job.counters);
        }
        if let (Some(metrics), Some(id)) = (&self.metrics, &job.operation_id) {
            match metrics.complete_operation(id) {
                Ok(op) => {
                    if let Some(log_path) = &self.log_path {
                        if let Err(e) =
                            crate::metrics::write_translation_log(log_path, &op, &job.results)
                        {
                            warn!("Failed to write translation log: {}", e);
                        }
                    }
                }
                Err(e) => warn!("Failed to record job metrics: {}", e),
            }
        }
        if let Some(dir) = &self.job_directory {
            if let Err(e) = persist_job(dir, &job, self.retention) {
                warn!("Failed to persist job {}: {}", job.id, e);
            }
        }

        let summary = job.summary();
        info!(
            "Job {} {}: {} ok, {} failed, {} skipped in {:.1}s ({:.1} files/min)",
            job.id,
            job.status,
            summary.successful,
            summary.failed,
            summary.skipped,
            summary.duration,
            summary.throughput_per_minute
        );
        job
    }
}

/// A running job.
pub struct JobHandle {
    processor: Arc<BatchProcessor>,
    state: SharedState,
    cancel: Arc<AtomicBool>,
    task: JoinHandle<TranslationJob>,
}

impl JobHandle {
    pub fn id(&self) -> String {
        lock(&self.state).job.id.clone()
    }

    pub fn counters(&self) -> JobCounters {
        lock(&self.state).job.counters
    }

    /// Stop pulling new files; in-flight files still complete.
    pub fn cancel(&self) {
        info!("Cancelling job {}", self.id());
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn wait(self) -> Result<TranslationJob> {
        self.task.await.map_err(|e| DocError::IoFailure {
            path: PathBuf::new(),
            message: format!("job task failed: {}", e),
        })
    }

    /// Wait up to `grace`; after that, terminate the workers and mark in-flight
    /// files failed with reason `cancelled`.
    pub async fn wait_or_terminate(mut self, grace: Duration) -> TranslationJob {
        match tokio::time::timeout(grace, &mut self.task).await {
            Ok(Ok(job)) => job,
            Ok(Err(e)) => {
                warn!("Job task failed: {}", e);
                self.processor.finalize(&self.state, true)
            }
            Err(_) => {
                warn!(
                    "Grace period of {:?} elapsed, terminating job {}",
                    grace,
                    self.id()
                );
                self.cancel.store(true, Ordering::SeqCst);
                self.task.abort();
                self.processor.finalize(&self.state, true)
            }
        }
    }
}

/// Write `<job id>.json` and prune job files older than `retention`.
pub fn persist_job(dir: &Path, job: &TranslationJob, retention: Duration) -> Result<PathBuf> {
    fs::create_dir_all(dir).map_err(|e| DocError::io(dir, e))?;
    let path = dir.join(format!("{}.json", job.id));
    let body = serde_json::to_string_pretty(job)?;
    crate::files::write_atomically(&path, &body)?;

    let now = SystemTime::now();
    for entry in fs::read_dir(dir).map_err(|e| DocError::io(dir, e))?.flatten() {
        let candidate = entry.path();
        if candidate == path || candidate.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let expired = entry
            .metadata()
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .is_some_and(|age| age > retention);
        if expired {
            debug!("Pruning expired job record {:?}", candidate);
            if let Err(e) = fs::remove_file(&candidate) {
                warn!("Failed to prune {:?}: {}", candidate, e);
            }
        }
    }
    Ok(path)
}

/// Load a persisted job record.
pub fn load_job(path: &Path) -> Result<TranslationJob> {
    let body = fs::read_to_string(path).map_err(|e| DocError::io(path, e))?;
    Ok(serde_json::from_str(&body)?)
}

pub fn print_summary(job: &TranslationJob) {
    let summary = job.summary();
    println!();
    println!("═══════════════════════════════════════════════════════════════");
    println!("                      Translation Job {}", job.status);
    println!("═══════════════════════════════════════════════════════════════");
    println!();
    println!("  Job:        {} ({})", job.id, job.kind);
    println!("  Files:      {}", summary.total);
    println!("  Succeeded:  {}", summary.successful);
    println!("  Failed:     {}", summary.failed);
    println!("  Skipped:    {}", summary.skipped);
    println!();
    println!("  Timing:");
    println!("    Total:       {:.2}s", summary.duration);
    println!("    Per file:    {:.2}s", summary.average_time);
    println!("    Throughput:  {:.1} files/min", summary.throughput_per_minute);
    println!("    Success:     {:.1}%", summary.success_rate * 100.0);
    if let Some(error) = &job.error {
        println!();
        println!("  Aborted: {}", error.message);
    }
    let recommendations = job.recommendations();
    if !recommendations.is_empty() {
        println!();
        println!("  Recommendations:");
        for r in &recommendations {
            println!("    - {}", r);
        }
    }
    println!();
    println!("═══════════════════════════════════════════════════════════════");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::mock::MockTranslator;
    use std::sync::atomic::AtomicUsize;

    fn processor(config: &Config, mock: MockTranslator, workers: usize) -> Arc<BatchProcessor> {
        let translator = Arc::new(DocumentTranslator::new(config, Arc::new(mock)));
        Arc::new(BatchProcessor::new(translator, workers))
    }

    fn write_sources(dir: &Path, count: usize) -> Vec<PathBuf> {
        (0..count)
            .map(|i| {
                let path = dir.join(format!("doc{:02}.md", i));
                fs::write(&path, format!("# Document {}\n\nSome text.\n", i)).unwrap();
                path
            })
            .collect()
    }

    struct Recorder {
        updates: Mutex<Vec<JobCounters>>,
        finished: AtomicUsize,
    }

    impl ProgressReporter for Recorder {
        fn update(&self, counters: &JobCounters) {
            self.updates.lock().unwrap().push(*counters);
        }

        fn finish(&self, _counters: &JobCounters) {
            self.finished.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_batch_runs_every_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();
        let paths = write_sources(dir.path(), 8);
        let batch = processor(&config, MockTranslator::new(), 3);

        let job = batch
            .run(TranslationJob::new(JobKind::Batch, paths, &config, false))
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.results.len(), 8);
        assert_eq!(job.counters.successful, 8);
        assert_eq!(job.progress, 100.0);
        assert!(dir.path().join("doc07.zh-TW.md").exists());
    }

    #[tokio::test]
    async fn test_repeated_paths_run_once() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();
        let paths = write_sources(dir.path(), 2);
        let repeated = vec![paths[0].clone(), paths[1].clone(), paths[0].clone()];
        let batch = processor(&config, MockTranslator::new(), 2);

        let job = TranslationJob::new(JobKind::Batch, repeated, &config, false);
        assert_eq!(job.paths, paths);
        assert_eq!(job.counters.total, 2);

        let mut job = job;
        job.paths.push(paths[1].clone());
        let job = batch.run(job).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.counters.total, 2);
        assert_eq!(job.counters.processed, job.counters.total);
        assert_eq!(job.results.len(), 2);
        assert_eq!(job.progress, 100.0);
    }

    #[tokio::test]
    async fn test_one_failure_does_not_abort_batch() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();
        let mut paths = write_sources(dir.path(), 4);
        let bad = dir.path().join("bad.md");
        fs::write(&bad, "# BOOM\n").unwrap();
        paths.push(bad);

        let batch = processor(&config, MockTranslator::failing_on("BOOM"), 2);
        let job = batch
            .run(TranslationJob::new(JobKind::Batch, paths, &config, false))
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.counters.successful, 4);
        assert_eq!(job.counters.failed, 1);
    }

    #[tokio::test]
    async fn test_cancel_skips_pending_files() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();
        let paths = write_sources(dir.path(), 10);
        let mut mock = MockTranslator::new();
        mock.delay = Duration::from_millis(100);
        let batch = processor(&config, mock, 1);

        let handle = batch.spawn(TranslationJob::new(JobKind::Batch, paths, &config, false));
        tokio::time::sleep(Duration::from_millis(30)).await;
        handle.cancel();
        let job = handle.wait().await.unwrap();

        assert_eq!(job.status, JobStatus::Cancelled);
        assert_eq!(job.results.len(), 10);
        // The file in flight when cancel arrived still completed.
        assert!(job.counters.successful >= 1);
        assert!(job
            .results
            .iter()
            .filter(|r| r.is_skipped())
            .all(|r| r.reason.as_deref() == Some("cancelled")));
    }

    #[tokio::test]
    async fn test_terminate_marks_in_flight_failed() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();
        let paths = write_sources(dir.path(), 2);
        let mut mock = MockTranslator::new();
        mock.delay = Duration::from_secs(30);
        let batch = processor(&config, mock, 2);

        let handle = batch.spawn(TranslationJob::new(JobKind::Batch, paths, &config, false));
        tokio::time::sleep(Duration::from_millis(50)).await;
        let job = handle.wait_or_terminate(Duration::from_millis(50)).await;

        assert_eq!(job.status, JobStatus::Cancelled);
        assert_eq!(job.counters.failed, 2);
        assert!(job
            .results
            .iter()
            .all(|r| r.reason.as_deref() == Some("cancelled") && r.is_failed()));
    }

    #[tokio::test]
    async fn test_progress_is_monotonic_and_flushed() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();
        let paths = write_sources(dir.path(), 6);
        let recorder = Arc::new(Recorder {
            updates: Mutex::new(Vec::new()),
            finished: AtomicUsize::new(0),
        });
        let translator = Arc::new(DocumentTranslator::new(&config, Arc::new(MockTranslator::new())));
        let batch = Arc::new(
            BatchProcessor::new(translator, 2)
                .with_reporter(recorder.clone())
                .with_progress_interval(Duration::ZERO),
        );

        batch
            .run(TranslationJob::new(JobKind::Batch, paths, &config, false))
            .await
            .unwrap();
        let updates = recorder.updates.lock().unwrap();
        assert!(!updates.is_empty());
        assert!(updates.windows(2).all(|w| w[0].processed <= w[1].processed));
        assert_eq!(recorder.finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_job_persisted_and_metrics_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let jobs = dir.path().join("jobs");
        let config = Config::default();
        let paths = write_sources(dir.path(), 3);
        let metrics = Arc::new(MetricsStore::in_memory());
        let translator = Arc::new(DocumentTranslator::new(&config, Arc::new(MockTranslator::new())));
        let batch = Arc::new(
            BatchProcessor::new(translator, 2)
                .with_metrics(metrics.clone())
                .with_job_directory(jobs.clone(), Duration::from_secs(3600)),
        );

        let job = batch
            .run(TranslationJob::new(JobKind::Batch, paths, &config, false))
            .await
            .unwrap();

        let loaded = load_job(&jobs.join(format!("{}.json", job.id))).unwrap();
        assert_eq!(loaded.results.len(), 3);
        let op = metrics.operation(job.operation_id.as_deref().unwrap()).unwrap();
        assert_eq!(op.files_succeeded, 3);
        assert_eq!(op.kind, "batch");
    }

    #[test]
    fn test_recommendations() {
        let config = Config::default();
        let mut job = TranslationJob::new(
            JobKind::Batch,
            vec![PathBuf::from("a.md"), PathBuf::from("b.md")],
            &config,
            false,
        );
        job.results = vec![
            FileResult::failed(
                Path::new("a.md"),
                &DocError::RateLimited("429".to_string()),
                Instant::now(),
            ),
            FileResult::skipped(Path::new("b.md"), "up_to_date"),
        ];
        for r in job.results.clone() {
            job.counters.record(&r);
        }
        let recs = job.recommendations();
        assert!(recs.iter().any(|r| r.starts_with("Investigate high failure rate")));
        assert!(recs.iter().any(|r| r.starts_with("Review rate-limit")));

        let report = job.report();
        assert_eq!(report["files"].as_array().unwrap().len(), 2);
        assert_eq!(report["job"]["kind"], "batch");
    }

    #[test]
    fn test_all_skipped_recommends_force() {
        let config = Config::default();
        let mut job = TranslationJob::new(JobKind::Single, vec![PathBuf::from("a.md")], &config, false);
        let skipped = FileResult::skipped(Path::new("a.md"), "up_to_date");
        job.counters.record(&skipped);
        job.results.push(skipped);
        assert!(job.recommendations().iter().any(|r| r.contains("--force")));
    }

    #[test]
    fn test_persist_prunes_expired_records() {
        let dir = tempfile::tempdir().unwrap();
        let stale = dir.path().join("old.json");
        fs::write(&stale, "{}").unwrap();
        fs::File::options()
            .write(true)
            .open(&stale)
            .unwrap()
            .set_modified(SystemTime::now() - Duration::from_secs(48 * 3600))
            .unwrap();

        let job = TranslationJob::new(JobKind::Batch, Vec::new(), &Config::default(), false);
        persist_job(dir.path(), &job, Duration::from_secs(24 * 3600)).unwrap();
        assert!(!stale.exists());
        assert!(dir.path().join(format!("{}.json", job.id)).exists());
    }
}
