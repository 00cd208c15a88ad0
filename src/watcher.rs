//! Watch mode: file-system events are debounced per path and handed to the
//! batch processor in groups.

use crate::batch::{BatchProcessor, JobHandle, JobKind, TranslationJob};
use crate::config::Config;
use crate::error::{DocError, Result};
use crate::metrics::MetricsStore;
use crate::scanner::Scanner;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as _};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::{debug, info, warn};

/// Pending paths keyed by the instant they become ready.
#[derive(Debug)]
pub struct Debouncer {
    pending: HashMap<PathBuf, Instant>,
    delay: Duration,
    capacity: usize,
}

impl Debouncer {
    pub fn new(delay: Duration, capacity: usize) -> Self {
        Self {
            pending: HashMap::new(),
            delay,
            capacity: capacity.max(1),
        }
    }

    /// Record an event at `now`. A repeat event for a pending path pushes its
    /// deadline out. When a new path would exceed capacity, the least recently
    /// touched entry is evicted and returned.
    pub fn push(&mut self, path: PathBuf, now: Instant) -> Option<PathBuf> {
        let deadline = now + self.delay;
        if let Some(existing) = self.pending.get_mut(&path) {
            *existing = deadline;
            return None;
        }

        let evicted = if self.pending.len() >= self.capacity {
            let oldest = self
                .pending
                .iter()
                .min_by_key(|(_, deadline)| **deadline)
                .map(|(p, _)| p.clone());
            if let Some(p) = &oldest {
                self.pending.remove(p);
            }
            oldest
        } else {
            None
        };
        self.pending.insert(path, deadline);
        evicted
    }

    /// Remove and return every path whose deadline has passed, in path order.
    pub fn drain_ready(&mut self, now: Instant) -> Vec<PathBuf> {
        let mut ready: Vec<PathBuf> = self
            .pending
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(p, _)| p.clone())
            .collect();
        for p in &ready {
            self.pending.remove(p);
        }
        ready.sort();
        ready
    }

    /// Remove and return everything regardless of deadline.
    pub fn flush(&mut self) -> Vec<PathBuf> {
        let mut all: Vec<PathBuf> = self.pending.drain().map(|(p, _)| p).collect();
        all.sort();
        all
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Counters for one watch session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchSummary {
    pub events_seen: usize,
    pub events_accepted: usize,
    pub dropped: usize,
    pub jobs_started: usize,
    pub files_dispatched: usize,
    pub files_succeeded: usize,
    pub files_failed: usize,
    /// Paths sent back to the debouncer after a busy or stale translation.
    pub requeued: usize,
}

pub struct DocWatcher {
    config: Config,
    roots: Vec<PathBuf>,
    scanner: Scanner,
    processor: Arc<BatchProcessor>,
    metrics: Option<Arc<MetricsStore>>,
    debounce: Duration,
    queue_size: usize,
    grace: Duration,
    tick: Duration,
}

impl DocWatcher {
    pub fn new(config: &Config, processor: Arc<BatchProcessor>) -> Result<Self> {
        let roots = config
            .watcher
            .watch_paths
            .iter()
            .map(|p| std::fs::canonicalize(p).map_err(|e| DocError::io(p, e)))
            .collect::<Result<Vec<_>>>()?;
        let debounce = config.debounce_delay();
        Ok(Self {
            config: config.clone(),
            roots,
            scanner: Scanner::for_watch(config)?,
            processor,
            metrics: None,
            debounce,
            queue_size: config.watcher.queue_size,
            grace: config.grace_period(),
            tick: (debounce / 4).clamp(Duration::from_millis(10), Duration::from_millis(250)),
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsStore>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// The source path to enqueue for an event path, if any.
    fn accept(&self, path: &Path) -> Option<PathBuf> {
        if !path.is_file() {
            return None;
        }
        let canonical = std::fs::canonicalize(path).ok()?;
        self.roots
            .iter()
            .any(|root| self.scanner.matches_path(root, &canonical))
            .then_some(canonical)
    }

    /// Watch the configured roots until `shutdown` is set.
    pub async fn run(&self, shutdown: Arc<AtomicBool>) -> Result<WatchSummary> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                // The receiver is gone once the loop has stopped.
                let _ = tx.send(res);
            },
            notify::Config::default(),
        )?;

        let mode = if self.config.watcher.recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        for root in &self.roots {
            watcher.watch(root, mode)?;
            info!("Watching {:?}", root);
        }

        let summary = self.run_events(rx, shutdown).await;
        drop(watcher);
        summary
    }

    /// Event loop over an already connected event stream.
    pub async fn run_events(
        &self,
        mut events: UnboundedReceiver<notify::Result<Event>>,
        shutdown: Arc<AtomicBool>,
    ) -> Result<WatchSummary> {
        let mut debouncer = Debouncer::new(self.debounce, self.queue_size);
        let mut summary = WatchSummary::default();
        let mut running: Vec<JobHandle> = Vec::new();
        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut stream_open = true;

        loop {
            tokio::select! {
                received = events.recv(), if stream_open => match received {
                    Some(Ok(event)) => self.on_event(event, &mut debouncer, &mut summary),
                    Some(Err(e)) => warn!("Watch error: {}", e),
                    None => {
                        debug!("Event stream closed");
                        stream_open = false;
                    }
                },
                _ = ticker.tick() => {
                    let ready = debouncer.drain_ready(Instant::now());
                    if !ready.is_empty() {
                        running.push(self.dispatch(ready, &mut summary));
                    }
                    self.reap(&mut running, &mut debouncer, &mut summary).await;
                    let drained = !stream_open && debouncer.is_empty() && running.is_empty();
                    if shutdown.load(Ordering::SeqCst) || drained {
                        break;
                    }
                }
            }
        }

        info!("Stopping watcher");
        drop(events);
        let remaining = debouncer.flush();
        if !remaining.is_empty() {
            running.push(self.dispatch(remaining, &mut summary));
        }

        let deadline = Instant::now() + self.grace;
        for handle in running {
            let grace = deadline.saturating_duration_since(Instant::now());
            let job = handle.wait_or_terminate(grace).await;
            summary.files_succeeded += job.counters.successful;
            summary.files_failed += job.counters.failed;
        }

        info!(
            "Watcher stopped: {} jobs, {} files dispatched, {} dropped",
            summary.jobs_started, summary.files_dispatched, summary.dropped
        );
        Ok(summary)
    }

    fn on_event(&self, event: Event, debouncer: &mut Debouncer, summary: &mut WatchSummary) {
        summary.events_seen += 1;
        if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
            return;
        }
        let now = Instant::now();
        for path in &event.paths {
            let Some(source) = self.accept(path) else {
                continue;
            };
            summary.events_accepted += 1;
            if let Some(dropped) = debouncer.push(source, now) {
                self.record_overflow(dropped, summary);
            }
        }
    }

    fn record_overflow(&self, dropped: PathBuf, summary: &mut WatchSummary) {
        summary.dropped += 1;
        warn!("Watch queue full, dropping {:?}", dropped);
        if let Some(metrics) = &self.metrics {
            metrics.record_event(
                "watcher_queue_overflow",
                format!("dropped {}", dropped.display()),
                serde_json::json!({
                    "path": dropped,
                    "queue_size": self.queue_size,
                }),
            );
        }
    }

    fn dispatch(&self, paths: Vec<PathBuf>, summary: &mut WatchSummary) -> JobHandle {
        let kind = if paths.len() == 1 {
            JobKind::Single
        } else {
            JobKind::Batch
        };
        summary.jobs_started += 1;
        summary.files_dispatched += paths.len();
        debug!("Dispatching {} changed files", paths.len());
        self.processor
            .spawn(TranslationJob::new(kind, paths, &self.config, false))
    }

    /// Collect finished jobs. Paths that were busy in another job, or edited
    /// while being translated, go back into the debouncer.
    async fn reap(
        &self,
        running: &mut Vec<JobHandle>,
        debouncer: &mut Debouncer,
        summary: &mut WatchSummary,
    ) {
        let (finished, pending): (Vec<JobHandle>, Vec<JobHandle>) =
            running.drain(..).partition(|h| h.is_finished());
        *running = pending;
        for handle in finished {
            let job = match handle.wait().await {
                Ok(job) => job,
                Err(e) => {
                    warn!("Watch job failed: {}", e);
                    continue;
                }
            };
            summary.files_succeeded += job.counters.successful;
            summary.files_failed += job.counters.failed;
            let now = Instant::now();
            for result in job.results.iter().filter(|r| r.needs_retry()) {
                debug!("Requeueing {:?} ({:?})", result.path, result.reason);
                summary.requeued += 1;
                if let Some(dropped) = debouncer.push(result.path.clone(), now) {
                    self.record_overflow(dropped, summary);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::mock::MockTranslator;
    use crate::pipeline::DocumentTranslator;
    use notify::event::{CreateKind, DataChange, ModifyKind};
    use std::fs;
    use std::sync::atomic::Ordering;

    #[test]
    fn test_repeat_events_collapse() {
        let mut d = Debouncer::new(Duration::from_secs(2), 10);
        let start = Instant::now();
        for i in 0..100 {
            d.push(PathBuf::from("docs/a.md"), start + Duration::from_millis(i * 10));
        }
        assert_eq!(d.len(), 1);
        // Deadline follows the last event.
        assert!(d.drain_ready(start + Duration::from_secs(2)).is_empty());
        let ready = d.drain_ready(start + Duration::from_secs(3));
        assert_eq!(ready, vec![PathBuf::from("docs/a.md")]);
        assert!(d.is_empty());
    }

    #[test]
    fn test_overflow_drops_oldest() {
        let mut d = Debouncer::new(Duration::from_secs(1), 2);
        let start = Instant::now();
        assert_eq!(d.push(PathBuf::from("a.md"), start), None);
        assert_eq!(d.push(PathBuf::from("b.md"), start + Duration::from_millis(1)), None);
        let dropped = d.push(PathBuf::from("c.md"), start + Duration::from_millis(2));
        assert_eq!(dropped, Some(PathBuf::from("a.md")));
        assert_eq!(d.flush(), vec![PathBuf::from("b.md"), PathBuf::from("c.md")]);
    }

    fn watcher_for(dir: &Path, debounce_secs: f64, queue_size: usize) -> (DocWatcher, Arc<MockTranslator>) {
        watcher_with(dir, debounce_secs, queue_size, MockTranslator::new())
    }

    fn watcher_with(
        dir: &Path,
        debounce_secs: f64,
        queue_size: usize,
        mock: MockTranslator,
    ) -> (DocWatcher, Arc<MockTranslator>) {
        let mut config = Config::default();
        config.watcher.watch_paths = vec![dir.to_path_buf()];
        config.watcher.debounce_delay = debounce_secs;
        config.watcher.queue_size = queue_size;
        let mock = Arc::new(mock);
        let translator = Arc::new(DocumentTranslator::new(&config, mock.clone()));
        let processor = Arc::new(BatchProcessor::new(translator, 2));
        (DocWatcher::new(&config, processor).unwrap(), mock)
    }

    fn modify(path: &Path) -> notify::Result<Event> {
        Ok(Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content))).add_path(path.to_path_buf()))
    }

    #[tokio::test]
    async fn test_hundred_events_one_job() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("guide.md");
        fs::write(&source, "# Guide\n\nHello.\n").unwrap();
        let (watcher, mock) = watcher_for(dir.path(), 0.2, 100);

        let (tx, rx) = mpsc::unbounded_channel();
        for _ in 0..100 {
            tx.send(modify(&source)).unwrap();
        }
        drop(tx);

        let summary = watcher
            .run_events(rx, Arc::new(AtomicBool::new(false)))
            .await
            .unwrap();
        assert_eq!(summary.events_seen, 100);
        assert_eq!(summary.jobs_started, 1);
        assert_eq!(summary.files_dispatched, 1);
        assert_eq!(summary.files_succeeded, 1);
        assert_eq!(mock.calls.load(Ordering::SeqCst), 1);
        assert!(dir.path().join("guide.zh-TW.md").exists());
    }

    #[tokio::test]
    async fn test_edit_during_translation_is_picked_up() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("guide.md");
        fs::write(&source, "# Old\n\nold text\n").unwrap();
        let mut mock = MockTranslator::new();
        mock.delay = Duration::from_millis(400);
        let (watcher, mock) = watcher_with(dir.path(), 0.05, 100, mock);

        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(modify(&source)).unwrap();
        let edited = source.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            fs::write(&edited, "# New\n\nnew text\n").unwrap();
            tx.send(modify(&edited)).unwrap();
        });

        let summary = watcher
            .run_events(rx, Arc::new(AtomicBool::new(false)))
            .await
            .unwrap();
        let target = fs::read_to_string(dir.path().join("guide.zh-TW.md")).unwrap();
        assert!(target.contains("New"));
        assert!(!target.contains("Old"));
        assert!(summary.requeued >= 1);
        assert_eq!(mock.calls.load(Ordering::SeqCst), 2);
        let files = crate::files::FileManager::new("zh-TW");
        assert_eq!(
            files.target_status(&source).unwrap(),
            crate::files::TargetStatus::UpToDate
        );
    }

    #[tokio::test]
    async fn test_targets_and_other_files_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("guide.zh-TW.md");
        let text = dir.path().join("notes.txt");
        fs::write(&target, "# 指南\n").unwrap();
        fs::write(&text, "notes").unwrap();
        let (watcher, mock) = watcher_for(dir.path(), 0.05, 100);

        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(modify(&target)).unwrap();
        tx.send(modify(&text)).unwrap();
        tx.send(Ok(Event::new(EventKind::Create(CreateKind::File))
            .add_path(dir.path().join("missing.md"))))
            .unwrap();
        drop(tx);

        let summary = watcher
            .run_events(rx, Arc::new(AtomicBool::new(false)))
            .await
            .unwrap();
        assert_eq!(summary.events_accepted, 0);
        assert_eq!(summary.jobs_started, 0);
        assert_eq!(mock.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_shutdown_flushes_pending() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("a.md");
        fs::write(&source, "# A\n").unwrap();
        let (watcher, _mock) = watcher_for(dir.path(), 60.0, 100);

        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(modify(&source)).unwrap();
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            flag.store(true, Ordering::SeqCst);
        });

        let summary = watcher.run_events(rx, shutdown).await.unwrap();
        drop(tx);
        assert_eq!(summary.jobs_started, 1);
        assert!(dir.path().join("a.zh-TW.md").exists());
    }

    #[tokio::test]
    async fn test_overflow_records_event() {
        let dir = tempfile::tempdir().unwrap();
        let (watcher, _mock) = watcher_for(dir.path(), 60.0, 1);
        let metrics = Arc::new(MetricsStore::in_memory());
        let watcher = watcher.with_metrics(metrics.clone());

        let (tx, rx) = mpsc::unbounded_channel();
        for name in ["a.md", "b.md", "c.md"] {
            let path = dir.path().join(name);
            fs::write(&path, "# Doc\n").unwrap();
            tx.send(modify(&path)).unwrap();
        }
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            flag.store(true, Ordering::SeqCst);
        });

        let summary = watcher.run_events(rx, shutdown).await.unwrap();
        drop(tx);
        assert_eq!(summary.dropped, 2);
        assert_eq!(metrics.count_events("watcher_queue_overflow"), 2);
        assert_eq!(summary.files_dispatched, 1);
    }
}
