//! Migration Workflow: flips a Chinese-first tree to English-first with
//! `.zh-TW.md` shadows, rolling back to a full backup when too much fails.

use crate::config::Config;
use crate::error::{DocError, Result};
use crate::files::{write_atomically, FileManager};
use crate::gateway::Translator;
use crate::metrics::MetricsStore;
use crate::pipeline::FileResult;
use crate::qa::markdown::chinese_ratio;
use crate::scanner::{relative_slash_path, PatternSet, Scanner};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

const PRIMARY_THRESHOLD: f64 = 0.7;
const MIXED_THRESHOLD: f64 = 0.2;
const MB: u64 = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    PrimarilyChinese,
    Mixed,
    Minimal,
}

impl Category {
    pub fn from_ratio(ratio: f64) -> Self {
        if ratio > PRIMARY_THRESHOLD {
            Category::PrimarilyChinese
        } else if ratio >= MIXED_THRESHOLD {
            Category::Mixed
        } else {
            Category::Minimal
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Category::PrimarilyChinese => write!(f, "primarily_chinese"),
            Category::Mixed => write!(f, "mixed"),
            Category::Minimal => write!(f, "minimal"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FileAnalysis {
    pub path: PathBuf,
    pub chinese_ratio: f64,
    pub category: Category,
    pub size: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AnalysisReport {
    pub files: Vec<FileAnalysis>,
    pub primarily_chinese: usize,
    pub mixed: usize,
    pub minimal: usize,
}

impl AnalysisReport {
    pub fn primary_files(&self) -> Vec<PathBuf> {
        self.files
            .iter()
            .filter(|f| f.category == Category::PrimarilyChinese)
            .map(|f| f.path.clone())
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Analysis,
    Validation,
    Backup,
    Migration,
    Verification,
    Cleanup,
    Rollback,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::Analysis => "analysis",
            Phase::Validation => "validation",
            Phase::Backup => "backup",
            Phase::Migration => "migration",
            Phase::Verification => "verification",
            Phase::Cleanup => "cleanup",
            Phase::Rollback => "rollback",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseStatus {
    Started,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct PhaseRecord {
    pub phase: Phase,
    pub status: PhaseStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkflowLog {
    pub phases: Vec<PhaseRecord>,
}

impl WorkflowLog {
    fn begin(&mut self, phase: Phase) {
        info!("Migration phase {} started", phase);
        self.phases.push(PhaseRecord {
            phase,
            status: PhaseStatus::Started,
            started_at: Utc::now(),
            completed_at: None,
            message: None,
        });
    }

    fn end<T>(&mut self, phase: Phase, result: &Result<T>) {
        let Some(record) = self.phases.iter_mut().rev().find(|r| r.phase == phase) else {
            return;
        };
        record.completed_at = Some(Utc::now());
        match result {
            Ok(_) => {
                record.status = PhaseStatus::Completed;
                info!("Migration phase {} completed", phase);
            }
            Err(e) => {
                record.status = PhaseStatus::Failed;
                record.message = Some(e.to_string());
                error!("Migration phase {} failed: {}", phase, e);
            }
        }
    }

    pub fn status_of(&self, phase: Phase) -> Option<PhaseStatus> {
        self.phases.iter().rev().find(|r| r.phase == phase).map(|r| r.status)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStatus {
    Completed,
    RolledBack,
    Failed,
    DryRun,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedMigration {
    pub path: PathBuf,
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MigrationOutcome {
    pub status: MigrationStatus,
    pub analysis: AnalysisReport,
    pub migrated: Vec<PathBuf>,
    pub failed: Vec<FailedMigration>,
    pub backup_path: Option<PathBuf>,
    pub log: WorkflowLog,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<String>,
}

impl MigrationOutcome {
    pub fn attempted(&self) -> usize {
        self.migrated.len() + self.failed.len()
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && matches!(self.status, MigrationStatus::Completed | MigrationStatus::DryRun)
    }
}

/// What the validation phase measured.
#[derive(Debug, Clone, Serialize)]
pub struct Preconditions {
    pub available_mb: Option<u64>,
    pub required_mb: u64,
    pub files_checked: usize,
}

/// Everything the migration phase wrote, so rollback can undo it.
#[derive(Debug, Default)]
struct Changes {
    created_files: Vec<PathBuf>,
    created_dirs: Vec<PathBuf>,
}

struct FileOutcome {
    path: PathBuf,
    shadow: PathBuf,
    backup: Option<PathBuf>,
    shadow_created: bool,
    result: FileResult,
    error: Option<DocError>,
}

pub struct MigrationWorkflow {
    config: Config,
    root: PathBuf,
    gateway: Arc<dyn Translator>,
    files: FileManager,
    scanner: Scanner,
    backup_excludes: PatternSet,
    metrics: Option<Arc<MetricsStore>>,
    workers: usize,
}

impl MigrationWorkflow {
    pub fn new(config: &Config, root: &Path, gateway: Arc<dyn Translator>) -> Result<Self> {
        let root = fs::canonicalize(root).map_err(|e| DocError::io(root, e))?;
        Ok(Self {
            config: config.clone(),
            root,
            gateway,
            files: FileManager::from_config(config),
            scanner: Scanner::from_config(config)?,
            backup_excludes: PatternSet::new(&config.file_patterns.backup_exclude_patterns)?,
            metrics: None,
            workers: config.performance.max_concurrent_translations.max(1),
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsStore>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn backup_root(&self) -> PathBuf {
        let configured = &self.config.migration.backup_root;
        if configured.is_absolute() {
            configured.clone()
        } else {
            std::env::current_dir()
                .unwrap_or_else(|_| PathBuf::from("."))
                .join(configured)
        }
    }

    fn under_backup_root(&self, path: &Path) -> bool {
        fs::canonicalize(self.backup_root()).is_ok_and(|root| path.starts_with(root))
    }

    /// Run every phase. `Err` means the workflow aborted before changing anything.
    pub async fn run(&self) -> Result<MigrationOutcome> {
        let operation_id = self
            .metrics
            .as_ref()
            .map(|m| m.start_operation("migrate"));
        let mut log = WorkflowLog::default();

        log.begin(Phase::Analysis);
        let analysis = self.analyze();
        log.end(Phase::Analysis, &analysis);
        let analysis = self.abort_if_err(analysis, operation_id.as_deref())?;
        info!(
            "Analysis: {} primarily Chinese, {} mixed, {} minimal",
            analysis.primarily_chinese, analysis.mixed, analysis.minimal
        );

        log.begin(Phase::Validation);
        let checked = self.validate(&analysis);
        log.end(Phase::Validation, &checked);
        self.abort_if_err(checked, operation_id.as_deref())?;

        let mut outcome = MigrationOutcome {
            status: MigrationStatus::Completed,
            analysis,
            migrated: Vec::new(),
            failed: Vec::new(),
            backup_path: None,
            log,
            error: None,
            operation_id: operation_id.clone(),
        };

        if self.config.general.dry_run {
            info!(
                "[dry run] would migrate {} files",
                outcome.analysis.primarily_chinese
            );
            outcome.status = MigrationStatus::DryRun;
            self.finish_operation(&outcome);
            return Ok(outcome);
        }

        outcome.log.begin(Phase::Backup);
        let backup = self.backup_tree();
        outcome.log.end(Phase::Backup, &backup);
        let backup = self.abort_if_err(backup, operation_id.as_deref())?;
        outcome.backup_path = Some(backup.clone());

        let primary = outcome.analysis.primary_files();
        let mut changes = Changes::default();
        for path in &primary {
            let backup_dir = self.files.backup_dir_for(path);
            if !backup_dir.exists() && !changes.created_dirs.contains(&backup_dir) {
                changes.created_dirs.push(backup_dir);
            }
        }

        outcome.log.begin(Phase::Migration);
        let results = self.migrate_files(&primary).await;
        for file in results {
            if let (Some(metrics), Some(id)) = (&self.metrics, &operation_id) {
                metrics.record_file(id, &file.result);
            }
            if let Some(b) = file.backup {
                changes.created_files.push(b);
            }
            if file.shadow_created {
                changes.created_files.push(file.shadow);
            }
            match file.error {
                None => outcome.migrated.push(file.path),
                Some(e) => {
                    warn!("Migration of {:?} failed: {}", file.path, e);
                    outcome.failed.push(FailedMigration {
                        path: file.path,
                        kind: e.kind().to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }
        outcome.migrated.sort();

        let phase_result = self.check_threshold(&outcome);
        outcome.log.end(Phase::Migration, &phase_result);

        let phase_result = match phase_result {
            Ok(()) => {
                outcome.log.begin(Phase::Verification);
                let verified = self.verify(&outcome.migrated);
                outcome.log.end(Phase::Verification, &verified);
                verified
            }
            Err(e) => Err(e),
        };

        match phase_result {
            Ok(()) => {
                outcome.log.begin(Phase::Cleanup);
                let cleaned = self.cleanup(&outcome.migrated);
                outcome.log.end(Phase::Cleanup, &cleaned);
                if let Err(e) = cleaned {
                    warn!("Cleanup incomplete: {}", e);
                }
            }
            Err(e) => {
                let threshold = matches!(e, DocError::MigrationThresholdExceeded { .. });
                outcome.error = Some(e.to_string());
                if threshold || self.config.migration.auto_rollback_on_failure {
                    outcome.log.begin(Phase::Rollback);
                    let rolled = self.rollback(&backup, &changes);
                    outcome.log.end(Phase::Rollback, &rolled);
                    match rolled {
                        Ok(restored) => {
                            outcome.status = MigrationStatus::RolledBack;
                            if let Some(metrics) = &self.metrics {
                                metrics.record_event(
                                    "migration_rolled_back",
                                    format!("restored {} from {}", self.root.display(), backup.display()),
                                    serde_json::json!({
                                        "reason": e.kind(),
                                        "failed": outcome.failed.len(),
                                        "attempted": outcome.attempted(),
                                        "restored_files": restored,
                                        "backup": backup,
                                    }),
                                );
                            }
                        }
                        Err(rollback_err) => {
                            error!(
                                "Rollback failed, restore manually from {:?}: {}",
                                backup, rollback_err
                            );
                            outcome.status = MigrationStatus::Failed;
                            outcome.error = Some(format!("{}; rollback failed: {}", e, rollback_err));
                        }
                    }
                } else {
                    outcome.status = MigrationStatus::Failed;
                }
            }
        }

        self.write_workflow_log(&outcome);
        self.finish_operation(&outcome);
        Ok(outcome)
    }

    fn abort_if_err<T>(&self, result: Result<T>, operation_id: Option<&str>) -> Result<T> {
        if let Err(e) = &result {
            if let (Some(metrics), Some(id)) = (&self.metrics, operation_id) {
                metrics.add_error(id, e, None);
                if let Err(complete) = metrics.complete_operation(id) {
                    warn!("Failed to record migration metrics: {}", complete);
                }
            }
        }
        result
    }

    fn finish_operation(&self, outcome: &MigrationOutcome) {
        if let (Some(metrics), Some(id)) = (&self.metrics, &outcome.operation_id) {
            if let Err(e) = metrics.complete_operation(id) {
                warn!("Failed to record migration metrics: {}", e);
            }
        }
    }

    /// Classify every Markdown source under the root by Chinese density.
    pub fn analyze(&self) -> Result<AnalysisReport> {
        let mut report = AnalysisReport::default();
        for path in self.scanner.scan(&self.root)? {
            if self.under_backup_root(&path) {
                continue;
            }
            let content = fs::read_to_string(&path).map_err(|e| DocError::io(&path, e))?;
            let ratio = chinese_ratio(&content);
            let category = Category::from_ratio(ratio);
            match category {
                Category::PrimarilyChinese => report.primarily_chinese += 1,
                Category::Mixed => report.mixed += 1,
                Category::Minimal => report.minimal += 1,
            }
            debug!("{:?}: {:.2} -> {}", path, ratio, category);
            report.files.push(FileAnalysis {
                path,
                chinese_ratio: ratio,
                category,
                size: content.len() as u64,
            });
        }
        Ok(report)
    }

    /// Preconditions. Any error aborts the workflow before anything is written.
    pub fn validate(&self, analysis: &AnalysisReport) -> Result<Preconditions> {
        if !self.gateway.supports_reverse() {
            return Err(DocError::Config(format!(
                "Translation backend '{}' cannot translate Chinese to English; migration needs a backend that supports both directions",
                self.gateway.name()
            )));
        }

        let tree_bytes: u64 = self.backup_candidates().iter().map(|(_, size)| size).sum();
        let required_mb = self.config.migration.min_free_space_mb + tree_bytes.div_ceil(MB);
        let available_mb = available_mb(&self.root);
        if let Some(available) = available_mb {
            if available < required_mb {
                return Err(DocError::DiskFull {
                    available_mb: available,
                    required_mb,
                });
            }
        }

        if tempfile::NamedTempFile::new_in(&self.root).is_err() {
            return Err(DocError::NoWritePermission(self.root.clone()));
        }

        for file in &analysis.files {
            let path = &file.path;
            let content = fs::read_to_string(path).map_err(|e| DocError::io(path, e))?;
            if content.trim().is_empty() {
                return Err(DocError::ValidationFailure(format!(
                    "{} is empty",
                    path.display()
                )));
            }
            if file.category == Category::PrimarilyChinese {
                let shadow = self.files.derive_target_path(path)?;
                if shadow.exists() {
                    return Err(DocError::PathConflict(format!(
                        "{} already exists",
                        shadow.display()
                    )));
                }
            }
        }

        Ok(Preconditions {
            available_mb,
            required_mb,
            files_checked: analysis.files.len(),
        })
    }

    /// Files under the root that go into the full backup, with their sizes.
    fn backup_candidates(&self) -> Vec<(PathBuf, u64)> {
        let backup_root = fs::canonicalize(self.backup_root()).ok();
        WalkDir::new(&self.root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| {
                if backup_root.as_deref().is_some_and(|b| entry.path().starts_with(b)) {
                    return false;
                }
                match relative_slash_path(&self.root, entry.path()) {
                    Some(rel) if !rel.is_empty() => !self.backup_excludes.is_match(&rel),
                    _ => true,
                }
            })
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| {
                let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
                (entry.into_path(), size)
            })
            .collect()
    }

    /// Copy the tree into `<backup_root>/full_backup_<timestamp>`.
    pub fn backup_tree(&self) -> Result<PathBuf> {
        let backup_root = self.backup_root();
        fs::create_dir_all(&backup_root).map_err(|e| DocError::io(&backup_root, e))?;

        let stamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
        let mut target = backup_root.join(format!("full_backup_{}", stamp));
        let mut counter = 1;
        while target.exists() {
            target = backup_root.join(format!("full_backup_{}_{}", stamp, counter));
            counter += 1;
        }

        let candidates = self.backup_candidates();
        for (path, _) in &candidates {
            let Ok(rel) = path.strip_prefix(&self.root) else {
                continue;
            };
            copy_with_mtime(path, &target.join(rel))?;
        }
        info!("Backed up {} files to {:?}", candidates.len(), target);
        Ok(target)
    }

    async fn migrate_files(&self, paths: &[PathBuf]) -> Vec<FileOutcome> {
        stream::iter(paths.iter().cloned())
            .map(|path| self.migrate_file(path))
            .buffer_unordered(self.workers)
            .collect()
            .await
    }

    /// Back up, reverse-translate, write English to the original path and the
    /// Chinese original to the shadow path.
    async fn migrate_file(&self, path: PathBuf) -> FileOutcome {
        let started = Instant::now();
        let mut outcome = FileOutcome {
            shadow: PathBuf::new(),
            backup: None,
            shadow_created: false,
            result: FileResult::skipped(&path, "pending"),
            error: None,
            path: path.clone(),
        };

        let attempt = async {
            outcome.shadow = self.files.derive_target_path(&path)?;
            let chinese = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| DocError::io(&path, e))?;
            outcome.backup = Some(self.files.backup(&path)?);

            let english = self.gateway.translate_reverse(&chinese).await?;
            if english.trim().is_empty() {
                return Err(DocError::ValidationFailure("empty".to_string()));
            }

            // English first so the shadow is never older than its source.
            write_atomically(&path, &english)?;
            if let Err(e) = write_atomically(&outcome.shadow, &chinese) {
                if let Err(undo) = write_atomically(&path, &chinese) {
                    error!("Could not restore {:?} after failed shadow write: {}", path, undo);
                }
                return Err(e);
            }
            outcome.shadow_created = true;
            Ok::<(), DocError>(())
        };

        match attempt.await {
            Ok(()) => {
                debug!("Migrated {:?}", path);
                outcome.result = FileResult::success(&path, outcome.shadow.clone(), started);
            }
            Err(e) => {
                outcome.result = FileResult::failed(&path, &e, started);
                outcome.error = Some(e);
            }
        }
        outcome
    }

    fn check_threshold(&self, outcome: &MigrationOutcome) -> Result<()> {
        let attempted = outcome.attempted();
        if attempted == 0 {
            return Ok(());
        }
        let ratio = outcome.failed.len() as f64 / attempted as f64;
        let threshold = self.config.migration.rollback_threshold;
        if ratio > threshold {
            return Err(DocError::MigrationThresholdExceeded { ratio, threshold });
        }
        Ok(())
    }

    /// Both variants of every migrated file exist and are non-empty.
    pub fn verify(&self, migrated: &[PathBuf]) -> Result<()> {
        for path in migrated {
            self.files.integrity_check(path)?;
            let shadow = self.files.derive_target_path(path)?;
            self.files.integrity_check(&shadow)?;
        }
        Ok(())
    }

    /// Remove leftover atomic-write temp files beside migrated documents. The
    /// full backup is kept.
    fn cleanup(&self, migrated: &[PathBuf]) -> Result<usize> {
        let dirs: HashSet<&Path> = migrated.iter().filter_map(|p| p.parent()).collect();
        let mut removed = 0;
        for dir in dirs {
            let entries = fs::read_dir(dir).map_err(|e| DocError::io(dir, e))?;
            for entry in entries.flatten() {
                let is_temp = entry
                    .file_name()
                    .to_str()
                    .is_some_and(|n| n.starts_with(".tmp"));
                if is_temp && entry.file_type().is_ok_and(|t| t.is_file()) {
                    fs::remove_file(entry.path()).map_err(|e| DocError::io(entry.path(), e))?;
                    removed += 1;
                }
            }
        }
        if removed > 0 {
            debug!("Removed {} temporary files", removed);
        }
        Ok(removed)
    }

    /// Restore every backed-up file that changed and remove what the run created.
    fn rollback(&self, backup: &Path, changes: &Changes) -> Result<usize> {
        warn!("Rolling back migration from {:?}", backup);
        for created in &changes.created_files {
            if created.exists() {
                fs::remove_file(created).map_err(|e| DocError::io(created, e))?;
            }
        }
        for dir in &changes.created_dirs {
            if dir.exists() {
                fs::remove_dir_all(dir).map_err(|e| DocError::io(dir, e))?;
            }
        }

        let mut restored = 0;
        for entry in WalkDir::new(backup).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(rel) = entry.path().strip_prefix(backup) else {
                continue;
            };
            let original = self.root.join(rel);
            let unchanged = match (fs::read(entry.path()), fs::read(&original)) {
                (Ok(saved), Ok(current)) => saved == current,
                _ => false,
            };
            if !unchanged {
                copy_with_mtime(entry.path(), &original)?;
                restored += 1;
            }
        }
        info!("Rollback restored {} files", restored);
        Ok(restored)
    }

    fn write_workflow_log(&self, outcome: &MigrationOutcome) {
        let Some(backup) = &outcome.backup_path else {
            return;
        };
        let Some(name) = backup.file_name().and_then(|n| n.to_str()) else {
            return;
        };
        let path = backup.with_file_name(format!("{}.json", name.replacen("full_backup", "migration", 1)));
        let written = serde_json::to_string_pretty(outcome)
            .map_err(DocError::from)
            .and_then(|body| write_atomically(&path, &body));
        if let Err(e) = written {
            warn!("Failed to write migration log {:?}: {}", path, e);
        }
    }
}

fn copy_with_mtime(from: &Path, to: &Path) -> Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent).map_err(|e| DocError::io(parent, e))?;
    }
    fs::copy(from, to).map_err(|e| DocError::io(from, e))?;
    if let Ok(modified) = fs::metadata(from).and_then(|m| m.modified()) {
        let carried = fs::File::options()
            .write(true)
            .open(to)
            .and_then(|f| f.set_modified(modified));
        if let Err(e) = carried {
            debug!("Could not carry mtime onto {:?}: {}", to, e);
        }
    }
    Ok(())
}

#[cfg(unix)]
fn available_mb(path: &Path) -> Option<u64> {
    match rustix::fs::statvfs(path) {
        Ok(stat) => Some(stat.f_bavail.saturating_mul(stat.f_frsize) / MB),
        Err(e) => {
            warn!("Could not read free space for {:?}: {}", path, e);
            None
        }
    }
}

#[cfg(not(unix))]
fn available_mb(_path: &Path) -> Option<u64> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::mock::MockTranslator;
    use std::collections::BTreeMap;

    const CHINESE: &str = "# 使用指南\n\n這是一份關於系統部署的詳細說明文件。\n\n```bash\nmake build\n```\n";

    fn config_for(dir: &Path) -> Config {
        let mut config = Config::default();
        config.migration.backup_root = dir.join("backups");
        config.migration.min_free_space_mb = 0;
        config
    }

    fn snapshot(root: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
        WalkDir::new(root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| (e.path().strip_prefix(root).unwrap().to_path_buf(), fs::read(e.path()).unwrap()))
            .collect()
    }

    #[test]
    fn test_category_boundaries() {
        assert_eq!(Category::from_ratio(0.95), Category::PrimarilyChinese);
        assert_eq!(Category::from_ratio(0.7), Category::Mixed);
        assert_eq!(Category::from_ratio(0.2), Category::Mixed);
        assert_eq!(Category::from_ratio(0.1), Category::Minimal);
    }

    #[tokio::test]
    async fn test_migrates_primary_files_only() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("docs");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("guide.md"), CHINESE).unwrap();
        fs::write(root.join("readme.md"), "# Readme\n\nPlain English text only.\n").unwrap();

        let config = config_for(dir.path());
        let metrics = Arc::new(MetricsStore::in_memory());
        let workflow = MigrationWorkflow::new(&config, &root, Arc::new(MockTranslator::new()))
            .unwrap()
            .with_metrics(metrics.clone());
        let outcome = workflow.run().await.unwrap();

        assert_eq!(outcome.status, MigrationStatus::Completed);
        assert_eq!(outcome.analysis.primarily_chinese, 1);
        assert_eq!(outcome.analysis.minimal, 1);
        assert_eq!(outcome.migrated.len(), 1);
        assert_eq!(fs::read_to_string(root.join("guide.zh-TW.md")).unwrap(), CHINESE);
        let english = fs::read_to_string(root.join("guide.md")).unwrap();
        assert!(english.contains("make build"));
        assert_eq!(crate::qa::markdown::count_cjk(&english), 0);
        assert_eq!(
            fs::read_to_string(root.join("readme.md")).unwrap(),
            "# Readme\n\nPlain English text only.\n"
        );
        assert!(outcome.backup_path.unwrap().join("guide.md").exists());
        assert_eq!(outcome.log.status_of(Phase::Cleanup), Some(PhaseStatus::Completed));
        assert_eq!(metrics.completed_operations()[0].kind, "migrate");
    }

    #[tokio::test]
    async fn test_threshold_breach_restores_tree() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("docs");
        fs::create_dir_all(root.join("nested")).unwrap();
        for i in 0..6 {
            fs::write(root.join(format!("doc{}.md", i)), CHINESE).unwrap();
        }
        fs::write(root.join("nested").join("broken.md"), format!("{}\n失敗標記\n", CHINESE)).unwrap();
        let before = snapshot(&root);

        let config = config_for(dir.path());
        let metrics = Arc::new(MetricsStore::in_memory());
        let workflow =
            MigrationWorkflow::new(&config, &root, Arc::new(MockTranslator::failing_on("失敗標記")))
                .unwrap()
                .with_metrics(metrics.clone());
        let outcome = workflow.run().await.unwrap();

        assert_eq!(outcome.status, MigrationStatus::RolledBack);
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(snapshot(&root), before);
        assert!(!root.join(".backup").exists());
        assert_eq!(metrics.count_events("migration_rolled_back"), 1);
        assert!(outcome.backup_path.unwrap().exists());
    }

    #[tokio::test]
    async fn test_below_threshold_keeps_successes() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("docs");
        fs::create_dir_all(&root).unwrap();
        for i in 0..3 {
            fs::write(root.join(format!("doc{}.md", i)), CHINESE).unwrap();
        }
        fs::write(root.join("bad.md"), format!("{}失敗標記\n", CHINESE)).unwrap();

        let mut config = config_for(dir.path());
        config.migration.rollback_threshold = 0.5;
        let workflow =
            MigrationWorkflow::new(&config, &root, Arc::new(MockTranslator::failing_on("失敗標記")))
                .unwrap();
        let outcome = workflow.run().await.unwrap();

        assert_eq!(outcome.status, MigrationStatus::Completed);
        assert_eq!(outcome.migrated.len(), 3);
        assert!(!outcome.is_clean());
        assert!(!root.join("bad.zh-TW.md").exists());
    }

    #[tokio::test]
    async fn test_existing_shadow_aborts_before_changes() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("docs");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("guide.md"), CHINESE).unwrap();
        fs::write(root.join("guide.zh-TW.md"), CHINESE).unwrap();

        let config = config_for(dir.path());
        let workflow =
            MigrationWorkflow::new(&config, &root, Arc::new(MockTranslator::new())).unwrap();
        let err = workflow.run().await.unwrap_err();
        assert_eq!(err.kind(), "path_conflict");
        assert!(!dir.path().join("backups").exists());
    }

    #[tokio::test]
    async fn test_empty_source_anywhere_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("docs");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("guide.md"), CHINESE).unwrap();
        fs::write(root.join("empty.md"), "   \n").unwrap();
        let before = snapshot(&root);

        let config = config_for(dir.path());
        let workflow =
            MigrationWorkflow::new(&config, &root, Arc::new(MockTranslator::new())).unwrap();
        let err = workflow.run().await.unwrap_err();
        assert_eq!(err.kind(), "validation_failure");
        assert!(err.to_string().contains("empty.md"));
        assert_eq!(snapshot(&root), before);
        assert!(!dir.path().join("backups").exists());
    }

    struct ForwardOnly;

    #[async_trait::async_trait]
    impl Translator for ForwardOnly {
        async fn translate(
            &self,
            content: &str,
            _context: Option<crate::gateway::ContextTag>,
        ) -> Result<String> {
            Ok(content.to_string())
        }

        fn name(&self) -> &'static str {
            "forward-only"
        }
    }

    #[tokio::test]
    async fn test_requires_reverse_capable_backend() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("guide.md"), CHINESE).unwrap();
        let config = config_for(dir.path());
        let workflow = MigrationWorkflow::new(&config, dir.path(), Arc::new(ForwardOnly)).unwrap();
        let err = workflow.run().await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_insufficient_space_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("guide.md"), CHINESE).unwrap();
        let mut config = config_for(dir.path());
        config.migration.min_free_space_mb = u64::MAX / 2;
        let workflow =
            MigrationWorkflow::new(&config, dir.path(), Arc::new(MockTranslator::new())).unwrap();
        let err = workflow.run().await.unwrap_err();
        assert_eq!(err.kind(), "disk_full");
    }

    #[tokio::test]
    async fn test_dry_run_changes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("docs");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("guide.md"), CHINESE).unwrap();
        let before = snapshot(&root);

        let mut config = config_for(dir.path());
        config.general.dry_run = true;
        let workflow =
            MigrationWorkflow::new(&config, &root, Arc::new(MockTranslator::new())).unwrap();
        let outcome = workflow.run().await.unwrap();
        assert_eq!(outcome.status, MigrationStatus::DryRun);
        assert_eq!(snapshot(&root), before);
    }
}
