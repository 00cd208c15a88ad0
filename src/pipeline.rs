//! Translator Core: the per-file pipeline shared by every mode.

use crate::config::Config;
use crate::error::{DocError, Result};
use crate::files::{FileManager, TargetStatus};
use crate::gateway::{ContextTag, Translator};
use crate::qa::QualityChecker;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Instant, SystemTime};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Success,
    Failed,
    Skipped,
}

impl std::fmt::Display for FileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileStatus::Success => write!(f, "success"),
            FileStatus::Failed => write!(f, "failed"),
            FileStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// Skip reason for a path another caller is already translating.
pub const IN_PROGRESS: &str = "in_progress";

/// Success reason when the source was edited while its translation ran.
pub const SOURCE_CHANGED: &str = "source_changed";

/// Outcome for one source path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileResult {
    pub path: PathBuf,
    pub status: FileStatus,
    /// Seconds spent in the pipeline.
    pub processing_time: f64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub target_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub warnings: Vec<String>,
}

impl FileResult {
    pub fn success(path: &Path, target: PathBuf, started: Instant) -> Self {
        Self {
            path: path.to_path_buf(),
            status: FileStatus::Success,
            processing_time: started.elapsed().as_secs_f64(),
            error_kind: None,
            error_message: None,
            target_path: Some(target),
            reason: None,
            warnings: Vec::new(),
        }
    }

    pub fn failed(path: &Path, error: &DocError, started: Instant) -> Self {
        Self {
            path: path.to_path_buf(),
            status: FileStatus::Failed,
            processing_time: started.elapsed().as_secs_f64(),
            error_kind: Some(error.kind().to_string()),
            error_message: Some(error.to_string()),
            target_path: None,
            reason: None,
            warnings: Vec::new(),
        }
    }

    pub fn skipped(path: &Path, reason: &str) -> Self {
        Self {
            path: path.to_path_buf(),
            status: FileStatus::Skipped,
            processing_time: 0.0,
            error_kind: None,
            error_message: None,
            target_path: None,
            reason: Some(reason.to_string()),
            warnings: Vec::new(),
        }
    }

    /// An in-flight file whose worker was terminated.
    pub fn terminated(path: &Path) -> Self {
        Self {
            reason: Some("cancelled".to_string()),
            ..Self::failed(path, &DocError::Cancelled, Instant::now())
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == FileStatus::Success
    }

    pub fn is_failed(&self) -> bool {
        self.status == FileStatus::Failed
    }

    pub fn is_skipped(&self) -> bool {
        self.status == FileStatus::Skipped
    }

    /// The file should be translated again: it was busy, or it changed mid-translation.
    pub fn needs_retry(&self) -> bool {
        matches!(self.reason.as_deref(), Some(IN_PROGRESS) | Some(SOURCE_CHANGED))
    }

    /// One line for the terminal: path and a short cause.
    pub fn one_line(&self) -> String {
        match self.status {
            FileStatus::Success => format!("✓ {}", self.path.display()),
            FileStatus::Skipped => format!(
                "- {} (skipped: {})",
                self.path.display(),
                self.reason.as_deref().unwrap_or("unknown")
            ),
            FileStatus::Failed => format!(
                "✗ {}: {}",
                self.path.display(),
                self.error_message.as_deref().unwrap_or("unknown error")
            ),
        }
    }
}

/// Removes the path from the in-flight set when the pipeline returns.
struct InFlightGuard<'a> {
    set: &'a Mutex<HashSet<PathBuf>>,
    path: PathBuf,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut set) = self.set.lock() {
            set.remove(&self.path);
        }
    }
}

/// Runs read, translate, validate and write for one source file.
///
/// Shared across workers behind an `Arc`. A source path is never translated by two
/// callers at once; a second concurrent request is skipped with reason `in_progress`.
pub struct DocumentTranslator {
    gateway: Arc<dyn Translator>,
    files: FileManager,
    qa: QualityChecker,
    backup_enabled: bool,
    dry_run: bool,
    context_aware: bool,
    max_prompt_length: usize,
    in_flight: Mutex<HashSet<PathBuf>>,
}

impl DocumentTranslator {
    pub fn new(config: &Config, gateway: Arc<dyn Translator>) -> Self {
        Self {
            gateway,
            files: FileManager::from_config(config),
            qa: QualityChecker::from_config(config),
            backup_enabled: config.file_management.backup_enabled,
            dry_run: config.general.dry_run,
            context_aware: config.integration.context_aware,
            max_prompt_length: config.integration.max_prompt_length,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_quality_checker(mut self, qa: QualityChecker) -> Self {
        self.qa = qa;
        self
    }

    pub fn files(&self) -> &FileManager {
        &self.files
    }

    pub fn gateway(&self) -> &Arc<dyn Translator> {
        &self.gateway
    }

    fn claim(&self, path: &Path) -> Option<InFlightGuard<'_>> {
        let key = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        let mut set = self.in_flight.lock().ok()?;
        if !set.insert(key.clone()) {
            return None;
        }
        Some(InFlightGuard {
            set: &self.in_flight,
            path: key,
        })
    }

    /// Translate one file.
    ///
    /// Per-file problems are reported in the returned [`FileResult`]. `Err` is
    /// reserved for conditions that should abort the whole operation.
    pub async fn translate_file(&self, source: &Path, force: bool) -> Result<FileResult> {
        let started = Instant::now();

        let Some(_guard) = self.claim(source) else {
            debug!("{:?} is already being translated", source);
            return Ok(FileResult::skipped(source, IN_PROGRESS));
        };

        let target = match self.files.derive_target_path(source) {
            Ok(t) => t,
            Err(e) => return Ok(FileResult::failed(source, &e, started)),
        };

        if !force {
            match self.files.target_status(source) {
                Ok(TargetStatus::UpToDate) => {
                    debug!("{:?} is up to date", source);
                    return Ok(FileResult::skipped(source, "up_to_date"));
                }
                Ok(status) => debug!("{:?}: target {}", source, status),
                Err(e) => return Ok(FileResult::failed(source, &e, started)),
            }
        }

        if self.dry_run {
            info!("[dry run] would translate {:?} -> {:?}", source, target);
            return Ok(FileResult::skipped(source, "dry_run"));
        }

        if self.backup_enabled && target.exists() {
            if let Err(e) = self.files.backup(&target) {
                warn!("Backup of {:?} failed: {}", target, e);
                return Ok(FileResult::failed(source, &e, started));
            }
        }

        let read_mtime = tokio::fs::metadata(source)
            .await
            .and_then(|m| m.modified())
            .ok();
        let content = match tokio::fs::read_to_string(source).await {
            Ok(c) => c,
            Err(e) => return Ok(FileResult::failed(source, &DocError::io(source, e), started)),
        };

        if content.trim().is_empty() {
            let e = DocError::ValidationFailure("empty".to_string());
            return Ok(FileResult::failed(source, &e, started));
        }

        let length = content.chars().count();
        if length > self.max_prompt_length {
            let e = DocError::InputTooLarge {
                length,
                limit: self.max_prompt_length,
            };
            return Ok(FileResult::failed(source, &e, started));
        }

        let context = if self.context_aware {
            ContextTag::detect(source)
        } else {
            None
        };

        let translated = match self.gateway.translate(&content, context).await {
            Ok(t) => t,
            Err(e) => {
                if matches!(e, DocError::Unauthorized(_)) {
                    warn!("Translation backend rejected credentials: {}", e);
                }
                return Ok(FileResult::failed(source, &e, started));
            }
        };

        let translated = self.qa.apply_auto_fix(&translated, &content);
        let report = self.qa.validate(&translated, &content);
        let warnings: Vec<String> = report.warnings().map(|w| w.to_string()).collect();
        for w in &warnings {
            debug!("{:?}: {}", source, w);
        }
        if !report.passed() {
            let e = DocError::ValidationFailure(report.summary());
            let mut result = FileResult::failed(source, &e, started);
            result.warnings = warnings;
            return Ok(result);
        }

        let files = self.files.clone();
        let write_target = target.clone();
        let written = tokio::task::spawn_blocking(move || files.atomic_write(&write_target, &translated))
            .await
            .map_err(|e| DocError::IoFailure {
                path: target.clone(),
                message: format!("write task failed: {}", e),
            });

        match written {
            Ok(Ok(())) => {}
            Ok(Err(DocError::PermissionDenied(path))) => {
                let dir = target.parent().unwrap_or(Path::new(".")).to_path_buf();
                if directory_readonly(&dir) {
                    return Err(DocError::NoWritePermission(dir));
                }
                let e = DocError::PermissionDenied(path);
                return Ok(FileResult::failed(source, &e, started));
            }
            Ok(Err(e)) | Err(e) => return Ok(FileResult::failed(source, &e, started)),
        }

        let source_changed = changed_since(source, read_mtime);
        if source_changed {
            // Date the target before the edit so the next freshness check sees it outdated.
            if let Some(mtime) = read_mtime {
                if let Err(e) = set_mtime(&target, mtime) {
                    warn!("Could not mark {:?} stale: {}", target, e);
                }
            }
            warn!("{:?} changed during translation; translation is stale", source);
        } else {
            info!("Translated {:?} -> {:?}", source, target);
        }
        let mut result = FileResult::success(source, target, started);
        result.warnings = warnings;
        if source_changed {
            result.reason = Some(SOURCE_CHANGED.to_string());
        }
        Ok(result)
    }
}

/// The source no longer has the modification time it had when it was read.
fn changed_since(source: &Path, read_mtime: Option<SystemTime>) -> bool {
    let Some(read_mtime) = read_mtime else {
        return false;
    };
    std::fs::metadata(source)
        .and_then(|m| m.modified())
        .map_or(true, |now| now != read_mtime)
}

fn set_mtime(path: &Path, mtime: SystemTime) -> std::io::Result<()> {
    std::fs::File::options()
        .write(true)
        .open(path)?
        .set_modified(mtime)
}

fn directory_readonly(dir: &Path) -> bool {
    let dir = if dir.as_os_str().is_empty() {
        Path::new(".")
    } else {
        dir
    };
    std::fs::metadata(dir)
        .map(|m| m.permissions().readonly())
        .unwrap_or(false)
}
