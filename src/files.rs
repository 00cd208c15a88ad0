//! File Manager: target path derivation, freshness, backups and atomic writes.

use crate::config::Config;
use crate::error::{DocError, Result};
use chrono::Utc;
use regex::Regex;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// Freshness of a source file's translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetStatus {
    Missing,
    Outdated,
    UpToDate,
}

impl std::fmt::Display for TargetStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetStatus::Missing => write!(f, "missing"),
            TargetStatus::Outdated => write!(f, "outdated"),
            TargetStatus::UpToDate => write!(f, "up_to_date"),
        }
    }
}

/// Stateless handle; cheap to clone into each worker.
#[derive(Debug, Clone)]
pub struct FileManager {
    target_suffix: String,
    backup_directory: String,
    retention_count: usize,
    atomic_writes: bool,
}

impl FileManager {
    pub fn new(target_suffix: impl Into<String>) -> Self {
        Self {
            target_suffix: target_suffix.into(),
            backup_directory: ".backup".to_string(),
            retention_count: 5,
            atomic_writes: true,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            target_suffix: config.translation.target_suffix.clone(),
            backup_directory: config.file_management.backup_directory.clone(),
            retention_count: config.file_management.retention_count,
            atomic_writes: config.file_management.atomic_writes,
        }
    }

    pub fn with_retention(mut self, count: usize) -> Self {
        self.retention_count = count;
        self
    }

    fn target_ending(&self) -> String {
        format!(".{}.md", self.target_suffix)
    }

    pub fn is_target_path(&self, path: &Path) -> bool {
        path.file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with(&self.target_ending()))
    }

    /// `docs/guide.md` becomes `docs/guide.zh-TW.md`.
    pub fn derive_target_path(&self, source: &Path) -> Result<PathBuf> {
        let name = source
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| DocError::PathConflict(format!("{} has no file name", source.display())))?;

        if self.is_target_path(source) {
            return Err(DocError::PathConflict(format!(
                "{} is already a translation target",
                source.display()
            )));
        }

        let stem = name.strip_suffix(".md").ok_or_else(|| {
            DocError::PathConflict(format!("{} is not a Markdown file", source.display()))
        })?;
        if stem.is_empty() {
            return Err(DocError::PathConflict(format!(
                "{} has an empty stem",
                source.display()
            )));
        }

        Ok(source.with_file_name(format!("{}{}", stem, self.target_ending())))
    }

    /// Inverse of [`derive_target_path`](Self::derive_target_path).
    pub fn derive_source_path(&self, target: &Path) -> Option<PathBuf> {
        let name = target.file_name()?.to_str()?;
        let stem = name.strip_suffix(&self.target_ending())?;
        if stem.is_empty() {
            return None;
        }
        Some(target.with_file_name(format!("{}.md", stem)))
    }

    /// Compare modification times only; content hashes are not consulted.
    pub fn target_status(&self, source: &Path) -> Result<TargetStatus> {
        let target = self.derive_target_path(source)?;
        let source_mtime = fs::metadata(source)
            .and_then(|m| m.modified())
            .map_err(|e| DocError::io(source, e))?;

        let target_mtime = match fs::metadata(&target) {
            Ok(meta) => meta.modified().map_err(|e| DocError::io(&target, e))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(TargetStatus::Missing),
            Err(e) => return Err(DocError::io(&target, e)),
        };

        if source_mtime > target_mtime {
            Ok(TargetStatus::Outdated)
        } else {
            Ok(TargetStatus::UpToDate)
        }
    }

    pub fn needs_translation(&self, source: &Path) -> Result<bool> {
        Ok(self.target_status(source)? != TargetStatus::UpToDate)
    }

    pub fn backup_dir_for(&self, path: &Path) -> PathBuf {
        path.parent()
            .unwrap_or_else(|| Path::new("."))
            .join(&self.backup_directory)
    }

    /// Copy `path` into the sibling backup directory as `<stem>_<UTC timestamp>.<ext>`,
    /// then prune surplus backups of the same file.
    pub fn backup(&self, path: &Path) -> Result<PathBuf> {
        let (stem, ext) = split_name(path)?;
        let backup_dir = self.backup_dir_for(path);
        fs::create_dir_all(&backup_dir).map_err(|e| DocError::io(&backup_dir, e))?;

        let timestamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
        let mut backup_path = backup_dir.join(backup_name(&stem, &timestamp, None, &ext));
        let mut counter = 1;
        while backup_path.exists() {
            backup_path = backup_dir.join(backup_name(&stem, &timestamp, Some(counter), &ext));
            counter += 1;
        }

        fs::copy(path, &backup_path).map_err(|e| DocError::io(path, e))?;
        if let Ok(modified) = fs::metadata(path).and_then(|m| m.modified()) {
            let restored = fs::File::options()
                .write(true)
                .open(&backup_path)
                .and_then(|f| f.set_modified(modified));
            if let Err(e) = restored {
                debug!("Could not carry mtime onto backup {:?}: {}", backup_path, e);
            }
        }
        debug!("Backed up {:?} to {:?}", path, backup_path);

        self.enforce_retention(path)?;
        Ok(backup_path)
    }

    /// Existing backups of `path`, oldest first.
    pub fn list_backups(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let (stem, ext) = split_name(path)?;
        let backup_dir = self.backup_dir_for(path);
        if !backup_dir.is_dir() {
            return Ok(Vec::new());
        }

        let pattern = Regex::new(&format!(
            r"^{}_\d{{8}}_\d{{6}}(_\d+)?{}$",
            regex::escape(&stem),
            if ext.is_empty() {
                String::new()
            } else {
                regex::escape(&format!(".{}", ext))
            }
        ))
        .map_err(|e| DocError::PathConflict(e.to_string()))?;

        let mut backups: Vec<PathBuf> = fs::read_dir(&backup_dir)
            .map_err(|e| DocError::io(&backup_dir, e))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| pattern.is_match(n))
            })
            .collect();
        // Timestamped names sort chronologically.
        backups.sort();
        Ok(backups)
    }

    fn enforce_retention(&self, path: &Path) -> Result<()> {
        let backups = self.list_backups(path)?;
        if backups.len() <= self.retention_count {
            return Ok(());
        }
        let surplus = backups.len() - self.retention_count;
        for old in backups.into_iter().take(surplus) {
            debug!("Pruning old backup {:?}", old);
            if let Err(e) = fs::remove_file(&old) {
                warn!("Failed to prune backup {:?}: {}", old, e);
            }
        }
        Ok(())
    }

    /// Replace `path` with `content` so that readers see either the old or the new file.
    pub fn atomic_write(&self, path: &Path, content: &str) -> Result<()> {
        if !self.atomic_writes {
            return fs::write(path, content).map_err(|e| DocError::io(path, e));
        }
        write_atomically(path, content)
    }

    /// The file decodes as UTF-8 and is not blank.
    pub fn integrity_check(&self, path: &Path) -> Result<()> {
        let bytes = fs::read(path).map_err(|e| DocError::io(path, e))?;
        let text = String::from_utf8(bytes).map_err(|_| {
            DocError::ValidationFailure(format!("{} is not valid UTF-8", path.display()))
        })?;
        if text.trim().is_empty() {
            return Err(DocError::ValidationFailure(format!(
                "{} is empty",
                path.display()
            )));
        }
        Ok(())
    }
}

/// Temp file in the destination directory, fsync, then rename over `path`.
pub fn write_atomically(path: &Path, content: &str) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    let mut tmp = NamedTempFile::new_in(parent).map_err(|e| DocError::io(parent, e))?;
    tmp.write_all(content.as_bytes())
        .map_err(|e| DocError::io(tmp.path(), e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| DocError::io(tmp.path(), e))?;
    tmp.persist(path).map_err(|e| DocError::io(path, e.error))?;
    Ok(())
}

fn split_name(path: &Path) -> Result<(String, String)> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| DocError::PathConflict(format!("{} has no file name", path.display())))?;
    Ok(match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem.to_string(), ext.to_string()),
        _ => (name.to_string(), String::new()),
    })
}

fn backup_name(stem: &str, timestamp: &str, counter: Option<usize>, ext: &str) -> String {
    let mut name = format!("{}_{}", stem, timestamp);
    if let Some(n) = counter {
        name.push_str(&format!("_{}", n));
    }
    if !ext.is_empty() {
        name.push('.');
        name.push_str(ext);
    }
    name
}
