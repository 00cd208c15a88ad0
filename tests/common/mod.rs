//! Shared helpers for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use doctrans::gateway::{ContextTag, Translator};
use doctrans::{Config, DocError, Result};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Chinese prose prefixed to every translated line.
pub const MARKER: &str = "翻譯：";

/// Deterministic stand-in for the AI backend.
pub struct FakeBackend {
    pub calls: AtomicUsize,
    fail_on: Mutex<Vec<String>>,
    drop_fences: bool,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail_on: Mutex::new(Vec::new()),
            drop_fences: false,
        }
    }

    /// Requests containing `marker` fail with a transport error.
    pub fn failing_on(marker: &str) -> Self {
        let backend = Self::new();
        backend.fail_on.lock().unwrap().push(marker.to_string());
        backend
    }

    /// Responses lose every fenced code block.
    pub fn dropping_fences() -> Self {
        Self {
            drop_fences: true,
            ..Self::new()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn check(&self, content: &str) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self
            .fail_on
            .lock()
            .unwrap()
            .iter()
            .any(|m| content.contains(m.as_str()))
        {
            return Err(DocError::Transport("connection reset".to_string()));
        }
        Ok(())
    }
}

/// Prefix prose lines with [`MARKER`]; leave headings' `#`, code, blank lines and
/// table rows untouched.
pub fn fake_translate(content: &str, drop_fences: bool) -> String {
    let mut in_fence = false;
    let mut out = Vec::new();
    for line in content.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") {
            in_fence = !in_fence;
            if !drop_fences {
                out.push(line.to_string());
            }
            continue;
        }
        if in_fence {
            if !drop_fences {
                out.push(line.to_string());
            }
        } else if trimmed.is_empty() || trimmed.starts_with('|') {
            out.push(line.to_string());
        } else if let Some(rest) = trimmed.strip_prefix('#') {
            let level = 1 + rest.chars().take_while(|c| *c == '#').count();
            let title = trimmed[level..].trim_start();
            out.push(format!("{} {}{}", "#".repeat(level), MARKER, title));
        } else {
            out.push(format!("{}{}", MARKER, line));
        }
    }
    let mut joined = out.join("\n");
    if content.ends_with('\n') {
        joined.push('\n');
    }
    joined
}

#[async_trait]
impl Translator for FakeBackend {
    async fn translate(&self, content: &str, _context: Option<ContextTag>) -> Result<String> {
        self.check(content)?;
        Ok(fake_translate(content, self.drop_fences))
    }

    async fn translate_reverse(&self, content: &str) -> Result<String> {
        self.check(content)?;
        Ok(content
            .chars()
            .map(|c| if doctrans::qa::markdown::is_cjk(c) { 'e' } else { c })
            .collect())
    }

    fn supports_reverse(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

/// Default configuration with all on-disk state under `dir`.
pub fn test_config(dir: &Path) -> Config {
    let mut config = Config::default();
    let state = dir.join(".translation");
    config.metrics.database_path = state.join("metrics.db");
    config.metrics.log_path = state.join("translation_log.json");
    config.metrics.job_directory = state.join("jobs");
    config.migration.backup_root = dir.join(".migration_backups");
    config.migration.min_free_space_mb = 0;
    config.watcher.watch_paths = vec![dir.to_path_buf()];
    config
}

pub fn set_mtime(path: &Path, offset_secs: i64) {
    let now = std::time::SystemTime::now();
    let time = if offset_secs >= 0 {
        now + std::time::Duration::from_secs(offset_secs as u64)
    } else {
        now - std::time::Duration::from_secs(offset_secs.unsigned_abs())
    };
    std::fs::File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(time)
        .unwrap();
}
