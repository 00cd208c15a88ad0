//! Directory scanning with include/exclude glob filters.
//!
//! Globs support `**` (any number of directories), `*` and `?` within one path
//! segment, `[...]` character classes and `{a,b}` alternation. Patterns are tested
//! against the path relative to the scan root, with `/` separators.

use crate::config::Config;
use crate::error::{DocError, Result};
use crate::files::{FileManager, TargetStatus};
use regex::Regex;
use serde::Serialize;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

#[derive(Debug, Clone)]
struct Glob {
    source: String,
    regex: Regex,
    /// `foo/**` style: matching a directory excludes everything beneath it.
    covers_directory: bool,
}

/// An ordered set of compiled glob patterns.
#[derive(Debug, Clone, Default)]
pub struct PatternSet {
    globs: Vec<Glob>,
}

impl PatternSet {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let globs = patterns
            .iter()
            .map(|p| {
                let source = p.as_ref().trim().to_string();
                let regex = Regex::new(&glob_to_regex(&source)).map_err(|e| {
                    DocError::Config(format!("Invalid glob pattern '{}': {}", source, e))
                })?;
                Ok(Glob {
                    covers_directory: source.ends_with("/**"),
                    source,
                    regex,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { globs })
    }

    pub fn is_match(&self, relative: &str) -> bool {
        self.globs.iter().any(|g| g.regex.is_match(relative))
    }

    fn excludes_directory(&self, relative: &str) -> bool {
        self.globs
            .iter()
            .any(|g| g.covers_directory && g.regex.is_match(relative))
    }

    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.globs.iter().map(|g| g.source.as_str())
    }
}

/// Translate a glob into an anchored regular expression.
///
/// Unbalanced `{`/`}` and unterminated or empty `[...]` are matched literally.
pub fn glob_to_regex(glob: &str) -> String {
    let chars: Vec<char> = glob.chars().collect();
    let closing = matching_braces(&chars);
    let mut out = String::from("^");
    let mut groups: Vec<usize> = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '*' if chars.get(i + 1) == Some(&'*') => {
                let at_segment_start = i == 0 || chars[i - 1] == '/';
                let followed_by_slash = chars.get(i + 2) == Some(&'/');
                let at_end = i + 2 == chars.len();
                if at_segment_start && followed_by_slash {
                    out.push_str("(?:.*/)?");
                    i += 3;
                    continue;
                }
                if at_segment_start && at_end && i > 0 {
                    // "dir/**": the directory itself or anything below it.
                    out.pop();
                    out.push_str("(?:/.*)?");
                } else {
                    out.push_str(".*");
                }
                i += 2;
                continue;
            }
            '*' => out.push_str("[^/]*"),
            '?' => out.push_str("[^/]"),
            '[' => match char_class(&chars[i + 1..]) {
                Some((class, consumed)) => {
                    out.push_str(&class);
                    i += consumed + 1;
                    continue;
                }
                None => out.push_str("\\["),
            },
            '{' => match closing[i] {
                Some(close) => {
                    groups.push(close);
                    out.push_str("(?:");
                }
                None => out.push_str("\\{"),
            },
            '}' if groups.last() == Some(&i) => {
                groups.pop();
                out.push(')');
            }
            ',' if !groups.is_empty() => out.push('|'),
            _ => out.push_str(&regex::escape(&c.to_string())),
        }
        i += 1;
    }

    out.push('$');
    out
}

/// For each `{`, the index of its balancing `}`. Brackets inside a class do not count.
fn matching_braces(chars: &[char]) -> Vec<Option<usize>> {
    let mut closing = vec![None; chars.len()];
    let mut open: Vec<usize> = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '[' => {
                if let Some((_, consumed)) = char_class(&chars[i + 1..]) {
                    i += consumed + 1;
                    continue;
                }
            }
            '{' => open.push(i),
            '}' => {
                if let Some(start) = open.pop() {
                    closing[start] = Some(i);
                }
            }
            _ => {}
        }
        i += 1;
    }
    closing
}

/// Compile the class body following a `[`. Returns the regex class and the
/// number of glob characters consumed, including the closing `]`.
fn char_class(rest: &[char]) -> Option<(String, usize)> {
    let negated = matches!(rest.first(), Some('!') | Some('^'));
    let body_start = usize::from(negated);
    let end = rest[body_start..].iter().position(|&ch| ch == ']')? + body_start;
    let body = &rest[body_start..end];
    if body.is_empty() {
        return None;
    }

    let mut class = String::from(if negated { "[^" } else { "[" });
    for (n, &ch) in body.iter().enumerate() {
        let is_range = ch == '-' && n > 0 && n + 1 < body.len();
        if !is_range && matches!(ch, '\\' | '[' | ']' | '^' | '-' | '&' | '~') {
            class.push('\\');
        }
        class.push(ch);
    }
    class.push(']');
    Some((class, end + 1))
}

/// Relative path rendered with `/` separators, or `None` outside the root.
pub fn relative_slash_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    Some(parts.join("/"))
}

/// Decides which Markdown files under a root are translation sources.
#[derive(Debug, Clone)]
pub struct Scanner {
    include: PatternSet,
    exclude: PatternSet,
}

impl Scanner {
    /// The target glob is always part of the exclusion set.
    pub fn new<S: AsRef<str>>(include: &[S], exclude: &[S], target_glob: &str) -> Result<Self> {
        let mut excludes: Vec<String> = exclude.iter().map(|s| s.as_ref().to_string()).collect();
        if !excludes.iter().any(|e| e == target_glob) {
            excludes.push(target_glob.to_string());
        }
        Ok(Self {
            include: PatternSet::new(include)?,
            exclude: PatternSet::new(&excludes)?,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            &config.file_patterns.include_patterns,
            &config.file_patterns.exclude_patterns,
            &config.target_glob(),
        )
    }

    /// Scanner for watch mode, keyed on `watch_patterns`.
    pub fn for_watch(config: &Config) -> Result<Self> {
        Self::new(
            &config.file_patterns.watch_patterns,
            &config.file_patterns.exclude_patterns,
            &config.target_glob(),
        )
    }

    /// Kept iff at least one include matches and no exclude does.
    pub fn matches(&self, relative: &str) -> bool {
        self.include.is_match(relative) && !self.exclude.is_match(relative)
    }

    pub fn matches_path(&self, root: &Path, path: &Path) -> bool {
        relative_slash_path(root, path).is_some_and(|rel| !rel.is_empty() && self.matches(&rel))
    }

    /// Walk `root` and return matching files in lexicographic order.
    pub fn scan(&self, root: &Path) -> Result<Vec<PathBuf>> {
        if !root.is_dir() {
            return Err(DocError::IoFailure {
                path: root.to_path_buf(),
                message: "not a directory".to_string(),
            });
        }

        let walker = WalkDir::new(root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| {
                if entry.depth() == 0 || !entry.file_type().is_dir() {
                    return true;
                }
                match relative_slash_path(root, entry.path()) {
                    Some(rel) => !self.exclude.excludes_directory(&rel),
                    None => true,
                }
            });

        let mut files = Vec::new();
        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!("Skipping unreadable entry: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            if let Some(rel) = relative_slash_path(root, entry.path()) {
                if self.matches(&rel) {
                    files.push(entry.into_path());
                }
            }
        }

        files.sort();
        debug!("Scanned {:?}: {} candidate files", root, files.len());
        Ok(files)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanEntry {
    pub path: PathBuf,
    pub status: TargetStatus,
}

/// Read-only freshness report for every source under a root.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanReport {
    pub root: PathBuf,
    pub entries: Vec<ScanEntry>,
    pub missing: usize,
    pub outdated: usize,
    pub up_to_date: usize,
}

impl ScanReport {
    pub fn needing_translation(&self) -> impl Iterator<Item = &ScanEntry> {
        self.entries
            .iter()
            .filter(|e| e.status != TargetStatus::UpToDate)
    }
}

pub fn scan_status(root: &Path, config: &Config) -> Result<ScanReport> {
    let scanner = Scanner::from_config(config)?;
    let files = FileManager::from_config(config);
    let mut report = ScanReport {
        root: root.to_path_buf(),
        ..Default::default()
    };
    for path in scanner.scan(root)? {
        let status = files.target_status(&path)?;
        match status {
            TargetStatus::Missing => report.missing += 1,
            TargetStatus::Outdated => report.outdated += 1,
            TargetStatus::UpToDate => report.up_to_date += 1,
        }
        report.entries.push(ScanEntry { path, status });
    }
    Ok(report)
}
