//! Cross-file terminology consistency.
//!
//! For every source/target pair under a root, each domain term found in the source
//! is classified by how the target renders it. A term rendered more than one way
//! across the tree is reported as a conflict.

use crate::config::Config;
use crate::error::Result;
use crate::files::FileManager;
use crate::scanner::{relative_slash_path, Scanner};
use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Rendering {
    /// The configured custom translation.
    Custom(String),
    /// Kept in English.
    Verbatim,
    /// Neither; translated some other way.
    Other,
}

impl std::fmt::Display for Rendering {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rendering::Custom(s) => write!(f, "'{}'", s),
            Rendering::Verbatim => write!(f, "verbatim"),
            Rendering::Other => write!(f, "other"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TermConflict {
    pub term: String,
    /// Rendering to the files using it.
    pub renderings: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ConsistencyReport {
    pub files_checked: usize,
    pub conflicts: Vec<TermConflict>,
}

impl ConsistencyReport {
    pub fn is_consistent(&self) -> bool {
        self.conflicts.is_empty()
    }
}

fn classify(term: &str, custom: Option<&String>, target: &str) -> Rendering {
    match custom {
        Some(rendering) if target.contains(rendering.as_str()) => Rendering::Custom(rendering.clone()),
        _ if target.contains(term) => Rendering::Verbatim,
        _ => Rendering::Other,
    }
}

/// Audit every translated pair under `root`.
pub fn audit_directory(root: &Path, config: &Config) -> Result<ConsistencyReport> {
    let scanner = Scanner::from_config(config)?;
    let files = FileManager::from_config(config);
    let terminology = &config.terminology;

    let mut terms: BTreeSet<&String> = terminology.domain_terms.iter().collect();
    terms.extend(terminology.custom_translations.keys());
    let patterns: Vec<(&String, Regex)> = terms
        .into_iter()
        .filter_map(|t| {
            Regex::new(&format!(r"(?i)\b{}\b", regex::escape(t)))
                .ok()
                .map(|re| (t, re))
        })
        .collect();

    let mut seen: BTreeMap<&String, BTreeMap<Rendering, Vec<String>>> = BTreeMap::new();
    let mut report = ConsistencyReport::default();

    for source in scanner.scan(root)? {
        let target = files.derive_target_path(&source)?;
        let (Ok(source_text), Ok(target_text)) =
            (fs::read_to_string(&source), fs::read_to_string(&target))
        else {
            continue;
        };
        report.files_checked += 1;
        let label = relative_slash_path(root, &source)
            .unwrap_or_else(|| source.display().to_string());

        for (term, re) in &patterns {
            if !re.is_match(&source_text) {
                continue;
            }
            let rendering = classify(
                term,
                terminology.custom_translations.get(*term),
                &target_text,
            );
            seen.entry(*term)
                .or_default()
                .entry(rendering)
                .or_default()
                .push(label.clone());
        }
    }

    for (term, renderings) in seen {
        if renderings.len() > 1 {
            debug!("Inconsistent rendering for {}: {:?}", term, renderings);
            report.conflicts.push(TermConflict {
                term: term.clone(),
                renderings: renderings
                    .into_iter()
                    .map(|(r, files)| (r.to_string(), files))
                    .collect(),
            });
        }
    }

    info!(
        "Terminology audit: {} files, {} conflicts",
        report.files_checked,
        report.conflicts.len()
    );
    Ok(report)
}
