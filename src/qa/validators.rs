use super::markdown::{
    count_cjk, fenced_blocks, fences_balanced, heading_levels, heading_skips, inline_code_spans,
    link_targets, table_defects, translatable_text,
};
use super::{Issue, Validator};
use regex::Regex;
use std::collections::{BTreeMap, HashMap};

pub struct EmptinessValidator;

impl Validator for EmptinessValidator {
    fn name(&self) -> &'static str {
        "emptiness"
    }

    fn check(&self, translated: &str, _source: &str) -> Vec<Issue> {
        if translated.trim().is_empty() {
            vec![Issue::error(self.name(), "empty")]
        } else {
            Vec::new()
        }
    }
}

/// Heading hierarchy, fence balance and table shape.
pub struct StructureValidator;

impl Validator for StructureValidator {
    fn name(&self) -> &'static str {
        "structure"
    }

    fn check(&self, translated: &str, source: &str) -> Vec<Issue> {
        let mut issues = Vec::new();

        if !fences_balanced(translated) {
            issues.push(Issue::error(self.name(), "unbalanced code fence"));
        }

        let source_levels = heading_levels(source);
        let target_levels = heading_levels(translated);
        if source_levels.len() != target_levels.len() {
            issues.push(Issue::error(
                self.name(),
                format!(
                    "heading count changed from {} to {}",
                    source_levels.len(),
                    target_levels.len()
                ),
            ));
        }
        for (from, to) in heading_skips(&target_levels) {
            let message = format!("heading level jumps from h{} to h{}", from, to);
            // A skip copied faithfully from the source is not the translator's fault.
            if source_levels == target_levels {
                issues.push(Issue::warning(self.name(), message));
            } else {
                issues.push(Issue::error(self.name(), message));
            }
        }

        let source_defects = table_defects(source).len();
        let target_defects = table_defects(translated);
        for defect in &target_defects {
            let message = format!(
                "table row at line {} has {} cells, header has {}",
                defect.line, defect.found, defect.expected
            );
            if target_defects.len() > source_defects {
                issues.push(Issue::error(self.name(), message));
            } else {
                issues.push(Issue::warning(self.name(), message));
            }
        }

        issues
    }
}

/// Every fenced block and inline code span of the source must survive byte for byte.
pub struct CodeBlockValidator;

fn missing_from(expected: Vec<String>, actual: Vec<String>) -> Vec<String> {
    let mut available: HashMap<String, usize> = HashMap::new();
    for item in actual {
        *available.entry(item).or_default() += 1;
    }
    expected
        .into_iter()
        .filter(|item| match available.get_mut(item) {
            Some(n) if *n > 0 => {
                *n -= 1;
                false
            }
            _ => true,
        })
        .collect()
}

fn preview(text: &str) -> String {
    let first = text.lines().next().unwrap_or_default();
    let mut short: String = first.chars().take(60).collect();
    if first.chars().count() > 60 || text.lines().count() > 1 {
        short.push_str("...");
    }
    short
}

impl Validator for CodeBlockValidator {
    fn name(&self) -> &'static str {
        "code_blocks"
    }

    fn check(&self, translated: &str, source: &str) -> Vec<Issue> {
        let mut issues = Vec::new();

        let source_blocks = fenced_blocks(source);
        let total_blocks = source_blocks.len();
        let missing_blocks = missing_from(source_blocks, fenced_blocks(translated));
        for block in &missing_blocks {
            issues.push(Issue::error(
                self.name(),
                format!("code block altered or missing: {}", preview(block)),
            ));
        }
        if !missing_blocks.is_empty() {
            issues.push(Issue::error(
                self.name(),
                format!(
                    "{} of {} code blocks not preserved",
                    missing_blocks.len(),
                    total_blocks
                ),
            ));
        }

        for span in missing_from(inline_code_spans(source), inline_code_spans(translated)) {
            // Fall back to a raw search in case the span moved into another construct.
            if translated.contains(&span) {
                continue;
            }
            issues.push(Issue::error(
                self.name(),
                format!("inline code altered or missing: {}", span),
            ));
        }

        issues
    }
}

/// Link destinations and URLs must be carried over unchanged.
pub struct LinkValidator;

impl Validator for LinkValidator {
    fn name(&self) -> &'static str {
        "link_integrity"
    }

    fn check(&self, translated: &str, source: &str) -> Vec<Issue> {
        let target_links = link_targets(translated);
        link_targets(source)
            .into_iter()
            .filter(|link| !target_links.contains(link))
            .map(|link| {
                if translated.contains(&link) {
                    Issue::warning(
                        self.name(),
                        format!("link target present but no longer a link: {}", link),
                    )
                } else {
                    Issue::error(self.name(), format!("link target missing: {}", link))
                }
            })
            .collect()
    }
}

fn term_regex(term: &str) -> Option<Regex> {
    Regex::new(&format!(
        r"(?:^|[^A-Za-z0-9_]){}(?:$|[^A-Za-z0-9_])",
        regex::escape(term)
    ))
    .ok()
}

/// Preserve terms in the source must appear verbatim in the target.
pub struct TerminologyValidator {
    terms: Vec<(String, Regex)>,
    custom_translations: BTreeMap<String, String>,
}

impl TerminologyValidator {
    pub fn new(terms: Vec<String>, custom_translations: BTreeMap<String, String>) -> Self {
        let terms = terms
            .into_iter()
            .filter_map(|t| term_regex(&t).map(|re| (t, re)))
            .collect();
        Self {
            terms,
            custom_translations,
        }
    }
}

impl Validator for TerminologyValidator {
    fn name(&self) -> &'static str {
        "terminology"
    }

    fn check(&self, translated: &str, source: &str) -> Vec<Issue> {
        let mut issues: Vec<Issue> = self
            .terms
            .iter()
            .filter(|(term, re)| re.is_match(source) && !translated.contains(term.as_str()))
            .map(|(term, _)| {
                Issue::error(self.name(), format!("preserve term not kept verbatim: {}", term))
            })
            .collect();

        for (term, rendering) in &self.custom_translations {
            let in_source = term_regex(term).is_some_and(|re| re.is_match(source));
            if in_source && !translated.contains(rendering.as_str()) && !translated.contains(term.as_str()) {
                issues.push(Issue::warning(
                    self.name(),
                    format!("'{}' not rendered as '{}'", term, rendering),
                ));
            }
        }
        issues
    }
}

/// Catches outputs that came back in English.
pub struct UntranslatedValidator {
    preserve_terms: Vec<String>,
}

impl UntranslatedValidator {
    pub fn new(preserve_terms: Vec<String>) -> Self {
        Self { preserve_terms }
    }

    fn has_prose(&self, source: &str) -> bool {
        let mut prose = translatable_text(source);
        for term in &self.preserve_terms {
            prose = prose.replace(term.as_str(), " ");
        }
        prose
            .split(|c: char| !c.is_ascii_alphabetic())
            .any(|word| word.len() >= 2)
    }
}

impl Validator for UntranslatedValidator {
    fn name(&self) -> &'static str {
        "untranslated"
    }

    fn check(&self, translated: &str, source: &str) -> Vec<Issue> {
        if self.has_prose(source) && count_cjk(translated) == 0 && !translated.trim().is_empty() {
            vec![Issue::error(
                self.name(),
                "translation contains no target-language text",
            )]
        } else {
            Vec::new()
        }
    }
}
