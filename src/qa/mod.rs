//! Post-translation quality checks.
//!
//! The pipeline is a fold over a list of [`Validator`]s; each one inspects the
//! translated text against its source and reports [`Issue`]s. A report passes when
//! no issue has [`Severity::Error`].

pub mod audit;
pub mod markdown;
pub mod validators;

pub use audit::{audit_directory, ConsistencyReport, TermConflict};

use crate::config::Config;
use serde::Serialize;
use validators::{
    CodeBlockValidator, EmptinessValidator, LinkValidator, StructureValidator,
    TerminologyValidator, UntranslatedValidator,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, Serialize)]
pub struct Issue {
    pub validator: &'static str,
    pub severity: Severity,
    pub message: String,
}

impl Issue {
    pub fn error(validator: &'static str, message: impl Into<String>) -> Self {
        Self {
            validator,
            severity: Severity::Error,
            message: message.into(),
        }
    }

    pub fn warning(validator: &'static str, message: impl Into<String>) -> Self {
        Self {
            validator,
            severity: Severity::Warning,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Issue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let level = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(f, "[{}] {}: {}", level, self.validator, self.message)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub issues: Vec<Issue>,
}

impl ValidationReport {
    pub fn passed(&self) -> bool {
        self.errors().next().is_none()
    }

    pub fn errors(&self) -> impl Iterator<Item = &Issue> {
        self.issues.iter().filter(|i| i.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Issue> {
        self.issues.iter().filter(|i| i.severity == Severity::Warning)
    }

    /// First error, or a count, for one-line failure messages.
    pub fn summary(&self) -> String {
        let errors: Vec<&Issue> = self.errors().collect();
        match errors.as_slice() {
            [] => "passed".to_string(),
            [only] => format!("{}: {}", only.validator, only.message),
            [first, rest @ ..] => format!(
                "{}: {} (and {} more)",
                first.validator,
                first.message,
                rest.len()
            ),
        }
    }
}

pub trait Validator: Send + Sync {
    fn name(&self) -> &'static str;
    fn check(&self, translated: &str, source: &str) -> Vec<Issue>;
}

pub struct QualityChecker {
    validators: Vec<Box<dyn Validator>>,
    auto_fix: bool,
}

impl QualityChecker {
    pub fn new(validators: Vec<Box<dyn Validator>>) -> Self {
        Self {
            validators,
            auto_fix: false,
        }
    }

    /// Validators enabled by the `quality` and `terminology` settings.
    pub fn from_config(config: &Config) -> Self {
        let mut validators: Vec<Box<dyn Validator>> = vec![Box::new(EmptinessValidator)];
        if config.quality.validate_structure {
            validators.push(Box::new(StructureValidator));
        }
        if config.quality.verify_code_blocks {
            validators.push(Box::new(CodeBlockValidator));
        }
        if config.quality.check_link_integrity {
            validators.push(Box::new(LinkValidator));
        }
        validators.push(Box::new(TerminologyValidator::new(
            config.terminology.preserve_terms.clone(),
            config.terminology.custom_translations.clone(),
        )));
        validators.push(Box::new(UntranslatedValidator::new(
            config.terminology.preserve_terms.clone(),
        )));

        Self {
            validators,
            auto_fix: config.quality.auto_fix,
        }
    }

    pub fn with_validator(mut self, validator: Box<dyn Validator>) -> Self {
        self.validators.push(validator);
        self
    }

    pub fn auto_fix_enabled(&self) -> bool {
        self.auto_fix
    }

    pub fn validator_names(&self) -> Vec<&'static str> {
        self.validators.iter().map(|v| v.name()).collect()
    }

    pub fn validate(&self, translated: &str, source: &str) -> ValidationReport {
        let issues = self
            .validators
            .iter()
            .fold(Vec::new(), |mut acc, validator| {
                acc.extend(validator.check(translated, source));
                acc
            });
        ValidationReport { issues }
    }

    /// Repair cosmetic damage the model commonly introduces. No-op unless enabled.
    pub fn apply_auto_fix(&self, translated: &str, source: &str) -> String {
        if !self.auto_fix {
            return translated.to_string();
        }
        let mut fixed = unwrap_markdown_fence(translated, source);
        if source.ends_with('\n') && !fixed.ends_with('\n') {
            fixed.push('\n');
        } else if !source.ends_with('\n') {
            let trimmed_len = fixed.trim_end_matches('\n').len();
            fixed.truncate(trimmed_len);
        }
        fixed
    }
}

/// Strip a ```markdown ... ``` wrapper around the whole answer.
fn unwrap_markdown_fence(translated: &str, source: &str) -> String {
    let trimmed = translated.trim();
    if source.trim_start().starts_with("```") {
        return translated.to_string();
    }
    let Some(first_newline) = trimmed.find('\n') else {
        return translated.to_string();
    };
    let opener = trimmed[..first_newline].trim();
    let is_wrapper = matches!(opener, "```" | "```markdown" | "```md");
    if is_wrapper && trimmed.ends_with("```") && trimmed.len() > first_newline + 3 {
        let inner = &trimmed[first_newline + 1..trimmed.len() - 3];
        return inner.trim_end().to_string();
    }
    translated.to_string()
}
