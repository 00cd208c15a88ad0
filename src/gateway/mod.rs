pub mod openai;
pub mod prompt;

pub use openai::AiGateway;
pub use prompt::PromptTemplate;

use crate::error::{DocError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Path-derived hint selecting an extra instruction in the prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextTag {
    ApiDocumentation,
    ArchitectureDocumentation,
    UserGuide,
    DevelopmentGuide,
    ConfigurationGuide,
    TroubleshootingGuide,
}

impl ContextTag {
    pub const ALL: [ContextTag; 6] = [
        ContextTag::ApiDocumentation,
        ContextTag::ArchitectureDocumentation,
        ContextTag::UserGuide,
        ContextTag::DevelopmentGuide,
        ContextTag::ConfigurationGuide,
        ContextTag::TroubleshootingGuide,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContextTag::ApiDocumentation => "api_documentation",
            ContextTag::ArchitectureDocumentation => "architecture_documentation",
            ContextTag::UserGuide => "user_guide",
            ContextTag::DevelopmentGuide => "development_guide",
            ContextTag::ConfigurationGuide => "configuration_guide",
            ContextTag::TroubleshootingGuide => "troubleshooting_guide",
        }
    }

    /// Guess the document kind from directory and file names.
    pub fn detect(path: &Path) -> Option<Self> {
        let lowered = path.to_string_lossy().replace('\\', "/").to_lowercase();
        let rules: [(&[&str], ContextTag); 6] = [
            (&["api/", "/api", "api-", "api_"], ContextTag::ApiDocumentation),
            (&["architecture", "design/", "adr"], ContextTag::ArchitectureDocumentation),
            (&["troubleshoot", "faq"], ContextTag::TroubleshootingGuide),
            (&["config", "setup", "install"], ContextTag::ConfigurationGuide),
            (&["develop", "contributing", "dev/"], ContextTag::DevelopmentGuide),
            (&["guide", "user", "tutorial", "getting-started"], ContextTag::UserGuide),
        ];
        rules
            .iter()
            .find(|(needles, _)| needles.iter().any(|n| lowered.contains(n)))
            .map(|(_, tag)| *tag)
    }
}

impl std::fmt::Display for ContextTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ContextTag {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        ContextTag::ALL
            .iter()
            .find(|t| t.as_str() == s)
            .copied()
            .ok_or_else(|| format!("Unknown context tag: {}", s))
    }
}

/// Opaque text-in, text-out translation backend. Implementations must be safe
/// to call concurrently from many workers.
#[async_trait]
pub trait Translator: Send + Sync {
    /// Translate English Markdown into the target language.
    async fn translate(&self, content: &str, context: Option<ContextTag>) -> Result<String>;

    /// Translate target-language Markdown back into English.
    async fn translate_reverse(&self, _content: &str) -> Result<String> {
        Err(DocError::Config(format!(
            "{} does not support reverse translation",
            self.name()
        )))
    }

    fn supports_reverse(&self) -> bool {
        false
    }

    fn name(&self) -> &'static str;
}
