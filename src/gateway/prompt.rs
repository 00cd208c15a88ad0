use super::ContextTag;
use crate::config::Config;
use std::collections::BTreeMap;

/// Fills the configured templates. Both templates carry the preservation clauses
/// and the `{preserve_terms}` and `{content}` fields.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    template: String,
    reverse_template: String,
    context_prompts: BTreeMap<String, String>,
    preserve_terms: Vec<String>,
    source_language: String,
    target_language: String,
}

impl PromptTemplate {
    pub fn from_config(config: &Config) -> Self {
        let mut preserve_terms = config.terminology.preserve_terms.clone();
        for term in &config.terminology.domain_terms {
            if !preserve_terms.contains(term)
                && !config.terminology.custom_translations.contains_key(term)
            {
                preserve_terms.push(term.clone());
            }
        }

        Self {
            template: config.integration.prompt_template.clone(),
            reverse_template: config.integration.reverse_prompt_template.clone(),
            context_prompts: config.integration.context_prompts.clone(),
            preserve_terms,
            source_language: config.translation.source_language.clone(),
            target_language: config.translation.target_language.clone(),
        }
    }

    pub fn preserve_terms(&self) -> &[String] {
        &self.preserve_terms
    }

    pub fn render(&self, content: &str, context: Option<ContextTag>) -> String {
        let context_line = context
            .and_then(|tag| self.context_prompts.get(tag.as_str()))
            .cloned()
            .unwrap_or_default();
        self.fill(&self.template, content, &context_line)
    }

    pub fn render_reverse(&self, content: &str) -> String {
        self.fill(&self.reverse_template, content, "")
    }

    fn fill(&self, template: &str, content: &str, context_line: &str) -> String {
        // Content goes in last so braces inside the document are never expanded.
        template
            .replace("{source_language}", &self.source_language)
            .replace("{target_language}", &self.target_language)
            .replace("{context}", context_line)
            .replace("{preserve_terms}", &self.preserve_terms.join(", "))
            .replace("{content}", content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_includes_terms_and_content() {
        let prompt = PromptTemplate::from_config(&Config::default());
        let out = prompt.render("# Hello", None);
        assert!(out.contains("Kubernetes"));
        assert!(out.contains("Spring Boot"));
        assert!(out.ends_with("# Hello"));
        assert!(out.contains("Preserve all Markdown syntax"));
        assert!(out.contains("zh-TW"));
    }

    #[test]
    fn test_render_with_context() {
        let prompt = PromptTemplate::from_config(&Config::default());
        let out = prompt.render("body", Some(ContextTag::ApiDocumentation));
        assert!(out.contains("This is API documentation"));
        let plain = prompt.render("body", None);
        assert!(!plain.contains("This is API documentation"));
    }

    #[test]
    fn test_content_braces_not_expanded() {
        let prompt = PromptTemplate::from_config(&Config::default());
        let out = prompt.render("literal {preserve_terms} in docs", None);
        assert!(out.ends_with("literal {preserve_terms} in docs"));
    }

    #[test]
    fn test_reverse_prompt() {
        let prompt = PromptTemplate::from_config(&Config::default());
        let out = prompt.render_reverse("# 標題");
        assert!(out.contains("to English"));
        assert!(out.ends_with("# 標題"));
    }

    #[test]
    fn test_domain_terms_without_translation_are_preserved() {
        let prompt = PromptTemplate::from_config(&Config::default());
        assert!(prompt.preserve_terms().contains(&"Repository".to_string()));
        assert!(!prompt
            .preserve_terms()
            .contains(&"Bounded Context".to_string()));
    }
}
