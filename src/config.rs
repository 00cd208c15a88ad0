use crate::error::{DocError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn, Level};

/// Environment variable selecting a preset.
pub const ENV_VAR: &str = "TRANSLATION_ENV";

/// Upper bound for `performance.retry_attempts`.
pub const MAX_RETRY_ATTEMPTS: u32 = 10;

/// Project-local configuration file looked up when `--config` is not given.
pub const LOCAL_CONFIG_FILE: &str = ".translation/config.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Staging,
    Production,
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Staging => write!(f, "staging"),
            Environment::Production => write!(f, "production"),
        }
    }
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "staging" => Ok(Environment::Staging),
            "production" | "prod" => Ok(Environment::Production),
            _ => Err(format!(
                "Unknown environment: {}. Use 'development', 'staging', or 'production'",
                s
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslationSettings {
    pub source_language: String,
    pub target_language: String,
    /// Language tag inserted before `.md` in target file names.
    pub target_suffix: String,
}

impl Default for TranslationSettings {
    fn default() -> Self {
        Self {
            source_language: "en".to_string(),
            target_language: "zh-TW".to_string(),
            target_suffix: "zh-TW".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilePatterns {
    pub include_patterns: Vec<String>,
    pub exclude_patterns: Vec<String>,
    pub watch_patterns: Vec<String>,
    pub backup_exclude_patterns: Vec<String>,
}

impl Default for FilePatterns {
    fn default() -> Self {
        Self {
            include_patterns: vec!["**/*.md".to_string()],
            exclude_patterns: [
                "**/node_modules/**",
                "**/.git/**",
                "**/target/**",
                "**/build/**",
                "**/dist/**",
                "**/.backup/**",
                "**/.translation/**",
                "**/.migration_backups/**",
                "**/tmp/**",
                "**/.tmp/**",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            watch_patterns: vec!["**/*.md".to_string()],
            backup_exclude_patterns: vec![
                "**/.git/**".to_string(),
                "**/node_modules/**".to_string(),
                "**/target/**".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Terminology {
    /// Terms that must appear verbatim in both source and target.
    pub preserve_terms: Vec<String>,
    /// Domain vocabulary whose rendering is audited for consistency.
    pub domain_terms: Vec<String>,
    /// Preferred renderings, English term to target-language term.
    pub custom_translations: BTreeMap<String, String>,
    pub consistency_check: bool,
}

impl Default for Terminology {
    fn default() -> Self {
        let preserve_terms = [
            "API", "DDD", "GitHub", "Docker", "Kubernetes", "Spring Boot", "JPA", "Hibernate",
            "PostgreSQL", "Redis", "AWS", "CDK", "Lambda", "S3", "RDS", "EKS", "VPC", "MSK",
            "Kafka", "CloudWatch", "IAM", "REST", "JSON", "YAML", "HTTP", "HTTPS", "URL",
            "SQL", "JWT", "OAuth", "Gradle", "Maven", "Java", "Git", "CI/CD",
        ];
        let domain_terms = [
            "Aggregate Root",
            "Bounded Context",
            "Domain Event",
            "Value Object",
            "Repository",
            "Entity",
        ];
        let custom_translations = [
            ("Aggregate Root", "聚合根"),
            ("Bounded Context", "限界上下文"),
            ("Domain Event", "領域事件"),
            ("Value Object", "值物件"),
        ];

        Self {
            preserve_terms: preserve_terms.iter().map(|s| s.to_string()).collect(),
            domain_terms: domain_terms.iter().map(|s| s.to_string()).collect(),
            custom_translations: custom_translations
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            consistency_check: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileManagement {
    pub backup_enabled: bool,
    /// Name of the per-directory backup folder.
    pub backup_directory: String,
    pub atomic_writes: bool,
    /// Backups kept per logical source.
    pub retention_count: usize,
}

impl Default for FileManagement {
    fn default() -> Self {
        Self {
            backup_enabled: true,
            backup_directory: ".backup".to_string(),
            atomic_writes: true,
            retention_count: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherSettings {
    pub enabled: bool,
    /// Seconds.
    pub debounce_delay: f64,
    pub recursive: bool,
    pub queue_size: usize,
    pub processing_threads: usize,
    pub watch_paths: Vec<PathBuf>,
    /// Seconds to wait for in-flight batches on shutdown.
    pub grace_period: u64,
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            debounce_delay: 2.0,
            recursive: true,
            queue_size: 100,
            processing_threads: 3,
            watch_paths: vec![PathBuf::from(".")],
            grace_period: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualitySettings {
    pub validate_structure: bool,
    pub check_link_integrity: bool,
    pub verify_code_blocks: bool,
    pub auto_fix: bool,
}

impl Default for QualitySettings {
    fn default() -> Self {
        Self {
            validate_structure: true,
            check_link_integrity: true,
            verify_code_blocks: true,
            auto_fix: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceSettings {
    pub max_concurrent_translations: usize,
    /// Seconds per gateway call.
    pub translation_timeout: u64,
    pub retry_attempts: u32,
    /// Base backoff delay in seconds.
    pub retry_delay: f64,
}

impl Default for PerformanceSettings {
    fn default() -> Self {
        Self {
            max_concurrent_translations: 3,
            translation_timeout: 300,
            retry_attempts: 3,
            retry_delay: 1.0,
        }
    }
}

pub const DEFAULT_PROMPT_TEMPLATE: &str = r#"Translate the following Markdown document from {source_language} to {target_language} (Traditional Chinese).
{context}
Requirements:
1. Preserve all Markdown syntax exactly: headings, lists, tables, links and code fences.
2. Do not translate anything inside fenced code blocks or inline code; copy it verbatim.
3. Preserve HTML tags as they are.
4. Preserve every URL and file path unchanged.
5. Keep these technical terms verbatim, untranslated: {preserve_terms}
6. Return ONLY the translated document, with no commentary.

Document:
{content}"#;

pub const DEFAULT_REVERSE_PROMPT_TEMPLATE: &str = r#"Translate the following Markdown document from Traditional Chinese to English.
Requirements:
1. Preserve all Markdown syntax exactly: headings, lists, tables, links and code fences.
2. Do not translate anything inside fenced code blocks or inline code; copy it verbatim.
3. Preserve HTML tags, URLs and file paths unchanged.
4. Keep these technical terms verbatim: {preserve_terms}
5. Return ONLY the translated document, with no commentary.

Document:
{content}"#;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegrationSettings {
    /// Base URL of an OpenAI-compatible chat completions API.
    pub endpoint: String,
    pub model: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    pub prompt_template: String,
    pub reverse_prompt_template: String,
    pub context_prompts: BTreeMap<String, String>,
    /// Pick a context prompt from the document path.
    pub context_aware: bool,
    pub max_prompt_length: usize,
    pub temperature: f64,
}

impl Default for IntegrationSettings {
    fn default() -> Self {
        let context_prompts = [
            (
                "api_documentation",
                "This is API documentation: keep endpoint names, parameters and response fields exact.",
            ),
            (
                "architecture_documentation",
                "This is architecture documentation: use precise software architecture vocabulary.",
            ),
            (
                "user_guide",
                "This is a user guide: prefer clear, friendly wording for end users.",
            ),
            (
                "development_guide",
                "This is a development guide: keep commands and tool names exact.",
            ),
            (
                "configuration_guide",
                "This is a configuration guide: never alter keys, values or file names.",
            ),
            (
                "troubleshooting_guide",
                "This is a troubleshooting guide: keep error messages and log lines verbatim.",
            ),
        ];

        Self {
            endpoint: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "TRANSLATION_API_KEY".to_string(),
            prompt_template: DEFAULT_PROMPT_TEMPLATE.to_string(),
            reverse_prompt_template: DEFAULT_REVERSE_PROMPT_TEMPLATE.to_string(),
            context_prompts: context_prompts
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            context_aware: true,
            max_prompt_length: 4000,
            temperature: 0.3,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralSettings {
    /// Preset in effect; `None` when `TRANSLATION_ENV` is unset.
    pub environment: Option<Environment>,
    pub debug_mode: bool,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsSettings {
    pub enabled: bool,
    /// The one canonical metrics database path.
    pub database_path: PathBuf,
    pub log_path: PathBuf,
    pub job_directory: PathBuf,
    pub retention_hours: u64,
    pub progress_interval_ms: u64,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            database_path: PathBuf::from(".translation/metrics.db"),
            log_path: PathBuf::from(".translation/translation_log.json"),
            job_directory: PathBuf::from(".translation/jobs"),
            retention_hours: 24,
            progress_interval_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationSettings {
    pub backup_root: PathBuf,
    pub rollback_threshold: f64,
    pub auto_rollback_on_failure: bool,
    pub min_free_space_mb: u64,
}

impl Default for MigrationSettings {
    fn default() -> Self {
        Self {
            backup_root: PathBuf::from(".migration_backups"),
            rollback_threshold: 0.1,
            auto_rollback_on_failure: true,
            min_free_space_mb: 100,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub translation: TranslationSettings,
    pub file_patterns: FilePatterns,
    pub terminology: Terminology,
    pub file_management: FileManagement,
    pub watcher: WatcherSettings,
    pub quality: QualitySettings,
    pub performance: PerformanceSettings,
    pub integration: IntegrationSettings,
    pub general: GeneralSettings,
    pub metrics: MetricsSettings,
    pub migration: MigrationSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionKind {
    Bool,
    Integer,
    Float,
    Text,
    List,
    Map,
}

/// A settable `section.key` with the type its raw text is parsed as.
#[derive(Debug, Clone, Copy)]
pub struct OptionDescriptor {
    pub key: &'static str,
    pub kind: OptionKind,
}

const fn opt(key: &'static str, kind: OptionKind) -> OptionDescriptor {
    OptionDescriptor { key, kind }
}

pub const OPTIONS: &[OptionDescriptor] = &[
    opt("translation.source_language", OptionKind::Text),
    opt("translation.target_language", OptionKind::Text),
    opt("translation.target_suffix", OptionKind::Text),
    opt("file_patterns.include_patterns", OptionKind::List),
    opt("file_patterns.exclude_patterns", OptionKind::List),
    opt("file_patterns.watch_patterns", OptionKind::List),
    opt("file_patterns.backup_exclude_patterns", OptionKind::List),
    opt("terminology.preserve_terms", OptionKind::List),
    opt("terminology.domain_terms", OptionKind::List),
    opt("terminology.custom_translations", OptionKind::Map),
    opt("terminology.consistency_check", OptionKind::Bool),
    opt("file_management.backup_enabled", OptionKind::Bool),
    opt("file_management.backup_directory", OptionKind::Text),
    opt("file_management.atomic_writes", OptionKind::Bool),
    opt("file_management.retention_count", OptionKind::Integer),
    opt("watcher.enabled", OptionKind::Bool),
    opt("watcher.debounce_delay", OptionKind::Float),
    opt("watcher.recursive", OptionKind::Bool),
    opt("watcher.queue_size", OptionKind::Integer),
    opt("watcher.processing_threads", OptionKind::Integer),
    opt("watcher.watch_paths", OptionKind::List),
    opt("watcher.grace_period", OptionKind::Integer),
    opt("quality.validate_structure", OptionKind::Bool),
    opt("quality.check_link_integrity", OptionKind::Bool),
    opt("quality.verify_code_blocks", OptionKind::Bool),
    opt("quality.auto_fix", OptionKind::Bool),
    opt("performance.max_concurrent_translations", OptionKind::Integer),
    opt("performance.translation_timeout", OptionKind::Integer),
    opt("performance.retry_attempts", OptionKind::Integer),
    opt("performance.retry_delay", OptionKind::Float),
    opt("integration.endpoint", OptionKind::Text),
    opt("integration.model", OptionKind::Text),
    opt("integration.api_key_env", OptionKind::Text),
    opt("integration.prompt_template", OptionKind::Text),
    opt("integration.reverse_prompt_template", OptionKind::Text),
    opt("integration.context_prompts", OptionKind::Map),
    opt("integration.context_aware", OptionKind::Bool),
    opt("integration.max_prompt_length", OptionKind::Integer),
    opt("integration.temperature", OptionKind::Float),
    opt("general.environment", OptionKind::Text),
    opt("general.debug_mode", OptionKind::Bool),
    opt("general.dry_run", OptionKind::Bool),
    opt("metrics.enabled", OptionKind::Bool),
    opt("metrics.database_path", OptionKind::Text),
    opt("metrics.log_path", OptionKind::Text),
    opt("metrics.job_directory", OptionKind::Text),
    opt("metrics.retention_hours", OptionKind::Integer),
    opt("metrics.progress_interval_ms", OptionKind::Integer),
    opt("migration.backup_root", OptionKind::Text),
    opt("migration.rollback_threshold", OptionKind::Float),
    opt("migration.auto_rollback_on_failure", OptionKind::Bool),
    opt("migration.min_free_space_mb", OptionKind::Integer),
];

pub fn find_option(key: &str) -> Option<&'static OptionDescriptor> {
    OPTIONS.iter().find(|o| o.key == key)
}

impl Config {
    /// Build the layered configuration: defaults, environment preset, then file.
    ///
    /// Command-line overrides are applied afterwards by the caller through
    /// [`Config::set_option`] and the dedicated setters.
    pub fn load(explicit_file: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();

        if let Ok(env) = std::env::var(ENV_VAR) {
            let env: Environment = env.parse().map_err(DocError::Config)?;
            config.apply_preset(env);
        }

        let file = match explicit_file {
            Some(path) => {
                if !path.exists() {
                    return Err(DocError::Config(format!(
                        "Configuration file not found: {}",
                        path.display()
                    )));
                }
                Some(path.to_path_buf())
            }
            None => Self::discover_file(),
        };

        if let Some(path) = file {
            debug!("Loading configuration from {:?}", path);
            config = config.merge_file(&path)?;
        }

        Ok(config)
    }

    /// Adjust logging, parallelism and auto-fix for an environment.
    pub fn apply_preset(&mut self, env: Environment) {
        self.general.environment = Some(env);
        match env {
            Environment::Development => {
                self.general.debug_mode = true;
                self.performance.max_concurrent_translations = 2;
                self.quality.auto_fix = true;
            }
            Environment::Staging => {
                self.general.debug_mode = false;
                self.performance.max_concurrent_translations = 3;
                self.quality.auto_fix = true;
            }
            Environment::Production => {
                self.general.debug_mode = false;
                self.performance.max_concurrent_translations = 5;
                self.quality.auto_fix = false;
            }
        }
    }

    /// Overlay a JSON (or TOML) file on top of the current values.
    pub fn merge_file(self, path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| DocError::io(path, e))?;
        let overlay: Value = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => {
                let parsed: toml::Value = toml::from_str(&contents).map_err(|e| {
                    DocError::Config(format!("{}: {}", path.display(), e))
                })?;
                serde_json::to_value(parsed)?
            }
            _ => serde_json::from_str(&contents)
                .map_err(|e| DocError::Config(format!("{}: {}", path.display(), e)))?,
        };

        let mut base = serde_json::to_value(&self)?;
        check_known_keys(&base, &overlay, "")?;
        merge_values(&mut base, overlay);
        serde_json::from_value(base)
            .map_err(|e| DocError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Set one `section.key` option from its textual form.
    pub fn set_option(&mut self, key: &str, raw: &str) -> Result<()> {
        let descriptor = find_option(key)
            .ok_or_else(|| DocError::Config(format!("Unknown configuration option: {}", key)))?;
        let parsed = parse_raw(descriptor, raw)?;
        let (section, field) = split_key(key)?;

        let mut value = serde_json::to_value(&*self)?;
        let slot = value
            .get_mut(section)
            .and_then(|s| s.get_mut(field))
            .ok_or_else(|| DocError::Config(format!("Unknown configuration option: {}", key)))?;
        *slot = parsed;

        *self = serde_json::from_value(value)
            .map_err(|e| DocError::Config(format!("Invalid value for {}: {}", key, e)))?;
        Ok(())
    }

    /// Read one option back as JSON.
    pub fn get_option(&self, key: &str) -> Result<Value> {
        find_option(key)
            .ok_or_else(|| DocError::Config(format!("Unknown configuration option: {}", key)))?;
        let (section, field) = split_key(key)?;
        let value = serde_json::to_value(self)?;
        value
            .get(section)
            .and_then(|s| s.get(field))
            .cloned()
            .ok_or_else(|| DocError::Config(format!("Unknown configuration option: {}", key)))
    }

    /// Validate the assembled configuration. Returns warnings; errors are fatal.
    pub fn validate(&self) -> Result<Vec<String>> {
        let mut warnings = Vec::new();

        if self.translation.source_language.trim().is_empty() {
            return Err(DocError::Config("source_language is not set".to_string()));
        }
        if self.translation.target_language.trim().is_empty() {
            return Err(DocError::Config("target_language is not set".to_string()));
        }
        if self.translation.target_suffix.trim().is_empty() {
            return Err(DocError::Config("target_suffix is not set".to_string()));
        }
        if self.performance.max_concurrent_translations == 0 {
            return Err(DocError::Config(
                "max_concurrent_translations must be greater than 0".to_string(),
            ));
        }
        if self.watcher.processing_threads == 0 {
            return Err(DocError::Config(
                "watcher.processing_threads must be greater than 0".to_string(),
            ));
        }
        if self.watcher.queue_size == 0 {
            return Err(DocError::Config(
                "watcher.queue_size must be greater than 0".to_string(),
            ));
        }
        if self.integration.max_prompt_length == 0 {
            return Err(DocError::Config(
                "max_prompt_length must be greater than 0".to_string(),
            ));
        }
        for template in [
            &self.integration.prompt_template,
            &self.integration.reverse_prompt_template,
        ] {
            if !template.contains("{content}") || !template.contains("{preserve_terms}") {
                return Err(DocError::Config(
                    "prompt templates must contain {content} and {preserve_terms}".to_string(),
                ));
            }
        }
        if !(1..=MAX_RETRY_ATTEMPTS).contains(&self.performance.retry_attempts) {
            return Err(DocError::Config(format!(
                "performance.retry_attempts must be between 1 and {}",
                MAX_RETRY_ATTEMPTS
            )));
        }
        if !(0.0..=1.0).contains(&self.migration.rollback_threshold) {
            return Err(DocError::Config(
                "migration.rollback_threshold must be between 0 and 1".to_string(),
            ));
        }
        if self.include_patterns().is_empty() {
            return Err(DocError::Config("include_patterns is empty".to_string()));
        }

        if self.performance.translation_timeout < 10 {
            warnings.push(format!(
                "translation_timeout of {}s is below 10s; requests may time out",
                self.performance.translation_timeout
            ));
        }
        if !(0.0..=2.0).contains(&self.integration.temperature) {
            warnings.push(format!(
                "temperature {} is outside the usual 0.0-2.0 range",
                self.integration.temperature
            ));
        }

        for w in &warnings {
            warn!("{}", w);
        }
        Ok(warnings)
    }

    /// Log level used when neither `--verbose` nor `--quiet` is given.
    pub fn default_log_level(&self) -> Level {
        if self.general.debug_mode {
            return Level::DEBUG;
        }
        match self.general.environment {
            None | Some(Environment::Staging) => Level::INFO,
            Some(Environment::Development) => Level::DEBUG,
            Some(Environment::Production) => Level::WARN,
        }
    }

    pub fn include_patterns(&self) -> &[String] {
        &self.file_patterns.include_patterns
    }

    /// The glob every target file matches, e.g. `**/*.zh-TW.md`.
    pub fn target_glob(&self) -> String {
        format!("**/*.{}.md", self.translation.target_suffix)
    }

    pub fn debounce_delay(&self) -> Duration {
        Duration::from_secs_f64(self.watcher.debounce_delay.max(0.0))
    }

    pub fn translation_timeout(&self) -> Duration {
        Duration::from_secs(self.performance.translation_timeout)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs_f64(self.performance.retry_delay.max(0.0))
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.watcher.grace_period)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.metrics.progress_interval_ms)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.metrics.retention_hours * 3600)
    }

    fn discover_file() -> Option<PathBuf> {
        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.exists() {
            return Some(local);
        }
        dirs::config_dir()
            .map(|p| p.join("doctrans").join("config.json"))
            .filter(|p| p.exists())
    }
}

fn split_key(key: &str) -> Result<(&str, &str)> {
    key.split_once('.')
        .ok_or_else(|| DocError::Config(format!("Option must be section.key: {}", key)))
}

fn parse_raw(descriptor: &OptionDescriptor, raw: &str) -> Result<Value> {
    let bad = |expected: &str| {
        DocError::Config(format!(
            "Invalid value for {}: expected {}, got '{}'",
            descriptor.key, expected, raw
        ))
    };

    let value = match descriptor.kind {
        OptionKind::Bool => match raw.trim().to_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Value::Bool(true),
            "false" | "no" | "off" | "0" => Value::Bool(false),
            _ => return Err(bad("a boolean")),
        },
        OptionKind::Integer => {
            let n: u64 = raw.trim().parse().map_err(|_| bad("a non-negative integer"))?;
            Value::from(n)
        }
        OptionKind::Float => {
            let n: f64 = raw.trim().parse().map_err(|_| bad("a number"))?;
            Value::from(n)
        }
        OptionKind::Text => Value::String(raw.to_string()),
        OptionKind::List => Value::Array(
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| Value::String(s.to_string()))
                .collect(),
        ),
        OptionKind::Map => {
            let mut map = serde_json::Map::new();
            for pair in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                let (k, v) = pair.split_once('=').ok_or_else(|| bad("key=value pairs"))?;
                map.insert(k.trim().to_string(), Value::String(v.trim().to_string()));
            }
            Value::Object(map)
        }
    };
    Ok(value)
}

/// Unknown sections or keys in a file are an error, not silently ignored.
fn check_known_keys(base: &Value, overlay: &Value, prefix: &str) -> Result<()> {
    let (Value::Object(base), Value::Object(overlay)) = (base, overlay) else {
        return Ok(());
    };
    for (key, value) in overlay {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };
        match base.get(key) {
            None => {
                return Err(DocError::Config(format!(
                    "Unknown configuration option: {}",
                    path
                )))
            }
            // Map-valued options accept arbitrary keys.
            Some(inner) if prefix.is_empty() => check_known_keys(inner, value, &path)?,
            Some(_) => {}
        }
    }
    Ok(())
}

fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(slot) if slot.is_object() && value.is_object() => {
                        merge_values(slot, value)
                    }
                    _ => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_parsing() {
        assert_eq!(
            "development".parse::<Environment>().unwrap(),
            Environment::Development
        );
        assert_eq!("PROD".parse::<Environment>().unwrap(), Environment::Production);
        assert!("qa".parse::<Environment>().is_err());
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.performance.max_concurrent_translations, 3);
        assert_eq!(config.integration.max_prompt_length, 4000);
        assert_eq!(config.file_management.retention_count, 5);
        assert_eq!(config.watcher.queue_size, 100);
        assert_eq!(config.debounce_delay(), Duration::from_secs(2));
        assert_eq!(config.translation_timeout(), Duration::from_secs(300));
        assert_eq!(config.target_glob(), "**/*.zh-TW.md");
        assert!(config
            .terminology
            .preserve_terms
            .contains(&"Spring Boot".to_string()));
    }

    #[test]
    fn test_presets() {
        let mut config = Config::default();
        config.apply_preset(Environment::Production);
        assert_eq!(config.performance.max_concurrent_translations, 5);
        assert!(!config.quality.auto_fix);
        assert!(!config.general.debug_mode);

        config.apply_preset(Environment::Development);
        assert!(config.general.debug_mode);
        assert!(config.quality.auto_fix);
    }

    #[test]
    fn test_default_log_level_follows_preset() {
        let mut config = Config::default();
        assert_eq!(config.general.environment, None);
        assert_eq!(config.default_log_level(), Level::INFO);

        config.apply_preset(Environment::Production);
        assert_eq!(config.default_log_level(), Level::WARN);
        config.apply_preset(Environment::Staging);
        assert_eq!(config.default_log_level(), Level::INFO);
        config.apply_preset(Environment::Development);
        assert_eq!(config.default_log_level(), Level::DEBUG);
    }

    #[test]
    fn test_retry_attempts_bounds() {
        let mut config = Config::default();
        config.performance.retry_attempts = 0;
        assert_eq!(config.validate().unwrap_err().kind(), "config_error");
        config.performance.retry_attempts = MAX_RETRY_ATTEMPTS + 1;
        assert!(config.validate().is_err());
        config.performance.retry_attempts = MAX_RETRY_ATTEMPTS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_set_option_typed() {
        let mut config = Config::default();
        config
            .set_option("performance.max_concurrent_translations", "7")
            .unwrap();
        assert_eq!(config.performance.max_concurrent_translations, 7);

        config.set_option("quality.auto_fix", "yes").unwrap();
        assert!(config.quality.auto_fix);

        config
            .set_option("terminology.preserve_terms", "Rust, Cargo")
            .unwrap();
        assert_eq!(config.terminology.preserve_terms, vec!["Rust", "Cargo"]);

        config
            .set_option("terminology.custom_translations", "Crate=套件")
            .unwrap();
        assert_eq!(
            config.terminology.custom_translations.get("Crate"),
            Some(&"套件".to_string())
        );
    }

    #[test]
    fn test_set_option_rejects_unknown_and_ill_typed() {
        let mut config = Config::default();
        assert!(config.set_option("performance.turbo", "1").is_err());
        assert!(config.set_option("nosection", "1").is_err());
        assert!(config
            .set_option("performance.retry_attempts", "three")
            .is_err());
        assert!(config.set_option("general.environment", "qa").is_err());
        assert!(config.set_option("general.environment", "staging").is_ok());
        assert_eq!(config.general.environment, Some(Environment::Staging));
    }

    #[test]
    fn test_get_option() {
        let config = Config::default();
        assert_eq!(
            config.get_option("watcher.queue_size").unwrap(),
            Value::from(100)
        );
        assert!(config.get_option("watcher.nope").is_err());
    }

    #[test]
    fn test_validate_rejects_zero_parallelism() {
        let mut config = Config::default();
        config.performance.max_concurrent_translations = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_missing_language() {
        let mut config = Config::default();
        config.translation.target_language = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_short_timeout_warns() {
        let mut config = Config::default();
        config.performance.translation_timeout = 5;
        let warnings = config.validate().unwrap();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("below 10s"));
    }

    #[test]
    fn test_validate_template_clauses() {
        let mut config = Config::default();
        config.integration.prompt_template = "Translate: {content}".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_merge_file_partial_overlay() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"performance": {"max_concurrent_translations": 8}, "quality": {"auto_fix": true}}"#,
        )
        .unwrap();

        let config = Config::default().merge_file(&path).unwrap();
        assert_eq!(config.performance.max_concurrent_translations, 8);
        assert_eq!(config.performance.retry_attempts, 3);
        assert!(config.quality.auto_fix);
    }

    #[test]
    fn test_merge_file_unknown_key_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"performance": {"warp_speed": 9}}"#).unwrap();
        let err = Config::default().merge_file(&path).unwrap_err();
        assert!(err.to_string().contains("performance.warp_speed"));
    }

    #[test]
    fn test_merge_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[watcher]\nqueue_size = 10\n").unwrap();
        let config = Config::default().merge_file(&path).unwrap();
        assert_eq!(config.watcher.queue_size, 10);
    }
}
