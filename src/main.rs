use anyhow::{Context, Result};
use clap::{ArgGroup, Parser};
use console::style;
use doctrans::batch::{BarReporter, BatchProcessor, JobKind, JobStatus, TranslationJob};
use doctrans::config::Config;
use doctrans::gateway::{AiGateway, Translator};
use doctrans::metrics::{render_summary, MetricsStore, ReportFormat};
use doctrans::migration::{MigrationStatus, MigrationWorkflow};
use doctrans::pipeline::DocumentTranslator;
use doctrans::qa::audit_directory;
use doctrans::scanner::{scan_status, Scanner};
use doctrans::watcher::DocWatcher;
use doctrans::DocError;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "doctrans")]
#[command(version, about = "Keep Traditional Chinese translations of Markdown docs up to date")]
#[command(long_about = "Translate English Markdown documentation into zh-TW companions (foo.md -> foo.zh-TW.md) \
through an AI translation backend, watch a tree for changes, or migrate a Chinese-first tree to English-first.")]
#[command(group(ArgGroup::new("mode").args(["file", "directory", "all", "watch", "migrate", "scan"])))]
struct Cli {
    /// Translate one file
    #[arg(long, value_name = "PATH")]
    file: Option<PathBuf>,

    /// Translate every included file under DIR
    #[arg(long, value_name = "DIR")]
    directory: Option<PathBuf>,

    /// Same as --directory .
    #[arg(long)]
    all: bool,

    /// Watch the configured paths and translate on change
    #[arg(long)]
    watch: bool,

    /// Convert a Chinese-first tree (default .) to English-first with zh-TW shadows
    #[arg(long, value_name = "DIR", num_args = 0..=1, default_missing_value = ".")]
    migrate: Option<PathBuf>,

    /// Report translation status under DIR (default .) without changing anything
    #[arg(long, value_name = "DIR", num_args = 0..=1, default_missing_value = ".")]
    scan: Option<PathBuf>,

    /// Performance report on its own, or the job report file when combined with a mode
    #[arg(long, value_name = "FILE", num_args = 0..=1)]
    report: Option<Option<PathBuf>>,

    /// Retranslate even when the target is up to date
    #[arg(long)]
    force: bool,

    /// Decide and log, but do not call the backend or write files
    #[arg(long)]
    dry_run: bool,

    /// Process a directory with the parallel worker pool
    #[arg(long)]
    batch: bool,

    /// Number of parallel workers
    #[arg(short, long)]
    workers: Option<usize>,

    /// Show a progress bar
    #[arg(long)]
    progress: bool,

    /// Configuration file (JSON or TOML)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override a configuration option, e.g. --set watcher.debounce_delay=5
    #[arg(long = "set", value_name = "KEY=VALUE")]
    overrides: Vec<String>,

    /// Report format: text, json, html
    #[arg(long)]
    format: Option<String>,

    /// Enable debug logging
    #[arg(short, long, conflicts_with = "quiet")]
    verbose: bool,

    /// Only log warnings and errors
    #[arg(short, long)]
    quiet: bool,
}

enum Mode {
    File(PathBuf),
    Directory(PathBuf),
    Watch,
    Migrate(PathBuf),
    Scan(PathBuf),
    Report,
}

impl Cli {
    fn mode(&self) -> Option<Mode> {
        if let Some(path) = &self.file {
            Some(Mode::File(path.clone()))
        } else if let Some(dir) = &self.directory {
            Some(Mode::Directory(dir.clone()))
        } else if self.all {
            Some(Mode::Directory(PathBuf::from(".")))
        } else if self.watch {
            Some(Mode::Watch)
        } else if let Some(dir) = &self.migrate {
            Some(Mode::Migrate(dir.clone()))
        } else if let Some(dir) = &self.scan {
            Some(Mode::Scan(dir.clone()))
        } else if self.report.is_some() {
            Some(Mode::Report)
        } else {
            None
        }
    }

    fn report_file(&self) -> Option<&Path> {
        self.report.as_ref().and_then(|r| r.as_deref())
    }
}

fn init_logging(cli: &Cli, config: &Config) {
    let level = if cli.quiet {
        Level::WARN
    } else if cli.verbose {
        Level::DEBUG
    } else {
        config.default_log_level()
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("doctrans={}", level)));

    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    for raw in &cli.overrides {
        let (key, value) = raw
            .split_once('=')
            .ok_or_else(|| DocError::Config(format!("Expected KEY=VALUE, got '{}'", raw)))?;
        config
            .set_option(key.trim(), value.trim())
            .with_context(|| format!("Invalid --set {}", raw))?;
    }
    if let Some(workers) = cli.workers {
        config.performance.max_concurrent_translations = workers;
    }
    if cli.dry_run {
        config.general.dry_run = true;
    }
    Ok(config)
}

fn build_gateway(config: &Config) -> Result<Arc<dyn Translator>> {
    let gateway = if config.general.dry_run {
        // Never called in a dry run; a missing key is not an error.
        let key = std::env::var(&config.integration.api_key_env).unwrap_or_default();
        AiGateway::new(config, key)?
    } else {
        AiGateway::from_env(config)?
    };
    Ok(Arc::new(gateway))
}

fn report_format(cli: &Cli) -> Result<ReportFormat> {
    if let Some(raw) = &cli.format {
        return raw.parse().map_err(|e: String| anyhow::anyhow!(e));
    }
    Ok(cli
        .report_file()
        .and_then(ReportFormat::from_path)
        .unwrap_or_default())
}

/// Multi-line explanation for errors that stop the whole run.
fn print_fatal(error: &anyhow::Error) {
    eprintln!();
    eprintln!("{} {}", style("✗").red().bold(), style("Fatal error").red().bold());
    for cause in error.chain() {
        eprintln!("  {}", cause);
    }
    let hint = error
        .chain()
        .find_map(|c| c.downcast_ref::<DocError>())
        .map(|e| explain(e.kind()));
    if let Some(hint) = hint {
        eprintln!();
        eprintln!("  {}", style(hint).yellow());
    }
    eprintln!();
}

fn explain(kind: &str) -> &'static str {
    match kind {
        "config_error" => "Check the configuration file, TRANSLATION_ENV and --set overrides.",
        "disk_full" => "Free disk space or lower migration.min_free_space_mb, then rerun.",
        "no_write_permission" => "The output directory is not writable by this user.",
        "unauthorized" => "The translation backend rejected the API key.",
        "migration_threshold_exceeded" => "Too many files failed; the tree was restored from the full backup.",
        "database_error" => "The metrics database could not be used; check metrics.database_path.",
        _ => "No work was lost; fix the cause above and rerun.",
    }
}

fn print_file_lines(job: &TranslationJob) {
    for result in &job.results {
        let line = result.one_line();
        if result.is_failed() {
            eprintln!("{}", style(line).red());
        } else if result.is_success() {
            println!("{}", style(line).green());
        } else {
            println!("{}", style(line).dim());
        }
    }
}

async fn run_job(
    cli: &Cli,
    config: &Config,
    metrics: Arc<MetricsStore>,
    kind: JobKind,
    paths: Vec<PathBuf>,
    workers: usize,
) -> Result<ExitCode> {
    let gateway = build_gateway(config)?;
    let translator = Arc::new(DocumentTranslator::new(config, gateway));
    let mut processor = BatchProcessor::from_config(translator, config)
        .with_workers(workers)
        .with_metrics(metrics);
    if cli.progress {
        processor = processor.with_reporter(Arc::new(BarReporter::new(paths.len())));
    }
    let processor = Arc::new(processor);

    let handle = processor.spawn(TranslationJob::new(kind, paths, config, cli.force));
    let cancel = handle.cancel_flag();
    ctrlc::set_handler(move || {
        eprintln!("\nCancelling after in-flight files finish...");
        cancel.store(true, Ordering::SeqCst);
    })
    .context("Failed to install Ctrl+C handler")?;

    let job = handle.wait().await?;
    print_file_lines(&job);
    if kind == JobKind::Batch || cli.progress {
        doctrans::print_summary(&job);
    }

    if let Some(report) = &cli.report {
        match report {
            Some(path) => {
                job.write_report(path)?;
                info!("Job report written to {}", path.display());
            }
            None => println!("{}", serde_json::to_string_pretty(&job.report())?),
        }
    }

    if let Some(error) = &job.error {
        return Err(anyhow::anyhow!("{}", error.message)).context(format!("Job aborted ({})", error.kind));
    }
    if job.counters.failed > 0 || job.status == JobStatus::Failed {
        return Ok(ExitCode::from(1));
    }
    Ok(ExitCode::SUCCESS)
}

async fn run_directory(cli: &Cli, config: &Config, metrics: Arc<MetricsStore>, dir: &Path) -> Result<ExitCode> {
    let scanner = Scanner::from_config(config)?;
    let paths = scanner
        .scan(dir)
        .with_context(|| format!("Failed to scan {}", dir.display()))?;
    info!("Found {} source files under {}", paths.len(), dir.display());
    let workers = if cli.batch {
        config.performance.max_concurrent_translations
    } else {
        1
    };
    run_job(cli, config, metrics, JobKind::Batch, paths, workers).await
}

async fn run_watch(config: &Config, metrics: Arc<MetricsStore>) -> Result<ExitCode> {
    let gateway = build_gateway(config)?;
    let translator = Arc::new(DocumentTranslator::new(config, gateway));
    let workers = config.watcher.processing_threads.max(1);
    let processor = Arc::new(
        BatchProcessor::from_config(translator, config)
            .with_workers(workers)
            .with_metrics(metrics.clone()),
    );
    let watcher = DocWatcher::new(config, processor)?.with_metrics(metrics);

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();
    ctrlc::set_handler(move || {
        eprintln!("\nShutting down watcher...");
        flag.store(true, Ordering::SeqCst);
    })
    .context("Failed to install Ctrl+C handler")?;

    println!(
        "{} Watching {} path(s); press Ctrl+C to stop",
        style("●").green(),
        watcher.roots().len()
    );
    let summary = watcher.run(shutdown).await?;
    println!(
        "Watcher stopped: {} jobs, {} files translated, {} failed, {} dropped events",
        summary.jobs_started, summary.files_succeeded, summary.files_failed, summary.dropped
    );
    Ok(ExitCode::SUCCESS)
}

async fn run_migrate(config: &Config, metrics: Arc<MetricsStore>, root: &Path) -> Result<ExitCode> {
    let gateway = build_gateway(config)?;
    let workflow = MigrationWorkflow::new(config, root, gateway)?.with_metrics(metrics);
    let outcome = workflow.run().await.context("Migration aborted before any change")?;

    println!();
    println!("═══════════════════════════════════════════════════════════════");
    println!("                      Migration {:?}", outcome.status);
    println!("═══════════════════════════════════════════════════════════════");
    println!();
    println!(
        "  Analysis:   {} primarily Chinese, {} mixed, {} minimal",
        outcome.analysis.primarily_chinese, outcome.analysis.mixed, outcome.analysis.minimal
    );
    println!("  Migrated:   {}", outcome.migrated.len());
    println!("  Failed:     {}", outcome.failed.len());
    if let Some(backup) = &outcome.backup_path {
        println!("  Backup:     {}", backup.display());
    }
    for failed in &outcome.failed {
        println!("    ✗ {}: {}", failed.path.display(), failed.message);
    }
    if let Some(error) = &outcome.error {
        println!();
        println!("  {}", style(error).red());
    }
    println!();
    println!("═══════════════════════════════════════════════════════════════");

    if outcome.status == MigrationStatus::RolledBack {
        warn!("Migration rolled back; tree restored from backup");
    }
    Ok(if outcome.is_clean() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}

fn run_scan(config: &Config, root: &Path) -> Result<ExitCode> {
    let report = scan_status(root, config).with_context(|| format!("Failed to scan {}", root.display()))?;
    for entry in &report.entries {
        println!("{:<11} {}", entry.status.to_string(), entry.path.display());
    }
    println!();
    println!(
        "{} files: {} missing, {} outdated, {} up to date",
        report.entries.len(),
        report.missing,
        report.outdated,
        report.up_to_date
    );

    if config.terminology.consistency_check {
        let audit = audit_directory(root, config)?;
        if audit.is_consistent() {
            println!("Terminology consistent across {} translated files", audit.files_checked);
        } else {
            println!();
            println!("Terminology conflicts:");
            for conflict in &audit.conflicts {
                println!("  {}", style(&conflict.term).yellow());
                for (rendering, files) in &conflict.renderings {
                    println!("    {} in {}", rendering, files.join(", "));
                }
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn run_report(cli: &Cli, config: &Config, metrics: &MetricsStore) -> Result<ExitCode> {
    let format = report_format(cli)?;
    let summary = metrics.performance_summary(config.retention())?;
    let rendered = render_summary(&summary, format)?;
    match cli.report_file() {
        Some(path) => {
            doctrans::files::write_atomically(path, &rendered)?;
            println!("{} report written to {}", format, path.display());
        }
        None => println!("{}", rendered),
    }
    Ok(ExitCode::SUCCESS)
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = load_config(&cli)?;
    init_logging(&cli, &config);
    for warning in config.validate().context("Configuration validation failed")? {
        warn!("{}", warning);
    }

    let Some(mode) = cli.mode() else {
        anyhow::bail!("No mode selected. Use one of --file, --directory, --all, --watch, --migrate, --scan or --report");
    };
    let metrics = Arc::new(MetricsStore::from_config(&config).context("Failed to open metrics store")?);

    match mode {
        Mode::File(path) => {
            if !path.exists() {
                anyhow::bail!("Input file not found: {}", path.display());
            }
            run_job(&cli, &config, metrics, JobKind::Single, vec![path], 1).await
        }
        Mode::Directory(dir) => run_directory(&cli, &config, metrics, &dir).await,
        Mode::Watch => run_watch(&config, metrics).await,
        Mode::Migrate(root) => run_migrate(&config, metrics, &root).await,
        Mode::Scan(root) => run_scan(&config, &root),
        Mode::Report => run_report(&cli, &config, &metrics),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            print_fatal(&e);
            ExitCode::from(2)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_modes_are_exclusive() {
        assert!(Cli::try_parse_from(["doctrans", "--file", "a.md", "--all"]).is_err());
        assert!(Cli::try_parse_from(["doctrans", "--watch", "--migrate"]).is_err());
    }

    #[test]
    fn test_report_alone_is_a_mode() {
        let cli = Cli::try_parse_from(["doctrans", "--report"]).unwrap();
        assert!(matches!(cli.mode(), Some(Mode::Report)));
        assert_eq!(cli.report_file(), None);

        let cli = Cli::try_parse_from(["doctrans", "--directory", "docs", "--report", "out.json"]).unwrap();
        assert!(matches!(cli.mode(), Some(Mode::Directory(_))));
        assert_eq!(cli.report_file(), Some(Path::new("out.json")));
    }

    #[test]
    fn test_optional_directories() {
        let cli = Cli::try_parse_from(["doctrans", "--scan"]).unwrap();
        assert!(matches!(cli.mode(), Some(Mode::Scan(p)) if p == Path::new(".")));
        let cli = Cli::try_parse_from(["doctrans", "--migrate", "docs"]).unwrap();
        assert!(matches!(cli.mode(), Some(Mode::Migrate(p)) if p == Path::new("docs")));
    }

    #[test]
    fn test_report_format_from_extension() {
        let cli = Cli::try_parse_from(["doctrans", "--report", "dash.html"]).unwrap();
        assert_eq!(report_format(&cli).unwrap(), ReportFormat::Html);
        let cli = Cli::try_parse_from(["doctrans", "--report", "dash.html", "--format", "json"]).unwrap();
        assert_eq!(report_format(&cli).unwrap(), ReportFormat::Json);
    }

    #[test]
    fn test_set_overrides_apply() {
        let cli = Cli::try_parse_from([
            "doctrans",
            "--all",
            "--set",
            "watcher.queue_size=7",
            "--workers",
            "6",
        ])
        .unwrap();
        let config = load_config(&cli).unwrap();
        assert_eq!(config.watcher.queue_size, 7);
        assert_eq!(config.performance.max_concurrent_translations, 6);
    }
}
