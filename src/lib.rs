pub mod batch;
pub mod config;
pub mod error;
pub mod files;
pub mod gateway;
pub mod metrics;
pub mod migration;
pub mod pipeline;
pub mod qa;
pub mod scanner;
pub mod watcher;

pub use batch::{print_summary, BatchProcessor, JobKind, JobStatus, TranslationJob};
pub use config::Config;
pub use error::{DocError, Result};
pub use files::FileManager;
pub use gateway::{AiGateway, ContextTag, Translator};
pub use metrics::{MetricsStore, ReportFormat};
pub use migration::{MigrationOutcome, MigrationStatus, MigrationWorkflow};
pub use pipeline::{DocumentTranslator, FileResult, FileStatus};
pub use qa::QualityChecker;
pub use scanner::{scan_status, ScanReport, Scanner};
pub use watcher::DocWatcher;
