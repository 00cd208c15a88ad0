use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DocError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Rate limited by translation backend: {0}")]
    RateLimited(String),

    #[error("Invalid response from translation backend: {0}")]
    InvalidResponse(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Input too large: {length} characters (limit {limit})")]
    InputTooLarge { length: usize, limit: usize },

    #[error("I/O failure on {path}: {message}")]
    IoFailure { path: PathBuf, message: String },

    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),

    #[error("Path conflict: {0}")]
    PathConflict(String),

    #[error("Validation failed: {0}")]
    ValidationFailure(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Insufficient disk space: {available_mb} MB available, {required_mb} MB required")]
    DiskFull { available_mb: u64, required_mb: u64 },

    #[error("No write permission: {0}")]
    NoWritePermission(PathBuf),

    #[error("Migration failure ratio {ratio:.2} exceeds threshold {threshold:.2}")]
    MigrationThresholdExceeded { ratio: f64, threshold: f64 },

    #[error("Cancelled")]
    Cancelled,

    #[error("Watcher error: {0}")]
    Watch(#[from] notify::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DocError {
    /// Build an I/O failure for `path`, mapping permission errors to their own kind.
    pub fn io(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        let path = path.into();
        match err.kind() {
            std::io::ErrorKind::PermissionDenied => DocError::PermissionDenied(path),
            _ => DocError::IoFailure {
                path,
                message: err.to_string(),
            },
        }
    }

    /// Stable snake-case kind recorded in file results, metrics and reports.
    pub fn kind(&self) -> &'static str {
        match self {
            DocError::Transport(_) => "transport_error",
            DocError::RateLimited(_) => "rate_limited",
            DocError::InvalidResponse(_) => "invalid_response",
            DocError::Unauthorized(_) => "unauthorized",
            DocError::InputTooLarge { .. } => "input_too_large",
            DocError::IoFailure { .. } | DocError::Io(_) => "io_failure",
            DocError::PermissionDenied(_) => "permission_denied",
            DocError::PathConflict(_) => "path_conflict",
            DocError::ValidationFailure(_) => "validation_failure",
            DocError::Config(_) => "config_error",
            DocError::DiskFull { .. } => "disk_full",
            DocError::NoWritePermission(_) => "no_write_permission",
            DocError::MigrationThresholdExceeded { .. } => "migration_threshold_exceeded",
            DocError::Cancelled => "cancelled",
            DocError::Watch(_) => "watch_error",
            DocError::Database(_) => "database_error",
            DocError::Json(_) => "json_error",
        }
    }

    /// Only transport failures and rate limiting are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DocError::Transport(_) | DocError::RateLimited(_))
    }

    /// Errors that make the whole operation pointless to continue.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DocError::Config(_)
                | DocError::DiskFull { .. }
                | DocError::NoWritePermission(_)
                | DocError::Database(_)
        )
    }
}

impl From<reqwest::Error> for DocError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() || err.is_request() {
            DocError::Transport(err.to_string())
        } else if err.is_decode() {
            DocError::InvalidResponse(err.to_string())
        } else {
            DocError::Transport(err.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, DocError>;
