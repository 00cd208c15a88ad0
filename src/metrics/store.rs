//! SQLite persistence for completed operations and system events.

use super::{ErrorRecord, OperationMetrics, SystemEvent};
use crate::error::{DocError, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS meta (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS operations (
        operation_id TEXT PRIMARY KEY,
        kind TEXT NOT NULL,
        started_at TEXT NOT NULL,
        completed_at TEXT,
        files_processed INTEGER NOT NULL,
        files_succeeded INTEGER NOT NULL,
        files_failed INTEGER NOT NULL,
        files_skipped INTEGER NOT NULL,
        processing_time REAL NOT NULL,
        errors_json TEXT NOT NULL,
        derived_json TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_operations_started ON operations(started_at);
    CREATE TABLE IF NOT EXISTS events (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        timestamp TEXT NOT NULL,
        event_type TEXT NOT NULL,
        message TEXT NOT NULL,
        details_json TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events(timestamp);
"#;

fn ts(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .ok()
}

fn log_and_skip_err<T>(result: std::result::Result<T, rusqlite::Error>) -> Option<T> {
    match result {
        Ok(v) => Some(v),
        Err(e) => {
            warn!("Skipping unreadable metrics row: {}", e);
            None
        }
    }
}

pub struct MetricsDb {
    conn: Connection,
    path: PathBuf,
}

impl MetricsDb {
    /// Open or create the database. A database remembers the canonical path it was
    /// created at; opening it from anywhere else is a configuration error.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| DocError::io(parent, e))?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;

        let canonical = fs::canonicalize(path).map_err(|e| DocError::io(path, e))?;
        let db = Self {
            conn,
            path: canonical,
        };
        db.check_canonical_path()?;
        debug!("Opened metrics database {:?}", db.path);
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn,
            path: PathBuf::from(":memory:"),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn check_canonical_path(&self) -> Result<()> {
        let current = self.path.to_string_lossy().into_owned();
        let recorded: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM meta WHERE key = 'canonical_path'",
                [],
                |row| row.get(0),
            )
            .optional()?;

        match recorded {
            None => {
                self.conn.execute(
                    "INSERT INTO meta (key, value) VALUES ('canonical_path', ?1)",
                    params![current],
                )?;
                Ok(())
            }
            Some(recorded) if recorded == current => Ok(()),
            Some(recorded) => Err(DocError::Config(format!(
                "Metrics database {} belongs to {}. Point metrics.database_path at the canonical \
                 database instead of a copy.",
                current, recorded
            ))),
        }
    }

    pub fn insert_operation(&self, op: &OperationMetrics) -> Result<()> {
        self.conn.execute(
            r#"INSERT OR REPLACE INTO operations
               (operation_id, kind, started_at, completed_at, files_processed, files_succeeded,
                files_failed, files_skipped, processing_time, errors_json, derived_json)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"#,
            params![
                op.operation_id,
                op.kind,
                ts(&op.started_at),
                op.completed_at.as_ref().map(ts),
                op.files_processed as i64,
                op.files_succeeded as i64,
                op.files_failed as i64,
                op.files_skipped as i64,
                op.processing_time,
                serde_json::to_string(&op.errors)?,
                serde_json::to_string(&op.derived())?,
            ],
        )?;
        Ok(())
    }

    pub fn insert_event(&self, event: &SystemEvent) -> Result<()> {
        self.conn.execute(
            "INSERT INTO events (timestamp, event_type, message, details_json) VALUES (?1, ?2, ?3, ?4)",
            params![
                ts(&event.timestamp),
                event.event_type,
                event.message,
                serde_json::to_string(&event.details)?,
            ],
        )?;
        Ok(())
    }

    pub fn operations_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<OperationMetrics>> {
        let mut stmt = self.conn.prepare(
            r#"SELECT operation_id, kind, started_at, completed_at, files_processed, files_succeeded,
                      files_failed, files_skipped, processing_time, errors_json
               FROM operations WHERE started_at >= ?1 ORDER BY started_at"#,
        )?;
        let rows = stmt.query_map(params![ts(&cutoff)], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
                [
                    row.get::<_, i64>(4)?,
                    row.get::<_, i64>(5)?,
                    row.get::<_, i64>(6)?,
                    row.get::<_, i64>(7)?,
                ],
                row.get::<_, f64>(8)?,
                row.get::<_, String>(9)?,
            ))
        })?;

        let operations = rows
            .filter_map(log_and_skip_err)
            .filter_map(|(id, kind, started, completed, counts, time, errors)| {
                let errors: Vec<ErrorRecord> = serde_json::from_str(&errors).unwrap_or_default();
                Some(OperationMetrics {
                    operation_id: id,
                    kind,
                    started_at: parse_ts(&started)?,
                    completed_at: completed.as_deref().and_then(parse_ts),
                    files_processed: counts[0].max(0) as usize,
                    files_succeeded: counts[1].max(0) as usize,
                    files_failed: counts[2].max(0) as usize,
                    files_skipped: counts[3].max(0) as usize,
                    errors,
                    processing_time: time,
                })
            })
            .collect();
        Ok(operations)
    }

    pub fn events_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<SystemEvent>> {
        let mut stmt = self.conn.prepare(
            "SELECT timestamp, event_type, message, details_json FROM events WHERE timestamp >= ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![ts(&cutoff)], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;
        Ok(rows
            .filter_map(log_and_skip_err)
            .filter_map(|(timestamp, event_type, message, details)| {
                Some(SystemEvent {
                    timestamp: parse_ts(&timestamp)?,
                    event_type,
                    message,
                    details: serde_json::from_str(&details).unwrap_or_default(),
                })
            })
            .collect())
    }

    pub fn count_events(&self, event_type: &str) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM events WHERE event_type = ?1",
            params![event_type],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn sample_op() -> OperationMetrics {
        OperationMetrics {
            operation_id: "op-1".to_string(),
            kind: "batch".to_string(),
            started_at: Utc::now(),
            completed_at: Some(Utc::now()),
            files_processed: 3,
            files_succeeded: 2,
            files_failed: 1,
            files_skipped: 0,
            errors: vec![ErrorRecord {
                kind: "rate_limited".to_string(),
                message: "429".to_string(),
                file: Some(PathBuf::from("docs/a.md")),
                timestamp: Utc::now(),
            }],
            processing_time: 4.5,
        }
    }

    #[test]
    fn test_operation_round_trip() {
        let db = MetricsDb::open_in_memory().unwrap();
        db.insert_operation(&sample_op()).unwrap();

        let loaded = db
            .operations_since(Utc::now() - chrono::Duration::hours(1))
            .unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].files_succeeded, 2);
        assert_eq!(loaded[0].errors[0].kind, "rate_limited");
        assert_eq!(loaded[0].errors[0].file, Some(PathBuf::from("docs/a.md")));

        let later = db
            .operations_since(Utc::now() + chrono::Duration::hours(1))
            .unwrap();
        assert!(later.is_empty());
    }

    #[test]
    fn test_events_persisted() {
        let db = MetricsDb::open_in_memory().unwrap();
        db.insert_event(&SystemEvent {
            timestamp: Utc::now(),
            event_type: "migration_rolled_back".to_string(),
            message: "restored from backup".to_string(),
            details: serde_json::json!({"failed": 3}),
        })
        .unwrap();
        assert_eq!(db.count_events("migration_rolled_back").unwrap(), 1);
        let events = db
            .events_since(Utc::now() - chrono::Duration::minutes(1))
            .unwrap();
        assert_eq!(events[0].details["failed"], Value::from(3));
    }

    #[test]
    fn test_copied_database_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let original = dir.path().join("metrics.db");
        drop(MetricsDb::open(&original).unwrap());

        let copy = dir.path().join("elsewhere.db");
        fs::copy(&original, &copy).unwrap();
        let err = MetricsDb::open(&copy).err().unwrap();
        assert_eq!(err.kind(), "config_error");

        assert!(MetricsDb::open(&original).is_ok());
    }
}
