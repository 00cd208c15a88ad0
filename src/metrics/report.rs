//! Text, JSON and HTML renderings of the performance summary, plus the JSON
//! translation log that mirrors the latest run.

use super::{OperationMetrics, PerformanceSummary};
use crate::error::{DocError, Result};
use crate::files::write_atomically;
use crate::pipeline::FileResult;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Text,
    Json,
    Html,
}

impl std::fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReportFormat::Text => write!(f, "text"),
            ReportFormat::Json => write!(f, "json"),
            ReportFormat::Html => write!(f, "html"),
        }
    }
}

impl std::str::FromStr for ReportFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "txt" => Ok(ReportFormat::Text),
            "json" => Ok(ReportFormat::Json),
            "html" => Ok(ReportFormat::Html),
            _ => Err(format!(
                "Unknown report format: {}. Use 'text', 'json', or 'html'",
                s
            )),
        }
    }
}

impl ReportFormat {
    /// Guess the format from an output file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(|e| e.parse().ok())
    }
}

pub fn render_summary(summary: &PerformanceSummary, format: ReportFormat) -> Result<String> {
    match format {
        ReportFormat::Text => Ok(render_text(summary)),
        ReportFormat::Json => Ok(serde_json::to_string_pretty(summary)?),
        ReportFormat::Html => Ok(render_html(summary)),
    }
}

fn percent(rate: f64) -> String {
    format!("{:.1}%", rate * 100.0)
}

fn render_text(s: &PerformanceSummary) -> String {
    let rule = "═══════════════════════════════════════════════════════════════";
    let mut out = String::new();
    let _ = writeln!(out, "{}", rule);
    let _ = writeln!(out, "                  Translation Performance Report");
    let _ = writeln!(out, "{}", rule);
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "  Window:       last {:.0}h (generated {})",
        s.window_hours,
        s.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    let _ = writeln!(out, "  Operations:   {}", s.total_operations);
    let _ = writeln!(
        out,
        "  Files:        {} processed, {} succeeded, {} failed, {} skipped",
        s.files_processed, s.files_succeeded, s.files_failed, s.files_skipped
    );
    let _ = writeln!(out, "  Success rate: {}", percent(s.success_rate));
    let _ = writeln!(out, "  Avg time:     {:.2}s per file", s.average_processing_time);

    if !s.by_kind.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "  By operation kind:");
        for (kind, b) in &s.by_kind {
            let _ = writeln!(
                out,
                "    {:<10} {:>4} ops  {:>5} files  {:>5} ok  {:>5} failed",
                kind, b.operations, b.files_processed, b.files_succeeded, b.files_failed
            );
        }
    }

    if !s.error_histogram.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "  Errors:");
        for (kind, count) in &s.error_histogram {
            let _ = writeln!(out, "    {:<28} {}", kind, count);
        }
    }

    if !s.events.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "  Events:");
        for (kind, count) in &s.events {
            let _ = writeln!(out, "    {:<28} {}", kind, count);
        }
    }

    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "  Trend:        {} ({} -> {} success, {:.2}s -> {:.2}s avg)",
        s.trend.direction,
        percent(s.trend.first_half.success_rate),
        percent(s.trend.second_half.success_rate),
        s.trend.first_half.average_processing_time,
        s.trend.second_half.average_processing_time
    );
    let _ = writeln!(out);
    let _ = write!(out, "{}", rule);
    out
}

const HTML_TEMPLATE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>Translation Dashboard</title>
<style>
body { font-family: sans-serif; margin: 2rem; color: #222; }
.cards { display: flex; gap: 1rem; flex-wrap: wrap; }
.card { border: 1px solid #ddd; border-radius: 6px; padding: 1rem 1.5rem; min-width: 9rem; }
.card .value { font-size: 1.6rem; font-weight: bold; }
table { border-collapse: collapse; margin-top: 1rem; }
th, td { border: 1px solid #ddd; padding: 0.3rem 0.8rem; text-align: left; }
.trend-improving { color: #2a7d2a; }
.trend-degrading { color: #b22222; }
</style>
</head>
<body>
<h1>Translation Dashboard</h1>
<p>Last {{window_hours}} hours, generated {{generated_at}}</p>
<div class="cards">
  <div class="card"><div>Operations</div><div class="value">{{total_operations}}</div></div>
  <div class="card"><div>Files processed</div><div class="value">{{files_processed}}</div></div>
  <div class="card"><div>Success rate</div><div class="value">{{success_rate}}</div></div>
  <div class="card"><div>Avg time / file</div><div class="value">{{average_time}}</div></div>
  <div class="card"><div>Trend</div><div class="value trend-{{trend}}">{{trend}}</div></div>
</div>
<h2>By operation kind</h2>
<table>
<tr><th>Kind</th><th>Operations</th><th>Files</th><th>Succeeded</th><th>Failed</th></tr>
{{kind_rows}}
</table>
<h2>Errors</h2>
<table>
<tr><th>Kind</th><th>Count</th></tr>
{{error_rows}}
</table>
<h2>Recent operations</h2>
<table>
<tr><th>Started</th><th>Kind</th><th>Processed</th><th>Succeeded</th><th>Failed</th><th>Skipped</th></tr>
{{operation_rows}}
</table>
</body>
</html>
"#;

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn render_html(s: &PerformanceSummary) -> String {
    let kind_rows: String = s
        .by_kind
        .iter()
        .map(|(kind, b)| {
            format!(
                "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>\n",
                escape_html(kind),
                b.operations,
                b.files_processed,
                b.files_succeeded,
                b.files_failed
            )
        })
        .collect();
    let error_rows: String = s
        .error_histogram
        .iter()
        .map(|(kind, count)| format!("<tr><td>{}</td><td>{}</td></tr>\n", escape_html(kind), count))
        .collect();
    let operation_rows: String = s
        .recent_operations
        .iter()
        .map(|op: &OperationMetrics| {
            format!(
                "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>\n",
                op.started_at.format("%Y-%m-%d %H:%M:%S"),
                escape_html(&op.kind),
                op.files_processed,
                op.files_succeeded,
                op.files_failed,
                op.files_skipped
            )
        })
        .collect();

    HTML_TEMPLATE
        .replace("{{window_hours}}", &format!("{:.0}", s.window_hours))
        .replace(
            "{{generated_at}}",
            &s.generated_at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        )
        .replace("{{total_operations}}", &s.total_operations.to_string())
        .replace("{{files_processed}}", &s.files_processed.to_string())
        .replace("{{success_rate}}", &percent(s.success_rate))
        .replace(
            "{{average_time}}",
            &format!("{:.2}s", s.average_processing_time),
        )
        .replace("{{trend}}", &escape_html(&s.trend.direction))
        .replace("{{kind_rows}}", &kind_rows)
        .replace("{{error_rows}}", &error_rows)
        .replace("{{operation_rows}}", &operation_rows)
}

/// Overwrite the translation log with the latest operation and its file results.
pub fn write_translation_log(
    path: &Path,
    operation: &OperationMetrics,
    results: &[FileResult],
) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| DocError::io(parent, e))?;
    }
    let log = serde_json::json!({
        "generated_at": Utc::now(),
        "operation": operation,
        "derived": operation.derived(),
        "files": results,
    });
    let body = serde_json::to_string_pretty(&log)?;
    write_atomically(path, &body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{summarize, SystemEvent};
    use crate::metrics::MetricsStore;
    use std::path::PathBuf;
    use std::time::{Duration, Instant};

    fn sample_summary() -> PerformanceSummary {
        let store = MetricsStore::in_memory();
        let id = store.start_operation("batch");
        store.record_file(
            &id,
            &FileResult::success(Path::new("a.md"), PathBuf::from("a.zh-TW.md"), Instant::now()),
        );
        let op = store.complete_operation(&id).unwrap();
        let events: Vec<SystemEvent> = Vec::new();
        summarize(&[op], &events, Duration::from_secs(24 * 3600), Utc::now())
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("JSON".parse::<ReportFormat>().unwrap(), ReportFormat::Json);
        assert!("pdf".parse::<ReportFormat>().is_err());
        assert_eq!(
            ReportFormat::from_path(Path::new("out/report.html")),
            Some(ReportFormat::Html)
        );
        assert_eq!(ReportFormat::from_path(Path::new("report")), None);
    }

    #[test]
    fn test_text_report() {
        let text = render_summary(&sample_summary(), ReportFormat::Text).unwrap();
        assert!(text.contains("Operations:   1"));
        assert!(text.contains("batch"));
        assert!(text.contains("100.0%"));
    }

    #[test]
    fn test_json_report_parses() {
        let json = render_summary(&sample_summary(), ReportFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["total_operations"], 1);
        assert_eq!(value["by_kind"]["batch"]["files_succeeded"], 1);
    }

    #[test]
    fn test_html_report_fills_template() {
        let html = render_summary(&sample_summary(), ReportFormat::Html).unwrap();
        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(!html.contains("{{"));
        assert!(html.contains("<td>batch</td>"));
    }

    #[test]
    fn test_translation_log_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("translation_log.json");
        let store = MetricsStore::in_memory();
        let id = store.start_operation("single");
        let result = FileResult::skipped(Path::new("a.md"), "up_to_date");
        store.record_file(&id, &result);
        let op = store.complete_operation(&id).unwrap();

        write_translation_log(&path, &op, &[result]).unwrap();
        let log: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(log["operation"]["files_skipped"], 1);
        assert_eq!(log["files"][0]["reason"], "up_to_date");
    }
}
