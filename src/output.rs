//! CLI output formatting and display helpers.

use std::fmt::Write as _;
use std::path::Path;

use anyhow::{Context, Result};
use archiver_core::source::ParsedExport;
use archiver_core::{BatchReport, Category};
use tracing::info;

/// Returns terminal width from COLUMNS, or 80 if unset/invalid.
pub fn terminal_width() -> usize {
    std::env::var("COLUMNS")
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .filter(|width| *width >= 20)
        .unwrap_or(80)
}

/// Truncates text to at most `width` chars, appending ellipsis if truncated.
pub fn truncate_to_width(text: &str, width: usize) -> String {
    let text_len = text.chars().count();
    if text_len <= width {
        return text.to_string();
    }
    if width == 0 {
        return String::new();
    }
    if width == 1 {
        return "…".to_string();
    }

    let mut output: String = text.chars().take(width - 1).collect();
    output.push('…');
    output
}

/// Formats a byte count with binary units, e.g. `1.5 MiB`.
#[allow(clippy::cast_precision_loss)]
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];

    if bytes < 1024 {
        return format!("{bytes} B");
    }

    let mut value = bytes as f64 / 1024.0;
    let mut unit = UNITS[0];
    for next in &UNITS[1..] {
        if value < 1024.0 {
            break;
        }
        value /= 1024.0;
        unit = next;
    }
    format!("{value:.1} {unit}")
}

/// One line summarising how many items each category of the export holds.
pub fn build_export_summary(parsed: &ParsedExport) -> String {
    let mut summary = format!("Found {} items", parsed.total());
    let parts: Vec<String> = Category::ALL
        .iter()
        .filter(|category| parsed.count(**category) > 0)
        .map(|category| format!("{} {}", parsed.count(*category), category))
        .collect();
    if !parts.is_empty() {
        let _ = write!(summary, ": {}", parts.join(", "));
    }
    summary
}

pub(crate) fn log_export_summary(parsed: &ParsedExport) {
    info!("{}", truncate_to_width(&build_export_summary(parsed), terminal_width()));
}

/// Lines printed after a run.
pub fn completion_summary_lines(report: &BatchReport, width: usize) -> Vec<String> {
    let mut lines = Vec::new();

    let headline = if report.interrupted {
        "Interrupted."
    } else {
        "Done."
    };
    lines.push(format!(
        "{headline} {} downloaded, {} failed, {} skipped ({})",
        report.succeeded_count,
        report.failed_count,
        report.skipped_count,
        format_bytes(report.bytes_written)
    ));

    if report.retried_count > 0 {
        lines.push(format!("Retries: {}", report.retried_count));
    }

    if report.unfinished_count > 0 {
        lines.push(format!(
            "{} items not finished. Run the same command again to resume.",
            report.unfinished_count
        ));
    }

    if !report.failures.is_empty() {
        lines.push("Failed items:".to_string());
        for failure in &report.failures {
            lines.push(truncate_to_width(
                &format!("  {}: {}", failure.job_id, failure.reason),
                width,
            ));
        }
    }

    lines
}

pub fn print_completion_summary(report: &BatchReport) {
    for line in completion_summary_lines(report, terminal_width()) {
        println!("{line}");
    }
}

/// Writes `report` as pretty-printed JSON.
pub fn write_report_json(path: &Path, report: &BatchReport) -> Result<()> {
    let json = serde_json::to_string_pretty(report).context("failed to serialize run report")?;
    std::fs::write(path, json)
        .with_context(|| format!("failed to write run report to '{}'", path.display()))?;
    Ok(())
}
