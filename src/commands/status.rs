//! Status command handler: summarize what previous runs archived.

use std::path::Path;

use anyhow::{Context, Result};
use archiver_core::ledger::{LEDGER_DIR_NAME, ledger_path};
use archiver_core::{FileConfig, Outcome, OutcomeState, SqliteLedger};

use crate::app::config_manager::resolve_output_dir;
use crate::cli::StatusArgs;
use crate::output;

pub(crate) async fn run_status_command(
    args: &StatusArgs,
    file_config: Option<&FileConfig>,
) -> Result<()> {
    let output_dir = resolve_output_dir(args.output_dir.as_ref(), file_config);
    for line in status_lines(&output_dir, usize::from(args.limit)).await? {
        println!("{line}");
    }
    Ok(())
}

pub(crate) async fn status_lines(output_dir: &Path, limit: usize) -> Result<Vec<String>> {
    let path = ledger_path(output_dir);
    if !path.exists() {
        return Ok(vec![format!(
            "No archive state found in {} (expected {LEDGER_DIR_NAME}/).",
            output_dir.display()
        )]);
    }

    let ledger = SqliteLedger::open(&path)
        .await
        .with_context(|| format!("failed to open progress ledger '{}'", path.display()))?;

    let succeeded = ledger.count_by_state(OutcomeState::Succeeded).await?;
    let failed = ledger.count_by_state(OutcomeState::Failed).await?;
    let skipped = ledger.count_by_state(OutcomeState::Skipped).await?;
    let failures = if failed > 0 {
        ledger.list_by_state(OutcomeState::Failed).await?
    } else {
        Vec::new()
    };
    ledger.close().await;

    let mut lines = vec![
        format!("Archive: {}", output_dir.display()),
        format!("  succeeded: {succeeded}"),
        format!("  failed:    {failed}"),
        format!("  skipped:   {skipped}"),
    ];
    lines.extend(failure_lines(&failures, limit, output::terminal_width()));
    Ok(lines)
}

fn failure_lines(failures: &[Outcome], limit: usize, width: usize) -> Vec<String> {
    if failures.is_empty() {
        return Vec::new();
    }

    let mut lines = vec!["Failed items (most recent first):".to_string()];
    for outcome in failures.iter().take(limit) {
        let reason = outcome.reason.as_deref().unwrap_or("unknown error");
        lines.push(output::truncate_to_width(
            &format!(
                "  {} ({} attempts): {reason}",
                outcome.job_id, outcome.attempts
            ),
            width,
        ));
    }
    if failures.len() > limit {
        lines.push(format!(
            "  ... and {} more; rerun with a higher --limit to see them.",
            failures.len() - limit
        ));
    }
    lines
}
