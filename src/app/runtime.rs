use std::io::{self, IsTerminal};
use std::sync::Arc;
use std::sync::atomic::Ordering;

use anyhow::{Context, Result};
use archiver_core::config::load_config;
use archiver_core::ledger::ledger_path;
use archiver_core::{
    ExportSource, ExternalToolFetcher, FetcherKind, Fetcher, FileConfig, HttpFetcher,
    RateLimiter, RunControl, RunCoordinator, SqliteLedger,
};
use clap::Parser;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::app::config_manager::{self, ResolvedDownload};
use crate::app::{exit_handler, progress_manager, terminal};
use crate::cli::{Cli, Command, DownloadArgs};
use crate::{ProcessExit, commands, output};

pub(crate) async fn run_archiver() -> Result<ProcessExit> {
    let cli = Cli::parse();

    terminal::init_tracing(terminal::resolve_default_log_level(cli.verbose, cli.quiet));
    debug!(?cli, "CLI arguments parsed");

    let file_config = match load_config(cli.config.as_deref()).context("failed to load config")? {
        Some((path, config)) => {
            debug!(path = %path.display(), "loaded config file");
            Some(config)
        }
        None => None,
    };

    match &cli.command {
        Command::Download(args) => run_download(args, file_config.as_ref(), cli.quiet).await,
        Command::Status(args) => {
            commands::run_status_command(args, file_config.as_ref()).await?;
            Ok(ProcessExit::Success)
        }
    }
}

async fn run_download(
    args: &DownloadArgs,
    file_config: Option<&FileConfig>,
    quiet: bool,
) -> Result<ProcessExit> {
    let resolved = config_manager::resolve_download(args, file_config)?;
    info!("Archiver starting");

    let parsed = ExportSource::new(&resolved.export, &resolved.output_dir)
        .load()
        .await
        .context("failed to read export")?;
    output::log_export_summary(&parsed);

    if parsed.jobs.is_empty() {
        info!("No media links found in export");
        return Ok(ProcessExit::Success);
    }

    if !resolved.output_dir.exists() {
        tokio::fs::create_dir_all(&resolved.output_dir)
            .await
            .with_context(|| {
                format!(
                    "failed to create output directory '{}'",
                    resolved.output_dir.display()
                )
            })?;
        info!(dir = %resolved.output_dir.display(), "Created output directory");
    }

    let ledger = SqliteLedger::open(&ledger_path(&resolved.output_dir))
        .await
        .context("failed to open progress ledger")?;
    let ledger = Arc::new(ledger);
    let limiter = Arc::new(RateLimiter::new(resolved.engine.rate_limit_bytes_per_sec));
    let fetcher = build_fetcher(&resolved)?;

    let coordinator = RunCoordinator::new(&resolved.engine, ledger, limiter, fetcher)
        .context("invalid download engine configuration")?;

    let control = RunControl::new();
    let signal_task = spawn_interrupt_handler(control.clone());

    let use_spinner = terminal::should_use_spinner(
        io::stderr().is_terminal(),
        quiet,
        terminal::is_dumb_terminal(),
    );
    let (progress_handle, progress_stop) =
        progress_manager::spawn_progress_ui(use_spinner, coordinator.stats());

    let result = coordinator.run(parsed.jobs, &control).await;

    progress_stop.store(true, Ordering::SeqCst);
    if let Some(handle) = progress_handle {
        let _ = handle.await;
    }
    signal_task.abort();

    let report = result.context("download run failed")?;

    output::print_completion_summary(&report);
    if let Some(path) = &resolved.report_json {
        output::write_report_json(path, &report)?;
        info!(path = %path.display(), "Wrote run report");
    }

    if report.interrupted {
        warn!(
            unfinished = report.unfinished_count,
            "Interrupted. Run again to resume."
        );
    }

    Ok(exit_handler::determine_exit_outcome(&report))
}

fn build_fetcher(resolved: &ResolvedDownload) -> Result<Arc<dyn Fetcher>> {
    match resolved.fetcher {
        FetcherKind::Http => {
            debug!(
                connect_secs = resolved.connect_timeout.as_secs(),
                read_secs = resolved.read_timeout.as_secs(),
                "using http fetcher"
            );
            let fetcher = HttpFetcher::with_timeouts(resolved.connect_timeout, resolved.read_timeout)
                .context("failed to build HTTP client")?;
            Ok(Arc::new(fetcher))
        }
        FetcherKind::External => {
            debug!(tool = %resolved.tool, "using external tool fetcher");
            Ok(Arc::new(
                ExternalToolFetcher::new(&resolved.tool).with_args(&resolved.tool_args),
            ))
        }
    }
}

/// First Ctrl+C stops the run gracefully; a second one aborts in-flight downloads.
fn spawn_interrupt_handler(control: RunControl) -> JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        warn!("Interrupt received, finishing in-flight downloads (Ctrl+C again to abort)");
        control.stop();

        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Second interrupt, aborting in-flight downloads");
            control.abort();
        }
    })
}
