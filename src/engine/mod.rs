//! Run coordinator: drives a batch of jobs through the worker pool.
//!
//! [`RunCoordinator::run`] filters the batch against the ledger, fills the
//! shared queue, spawns a fixed number of workers and then sits in an event
//! loop. Workers report every finished attempt; the coordinator keeps the
//! counts, holds jobs that are waiting out a retry delay and pushes them to
//! the back of the queue once they are due.
//!
//! Per job the state machine is:
//!
//! ```text
//! pending -> in_flight -> succeeded
//!                      -> retry_scheduled -> pending
//!                      -> failed
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use archiver_core::download::{HttpFetcher, RateLimiter};
//! use archiver_core::engine::{RunControl, RunCoordinator};
//! use archiver_core::ledger::SqliteLedger;
//! use archiver_core::{Category, EngineConfig, Job};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = EngineConfig::default();
//! let ledger = Arc::new(SqliteLedger::open(Path::new("out/.archiver/ledger.db")).await?);
//! let limiter = Arc::new(RateLimiter::new(config.rate_limit_bytes_per_sec));
//! let fetcher = Arc::new(HttpFetcher::new()?);
//! let coordinator = RunCoordinator::new(&config, ledger, limiter, fetcher)?;
//!
//! let jobs = vec![Job::new("liked:1", "https://example.com/1.mp4", Category::Liked, "out/Likes/1.mp4")];
//! let report = coordinator.run(jobs, &RunControl::new()).await?;
//! println!("{} succeeded, {} failed", report.succeeded_count, report.failed_count);
//! # Ok(())
//! # }
//! ```

mod control;
mod queue;
mod report;
mod schedule;
mod worker;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::{Instant, sleep_until, timeout_at};
use tracing::{debug, error, info, instrument, warn};

pub use control::RunControl;
pub use queue::WorkItem;
pub use report::{BatchReport, FailureEntry, RunStats};

use crate::config::{EngineConfig, MAX_CONCURRENCY, MIN_CONCURRENCY};
use crate::download::{DownloadContext, Fetcher, RateLimiter, RetryPolicy};
use crate::job::{Category, Job};
use crate::ledger::{LedgerError, Outcome, ProgressLedger};
use queue::JobQueue;
use schedule::RetrySchedule;
use worker::{WorkerContext, WorkerEvent, run_worker};

/// How long workers get to react to an abort before their tasks are killed.
pub const ABORT_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Reason recorded for jobs outside the category selection.
pub const CATEGORY_NOT_SELECTED: &str = "category not selected";

/// Batch-fatal errors. Per-job failures never surface here.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// Invalid concurrency value provided.
    #[error(
        "invalid concurrency value {value}: must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}"
    )]
    InvalidConcurrency { value: usize },

    /// The ledger could not be read or written; the run was aborted.
    #[error("progress ledger failed: {0}")]
    Ledger(#[from] LedgerError),
}

/// Runs batches of jobs against a shared ledger, limiter and fetcher.
pub struct RunCoordinator {
    concurrency: usize,
    categories: Vec<Category>,
    shutdown_grace: Duration,
    ledger: Arc<dyn ProgressLedger>,
    limiter: Arc<RateLimiter>,
    fetcher: Arc<dyn Fetcher>,
    policy: RetryPolicy,
    stats: Arc<RunStats>,
}

impl std::fmt::Debug for RunCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunCoordinator")
            .field("concurrency", &self.concurrency)
            .field("categories", &self.categories)
            .field("shutdown_grace", &self.shutdown_grace)
            .field("limiter", &self.limiter)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl RunCoordinator {
    /// Creates a coordinator.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::InvalidConcurrency`] if `config.concurrency` is
    /// outside 1..=100.
    pub fn new(
        config: &EngineConfig,
        ledger: Arc<dyn ProgressLedger>,
        limiter: Arc<RateLimiter>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<Self, RunError> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&config.concurrency) {
            return Err(RunError::InvalidConcurrency {
                value: config.concurrency,
            });
        }

        debug!(
            concurrency = config.concurrency,
            rate = limiter.bytes_per_second(),
            max_attempts = config.max_retry_attempts,
            "creating run coordinator"
        );

        Ok(Self {
            concurrency: config.concurrency,
            categories: config.categories.clone(),
            shutdown_grace: config.shutdown_grace,
            ledger,
            limiter,
            fetcher,
            policy: config.retry_policy(),
            stats: Arc::new(RunStats::new()),
        })
    }

    /// Replaces the retry policy derived from the config.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Live counters for the current or last run.
    #[must_use]
    pub fn stats(&self) -> Arc<RunStats> {
        Arc::clone(&self.stats)
    }

    fn selects(&self, category: Category) -> bool {
        self.categories.is_empty() || self.categories.contains(&category)
    }

    /// Runs `jobs` to completion or until `control` stops the run.
    ///
    /// Jobs already succeeded in the ledger, and duplicate ids, are counted
    /// as skipped without being fetched. Jobs outside the category selection
    /// are recorded as skipped.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::Ledger`] if the ledger cannot be loaded or a
    /// record fails. In-flight downloads are aborted first.
    #[instrument(skip(self, jobs, control), fields(jobs = jobs.len(), concurrency = self.concurrency))]
    pub async fn run(&self, jobs: Vec<Job>, control: &RunControl) -> Result<BatchReport, RunError> {
        let prior = self.ledger.load().await?;
        let mut report = BatchReport::default();
        let pending = self.admit(jobs, &prior, &mut report).await?;

        self.stats.reset(report.skipped_count + pending.len());
        for _ in 0..report.skipped_count {
            self.stats.increment_skipped();
        }

        info!(
            pending = pending.len(),
            skipped = report.skipped_count,
            "starting run"
        );

        if pending.is_empty() {
            return Ok(report);
        }

        let queue = Arc::new(JobQueue::new());
        for job in &pending {
            queue.push(WorkItem::new(Arc::clone(job)));
        }

        let (events_tx, mut events) = mpsc::unbounded_channel();
        let mut download = DownloadContext::new(Arc::clone(&self.limiter), control.abort_token());
        download.progress = Some(self.stats.bytes_counter());

        let ctx = Arc::new(WorkerContext {
            queue: Arc::clone(&queue),
            ledger: Arc::clone(&self.ledger),
            fetcher: Arc::clone(&self.fetcher),
            policy: self.policy.clone(),
            download,
            stop: control.stop_token(),
            events: events_tx,
        });

        let mut workers = JoinSet::new();
        let worker_count = self.concurrency.min(pending.len());
        for worker_id in 0..worker_count {
            workers.spawn(run_worker(worker_id, Arc::clone(&ctx)));
        }
        // Only workers hold senders from here on, so `recv` returning `None`
        // means the whole pool has exited.
        drop(ctx);

        let mut state = RunState {
            report,
            outstanding: pending.len(),
            schedule: RetrySchedule::new(),
            fatal: None,
        };

        while state.outstanding > 0 && state.fatal.is_none() {
            let deadline = state.schedule.next_deadline();
            tokio::select! {
                biased;
                () = control.stopped() => {
                    info!(outstanding = state.outstanding, "stop requested");
                    state.report.interrupted = true;
                    break;
                }
                event = events.recv() => match event {
                    Some(event) => state.apply(event, &self.stats, false),
                    None => break,
                },
                () = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    for item in state.schedule.pop_due(Instant::now()) {
                        debug!(job_id = %item.job.id, attempt = item.attempts + 1, "retry due");
                        queue.push(item);
                    }
                }
            }
        }

        queue.close();

        if state.fatal.is_some() {
            control.abort();
        }

        if control.is_stopped() {
            let dropped = state.schedule.clear() + queue.drain().len();
            if dropped > 0 {
                debug!(dropped, "discarding queued and scheduled jobs");
            }
            state.mark_unfinished(dropped);
        }

        if state.outstanding > 0 && !control.is_aborted() {
            drain_events(
                &mut events,
                &mut state,
                &self.stats,
                Instant::now() + self.shutdown_grace,
            )
            .await;
        }

        if state.outstanding > 0 {
            warn!(
                in_flight = state.outstanding,
                "aborting in-flight downloads"
            );
            control.abort();
            drain_events(
                &mut events,
                &mut state,
                &self.stats,
                Instant::now() + ABORT_JOIN_TIMEOUT,
            )
            .await;
        }

        if state.outstanding > 0 {
            warn!(
                in_flight = state.outstanding,
                "workers did not finish after abort, terminating"
            );
            workers.abort_all();
            let remaining = state.outstanding;
            state.mark_unfinished(remaining);
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(err) = joined
                && err.is_panic()
            {
                error!(error = %err, "worker task panicked");
            }
        }

        if let Some(err) = state.fatal {
            error!(error = %err, "run aborted by ledger failure");
            return Err(RunError::Ledger(err));
        }

        let report = state.report;
        info!(
            succeeded = report.succeeded_count,
            failed = report.failed_count,
            skipped = report.skipped_count,
            retried = report.retried_count,
            unfinished = report.unfinished_count,
            bytes = report.bytes_written,
            interrupted = report.interrupted,
            "run complete"
        );

        Ok(report)
    }

    /// Splits the batch into jobs to fetch and jobs skipped up front.
    async fn admit(
        &self,
        jobs: Vec<Job>,
        prior: &HashMap<String, Outcome>,
        report: &mut BatchReport,
    ) -> Result<Vec<Arc<Job>>, RunError> {
        let mut seen = HashSet::with_capacity(jobs.len());
        let mut pending = Vec::with_capacity(jobs.len());

        for job in jobs {
            if !seen.insert(job.id.clone()) {
                debug!(job_id = %job.id, "duplicate job id, skipping");
                report.skipped_count += 1;
                continue;
            }

            if prior.get(&job.id).is_some_and(Outcome::is_succeeded) {
                debug!(job_id = %job.id, "already succeeded, skipping");
                report.skipped_count += 1;
                continue;
            }

            if !self.selects(job.category) {
                self.ledger
                    .record(&Outcome::skipped(&job.id, CATEGORY_NOT_SELECTED))
                    .await?;
                report.skipped_count += 1;
                continue;
            }

            pending.push(Arc::new(job));
        }

        Ok(pending)
    }
}

/// Event-loop bookkeeping for one run.
struct RunState {
    report: BatchReport,
    /// Jobs not yet terminal or unfinished, wherever they currently are.
    outstanding: usize,
    schedule: RetrySchedule,
    fatal: Option<LedgerError>,
}

impl RunState {
    fn apply(&mut self, event: WorkerEvent, stats: &RunStats, draining: bool) {
        match event {
            WorkerEvent::Succeeded { job_id, bytes } => {
                debug!(job_id = %job_id, bytes, "job succeeded");
                self.report.succeeded_count += 1;
                self.report.bytes_written += bytes;
                stats.increment_succeeded();
                self.settle();
            }
            WorkerEvent::Failed { job_id, reason } => {
                debug!(job_id = %job_id, %reason, "job failed");
                self.report.record_failure(job_id, reason);
                stats.increment_failed();
                self.settle();
            }
            WorkerEvent::Skipped { job_id } => {
                debug!(job_id = %job_id, "job skipped");
                self.report.skipped_count += 1;
                stats.increment_skipped();
                self.settle();
            }
            WorkerEvent::RetryScheduled { item, after } => {
                if draining {
                    debug!(job_id = %item.job.id, "retry dropped during shutdown");
                    self.mark_unfinished(1);
                } else {
                    self.report.retried_count += 1;
                    stats.increment_retried();
                    self.schedule.push(item, after);
                }
            }
            WorkerEvent::Aborted { job_id } => {
                debug!(job_id = %job_id, "job interrupted");
                self.mark_unfinished(1);
            }
            WorkerEvent::Fatal(err) => {
                error!(error = %err, "ledger write failed");
                self.mark_unfinished(1);
                if self.fatal.is_none() {
                    self.fatal = Some(err);
                }
            }
        }
    }

    fn settle(&mut self) {
        self.outstanding = self.outstanding.saturating_sub(1);
    }

    fn mark_unfinished(&mut self, count: usize) {
        self.report.unfinished_count += count;
        self.outstanding = self.outstanding.saturating_sub(count);
    }
}

async fn drain_events(
    events: &mut mpsc::UnboundedReceiver<WorkerEvent>,
    state: &mut RunState,
    stats: &RunStats,
    deadline: Instant,
) {
    while state.outstanding > 0 {
        match timeout_at(deadline, events.recv()).await {
            Ok(Some(event)) => state.apply(event, stats, true),
            Ok(None) | Err(_) => break,
        }
    }
}
