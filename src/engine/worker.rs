//! Worker task: dequeue, fetch, record, report.
//!
//! Workers own the per-job part of the state machine. They write terminal
//! outcomes to the ledger themselves and tell the coordinator what happened
//! through [`WorkerEvent`]s; retry timing is left to the coordinator.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::queue::{JobQueue, WorkItem};
use crate::download::{DownloadContext, FetchError, Fetcher, RetryDecision, RetryPolicy, download_to};
use crate::ledger::{LedgerError, Outcome, ProgressLedger};

/// What happened to one dequeued work item.
#[derive(Debug)]
pub(crate) enum WorkerEvent {
    Succeeded {
        job_id: String,
        bytes: u64,
    },
    Failed {
        job_id: String,
        reason: String,
    },
    Skipped {
        job_id: String,
    },
    RetryScheduled {
        item: WorkItem,
        after: Duration,
    },
    /// Interrupted by abort; nothing was recorded.
    Aborted {
        job_id: String,
    },
    /// The ledger failed; the run cannot continue.
    Fatal(LedgerError),
}

/// Everything a worker needs, shared by the whole pool.
pub(crate) struct WorkerContext {
    pub queue: Arc<JobQueue>,
    pub ledger: Arc<dyn ProgressLedger>,
    pub fetcher: Arc<dyn Fetcher>,
    pub policy: RetryPolicy,
    pub download: DownloadContext,
    pub stop: CancellationToken,
    pub events: mpsc::UnboundedSender<WorkerEvent>,
}

pub(crate) async fn run_worker(worker_id: usize, ctx: Arc<WorkerContext>) {
    debug!(worker_id, "worker started");

    loop {
        let item = tokio::select! {
            biased;
            () = ctx.stop.cancelled() => break,
            item = ctx.queue.pop() => match item {
                Some(item) => item,
                None => break,
            },
        };

        let job_id = item.job.id.clone();
        let attempt = item.attempts + 1;

        let event = match AssertUnwindSafe(process(&ctx, item)).catch_unwind().await {
            Ok(event) => event,
            Err(panic) => {
                let reason = format!("worker panicked: {}", panic_message(panic.as_ref()));
                error!(worker_id, job_id = %job_id, %reason, "job processing panicked");
                record_failure(&ctx, &job_id, reason, attempt).await
            }
        };

        let fatal = matches!(event, WorkerEvent::Fatal(_));
        if ctx.events.send(event).is_err() || fatal {
            break;
        }
    }

    debug!(worker_id, "worker exiting");
}

async fn process(ctx: &WorkerContext, item: WorkItem) -> WorkerEvent {
    let job = Arc::clone(&item.job);

    match ctx.ledger.is_done(&job.id).await {
        Ok(true) => {
            debug!(job_id = %job.id, "already succeeded, skipping");
            return WorkerEvent::Skipped {
                job_id: job.id.clone(),
            };
        }
        Ok(false) => {}
        Err(err) => return WorkerEvent::Fatal(err),
    }

    let attempt = item.attempts + 1;
    debug!(job_id = %job.id, attempt, url = %job.source_url, "fetching");

    match download_to(ctx.fetcher.as_ref(), &job, &ctx.download).await {
        Ok(bytes) => {
            match ctx
                .ledger
                .record(&Outcome::succeeded(&job.id, bytes, attempt))
                .await
            {
                Ok(_) => {
                    info!(job_id = %job.id, bytes, attempt, "download completed");
                    WorkerEvent::Succeeded {
                        job_id: job.id.clone(),
                        bytes,
                    }
                }
                Err(err) => WorkerEvent::Fatal(err),
            }
        }
        Err(FetchError::Cancelled) => {
            debug!(job_id = %job.id, "download aborted");
            WorkerEvent::Aborted {
                job_id: job.id.clone(),
            }
        }
        Err(err) => match ctx.policy.decide(&job, err.kind(), attempt) {
            RetryDecision::Retry { after, .. } => {
                warn!(
                    job_id = %job.id,
                    attempt,
                    error = %err,
                    delay_ms = after.as_millis(),
                    "download failed, will retry"
                );
                WorkerEvent::RetryScheduled {
                    item: WorkItem {
                        job,
                        attempts: attempt,
                    },
                    after,
                }
            }
            RetryDecision::GiveUp { reason } => {
                warn!(job_id = %job.id, attempt, error = %err, %reason, "download failed");
                record_failure(ctx, &job.id, format!("{err} ({reason})"), attempt).await
            }
        },
    }
}

async fn record_failure(
    ctx: &WorkerContext,
    job_id: &str,
    reason: String,
    attempts: u32,
) -> WorkerEvent {
    match ctx
        .ledger
        .record(&Outcome::failed(job_id, reason.clone(), attempts))
        .await
    {
        Ok(true) => WorkerEvent::Failed {
            job_id: job_id.to_string(),
            reason,
        },
        // A success recorded elsewhere wins over this failure.
        Ok(false) => WorkerEvent::Skipped {
            job_id: job_id.to_string(),
        },
        Err(err) => WorkerEvent::Fatal(err),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
