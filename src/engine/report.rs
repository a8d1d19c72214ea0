//! Run results: the final [`BatchReport`] and live [`RunStats`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use serde::Serialize;

/// One job that ended the run in `failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureEntry {
    pub job_id: String,
    pub reason: String,
}

/// Summary of a batch run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub succeeded_count: usize,
    pub failed_count: usize,
    /// Already done, duplicate within the batch, or outside the selected
    /// categories.
    pub skipped_count: usize,
    /// Every job that failed, with its reason.
    pub failures: Vec<FailureEntry>,
    /// Number of retry reschedules across all jobs.
    pub retried_count: usize,
    /// Jobs left pending because the run was stopped before they finished.
    pub unfinished_count: usize,
    /// True when the run ended because of a stop or abort request.
    pub interrupted: bool,
    /// Bytes placed by successful downloads in this run.
    pub bytes_written: u64,
}

impl BatchReport {
    /// Jobs that reached `succeeded`, `failed` or `skipped`.
    #[must_use]
    pub fn terminal_count(&self) -> usize {
        self.succeeded_count + self.failed_count + self.skipped_count
    }

    /// All jobs the run was given.
    #[must_use]
    pub fn total(&self) -> usize {
        self.terminal_count() + self.unfinished_count
    }

    pub(crate) fn record_failure(&mut self, job_id: String, reason: String) {
        self.failed_count += 1;
        self.failures.push(FailureEntry { job_id, reason });
    }
}

/// Counters updated while a run is in progress, for progress display.
#[derive(Debug, Default)]
pub struct RunStats {
    total: AtomicUsize,
    succeeded: AtomicUsize,
    failed: AtomicUsize,
    skipped: AtomicUsize,
    retried: AtomicUsize,
    /// Shared with every chunk sink of the run.
    bytes: Arc<AtomicU64>,
}

impl RunStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.succeeded.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn skipped(&self) -> usize {
        self.skipped.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn retried(&self) -> usize {
        self.retried.load(Ordering::SeqCst)
    }

    /// Bytes written to temp files so far, including in-flight downloads.
    #[must_use]
    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    /// Jobs that have reached a terminal state.
    #[must_use]
    pub fn done(&self) -> usize {
        self.succeeded() + self.failed() + self.skipped()
    }

    pub(crate) fn bytes_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.bytes)
    }

    pub(crate) fn reset(&self, total: usize) {
        self.total.store(total, Ordering::SeqCst);
        self.succeeded.store(0, Ordering::SeqCst);
        self.failed.store(0, Ordering::SeqCst);
        self.skipped.store(0, Ordering::SeqCst);
        self.retried.store(0, Ordering::SeqCst);
        self.bytes.store(0, Ordering::Relaxed);
    }

    pub(crate) fn increment_succeeded(&self) {
        self.succeeded.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_failed(&self) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_retried(&self) {
        self.retried.fetch_add(1, Ordering::SeqCst);
    }
}
