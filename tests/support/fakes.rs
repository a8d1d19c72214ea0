//! Fault-injecting fetchers and ledgers for engine tests.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use archiver_core::download::{ChunkSink, FetchError, FetchMeta, Fetcher};
use archiver_core::ledger::{LedgerDbErrorKind, LedgerError, Outcome, ProgressLedger, SqliteLedger};
use archiver_core::{Category, Job};
use async_trait::async_trait;
use tokio::sync::Notify;

/// What a [`ScriptedFetcher`] does for one job.
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Write the body and succeed.
    Succeed(Vec<u8>),
    /// Fail `times` attempts with HTTP 503, then write the body.
    FailThenSucceed { times: usize, body: Vec<u8> },
    /// Always fail with a network error.
    AlwaysNetworkError,
    /// Always fail with this HTTP status.
    HttpStatus(u16),
    /// Write the body but announce a different length.
    WrongLength { body: Vec<u8>, announced: u64 },
    /// Write `chunks` chunks of `chunk_size` bytes through the rate limiter.
    Stream { chunk_size: usize, chunks: usize },
    /// Signal `started`, then wait until the download is aborted.
    BlockUntilAborted,
    /// Panic inside the fetch call.
    Panic,
}

/// Fetcher whose behavior is scripted per job id.
pub struct ScriptedFetcher {
    default: Behavior,
    overrides: HashMap<String, Behavior>,
    calls: Mutex<HashMap<String, Vec<Instant>>>,
    total_calls: AtomicUsize,
    pub started: Notify,
}

impl ScriptedFetcher {
    pub fn new(default: Behavior) -> Self {
        Self {
            default,
            overrides: HashMap::new(),
            calls: Mutex::new(HashMap::new()),
            total_calls: AtomicUsize::new(0),
            started: Notify::new(),
        }
    }

    pub fn with(mut self, job_id: &str, behavior: Behavior) -> Self {
        self.overrides.insert(job_id.to_string(), behavior);
        self
    }

    pub fn total_calls(&self) -> usize {
        self.total_calls.load(Ordering::SeqCst)
    }

    pub fn calls_for(&self, job_id: &str) -> Vec<Instant> {
        self.calls
            .lock()
            .unwrap()
            .get(job_id)
            .cloned()
            .unwrap_or_default()
    }

    fn record_call(&self, job_id: &str) -> usize {
        self.total_calls.fetch_add(1, Ordering::SeqCst);
        let mut calls = self.calls.lock().unwrap();
        let entry = calls.entry(job_id.to_string()).or_default();
        entry.push(Instant::now());
        entry.len()
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, job: &Job, sink: &mut ChunkSink) -> Result<FetchMeta, FetchError> {
        let attempt = self.record_call(&job.id);
        let behavior = self.overrides.get(&job.id).unwrap_or(&self.default).clone();

        match behavior {
            Behavior::Succeed(body) => {
                sink.write(&body).await?;
                Ok(FetchMeta {
                    expected_len: Some(body.len() as u64),
                })
            }
            Behavior::FailThenSucceed { times, body } => {
                if attempt <= times {
                    return Err(FetchError::http_status(&job.source_url, 503));
                }
                sink.write(&body).await?;
                Ok(FetchMeta::default())
            }
            Behavior::AlwaysNetworkError => {
                Err(FetchError::network(&job.source_url, "connection reset by peer"))
            }
            Behavior::HttpStatus(status) => Err(FetchError::http_status(&job.source_url, status)),
            Behavior::WrongLength { body, announced } => {
                sink.write(&body).await?;
                Ok(FetchMeta {
                    expected_len: Some(announced),
                })
            }
            Behavior::Stream { chunk_size, chunks } => {
                let chunk = vec![b'x'; chunk_size];
                for _ in 0..chunks {
                    sink.write(&chunk).await?;
                }
                Ok(FetchMeta {
                    expected_len: Some((chunk_size * chunks) as u64),
                })
            }
            Behavior::BlockUntilAborted => {
                self.started.notify_one();
                sink.aborted().await;
                Err(FetchError::Cancelled)
            }
            Behavior::Panic => panic!("fetcher exploded on {}", job.id),
        }
    }
}

/// Ledger that delegates to `SQLite` but can be told to fail.
pub struct FlakyLedger {
    inner: SqliteLedger,
    fail_load: bool,
    /// Records allowed to succeed before every later record fails.
    records_before_failure: Option<usize>,
    records: AtomicUsize,
}

impl FlakyLedger {
    pub async fn failing_load() -> Self {
        Self::build(true, None).await
    }

    pub async fn failing_after(records: usize) -> Self {
        Self::build(false, Some(records)).await
    }

    async fn build(fail_load: bool, records_before_failure: Option<usize>) -> Self {
        Self {
            inner: SqliteLedger::in_memory().await.unwrap(),
            fail_load,
            records_before_failure,
            records: AtomicUsize::new(0),
        }
    }

    fn disk_full() -> LedgerError {
        LedgerError::Database {
            kind: LedgerDbErrorKind::Io,
            message: "disk I/O error".to_string(),
        }
    }
}

#[async_trait]
impl ProgressLedger for FlakyLedger {
    async fn load(&self) -> archiver_core::ledger::Result<HashMap<String, Outcome>> {
        if self.fail_load {
            return Err(Self::disk_full());
        }
        self.inner.load().await
    }

    async fn record(&self, outcome: &Outcome) -> archiver_core::ledger::Result<bool> {
        let count = self.records.fetch_add(1, Ordering::SeqCst);
        if self
            .records_before_failure
            .is_some_and(|allowed| count >= allowed)
        {
            return Err(Self::disk_full());
        }
        self.inner.record(outcome).await
    }

    async fn is_done(&self, job_id: &str) -> archiver_core::ledger::Result<bool> {
        self.inner.is_done(job_id).await
    }
}

/// Builds a job whose destination lives under `root`.
pub fn job(root: &Path, category: Category, key: &str) -> Job {
    Job::new(
        format!("{category}:{key}"),
        format!("https://media.example.com/video/{key}"),
        category,
        root.join(category.folder_name()).join(format!("{key}.mp4")),
    )
}

/// Gaps between consecutive instants.
pub fn gaps(instants: &[Instant]) -> Vec<Duration> {
    instants
        .windows(2)
        .map(|pair| pair[1].duration_since(pair[0]))
        .collect()
}
