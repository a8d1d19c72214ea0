//! The pluggable fetch capability and the metered sink it writes into.
//!
//! A [`Fetcher`] knows how to obtain the bytes of one job; it never touches
//! the destination path itself. Bytes go through a [`ChunkSink`] owned by
//! the engine, which charges each chunk against the shared
//! [`RateLimiter`], writes it to the job's temp file and observes the abort
//! signal.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;

use super::{FetchError, RateLimiter};
use crate::job::Job;

/// What a fetcher learned about the resource while streaming it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchMeta {
    /// Length announced by the source, when known.
    pub expected_len: Option<u64>,
}

/// Streams one job's resource into a sink.
///
/// Implementations return [`FetchError`] for anything that goes wrong;
/// sink errors must be propagated unchanged so cancellation and disk
/// failures keep their classification.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, job: &Job, sink: &mut ChunkSink) -> Result<FetchMeta, FetchError>;
}

/// Rate-limited, cancellable writer for one in-progress artifact.
#[derive(Debug)]
pub struct ChunkSink {
    path: PathBuf,
    writer: BufWriter<File>,
    limiter: Arc<RateLimiter>,
    abort: CancellationToken,
    written: u64,
    progress: Option<Arc<AtomicU64>>,
}

impl ChunkSink {
    pub(crate) fn new(
        path: PathBuf,
        file: File,
        limiter: Arc<RateLimiter>,
        abort: CancellationToken,
    ) -> Self {
        Self {
            path,
            writer: BufWriter::new(file),
            limiter,
            abort,
            written: 0,
            progress: None,
        }
    }

    /// Also adds every written byte to `counter`.
    #[must_use]
    pub fn with_progress(mut self, counter: Arc<AtomicU64>) -> Self {
        self.progress = Some(counter);
        self
    }

    /// Meters and writes one chunk.
    ///
    /// # Errors
    ///
    /// - [`FetchError::Cancelled`] once the abort signal is raised, including
    ///   while waiting for rate budget.
    /// - [`FetchError::DestinationUnwritable`] when the write fails.
    pub async fn write(&mut self, chunk: &[u8]) -> Result<(), FetchError> {
        if self.abort.is_cancelled() {
            return Err(FetchError::Cancelled);
        }
        if chunk.is_empty() {
            return Ok(());
        }

        let len = chunk.len() as u64;
        tokio::select! {
            biased;
            () = self.abort.cancelled() => return Err(FetchError::Cancelled),
            () = self.limiter.acquire(len) => {}
        }

        self.writer
            .write_all(chunk)
            .await
            .map_err(|err| FetchError::unwritable(&self.path, err))?;
        self.written += len;
        if let Some(progress) = &self.progress {
            progress.fetch_add(len, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Bytes accepted so far.
    #[must_use]
    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    /// True once the run has been aborted. Fetchers with long waits that do
    /// not go through [`ChunkSink::write`] should poll this or
    /// [`ChunkSink::aborted`].
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.abort.is_cancelled()
    }

    /// Resolves when the run is aborted.
    pub async fn aborted(&self) {
        self.abort.cancelled().await;
    }

    /// Temp file the sink writes to.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flushes buffered data and syncs the file to disk.
    pub(crate) async fn finish(mut self) -> Result<(PathBuf, u64), FetchError> {
        self.writer
            .flush()
            .await
            .map_err(|err| FetchError::unwritable(&self.path, err))?;
        self.writer
            .get_ref()
            .sync_all()
            .await
            .map_err(|err| FetchError::unwritable(&self.path, err))?;
        Ok((self.path, self.written))
    }
}
