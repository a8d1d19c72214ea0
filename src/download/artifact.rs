//! Atomic placement of downloaded artifacts.
//!
//! Every fetch writes to `<destination>.part`. Only after the data is
//! flushed, synced and verified is the temp file renamed over the
//! destination, and the parent directory synced so the rename itself is
//! durable. Readers therefore see either no file or a complete one.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicU64;

use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use super::{ChunkSink, FetchError, FetchMeta, Fetcher, RateLimiter};
use crate::job::Job;

/// Suffix appended to the destination while a download is in progress.
pub const PART_SUFFIX: &str = ".part";

/// Returns the temp path used while downloading to `destination`.
#[must_use]
pub fn part_path(destination: &Path) -> PathBuf {
    let mut name: OsString = destination.as_os_str().to_owned();
    name.push(PART_SUFFIX);
    PathBuf::from(name)
}

/// Shared resources every download draws on.
#[derive(Debug, Clone)]
pub struct DownloadContext {
    pub limiter: Arc<RateLimiter>,
    pub abort: CancellationToken,
    /// Optional running total of bytes written across all jobs.
    pub progress: Option<Arc<AtomicU64>>,
}

impl DownloadContext {
    #[must_use]
    pub fn new(limiter: Arc<RateLimiter>, abort: CancellationToken) -> Self {
        Self {
            limiter,
            abort,
            progress: None,
        }
    }
}

/// Fetches `job` and atomically places the artifact at its destination.
///
/// Returns the number of bytes written. On any error the temp file is
/// removed and the destination is left as it was.
///
/// # Errors
///
/// Whatever the fetcher returns, plus [`FetchError::Verification`] and
/// [`FetchError::DestinationUnwritable`] from placement.
#[instrument(skip(fetcher, ctx), fields(job_id = %job.id))]
pub async fn download_to(
    fetcher: &dyn Fetcher,
    job: &Job,
    ctx: &DownloadContext,
) -> Result<u64, FetchError> {
    let mut sink = begin(&job.destination_path, ctx).await?;
    let part = sink.path().to_path_buf();

    let fetched = tokio::select! {
        biased;
        () = ctx.abort.cancelled() => Err(FetchError::Cancelled),
        result = fetcher.fetch(job, &mut sink) => result,
    };

    let result = match fetched {
        Ok(meta) => commit(sink, &job.destination_path, meta).await,
        Err(err) => {
            drop(sink);
            Err(err)
        }
    };

    if result.is_err() {
        discard(&part).await;
    }
    result
}

/// Prepares the destination directory and opens a fresh temp file.
///
/// A stale temp file left by an earlier crash is replaced.
///
/// # Errors
///
/// Returns [`FetchError::DestinationUnwritable`] if the directory or file
/// cannot be created.
async fn begin(destination: &Path, ctx: &DownloadContext) -> Result<ChunkSink, FetchError> {
    if let Some(parent) = destination.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .await
            .map_err(|err| FetchError::unwritable(parent, err))?;
    }

    let part = part_path(destination);
    match fs::remove_file(&part).await {
        Ok(()) => debug!(path = %part.display(), "removed stale temp file"),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => return Err(FetchError::unwritable(&part, err)),
    }

    let file = fs::File::create(&part)
        .await
        .map_err(|err| FetchError::unwritable(&part, err))?;

    let sink = ChunkSink::new(part, file, Arc::clone(&ctx.limiter), ctx.abort.clone());
    Ok(match &ctx.progress {
        Some(counter) => sink.with_progress(Arc::clone(counter)),
        None => sink,
    })
}

/// Syncs, verifies and renames a finished temp file into place.
///
/// # Errors
///
/// Returns [`FetchError::Verification`] when the artifact is empty, its
/// on-disk size differs from the bytes written, or it does not match the
/// length the source announced. Rename failures are
/// [`FetchError::DestinationUnwritable`].
async fn commit(
    sink: ChunkSink,
    destination: &Path,
    meta: FetchMeta,
) -> Result<u64, FetchError> {
    let (part, written) = sink.finish().await?;

    verify(&part, written, meta).await?;

    fs::rename(&part, destination)
        .await
        .map_err(|err| FetchError::unwritable(destination, err))?;
    sync_parent_dir(destination).await;

    debug!(path = %destination.display(), bytes = written, "artifact placed");
    Ok(written)
}

async fn verify(part: &Path, written: u64, meta: FetchMeta) -> Result<(), FetchError> {
    if written == 0 {
        return Err(FetchError::verification(part, "empty artifact"));
    }

    let on_disk = fs::metadata(part)
        .await
        .map_err(|err| FetchError::unwritable(part, err))?
        .len();
    if on_disk != written {
        return Err(FetchError::verification(
            part,
            format!("wrote {written} bytes but file holds {on_disk}"),
        ));
    }

    if let Some(expected) = meta.expected_len
        && expected != written
    {
        return Err(FetchError::verification(
            part,
            format!("expected {expected} bytes, got {written}"),
        ));
    }

    Ok(())
}

/// Best-effort removal of a temp file.
async fn discard(part: &Path) {
    match fs::remove_file(part).await {
        Ok(()) => debug!(path = %part.display(), "removed temp file"),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => warn!(path = %part.display(), error = %err, "failed to remove temp file"),
    }
}

/// Makes the rename durable. Platforms that cannot open directories skip it.
async fn sync_parent_dir(path: &Path) {
    if let Some(parent) = path.parent()
        && let Ok(dir) = fs::File::open(parent).await
        && let Err(err) = dir.sync_all().await
    {
        debug!(path = %parent.display(), error = %err, "directory sync failed");
    }
}
