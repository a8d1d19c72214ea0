//! Fetcher that delegates extraction to an external media tool.
//!
//! Export links usually point at web pages rather than media files. This
//! fetcher runs a downloader such as `yt-dlp` with output directed to
//! stdout and streams that output through the engine's sink, so the tool
//! never writes into the output directory itself.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, instrument, warn};

use super::http::validate_url;
use super::{ChunkSink, FetchError, FetchMeta, Fetcher};
use crate::job::Job;

/// Tool invoked when none is configured.
pub const DEFAULT_TOOL: &str = "yt-dlp";

/// Arguments passed before the URL by default: quiet, best merged format,
/// write media to stdout.
pub const DEFAULT_TOOL_ARGS: [&str; 5] = ["--quiet", "--no-progress", "--no-part", "-o", "-"];

const READ_CHUNK: usize = 64 * 1024;

/// Keep only the tail of stderr in error messages.
const STDERR_TAIL: usize = 512;

/// Runs `<program> <args...> <url>` and treats its stdout as the artifact.
#[derive(Debug, Clone)]
pub struct ExternalToolFetcher {
    program: String,
    args: Vec<String>,
}

impl Default for ExternalToolFetcher {
    fn default() -> Self {
        Self::new(DEFAULT_TOOL)
    }
}

impl ExternalToolFetcher {
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: DEFAULT_TOOL_ARGS.iter().map(ToString::to_string).collect(),
        }
    }

    /// Replaces the arguments placed before the URL.
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }
}

#[async_trait]
impl Fetcher for ExternalToolFetcher {
    #[instrument(skip(self, job, sink), fields(job_id = %job.id, tool = %self.program))]
    async fn fetch(&self, job: &Job, sink: &mut ChunkSink) -> Result<FetchMeta, FetchError> {
        let url = job.source_url.as_str();
        validate_url(url)?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| FetchError::ToolUnavailable {
                tool: self.program.clone(),
                source,
            })?;

        let stderr_task = child
            .stderr
            .take()
            .map(|stderr| tokio::spawn(read_tail(stderr)));

        let Some(mut stdout) = child.stdout.take() else {
            return Err(FetchError::network(url, "tool stdout was not captured"));
        };

        let mut buf = vec![0u8; READ_CHUNK];
        loop {
            let n = stdout
                .read(&mut buf)
                .await
                .map_err(|err| FetchError::network(url, err))?;
            if n == 0 {
                break;
            }
            sink.write(&buf[..n]).await?;
        }

        let status = child
            .wait()
            .await
            .map_err(|err| FetchError::network(url, err))?;
        let stderr = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };

        if !status.success() {
            let code = status
                .code()
                .map_or_else(|| "signal".to_string(), |code| code.to_string());
            warn!(%code, "tool exited unsuccessfully");
            return Err(FetchError::ToolFailed {
                tool: self.program.clone(),
                url: url.to_string(),
                code,
                stderr,
            });
        }

        debug!(bytes = sink.bytes_written(), "tool finished");
        Ok(FetchMeta::default())
    }
}

async fn read_tail<R: AsyncRead + Unpin>(mut reader: R) -> String {
    let mut raw = Vec::new();
    if reader.read_to_end(&mut raw).await.is_err() {
        return String::new();
    }
    let text = String::from_utf8_lossy(&raw);
    let trimmed = text.trim();
    let start = trimmed
        .char_indices()
        .rev()
        .nth(STDERR_TAIL - 1)
        .map_or(0, |(idx, _)| idx);
    trimmed[start..].to_string()
}

#[cfg(all(test, unix))]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::download::{DownloadContext, RateLimiter, download_to};
    use crate::job::Category;

    fn job_in(dir: &std::path::Path) -> Job {
        Job::new(
            "history:42",
            "https://www.tiktok.com/@someone/video/42",
            Category::History,
            dir.join("History").join("42.mp4"),
        )
    }

    fn ctx() -> DownloadContext {
        DownloadContext::new(Arc::new(RateLimiter::disabled()), CancellationToken::new())
    }

    #[tokio::test]
    async fn test_external_tool_streams_stdout_into_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let job = job_in(dir.path());
        let fetcher = ExternalToolFetcher::new("sh").with_args(["-c", "printf 'media-bytes'"]);

        let written = download_to(&fetcher, &job, &ctx()).await.unwrap();

        assert_eq!(written, 11);
        assert_eq!(std::fs::read(&job.destination_path).unwrap(), b"media-bytes");
    }

    #[tokio::test]
    async fn test_external_tool_nonzero_exit_is_network_failure() {
        let dir = tempfile::tempdir().unwrap();
        let job = job_in(dir.path());
        let fetcher =
            ExternalToolFetcher::new("sh").with_args(["-c", "echo 'video unavailable' >&2; exit 3"]);

        let err = download_to(&fetcher, &job, &ctx()).await.unwrap_err();

        assert_eq!(err.kind(), crate::download::FailureKind::Network);
        let msg = err.to_string();
        assert!(msg.contains("exit 3"), "{msg}");
        assert!(msg.contains("video unavailable"), "{msg}");
        assert!(!job.destination_path.exists());
    }

    #[tokio::test]
    async fn test_external_tool_missing_binary_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let job = job_in(dir.path());
        let fetcher = ExternalToolFetcher::new("archiver-test-no-such-tool");

        let err = download_to(&fetcher, &job, &ctx()).await.unwrap_err();

        assert!(matches!(err, FetchError::ToolUnavailable { .. }));
        assert_eq!(err.kind(), crate::download::FailureKind::Unsupported);
    }

    #[tokio::test]
    async fn test_external_tool_rejects_non_url_source() {
        let dir = tempfile::tempdir().unwrap();
        let mut job = job_in(dir.path());
        job.source_url = "/etc/passwd".to_string();
        let fetcher = ExternalToolFetcher::new("sh").with_args(["-c", "printf x"]);

        let err = download_to(&fetcher, &job, &ctx()).await.unwrap_err();

        assert!(matches!(err, FetchError::InvalidUrl { .. }));
    }

    #[tokio::test]
    async fn test_read_tail_keeps_last_chars() {
        let long = "x".repeat(STDERR_TAIL * 2) + "END";
        let tail = read_tail(long.as_bytes()).await;
        assert_eq!(tail.chars().count(), STDERR_TAIL);
        assert!(tail.ends_with("END"));
    }
}
