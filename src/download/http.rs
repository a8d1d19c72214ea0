//! Streaming HTTP fetcher built on reqwest.
//!
//! Response bodies are consumed with `bytes_stream()` and pushed chunk by
//! chunk into the engine's [`ChunkSink`], so memory stays flat regardless
//! of artifact size and every chunk is rate limited.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use reqwest::header::RETRY_AFTER;
use tracing::{debug, instrument};
use url::Url;

use super::{ChunkSink, FetchError, FetchMeta, Fetcher};
use crate::job::Job;

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default idle timeout between body reads (5 minutes).
///
/// Applied per read, not to the whole transfer, so a rate-limited download
/// may take longer than this in total.
pub const READ_TIMEOUT: Duration = Duration::from_secs(300);

const PROJECT_UA_URL: &str = "https://github.com/fierce/archiver";

fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("archiver/{version} (+{PROJECT_UA_URL})")
}

/// Fetches jobs whose source URL is a direct media link.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Creates a fetcher with default timeouts.
    ///
    /// # Errors
    ///
    /// Returns the reqwest error if the TLS backend cannot be initialized.
    pub fn new() -> Result<Self, reqwest::Error> {
        Self::with_timeouts(CONNECT_TIMEOUT, READ_TIMEOUT)
    }

    /// Creates a fetcher with explicit timeouts.
    ///
    /// # Errors
    ///
    /// Returns the reqwest error if the TLS backend cannot be initialized.
    pub fn with_timeouts(connect: Duration, read: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .connect_timeout(connect)
            .read_timeout(read)
            .gzip(true)
            .user_agent(default_user_agent())
            .build()?;
        Ok(Self { client })
    }

    async fn send(&self, url: &str) -> Result<reqwest::Response, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| map_transport_error(url, &err))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .map(std::string::ToString::to_string);
            return Err(FetchError::http_status_with_retry_after(
                url,
                status.as_u16(),
                retry_after,
            ));
        }
        Ok(response)
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    #[instrument(skip(self, job, sink), fields(job_id = %job.id, url = %job.source_url))]
    async fn fetch(&self, job: &Job, sink: &mut ChunkSink) -> Result<FetchMeta, FetchError> {
        let url = job.source_url.as_str();
        validate_url(url)?;

        let response = self.send(url).await?;
        let expected_len = response.content_length();
        debug!(?expected_len, status = %response.status(), "response received");

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|err| map_transport_error(url, &err))?;
            sink.write(&chunk).await?;
        }

        Ok(FetchMeta { expected_len })
    }
}

fn map_transport_error(url: &str, err: &reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::timeout(url)
    } else {
        FetchError::network(url, err)
    }
}

pub(crate) fn validate_url(url: &str) -> Result<(), FetchError> {
    match Url::parse(url) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => Ok(()),
        _ => Err(FetchError::invalid_url(url)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_url_accepts_http_and_https() {
        assert!(validate_url("https://www.tiktok.com/@user/video/1").is_ok());
        assert!(validate_url("http://127.0.0.1:8080/v.mp4").is_ok());
    }

    #[test]
    fn test_validate_url_rejects_other_schemes_and_garbage() {
        assert!(matches!(
            validate_url("ftp://example.com/v.mp4"),
            Err(FetchError::InvalidUrl { .. })
        ));
        assert!(validate_url("not a url").is_err());
        assert!(validate_url("").is_err());
    }

    #[test]
    fn test_user_agent_carries_version() {
        let ua = default_user_agent();
        assert!(ua.starts_with(&format!("archiver/{}", env!("CARGO_PKG_VERSION"))));
    }
}
