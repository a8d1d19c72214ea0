//! Fetching, metering and placing individual artifacts.
//!
//! This module holds everything that happens to a single job's bytes:
//!
//! - [`Fetcher`] - the pluggable source of bytes ([`HttpFetcher`],
//!   [`ExternalToolFetcher`], or a test fake)
//! - [`ChunkSink`] - the rate-limited, cancellable writer fetchers push into
//! - [`RateLimiter`] - the global token bucket shared by every sink
//! - [`download_to`] - temp file, verification and atomic rename
//! - [`RetryPolicy`] - what to do after a failed attempt
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use archiver_core::download::{DownloadContext, HttpFetcher, RateLimiter, download_to};
//! use archiver_core::{Category, Job};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let fetcher = HttpFetcher::new()?;
//! let ctx = DownloadContext::new(Arc::new(RateLimiter::new(1024 * 1024)), CancellationToken::new());
//! let job = Job::new("liked:1", "https://example.com/v.mp4", Category::Liked, "out/Likes/1.mp4");
//! let bytes = download_to(&fetcher, &job, &ctx).await?;
//! println!("wrote {bytes} bytes");
//! # Ok(())
//! # }
//! ```

mod artifact;
mod error;
mod external;
mod fetcher;
mod http;
pub mod rate_limiter;
mod retry;

pub use artifact::{DownloadContext, PART_SUFFIX, download_to, part_path};
pub use error::{FailureKind, FetchError};
pub use external::{DEFAULT_TOOL, DEFAULT_TOOL_ARGS, ExternalToolFetcher};
pub use fetcher::{ChunkSink, FetchMeta, Fetcher};
pub use http::{CONNECT_TIMEOUT, HttpFetcher, READ_TIMEOUT};
pub use rate_limiter::{InvalidByteRate, RateLimiter, parse_byte_rate, parse_retry_after};
pub use retry::{
    DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY, DEFAULT_MAX_RETRIES, RetryDecision, RetryPolicy,
};
