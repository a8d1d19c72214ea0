//! Process-wide bandwidth limiting for download streams.
//!
//! This module provides the [`RateLimiter`] struct, a token bucket shared by
//! every in-flight download. Each chunk a fetcher writes is charged against
//! the bucket before it reaches disk, so the aggregate throughput of all
//! workers stays under one global ceiling.
//!
//! # Overview
//!
//! - Tokens are bytes, refilled continuously at the configured rate.
//! - The bucket holds at most one second of budget and starts empty, so the
//!   long-run average is bounded from the very first byte.
//! - A request larger than what is available is granted by going into debt;
//!   the caller sleeps until the debt is repaid. Only that caller waits.
//! - Callers are served in request order: the bucket sits behind a fair
//!   [`tokio::sync::Mutex`] that is held for the whole wait.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use archiver_core::download::RateLimiter;
//!
//! # async fn example() {
//! // 1 MiB/s shared by all workers
//! let limiter = Arc::new(RateLimiter::new(1024 * 1024));
//!
//! let chunk = vec![0u8; 64 * 1024];
//! limiter.acquire(chunk.len() as u64).await;
//! // ... write chunk
//! # }
//! ```

use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

/// Maximum Retry-After value (1 hour) to prevent excessive delays.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Waits longer than this are logged at debug level.
const SLOW_ACQUIRE_THRESHOLD: Duration = Duration::from_secs(5);

/// Global token-bucket rate limiter.
///
/// Wrap in `Arc` and share across worker tasks.
#[derive(Debug)]
pub struct RateLimiter {
    /// Refill rate in bytes per second; 0 means unlimited.
    bytes_per_second: u64,

    /// `None` when limiting is disabled.
    bucket: Option<Mutex<Bucket>>,
}

#[derive(Debug)]
struct Bucket {
    /// Available bytes; negative while in debt.
    tokens: f64,
    capacity: f64,
    last_refill: Instant,
}

impl Bucket {
    fn refill(&mut self, rate: f64) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * rate).min(self.capacity);
        self.last_refill = now;
    }
}

impl RateLimiter {
    /// Creates a limiter allowing `bytes_per_second` on average.
    ///
    /// A rate of `0` disables limiting.
    #[must_use]
    pub fn new(bytes_per_second: u64) -> Self {
        if bytes_per_second == 0 {
            return Self::disabled();
        }

        #[allow(clippy::cast_precision_loss)]
        let capacity = bytes_per_second as f64;
        Self {
            bytes_per_second,
            bucket: Some(Mutex::new(Bucket {
                tokens: 0.0,
                capacity,
                last_refill: Instant::now(),
            })),
        }
    }

    /// Creates a limiter that never waits.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            bytes_per_second: 0,
            bucket: None,
        }
    }

    /// Returns true when limiting is disabled.
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.bucket.is_none()
    }

    /// Configured rate in bytes per second (0 when disabled).
    #[must_use]
    pub fn bytes_per_second(&self) -> u64 {
        self.bytes_per_second
    }

    /// Waits until `n_bytes` of budget is available and consumes it.
    ///
    /// Cancel-safe: dropping the future while it waits leaves the charge in
    /// place, which only delays later callers.
    pub async fn acquire(&self, n_bytes: u64) {
        let Some(bucket) = &self.bucket else {
            return;
        };
        if n_bytes == 0 {
            return;
        }

        #[allow(clippy::cast_precision_loss)]
        let rate = self.bytes_per_second as f64;

        let mut state = bucket.lock().await;
        state.refill(rate);

        #[allow(clippy::cast_precision_loss)]
        {
            state.tokens -= n_bytes as f64;
        }

        if state.tokens < 0.0 {
            let wait = Duration::from_secs_f64(-state.tokens / rate);
            if wait >= SLOW_ACQUIRE_THRESHOLD {
                debug!(n_bytes, wait_ms = wait.as_millis(), "rate limit wait");
            } else {
                trace!(n_bytes, wait_ms = wait.as_millis(), "rate limit wait");
            }
            // Holding the lock keeps later callers queued behind this one.
            tokio::time::sleep(wait).await;
        }
    }
}

/// Returned when a byte rate string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid rate '{0}'\n  Suggestion: Use a byte count with an optional K, M or G suffix, e.g. 10M")]
pub struct InvalidByteRate(pub String);

/// Parses a human byte rate such as `10M`, `512K`, `1.5M` or `2048`.
///
/// Suffixes are binary multiples; a trailing `B`, `/s` or `iB` is accepted.
/// `0` means unlimited.
///
/// # Errors
///
/// Returns [`InvalidByteRate`] for empty, negative or malformed input.
pub fn parse_byte_rate(value: &str) -> Result<u64, InvalidByteRate> {
    let invalid = || InvalidByteRate(value.to_string());

    let mut text = value.trim().to_ascii_uppercase();
    if let Some(stripped) = text.strip_suffix("/S") {
        text = stripped.to_string();
    }
    if let Some(stripped) = text.strip_suffix("IB") {
        text = format!("{stripped}B");
    }
    if text.len() > 1 && text.ends_with('B') {
        text.pop();
    }

    let (number, multiplier) = match text.chars().last() {
        Some('K') => (&text[..text.len() - 1], 1024_f64),
        Some('M') => (&text[..text.len() - 1], 1024_f64 * 1024.0),
        Some('G') => (&text[..text.len() - 1], 1024_f64 * 1024.0 * 1024.0),
        Some(_) => (text.as_str(), 1_f64),
        None => return Err(invalid()),
    };

    let amount: f64 = number.trim().parse().map_err(|_| invalid())?;
    if !amount.is_finite() || amount < 0.0 {
        return Err(invalid());
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    Ok((amount * multiplier).round() as u64)
}

/// Parses a `Retry-After` header value into a delay.
///
/// Accepts integer seconds or an HTTP-date. Values over one hour are capped;
/// negative values are ignored; past dates mean "retry now".
#[must_use]
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    let header_value = header_value.trim();

    if let Ok(seconds) = header_value.parse::<i64>() {
        if seconds < 0 {
            debug!(seconds, "negative Retry-After value, ignoring");
            return None;
        }

        #[allow(clippy::cast_sign_loss)]
        let duration = Duration::from_secs(seconds as u64);
        if duration > MAX_RETRY_AFTER {
            warn!(seconds, "Retry-After exceeds maximum, capping at 1 hour");
            return Some(MAX_RETRY_AFTER);
        }
        return Some(duration);
    }

    match httpdate::parse_http_date(header_value) {
        Ok(datetime) => match datetime.duration_since(std::time::SystemTime::now()) {
            Ok(duration) => Some(duration.min(MAX_RETRY_AFTER)),
            Err(_) => Some(Duration::ZERO),
        },
        Err(_) => {
            debug!(header_value, "unparseable Retry-After value");
            None
        }
    }
}
