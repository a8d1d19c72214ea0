//! Error types for the download module.
//!
//! [`FetchError`] carries the full context of a failed attempt and is what
//! ends up in the ledger as a failure reason. [`FailureKind`] is the coarse
//! classification the retry policy decides on.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use super::rate_limiter::parse_retry_after;

/// Classification of a failed attempt, as seen by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Connection reset, timeout or other transport failure.
    Network,
    /// Non-success HTTP status, with the server's retry-after hint if any.
    Http {
        status: u16,
        retry_after: Option<Duration>,
    },
    /// The artifact failed post-download checks.
    VerificationFailed,
    /// The destination could not be written.
    DestinationUnwritable,
    /// The run was aborted while the attempt was in flight.
    Cancelled,
    /// The job can never succeed with the configured fetcher.
    Unsupported,
}

impl FailureKind {
    /// Short label used in logs.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Network => "network_error",
            Self::Http { .. } => "http_error",
            Self::VerificationFailed => "verification_failed",
            Self::DestinationUnwritable => "destination_unwritable",
            Self::Cancelled => "cancelled",
            Self::Unsupported => "unsupported",
        }
    }
}

/// Errors that can occur while fetching one job.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS resolution, connection refused, reset, TLS).
    #[error("network error downloading {url}: {message}")]
    Network { url: String, message: String },

    /// Request timed out before completion.
    #[error("timeout downloading {url}")]
    Timeout { url: String },

    /// HTTP error response.
    #[error("HTTP {status} downloading {url}")]
    HttpStatus {
        url: String,
        status: u16,
        /// Raw Retry-After header value, if present.
        retry_after: Option<String>,
    },

    /// External tool ran but exited unsuccessfully.
    #[error("{tool} failed for {url} (exit {code}): {stderr}")]
    ToolFailed {
        tool: String,
        url: String,
        code: String,
        stderr: String,
    },

    /// Downloaded artifact did not pass verification.
    #[error("verification failed for {path}: {reason}")]
    Verification { path: PathBuf, reason: String },

    /// File system error while writing the artifact.
    #[error("cannot write {path}: {source}")]
    DestinationUnwritable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The provided URL is malformed or uses an unsupported scheme.
    #[error("invalid URL: {url}")]
    InvalidUrl { url: String },

    /// The external tool could not be started.
    #[error(
        "cannot run {tool}: {source}\n  Suggestion: Install it or set the tool path in the config file"
    )]
    ToolUnavailable {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    /// The attempt was aborted by run control.
    #[error("download cancelled")]
    Cancelled,
}

impl FetchError {
    /// Creates a network error from any displayable cause.
    pub fn network(url: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        Self::Network {
            url: url.into(),
            message: cause.to_string(),
        }
    }

    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after: None,
        }
    }

    pub fn http_status_with_retry_after(
        url: impl Into<String>,
        status: u16,
        retry_after: Option<String>,
    ) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after,
        }
    }

    pub fn verification(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Verification {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn unwritable(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::DestinationUnwritable {
            path: path.into(),
            source,
        }
    }

    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Classifies this error for the retry policy.
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Network { .. } | Self::Timeout { .. } | Self::ToolFailed { .. } => {
                FailureKind::Network
            }
            Self::HttpStatus {
                status,
                retry_after,
                ..
            } => FailureKind::Http {
                status: *status,
                retry_after: retry_after.as_deref().and_then(parse_retry_after),
            },
            Self::Verification { .. } => FailureKind::VerificationFailed,
            Self::DestinationUnwritable { .. } => FailureKind::DestinationUnwritable,
            Self::InvalidUrl { .. } | Self::ToolUnavailable { .. } => FailureKind::Unsupported,
            Self::Cancelled => FailureKind::Cancelled,
        }
    }
}
