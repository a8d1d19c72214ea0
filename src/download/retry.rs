//! Retry decisions with exponential backoff for failed download attempts.
//!
//! The [`RetryPolicy`] looks at the [`FailureKind`] of a failed attempt and
//! the number of attempts made so far and answers with a [`RetryDecision`].
//!
//! # Classification
//!
//! | Failure | Retried? | Delay |
//! |---------|----------|-------|
//! | `network_error` | yes | backoff |
//! | `http_error` 5xx | yes | backoff |
//! | `http_error` 429 | yes | Retry-After hint, else backoff |
//! | `http_error` other 4xx | no | |
//! | `verification_failed` | yes | backoff |
//! | `destination_unwritable` | no | |
//! | `cancelled` | no | |
//! | `unsupported` | no | |
//!
//! # Example
//!
//! ```
//! use archiver_core::download::{FetchError, RetryDecision, RetryPolicy};
//! use archiver_core::{Category, Job};
//!
//! let policy = RetryPolicy::default();
//! let job = Job::new("liked:1", "https://example.com/v.mp4", Category::Liked, "out/Likes/1.mp4");
//! let error = FetchError::http_status("https://example.com/v.mp4", 503);
//!
//! match policy.decide(&job, error.kind(), 1) {
//!     RetryDecision::Retry { after, attempt } => {
//!         println!("attempt {attempt} in {after:?}");
//!     }
//!     RetryDecision::GiveUp { reason } => println!("giving up: {reason}"),
//! }
//! ```

use std::time::Duration;

use rand::Rng;
use tracing::{debug, instrument};

use super::FailureKind;
use crate::job::Job;

/// Default maximum attempts per job, including the first.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default base delay for exponential backoff (1 second).
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default maximum delay cap (32 seconds).
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(32);

const BACKOFF_MULTIPLIER: f64 = 2.0;

/// Upper bound for random jitter (500ms).
const MAX_JITTER: Duration = Duration::from_millis(500);

/// Decision on whether to retry a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-enqueue the job once `after` has elapsed.
    Retry {
        after: Duration,
        /// The attempt number the retry will be (first retry is attempt 2).
        attempt: u32,
    },

    /// Record a terminal failure.
    GiveUp { reason: String },
}

/// Retry configuration with exponential backoff.
///
/// Delay for the retry after attempt `n`:
///
/// ```text
/// min(base_delay * 2^(n-1), max_delay) + jitter,  jitter <= min(500ms, base_delay/2)
/// ```
///
/// Keeping jitter under half the base delay means successive delays always
/// grow until the cap is reached.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy; `max_attempts` is clamped to at least 1.
    #[must_use]
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: max_delay.max(base_delay),
            jitter: true,
        }
    }

    /// Creates a policy with a custom `max_attempts`, using defaults otherwise.
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Disables random jitter, making delays deterministic.
    #[must_use]
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Decides what to do after `attempt` (1-indexed) failed with `kind`.
    #[instrument(skip(self, job), fields(job_id = %job.id, kind = kind.label()))]
    pub fn decide(&self, job: &Job, kind: FailureKind, attempt: u32) -> RetryDecision {
        let hint = match kind {
            FailureKind::Network | FailureKind::VerificationFailed => None,
            FailureKind::Http { status, .. } if (500..600).contains(&status) => None,
            FailureKind::Http {
                status: 429,
                retry_after,
            } => retry_after,
            FailureKind::Http { status, .. } => {
                return RetryDecision::GiveUp {
                    reason: format!("HTTP {status} is not retryable"),
                };
            }
            FailureKind::DestinationUnwritable => {
                return RetryDecision::GiveUp {
                    reason: "destination is not writable".to_string(),
                };
            }
            FailureKind::Cancelled => {
                return RetryDecision::GiveUp {
                    reason: "cancelled".to_string(),
                };
            }
            FailureKind::Unsupported => {
                return RetryDecision::GiveUp {
                    reason: "unsupported by the configured fetcher".to_string(),
                };
            }
        };

        if attempt >= self.max_attempts {
            debug!(attempt, max = self.max_attempts, "max attempts reached");
            return RetryDecision::GiveUp {
                reason: format!("max attempts ({}) exhausted", self.max_attempts),
            };
        }

        let after = hint.unwrap_or_else(|| self.backoff(attempt));
        debug!(
            attempt,
            next_attempt = attempt + 1,
            delay_ms = after.as_millis(),
            "will retry"
        );

        RetryDecision::Retry {
            after,
            attempt: attempt + 1,
        }
    }

    /// Exponential delay for the retry following `attempt`, jitter included.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let raw = self.base_delay.as_secs_f64() * BACKOFF_MULTIPLIER.powi(exponent);
        let capped = if raw.is_finite() {
            Duration::from_secs_f64(raw.min(self.max_delay.as_secs_f64()))
        } else {
            self.max_delay
        };
        capped + self.jitter()
    }

    fn jitter(&self) -> Duration {
        if !self.jitter {
            return Duration::ZERO;
        }
        let bound = MAX_JITTER.min(self.base_delay / 2);
        #[allow(clippy::cast_possible_truncation)]
        let bound_ms = bound.as_millis() as u64;
        if bound_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=bound_ms))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::job::Category;

    fn job() -> Job {
        Job::new("liked:1", "https://example.com/1", Category::Liked, "/tmp/1.mp4")
    }

    fn http(status: u16) -> FailureKind {
        FailureKind::Http {
            status,
            retry_after: None,
        }
    }

    // ==================== RetryPolicy Tests ====================

    #[test]
    fn test_retry_policy_default_values() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_delay, Duration::from_secs(1));
        assert_eq!(policy.max_delay, Duration::from_secs(32));
    }

    #[test]
    fn test_retry_policy_max_attempts_minimum_is_one() {
        let policy = RetryPolicy::with_max_attempts(0);
        assert_eq!(policy.max_attempts(), 1);
        assert!(matches!(
            policy.decide(&job(), FailureKind::Network, 1),
            RetryDecision::GiveUp { .. }
        ));
    }

    // ==================== Classification Tests ====================

    #[test]
    fn test_decide_retries_transient_kinds() {
        let policy = RetryPolicy::default().without_jitter();
        for kind in [
            FailureKind::Network,
            FailureKind::VerificationFailed,
            http(500),
            http(503),
        ] {
            assert_eq!(
                policy.decide(&job(), kind, 1),
                RetryDecision::Retry {
                    after: Duration::from_secs(1),
                    attempt: 2
                },
                "{kind:?} should retry"
            );
        }
    }

    #[test]
    fn test_decide_never_retries_permanent_kinds() {
        let policy = RetryPolicy::default();
        for kind in [
            http(400),
            http(403),
            http(404),
            http(408),
            FailureKind::DestinationUnwritable,
            FailureKind::Cancelled,
            FailureKind::Unsupported,
        ] {
            assert!(
                matches!(policy.decide(&job(), kind, 1), RetryDecision::GiveUp { .. }),
                "{kind:?} should not retry"
            );
        }
    }

    #[test]
    fn test_decide_404_reason_mentions_status() {
        let policy = RetryPolicy::default();
        let RetryDecision::GiveUp { reason } = policy.decide(&job(), http(404), 1) else {
            panic!("expected give up");
        };
        assert!(reason.contains("404"));
    }

    #[test]
    fn test_decide_429_uses_retry_after_hint() {
        let policy = RetryPolicy::default();
        let kind = FailureKind::Http {
            status: 429,
            retry_after: Some(Duration::from_secs(9)),
        };
        assert_eq!(
            policy.decide(&job(), kind, 1),
            RetryDecision::Retry {
                after: Duration::from_secs(9),
                attempt: 2
            }
        );
    }

    #[test]
    fn test_decide_429_without_hint_uses_backoff() {
        let policy = RetryPolicy::default().without_jitter();
        assert_eq!(
            policy.decide(&job(), http(429), 2),
            RetryDecision::Retry {
                after: Duration::from_secs(2),
                attempt: 3
            }
        );
    }

    #[test]
    fn test_decide_gives_up_after_max_attempts() {
        let policy = RetryPolicy::with_max_attempts(3);
        assert!(matches!(
            policy.decide(&job(), FailureKind::Network, 2),
            RetryDecision::Retry { attempt: 3, .. }
        ));
        let RetryDecision::GiveUp { reason } = policy.decide(&job(), FailureKind::Network, 3)
        else {
            panic!("expected give up");
        };
        assert_eq!(reason, "max attempts (3) exhausted");
    }

    // ==================== Delay Calculation Tests ====================

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy =
            RetryPolicy::new(10, Duration::from_secs(1), Duration::from_secs(8)).without_jitter();
        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(2), Duration::from_secs(2));
        assert_eq!(policy.backoff(3), Duration::from_secs(4));
        assert_eq!(policy.backoff(4), Duration::from_secs(8));
        assert_eq!(policy.backoff(9), Duration::from_secs(8));
    }

    #[test]
    fn test_backoff_jitter_is_bounded() {
        let policy = RetryPolicy::new(5, Duration::from_secs(1), Duration::from_secs(32));
        for _ in 0..50 {
            let delay = policy.backoff(1);
            assert!(delay >= Duration::from_secs(1));
            assert!(delay <= Duration::from_millis(1500));
        }
    }

    #[test]
    fn test_backoff_grows_strictly_with_jitter() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100), Duration::from_secs(32));
        for _ in 0..50 {
            assert!(policy.backoff(2) > policy.backoff(1));
            assert!(policy.backoff(3) > policy.backoff(2));
        }
    }

    #[test]
    fn test_backoff_huge_attempt_does_not_overflow() {
        let policy = RetryPolicy::default().without_jitter();
        assert_eq!(policy.backoff(u32::MAX), DEFAULT_MAX_DELAY);
    }
}
