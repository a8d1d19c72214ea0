//! Cooperative cancellation for a run.
//!
//! A run can be asked to end in two strengths:
//!
//! - **stop**: take no new jobs, drop pending retries, let in-flight
//!   downloads finish.
//! - **abort**: additionally interrupt in-flight downloads. Their temp files
//!   are removed and nothing is written to the ledger for them.
//!
//! Abort implies stop: the stop token is a child of the abort token.

use tokio_util::sync::CancellationToken;

/// Stop/abort signal pair shared between a caller and a running batch.
#[derive(Debug, Clone)]
pub struct RunControl {
    abort: CancellationToken,
    stop: CancellationToken,
}

impl Default for RunControl {
    fn default() -> Self {
        Self::new()
    }
}

impl RunControl {
    #[must_use]
    pub fn new() -> Self {
        let abort = CancellationToken::new();
        let stop = abort.child_token();
        Self { abort, stop }
    }

    /// Stops dequeuing; in-flight jobs get the shutdown grace period.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Interrupts in-flight jobs immediately.
    pub fn abort(&self) {
        self.abort.cancel();
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.abort.is_cancelled()
    }

    pub async fn stopped(&self) {
        self.stop.cancelled().await;
    }

    pub(crate) fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    pub(crate) fn abort_token(&self) -> CancellationToken {
        self.abort.clone()
    }
}
