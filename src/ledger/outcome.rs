//! Outcome types recorded in the progress ledger.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::LedgerError;

/// Terminal state of a job. A job with no ledger row is pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeState {
    /// The artifact was fetched, verified and placed.
    Succeeded,
    /// The job gave up; retried again on a later run.
    Failed,
    /// The job was intentionally not processed.
    Skipped,
}

impl OutcomeState {
    /// Returns the database string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

impl fmt::Display for OutcomeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for OutcomeState {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            "skipped" => Ok(Self::Skipped),
            _ => Err(LedgerError::invalid_state(s)),
        }
    }
}

/// The recorded result of processing one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub job_id: String,
    pub state: OutcomeState,
    /// Failure or skip reason; `None` for successes.
    pub reason: Option<String>,
    pub bytes_written: u64,
    /// Attempts made in the run that recorded this outcome.
    pub attempts: u32,
    /// Unix epoch milliseconds.
    pub recorded_at: i64,
}

impl Outcome {
    #[must_use]
    pub fn succeeded(job_id: impl Into<String>, bytes_written: u64, attempts: u32) -> Self {
        Self {
            job_id: job_id.into(),
            state: OutcomeState::Succeeded,
            reason: None,
            bytes_written,
            attempts,
            recorded_at: now_millis(),
        }
    }

    #[must_use]
    pub fn failed(job_id: impl Into<String>, reason: impl Into<String>, attempts: u32) -> Self {
        Self {
            job_id: job_id.into(),
            state: OutcomeState::Failed,
            reason: Some(reason.into()),
            bytes_written: 0,
            attempts,
            recorded_at: now_millis(),
        }
    }

    #[must_use]
    pub fn skipped(job_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            state: OutcomeState::Skipped,
            reason: Some(reason.into()),
            bytes_written: 0,
            attempts: 0,
            recorded_at: now_millis(),
        }
    }

    /// True when this outcome makes the job permanently done.
    #[must_use]
    pub fn is_succeeded(&self) -> bool {
        self.state == OutcomeState::Succeeded
    }
}

/// Raw ledger row, converted to [`Outcome`] after state validation.
#[derive(Debug, Clone, FromRow)]
pub(crate) struct OutcomeRow {
    pub job_id: String,
    pub state: String,
    pub reason: Option<String>,
    pub bytes_written: i64,
    pub attempts: i64,
    pub recorded_at: i64,
}

impl TryFrom<OutcomeRow> for Outcome {
    type Error = LedgerError;

    fn try_from(row: OutcomeRow) -> Result<Self, Self::Error> {
        Ok(Self {
            state: row.state.parse()?,
            job_id: row.job_id,
            reason: row.reason,
            bytes_written: u64::try_from(row.bytes_written).unwrap_or(0),
            attempts: u32::try_from(row.attempts).unwrap_or(0),
            recorded_at: row.recorded_at,
        })
    }
}

#[allow(clippy::cast_possible_truncation)]
fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_millis() as i64)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_state_parse_rejects_pending() {
        let err = "pending".parse::<OutcomeState>().unwrap_err();
        assert!(err.to_string().contains("pending"));
    }

    #[test]
    fn test_outcome_constructors_set_state_and_reason() {
        let ok = Outcome::succeeded("liked:1", 42, 1);
        assert!(ok.is_succeeded());
        assert_eq!(ok.reason, None);
        assert!(ok.recorded_at > 0);

        let failed = Outcome::failed("liked:2", "HTTP 404", 1);
        assert_eq!(failed.state, OutcomeState::Failed);
        assert_eq!(failed.reason.as_deref(), Some("HTTP 404"));
        assert!(!failed.is_succeeded());
    }

    #[test]
    fn test_outcome_row_with_bad_state_is_rejected() {
        let row = OutcomeRow {
            job_id: "x".to_string(),
            state: "done".to_string(),
            reason: None,
            bytes_written: 0,
            attempts: 0,
            recorded_at: 0,
        };
        assert!(Outcome::try_from(row).is_err());
    }
}
