//! Error types for ledger operations.

use std::fmt;

use thiserror::Error;

/// Structured classification for ledger storage failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerDbErrorKind {
    /// `SQLite` returned busy/locked under concurrent access.
    BusyOrLocked,
    /// Constraint failure (check/not-null).
    ConstraintViolation,
    /// Connection pool timed out waiting for a free connection.
    PoolTimeout,
    /// Connection pool is closed.
    PoolClosed,
    /// Filesystem or transport IO failure.
    Io,
    /// Migration could not be applied.
    Migration,
    /// Unclassified database failure.
    Other,
}

impl LedgerDbErrorKind {
    /// True for contention that can clear on its own, worth one more try.
    #[must_use]
    pub fn is_transient(self) -> bool {
        matches!(self, Self::BusyOrLocked | Self::PoolTimeout)
    }

    #[must_use]
    pub fn from_sqlx(error: &sqlx::Error) -> Self {
        match error {
            sqlx::Error::PoolTimedOut => Self::PoolTimeout,
            sqlx::Error::PoolClosed => Self::PoolClosed,
            sqlx::Error::Io(_) => Self::Io,
            sqlx::Error::Migrate(_) => Self::Migration,
            sqlx::Error::Database(database_error) => {
                let code = database_error.code();
                if matches!(
                    code.as_deref(),
                    Some("SQLITE_BUSY" | "SQLITE_LOCKED" | "5" | "6")
                ) || database_error.message().contains("database is locked")
                {
                    Self::BusyOrLocked
                } else if database_error.is_check_violation()
                    || code
                        .as_deref()
                        .is_some_and(|value| value.starts_with("SQLITE_CONSTRAINT"))
                {
                    Self::ConstraintViolation
                } else {
                    Self::Other
                }
            }
            _ => Self::Other,
        }
    }
}

impl fmt::Display for LedgerDbErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::BusyOrLocked => "busy_or_locked",
            Self::ConstraintViolation => "constraint_violation",
            Self::PoolTimeout => "pool_timeout",
            Self::PoolClosed => "pool_closed",
            Self::Io => "io",
            Self::Migration => "migration",
            Self::Other => "other",
        };
        write!(f, "{label}")
    }
}

/// Errors that can occur while reading or writing the ledger.
///
/// Any of these aborts a run: without a durable ledger the resume guarantee
/// cannot hold.
#[derive(Debug, Clone, Error)]
pub enum LedgerError {
    /// Storage operation failed.
    #[error("ledger database error ({kind}): {message}")]
    Database {
        kind: LedgerDbErrorKind,
        message: String,
    },

    /// Could not open the ledger file.
    #[error(
        "failed to open ledger at {path}: {message}\n  Suggestion: Check that the output directory is writable"
    )]
    Open { path: String, message: String },

    /// A stored row holds a state this build does not understand.
    #[error("invalid outcome state '{0}' in ledger")]
    InvalidState(String),
}

impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database {
            kind: LedgerDbErrorKind::from_sqlx(&err),
            message: err.to_string(),
        }
    }
}

impl LedgerError {
    #[must_use]
    pub fn invalid_state(state: &str) -> Self {
        Self::InvalidState(state.to_string())
    }

    pub(crate) fn open(path: &std::path::Path, err: impl fmt::Display) -> Self {
        Self::Open {
            path: path.display().to_string(),
            message: err.to_string(),
        }
    }

    /// Returns the typed database error kind, when this is a database error.
    #[must_use]
    pub fn database_kind(&self) -> Option<LedgerDbErrorKind> {
        match self {
            Self::Database { kind, .. } => Some(*kind),
            Self::Open { .. } | Self::InvalidState(_) => None,
        }
    }

    /// True when the failure is lock or pool contention rather than a
    /// broken ledger.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.database_kind().is_some_and(LedgerDbErrorKind::is_transient)
    }
}
