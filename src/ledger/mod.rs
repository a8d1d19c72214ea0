//! Durable per-job outcome ledger.
//!
//! The ledger maps job ids to their last recorded [`Outcome`]. It is what
//! makes runs resumable: a job with a `succeeded` entry is never fetched
//! again, and a job with no entry is pending.
//!
//! # Guarantees
//!
//! - At most one row per job id.
//! - A `succeeded` row is never overwritten; later writes for that id are
//!   ignored and [`ProgressLedger::record`] reports `false`.
//! - Each record is a single committed statement, so a crash loses at most
//!   the writes that had not yet returned.
//!
//! # Example
//!
//! ```no_run
//! use archiver_core::ledger::{Outcome, ProgressLedger, SqliteLedger};
//! use std::path::Path;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let ledger = SqliteLedger::open(Path::new("out/.archiver/ledger.db")).await?;
//! ledger.record(&Outcome::succeeded("liked:123", 4096, 1)).await?;
//! assert!(ledger.is_done("liked:123").await?);
//! # Ok(())
//! # }
//! ```

mod error;
mod outcome;

use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::Row;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use crate::db::Database;

pub use error::{LedgerDbErrorKind, LedgerError};
pub use outcome::{Outcome, OutcomeState};

use outcome::OutcomeRow;

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Ledger directory created inside the output directory.
pub const LEDGER_DIR_NAME: &str = ".archiver";

/// Ledger database filename.
pub const LEDGER_FILE_NAME: &str = "ledger.db";

/// Writes tried per outcome when the database reports contention.
const WRITE_ATTEMPTS: u32 = 2;

/// Pause before retrying a contended write.
const WRITE_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Returns the conventional ledger path for an output directory.
#[must_use]
pub fn ledger_path(output_dir: &Path) -> std::path::PathBuf {
    output_dir.join(LEDGER_DIR_NAME).join(LEDGER_FILE_NAME)
}

/// Data-access contract for per-job outcomes.
#[async_trait]
pub trait ProgressLedger: Send + Sync {
    /// Reads all prior outcomes. A fresh store yields an empty map.
    async fn load(&self) -> Result<HashMap<String, Outcome>>;

    /// Durably commits one outcome.
    ///
    /// Returns `false` when the write was ignored because the job already
    /// has a `succeeded` outcome.
    async fn record(&self, outcome: &Outcome) -> Result<bool>;

    /// True iff the job has a `succeeded` outcome.
    async fn is_done(&self, job_id: &str) -> Result<bool>;
}

/// SQLite-backed ledger.
#[derive(Debug)]
pub struct SqliteLedger {
    db: Database,
    /// Serializes writers so concurrent workers never race on the same row.
    write_gate: Mutex<()>,
}

impl SqliteLedger {
    /// Wraps an already-open database.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self {
            db,
            write_gate: Mutex::new(()),
        }
    }

    /// Opens the ledger file at `path`, creating it and its parent directory
    /// when missing.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Open`] when the directory or database cannot
    /// be created.
    #[instrument(fields(path = %path.display()))]
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| LedgerError::open(path, err))?;
        }
        let db = Database::new(path)
            .await
            .map_err(|err| LedgerError::open(path, err))?;
        Ok(Self::new(db))
    }

    /// Opens a throwaway in-memory ledger.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Open`] if the database cannot be created.
    pub async fn in_memory() -> Result<Self> {
        let db = Database::new_in_memory()
            .await
            .map_err(|err| LedgerError::open(Path::new(":memory:"), err))?;
        Ok(Self::new(db))
    }

    /// Returns the stored outcome for a job, if any.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn get(&self, job_id: &str) -> Result<Option<Outcome>> {
        let row = sqlx::query_as::<_, OutcomeRow>(r"SELECT * FROM ledger WHERE job_id = ?")
            .bind(job_id)
            .fetch_optional(self.db.pool())
            .await?;

        row.map(Outcome::try_from).transpose()
    }

    /// Counts outcomes in a state.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn count_by_state(&self, state: OutcomeState) -> Result<i64> {
        let result = sqlx::query(r"SELECT COUNT(*) as count FROM ledger WHERE state = ?")
            .bind(state.as_str())
            .fetch_one(self.db.pool())
            .await?;

        Ok(result.get("count"))
    }

    /// Lists outcomes in a state, most recent first.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn list_by_state(&self, state: OutcomeState) -> Result<Vec<Outcome>> {
        let rows = sqlx::query_as::<_, OutcomeRow>(
            r"SELECT * FROM ledger WHERE state = ? ORDER BY recorded_at DESC, job_id ASC",
        )
        .bind(state.as_str())
        .fetch_all(self.db.pool())
        .await?;

        rows.into_iter().map(Outcome::try_from).collect()
    }

    async fn write_outcome(&self, outcome: &Outcome) -> Result<bool> {
        let result = sqlx::query(
            r"INSERT INTO ledger (job_id, state, reason, bytes_written, attempts, recorded_at)
              VALUES (?, ?, ?, ?, ?, ?)
              ON CONFLICT(job_id) DO UPDATE SET
                  state = excluded.state,
                  reason = excluded.reason,
                  bytes_written = excluded.bytes_written,
                  attempts = excluded.attempts,
                  recorded_at = excluded.recorded_at
              WHERE ledger.state <> 'succeeded'",
        )
        .bind(&outcome.job_id)
        .bind(outcome.state.as_str())
        .bind(outcome.reason.as_deref())
        .bind(i64::try_from(outcome.bytes_written).unwrap_or(i64::MAX))
        .bind(i64::from(outcome.attempts))
        .bind(outcome.recorded_at)
        .execute(self.db.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Closes the underlying pool.
    pub async fn close(self) {
        self.db.close().await;
    }
}

/// Runs a ledger write, trying again once after a short pause when it fails
/// on lock or pool contention. Other errors return immediately.
async fn retry_contended<T, F, Fut>(mut write: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match write().await {
            Err(err) if err.is_transient() && attempt < WRITE_ATTEMPTS => {
                warn!(attempt, error = %err, "ledger write contended, retrying");
                tokio::time::sleep(WRITE_RETRY_DELAY).await;
                attempt += 1;
            }
            result => return result,
        }
    }
}

#[async_trait]
impl ProgressLedger for SqliteLedger {
    #[instrument(skip(self))]
    async fn load(&self) -> Result<HashMap<String, Outcome>> {
        let rows = sqlx::query_as::<_, OutcomeRow>(r"SELECT * FROM ledger")
            .fetch_all(self.db.pool())
            .await?;

        let mut outcomes = HashMap::with_capacity(rows.len());
        for row in rows {
            let outcome = Outcome::try_from(row)?;
            outcomes.insert(outcome.job_id.clone(), outcome);
        }
        debug!(entries = outcomes.len(), "ledger loaded");
        Ok(outcomes)
    }

    #[instrument(skip(self, outcome), fields(job_id = %outcome.job_id, state = %outcome.state))]
    async fn record(&self, outcome: &Outcome) -> Result<bool> {
        let _guard = self.write_gate.lock().await;

        let applied = retry_contended(|| self.write_outcome(outcome)).await?;
        if !applied {
            debug!("ignored write over succeeded outcome");
        }
        Ok(applied)
    }

    async fn is_done(&self, job_id: &str) -> Result<bool> {
        let state: Option<String> =
            sqlx::query_scalar(r"SELECT state FROM ledger WHERE job_id = ?")
                .bind(job_id)
                .fetch_optional(self.db.pool())
                .await?;

        Ok(state.as_deref() == Some(OutcomeState::Succeeded.as_str()))
    }
}
