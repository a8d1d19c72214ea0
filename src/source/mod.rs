//! Job sources: where a run's list of jobs comes from.
//!
//! A source is consumed once, at the start of a run. The engine only ever
//! sees the resulting `Vec<Job>`; a plain vector is itself a source, which
//! is what tests use.

mod export;

use std::path::PathBuf;

use thiserror::Error;

pub use export::{
    CHAT_URL_MARKER, ExportSource, MAX_FILENAME_LEN, ParsedExport, parse_export, sanitize_filename,
};

use crate::job::Job;

/// Errors produced while building the job list.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to read export file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "export file '{path}' is not valid JSON: {source}\n  Suggestion: Pass the JSON file from your data export, not the ZIP archive"
    )]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(
        "export file '{path}' does not contain a JSON object at the top level\n  Suggestion: Request the export in JSON format"
    )]
    NotAnObject { path: PathBuf },

    #[error("export parser task did not complete: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Supplies the jobs for one run.
pub trait JobSource {
    /// Returns every job in the source.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if the underlying data cannot be read.
    fn provide_jobs(&self) -> Result<Vec<Job>, SourceError>;
}

impl JobSource for Vec<Job> {
    fn provide_jobs(&self) -> Result<Vec<Job>, SourceError> {
        Ok(self.clone())
    }
}
