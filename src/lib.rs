//! Archiver Core Library
//!
//! Download orchestration for personal data exports: every media item an
//! export references becomes a [`Job`], and the [`RunCoordinator`] fetches
//! them with bounded concurrency, a global bandwidth ceiling and retries,
//! recording each outcome in a durable ledger so runs are resumable and a
//! finished item is never fetched twice.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`source`] - Export parsing into jobs
//! - [`ledger`] - Durable per-job outcomes (`SQLite`)
//! - [`download`] - Fetchers, rate limiter, atomic placement, retry policy
//! - [`engine`] - Worker pool, run coordinator and cancellation
//! - [`config`] - Engine settings and the config file
//! - [`db`] - Database connection and schema management

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod db;
pub mod download;
pub mod engine;
pub mod job;
pub mod ledger;
pub mod source;

// Re-export commonly used types
pub use config::{EngineConfig, FetcherKind, FileConfig};
pub use db::Database;
pub use download::{
    ExternalToolFetcher, FailureKind, FetchError, Fetcher, HttpFetcher, RateLimiter,
    RetryDecision, RetryPolicy,
};
pub use engine::{BatchReport, RunControl, RunCoordinator, RunError, RunStats};
pub use job::{Category, Job};
pub use ledger::{Outcome, OutcomeState, ProgressLedger, SqliteLedger};
pub use source::{ExportSource, JobSource, SourceError};
