//! Exit code logic for the archiver process.
//!
//! Single responsibility: map a run report to the process exit outcome.

use archiver_core::BatchReport;

use crate::ProcessExit;

/// Determines the process exit outcome from a finished run.
///
/// An interrupted run is partial even when nothing failed, so scripts can
/// tell that a re-run is needed.
pub(crate) fn determine_exit_outcome(report: &BatchReport) -> ProcessExit {
    if report.interrupted {
        ProcessExit::Partial
    } else if report.failed_count == 0 {
        ProcessExit::Success
    } else if report.succeeded_count + report.skipped_count > 0 {
        ProcessExit::Partial
    } else {
        ProcessExit::Failure
    }
}
