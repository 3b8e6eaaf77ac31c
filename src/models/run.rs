//! Run-level reporting types.

use std::time::Duration;

use serde::Serialize;

/// A URL the run gave up on, with the reason kept for the summary.
#[derive(Debug, Clone, Serialize)]
pub struct FailedUrl {
    pub url: String,
    pub reason: String,
}

/// Aggregate of one discovery-to-persistence pass.
///
/// Built while a run is in flight and finalized when the candidate stream
/// is exhausted; reported to the log, never persisted.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    /// Candidate URLs the discoverer yielded.
    pub discovered: usize,
    /// Records successfully written to the store.
    pub persisted: usize,
    /// URLs given up on, with reasons.
    pub failed: Vec<FailedUrl>,
    /// Wall-clock time of the whole pass.
    pub elapsed: Duration,
}
