//! Progress tracking for per-recipient bulk sends.

use crate::RecipientResult;
use dashmap::DashMap;
use serde::Serialize;

/// Running (then final) tally of one bulk job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BulkReport {
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    pub failures: Vec<RecipientResult>,
    pub done: bool,
}

impl BulkReport {
    pub fn pending(&self) -> usize {
        self.total.saturating_sub(self.success + self.failed)
    }
}

/// Concurrent job-id -> progress map. Jobs are independent; updating one
/// never blocks readers of another.
#[derive(Debug, Default)]
pub struct BulkJobs {
    jobs: DashMap<String, BulkReport>,
}

impl BulkJobs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a job, replacing any previous job with the same id.
    pub fn start(&self, job_id: &str, total: usize) {
        self.jobs.insert(
            job_id.to_string(),
            BulkReport {
                total,
                ..Default::default()
            },
        );
    }

    pub fn record(&self, job_id: &str, result: RecipientResult) {
        if let Some(mut report) = self.jobs.get_mut(job_id) {
            if result.is_success() {
                report.success += 1;
            } else {
                report.failed += 1;
                report.failures.push(result);
            }
        }
    }

    /// Marks the job done and returns its final report.
    pub fn finish(&self, job_id: &str) -> Option<BulkReport> {
        let mut report = self.jobs.get_mut(job_id)?;
        report.done = true;
        Some(report.clone())
    }

    pub fn get(&self, job_id: &str) -> Option<BulkReport> {
        self.jobs.get(job_id).map(|r| r.clone())
    }

    /// Drops a job, returning its last known state.
    pub fn remove(&self, job_id: &str) -> Option<BulkReport> {
        self.jobs.remove(job_id).map(|(_, report)| report)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
