//! Run reports.
//!
//! A [`LayerReport`] tallies the [`JobResult`]s of one layer; a
//! [`DispatchReport`] collects the layers of a run. Both serialize to JSON for
//! `--report`.

use crate::dispatch::pool::request::JobResult;
use anyhow::bail;
use mesh_dispatch_core::PlanSummary;
use serde::Serialize;
use std::time::Duration;

/// An invocation that failed permanently.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FailedJob {
    pub job_id: String,
    pub index: u64,
    pub attempts: u32,
    pub error: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct LayerReport {
    pub plan: PlanSummary,
    pub succeeded: u64,
    pub failed: Vec<FailedJob>,
    /// Jobs cancelled while queued or running, plus jobs never submitted.
    pub cancelled: u64,
    pub retried: u64,
    pub elapsed_ms: u64,
}

impl LayerReport {
    pub fn new(plan: PlanSummary) -> Self {
        Self {
            plan,
            succeeded: 0,
            failed: Vec::new(),
            cancelled: 0,
            retried: 0,
            elapsed_ms: 0,
        }
    }

    /// Tallies one result. Returns `true` if it is a permanent failure.
    pub fn record(&mut self, result: &JobResult) -> bool {
        if result.attempts > 1 {
            self.retried += 1;
        }

        match &result.outcome {
            Ok(()) => {
                self.succeeded += 1;
                false
            }
            Err(e) if e.is_cancelled() => {
                self.cancelled += 1;
                false
            }
            Err(e) => {
                self.failed.push(FailedJob {
                    job_id: result.invocation.job_id(),
                    index: result.invocation.range().index(),
                    attempts: result.attempts,
                    error: e.to_string(),
                });
                true
            }
        }
    }

    /// A layer that never started: every planned invocation is cancelled.
    pub fn skipped(plan: PlanSummary) -> Self {
        let mut report = Self::new(plan);
        report.finish(Duration::ZERO);
        report
    }

    /// Counts never-submitted invocations as cancelled and stamps the time.
    pub fn finish(&mut self, elapsed: Duration) {
        let accounted = self.accounted();
        let planned = self.plan.count as u64;
        self.cancelled += planned.saturating_sub(accounted);
        self.failed.sort_by_key(|f| f.index);
        self.elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
    }

    pub fn accounted(&self) -> u64 {
        self.succeeded + self.failed.len() as u64 + self.cancelled
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.cancelled == 0
    }
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct DispatchReport {
    pub dry_run: bool,
    pub layers: Vec<LayerReport>,
}

impl DispatchReport {
    pub fn new(dry_run: bool) -> Self {
        Self {
            dry_run,
            layers: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.layers.iter().all(LayerReport::is_success)
    }

    pub fn planned(&self) -> u64 {
        self.layers.iter().map(|l| l.plan.count as u64).sum()
    }

    pub fn succeeded(&self) -> u64 {
        self.layers.iter().map(|l| l.succeeded).sum()
    }

    pub fn failed(&self) -> u64 {
        self.layers.iter().map(|l| l.failed.len() as u64).sum()
    }

    pub fn cancelled(&self) -> u64 {
        self.layers.iter().map(|l| l.cancelled).sum()
    }

    /// Fails unless every planned invocation succeeded. This decides the
    /// process exit status.
    pub fn ensure_success(&self) -> anyhow::Result<()> {
        if self.is_success() {
            return Ok(());
        }
        bail!(
            "{} of {} invocation(s) did not succeed ({} failed, {} cancelled)",
            self.failed() + self.cancelled(),
            self.planned(),
            self.failed(),
            self.cancelled()
        )
    }
}
