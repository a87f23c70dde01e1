use crate::dispatch::error::DispatchError;
use mesh_dispatch_core::Invocation;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// A message sent from the worker pool to an individual worker task.
///
/// [`WorkRequest`]s travel over bounded channels and are consumed in order by
/// the worker's main loop, so a `Shutdown` queued behind `Run` requests is
/// only seen once those have finished.
#[derive(Debug)]
pub enum WorkRequest {
    /// Launch `invocation` and report the outcome on `results`.
    Run {
        invocation: Invocation,
        results: mpsc::Sender<JobResult>,
    },

    /// Request the worker to shut down gracefully.
    ///
    /// - `response`: One-shot channel for acknowledging that the worker has
    ///   drained its queue and exited its loop.
    Shutdown { response: oneshot::Sender<()> },
}

/// What happened to one invocation.
#[derive(Debug)]
pub struct JobResult {
    pub invocation: Invocation,
    pub worker_id: usize,
    /// Launch attempts made; 0 if the run was cancelled first.
    pub attempts: u32,
    pub elapsed: Duration,
    pub outcome: Result<(), DispatchError>,
}
