use crate::dispatch::{
    job::{RetryPolicy, run_job},
    launcher::Launcher,
    pool::request::WorkRequest,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Main execution loop for a worker task.
///
/// This function listens for [`WorkRequest`] messages on the provided channel.
/// For each `Run` request, it launches the invocation (with retries) and sends
/// the [`JobResult`](crate::dispatch::pool::request::JobResult) back. For
/// `Shutdown`, it exits cleanly after acknowledging shutdown.
///
/// Once `cancel` fires, queued `Run` requests are still answered, each with a
/// cancelled outcome, so every submitted invocation is accounted for.
///
/// # Arguments
///
/// - `worker_id`: Numeric ID of the worker, used for logging.
/// - `rx`: Receiver for incoming [`WorkRequest`] messages.
/// - `launcher`: Shared launcher used for every invocation.
/// - `retry`: Retry policy applied to failed launches.
/// - `cancel`: Run-wide cancellation token.
pub async fn worker_loop<L: Launcher>(
    worker_id: usize,
    mut rx: mpsc::Receiver<WorkRequest>,
    launcher: Arc<L>,
    retry: RetryPolicy,
    cancel: CancellationToken,
) {
    tracing::debug!("Worker {} started", worker_id);

    while let Some(work) = rx.recv().await {
        match work {
            WorkRequest::Run {
                invocation,
                results,
            } => {
                let result = run_job(worker_id, invocation, launcher.as_ref(), &retry, &cancel).await;
                if let Err(e) = results.send(result).await {
                    tracing::debug!("Worker {} failed to report result: {}", worker_id, e);
                }
            }
            WorkRequest::Shutdown { response } => {
                tracing::debug!("Worker {} received shutdown signal", worker_id);
                let _ = response.send(());
                break;
            }
        }
    }

    tracing::debug!("Worker {} stopped", worker_id);
}
