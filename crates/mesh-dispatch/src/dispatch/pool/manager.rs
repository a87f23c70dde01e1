use crate::dispatch::{
    error::DispatchError,
    job::RetryPolicy,
    launcher::Launcher,
    pool::{request::WorkRequest, worker::worker_loop},
};
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Manages a pool of asynchronous workers for handling [`WorkRequest`]s.
///
/// Each worker operates independently, listening for incoming messages on a
/// bounded MPSC channel. The pool distributes requests round-robin, preferring
/// any worker with queue space before waiting on one, and supports graceful,
/// cooperative shutdown.
pub struct WorkerPool {
    workers: Vec<mpsc::Sender<WorkRequest>>,
    handles: Vec<JoinHandle<()>>,
    next_worker: AtomicUsize,
    shutdown_token: CancellationToken,
}

impl WorkerPool {
    /// Spawns `num_workers` worker tasks sharing one launcher.
    ///
    /// `queue_depth` bounds how many requests may wait in each worker's queue.
    /// With a single worker and a depth of 1 invocations run strictly one
    /// after another, in submission order.
    pub fn spawn<L: Launcher>(
        num_workers: usize,
        queue_depth: usize,
        launcher: Arc<L>,
        retry: RetryPolicy,
        shutdown_token: CancellationToken,
    ) -> Self {
        let num_workers = num_workers.max(1);
        let mut workers = Vec::with_capacity(num_workers);
        let mut handles = Vec::with_capacity(num_workers);

        for worker_id in 0..num_workers {
            let (tx, rx) = mpsc::channel(queue_depth.max(1));
            handles.push(tokio::spawn(worker_loop(
                worker_id,
                rx,
                Arc::clone(&launcher),
                retry,
                shutdown_token.clone(),
            )));
            workers.push(tx);
        }

        Self {
            workers,
            handles,
            next_worker: AtomicUsize::new(0),
            shutdown_token,
        }
    }

    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    /// Computes the next worker index using relaxed atomic round-robin logic.
    pub fn next_worker_index(&self) -> usize {
        self.next_worker.fetch_add(1, Ordering::Relaxed) % self.workers.len()
    }

    /// Sends a [`WorkRequest`] to the next worker with queue space.
    ///
    /// Fast-path tries `try_send()` on each worker starting from the
    /// round-robin index. If every queue is full, waits on the round-robin
    /// worker until it has room or the pool is cancelled.
    ///
    /// Returns an error if:
    /// - The shutdown token is cancelled.
    /// - The chosen worker's channel is closed.
    pub async fn send_to_next_worker(&self, mut request: WorkRequest) -> Result<(), DispatchError> {
        if self.shutdown_token.is_cancelled() {
            return Err(DispatchError::PoolShutdown);
        }

        let first = self.next_worker_index();
        for offset in 0..self.workers.len() {
            let worker_idx = (first + offset) % self.workers.len();
            match self.workers[worker_idx].try_send(request) {
                Ok(()) => return Ok(()),
                Err(mpsc::error::TrySendError::Full(returned)) => request = returned,
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    return Err(DispatchError::ChannelError {
                        context: format!("Worker {} channel closed", worker_idx),
                    });
                }
            }
        }

        tokio::select! {
            biased;
            () = self.shutdown_token.cancelled() => Err(DispatchError::PoolShutdown),
            sent = self.workers[first].send(request) => sent.map_err(|_| DispatchError::ChannelError {
                context: format!("Worker {} channel closed", first),
            }),
        }
    }

    /// Drains every worker and waits for them to exit.
    ///
    /// - Sends a [`WorkRequest::Shutdown`] to each worker, queued behind any
    ///   outstanding work, along with a one-shot response channel.
    /// - Waits for each acknowledgement, then joins the worker tasks.
    ///
    /// Does not cancel the shared token: running invocations finish unless the
    /// caller cancelled them.
    pub async fn shutdown(self) -> Result<(), DispatchError> {
        tracing::debug!("Initiating worker pool shutdown");

        let mut acks = Vec::with_capacity(self.workers.len());
        for (i, worker) in self.workers.iter().enumerate() {
            let (tx, rx) = oneshot::channel();
            if let Err(e) = worker.send(WorkRequest::Shutdown { response: tx }).await {
                tracing::debug!("Failed to send shutdown signal to worker {}: {}", i, e);
            } else {
                acks.push((i, rx));
            }
        }

        for (i, ack) in acks {
            if let Err(e) = ack.await {
                tracing::debug!("Worker {} shutdown response: {}", i, e);
            }
        }

        for (i, handle) in self.handles.into_iter().enumerate() {
            handle.await.map_err(|e| DispatchError::ChannelError {
                context: format!("Worker {} task failed: {}", i, e),
            })?;
        }

        tracing::debug!("Worker pool shutdown complete");
        Ok(())
    }
}
