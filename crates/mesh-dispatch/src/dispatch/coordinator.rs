//! Drives a run: one layer at a time, each layer through a fresh worker pool.
//!
//! For every layer a feeder task submits the plan's invocations to the
//! [`WorkerPool`] and then shuts the pool down, while the coordinator drains
//! [`JobResult`]s into a [`LayerReport`]. Submission blocks on worker queue
//! space, so at most `jobs * queue_depth` invocations are ever pending and
//! the plan is enumerated lazily.
//!
//! ## Cancellation
//!
//! The caller's token (Ctrl+C, SIGTERM) and fail-fast both cancel a per-layer
//! child token. Workers then answer queued requests as cancelled and the
//! feeder stops submitting; whatever was never submitted is counted as
//! cancelled in the report.

use crate::dispatch::{
    error::DispatchError,
    job::RetryPolicy,
    launcher::Launcher,
    pool::{
        manager::WorkerPool,
        request::{JobResult, WorkRequest},
    },
    report::{DispatchReport, LayerReport},
};
use mesh_dispatch_core::DispatchPlan;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Knobs that shape how a plan is executed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DispatchOptions {
    /// Number of concurrent workers. 1 runs invocations strictly in order.
    pub jobs: usize,
    /// Requests that may wait in each worker's queue.
    pub queue_depth: usize,
    pub retry: RetryPolicy,
    /// Cancel the rest of the run after the first permanent failure.
    pub fail_fast: bool,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            jobs: 1,
            queue_depth: 1,
            retry: RetryPolicy::default(),
            fail_fast: false,
        }
    }
}

pub struct Dispatcher<L> {
    launcher: Arc<L>,
    options: DispatchOptions,
}

impl<L: Launcher> Dispatcher<L> {
    pub fn new(launcher: L, options: DispatchOptions) -> Self {
        Self {
            launcher: Arc::new(launcher),
            options,
        }
    }

    /// Dispatches `plans` in order, each layer completing before the next.
    ///
    /// Stops early once `cancel` fires, or after a layer with failures when
    /// fail-fast is set. Layers that never started are reported with every
    /// invocation cancelled.
    pub async fn run(
        &self,
        plans: &[DispatchPlan],
        dry_run: bool,
        cancel: &CancellationToken,
    ) -> Result<DispatchReport, DispatchError> {
        let mut report = DispatchReport::new(dry_run);
        let mut remaining = plans.iter();

        while let Some(plan) = remaining.next() {
            if cancel.is_cancelled() {
                tracing::warn!("Run cancelled before layer {}", plan.layer());
                report.layers.push(LayerReport::skipped(plan.summary()));
                break;
            }

            let layer = self.run_layer(plan, cancel).await?;
            let stop = self.options.fail_fast && !layer.failed.is_empty();
            report.layers.push(layer);

            if stop {
                tracing::warn!("Stopping after failures in layer {}", plan.layer());
                break;
            }
        }

        report
            .layers
            .extend(remaining.map(|plan| LayerReport::skipped(plan.summary())));
        Ok(report)
    }

    /// Dispatches every invocation of one plan.
    pub async fn run_layer(
        &self,
        plan: &DispatchPlan,
        cancel: &CancellationToken,
    ) -> Result<LayerReport, DispatchError> {
        let span = tracing::info_span!("layer", layer = plan.layer());
        self.run_layer_inner(plan, cancel).instrument(span).await
    }

    async fn run_layer_inner(
        &self,
        plan: &DispatchPlan,
        cancel: &CancellationToken,
    ) -> Result<LayerReport, DispatchError> {
        let started = Instant::now();
        let run_token = cancel.child_token();
        let mut report = LayerReport::new(plan.summary());

        tracing::info!(
            "Dispatching {} invocation(s) with {} worker(s)",
            plan.len(),
            self.options.jobs
        );

        let pool = WorkerPool::spawn(
            self.options.jobs,
            self.options.queue_depth,
            Arc::clone(&self.launcher),
            self.options.retry,
            run_token.clone(),
        );
        let (results_tx, mut results_rx) = mpsc::channel::<JobResult>(pool.num_workers() * 2);

        let invocations = plan.invocations();
        let feeder = tokio::spawn(
            async move {
                for invocation in invocations {
                    let request = WorkRequest::Run {
                        invocation,
                        results: results_tx.clone(),
                    };
                    if let Err(e) = pool.send_to_next_worker(request).await {
                        tracing::debug!("Stopped submitting: {}", e);
                        break;
                    }
                }
                drop(results_tx);
                pool.shutdown().await
            }
            .in_current_span(),
        );

        while let Some(result) = results_rx.recv().await {
            tracing::debug!(
                job_id = %result.invocation.job_id(),
                worker_id = result.worker_id,
                "Finished in {:?}",
                result.elapsed
            );
            let failed = report.record(&result);
            if failed && self.options.fail_fast && !run_token.is_cancelled() {
                tracing::warn!(
                    "Fail-fast: cancelling remaining work after {}",
                    result.invocation.job_id()
                );
                run_token.cancel();
            }
        }

        feeder.await.map_err(|e| DispatchError::ChannelError {
            context: format!("Feeder task failed: {}", e),
        })??;

        report.finish(started.elapsed());
        tracing::info!(
            "Layer {} finished in {:?}: {} succeeded, {} failed, {} cancelled",
            plan.layer(),
            started.elapsed(),
            report.succeeded,
            report.failed.len(),
            report.cancelled
        );

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_dispatch_core::{Invocation, InvocationParams, LayerGeometry};
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Records launches and fails the indices listed in `failing`.
    #[derive(Default)]
    struct Scripted {
        launched: Mutex<Vec<(u8, u64)>>,
        failing: HashSet<u64>,
        /// Cancels the token once this `(layer, index)` has launched.
        cancel_after: Option<(u8, u64, CancellationToken)>,
    }

    impl Scripted {
        fn failing(indices: impl IntoIterator<Item = u64>) -> Self {
            Self {
                failing: indices.into_iter().collect(),
                ..Default::default()
            }
        }

        fn launched(&self) -> Vec<(u8, u64)> {
            self.launched.lock().unwrap().clone()
        }
    }

    impl Launcher for Scripted {
        async fn launch(&self, invocation: &Invocation) -> Result<(), DispatchError> {
            tokio::time::sleep(Duration::from_millis(1)).await;
            let range = invocation.range();
            self.launched
                .lock()
                .unwrap()
                .push((range.layer(), range.index()));

            if let Some((layer, index, token)) = &self.cancel_after {
                if (range.layer(), range.index()) == (*layer, *index) {
                    token.cancel();
                }
            }

            if self.failing.contains(&range.index()) {
                Err(DispatchError::ExitStatus {
                    job_id: invocation.job_id(),
                    code: Some(1),
                })
            } else {
                Ok(())
            }
        }
    }

    fn plan(layer: u8) -> DispatchPlan {
        let params = InvocationParams::new(2, "graph", "https://queue.example/q").unwrap();
        DispatchPlan::new(LayerGeometry::preset(layer).unwrap(), params)
    }

    #[tokio::test]
    async fn sequential_run_launches_every_index_in_order() {
        let dispatcher = Dispatcher::new(Scripted::default(), DispatchOptions::default());

        let report = dispatcher
            .run_layer(&plan(4), &CancellationToken::new())
            .await
            .unwrap();

        assert!(report.is_success());
        assert_eq!(report.succeeded, 63);
        let expected: Vec<_> = (0..=62).map(|i| (4, i)).collect();
        assert_eq!(dispatcher.launcher.launched(), expected);
    }

    #[tokio::test]
    async fn concurrent_run_launches_every_index_once() {
        let options = DispatchOptions {
            jobs: 8,
            ..Default::default()
        };
        let dispatcher = Dispatcher::new(Scripted::default(), options);

        let report = dispatcher
            .run_layer(&plan(2), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.succeeded, 252);
        let mut launched = dispatcher.launcher.launched();
        launched.sort_unstable();
        let expected: Vec<_> = (0..=251).map(|i| (2, i)).collect();
        assert_eq!(launched, expected);
    }

    #[tokio::test]
    async fn failures_are_reported_without_stopping_the_layer() {
        let dispatcher = Dispatcher::new(Scripted::failing([3, 10]), DispatchOptions::default());

        let report = dispatcher
            .run_layer(&plan(5), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.succeeded, 61);
        let failed: Vec<_> = report.failed.iter().map(|f| f.job_id.as_str()).collect();
        assert_eq!(failed, ["5_6_0_0", "5_20_0_0"]);
        assert_eq!(report.cancelled, 0);
    }

    #[tokio::test]
    async fn fail_fast_cancels_the_remaining_work() {
        let options = DispatchOptions {
            fail_fast: true,
            ..Default::default()
        };
        let dispatcher = Dispatcher::new(Scripted::failing([5]), options);

        let report = dispatcher
            .run(&[plan(4), plan(5)], false, &CancellationToken::new())
            .await
            .unwrap();

        // Layer 5 never starts.
        assert_eq!(report.layers.len(), 2);
        assert_eq!(report.layers[1].succeeded, 0);
        assert_eq!(report.layers[1].cancelled, 63);
        assert!(report.ensure_success().is_err());

        let layer = &report.layers[0];
        assert_eq!(layer.failed.len(), 1);
        assert_eq!(layer.accounted(), 63);
        assert!(layer.succeeded <= 6);
        assert!(layer.cancelled >= 57);
        assert!(dispatcher.launcher.launched().iter().all(|&(_, i)| i <= 6));
    }

    #[tokio::test]
    async fn layers_run_in_the_given_order() {
        let dispatcher = Dispatcher::new(Scripted::default(), DispatchOptions::default());

        let report = dispatcher
            .run(&[plan(4), plan(5)], false, &CancellationToken::new())
            .await
            .unwrap();

        assert!(report.is_success());
        assert_eq!(report.planned(), 126);
        let launched = dispatcher.launcher.launched();
        let first_layer_five = launched.iter().position(|&(l, _)| l == 5).unwrap();
        assert_eq!(first_layer_five, 63);
        assert!(launched[first_layer_five..].iter().all(|&(l, _)| l == 5));
    }

    #[tokio::test]
    async fn cancelled_run_dispatches_nothing() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let dispatcher = Dispatcher::new(Scripted::default(), DispatchOptions::default());

        let report = dispatcher
            .run(&[plan(4), plan(5)], false, &cancel)
            .await
            .unwrap();

        assert!(dispatcher.launcher.launched().is_empty());
        assert_eq!(report.layers.len(), 2);
        assert_eq!(report.planned(), 126);
        assert_eq!(report.cancelled(), 126);
        assert!(!report.is_success());
    }

    #[tokio::test]
    async fn cancellation_between_layers_reports_the_skipped_layer() {
        let cancel = CancellationToken::new();
        let launcher = Scripted {
            cancel_after: Some((4, 62, cancel.clone())),
            ..Default::default()
        };
        let dispatcher = Dispatcher::new(launcher, DispatchOptions::default());

        let report = dispatcher
            .run(&[plan(4), plan(5)], false, &cancel)
            .await
            .unwrap();

        assert!(report.layers[0].is_success());
        assert_eq!(report.layers[0].succeeded, 63);
        assert_eq!(report.layers[1].plan.layer, 5);
        assert_eq!(report.layers[1].cancelled, 63);
        assert!(dispatcher.launcher.launched().iter().all(|&(l, _)| l == 4));
        assert!(report.ensure_success().is_err());
    }

    #[tokio::test]
    async fn cancellation_mid_layer_accounts_for_every_invocation() {
        let cancel = CancellationToken::new();
        let dispatcher = Dispatcher::new(Scripted::default(), DispatchOptions::default());

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let report = dispatcher.run_layer(&plan(2), &cancel).await.unwrap();

        assert_eq!(report.accounted(), 252);
        assert!(report.cancelled > 0);
        assert!(report.failed.is_empty());
        assert!(!report.is_success());
    }
}
