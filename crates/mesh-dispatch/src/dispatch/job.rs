use crate::dispatch::{
    error::DispatchError, launcher::Launcher, pool::request::JobResult, telemetry,
};
use mesh_dispatch_core::Invocation;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Base retry delay used unless `--retry-backoff-ms` says otherwise.
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 1000;

/// How often, and how patiently, a failed launch is repeated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Additional attempts after the first one.
    pub retries: u32,
    /// Base delay; attempt `n` waits `backoff * n` before relaunching.
    pub backoff: Duration,
}

impl RetryPolicy {
    pub const fn new(retries: u32, backoff: Duration) -> Self {
        Self { retries, backoff }
    }

    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(attempt)
    }
}

/// No retries, with the default backoff ready for when retries are enabled.
impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(0, Duration::from_millis(DEFAULT_RETRY_BACKOFF_MS))
    }
}

/// Launches one invocation, retrying retryable failures.
///
/// The launch races against `cancel`; a cancelled launch is dropped, which
/// kills a spawned child process. A job that is cancelled before its first
/// attempt reports zero attempts.
#[tracing::instrument(
    name = "job",
    skip_all,
    fields(job_id = %invocation.job_id(), worker_id = worker_id)
)]
pub async fn run_job<L: Launcher>(
    worker_id: usize,
    invocation: Invocation,
    launcher: &L,
    retry: &RetryPolicy,
    cancel: &CancellationToken,
) -> JobResult {
    let started = Instant::now();
    let mut attempts = 0;

    let outcome = loop {
        if cancel.is_cancelled() {
            break Err(cancelled(&invocation));
        }

        attempts += 1;
        telemetry::increment_invocations();

        let launched = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(cancelled(&invocation)),
            launched = launcher.launch(&invocation) => launched,
        };

        match launched {
            Ok(()) => break Ok(()),
            Err(e) if e.is_retryable() && attempts <= retry.retries => {
                let delay = retry.delay_after(attempts);
                tracing::warn!(
                    "Attempt {}/{} failed: {}; retrying in {:?}",
                    attempts,
                    retry.retries + 1,
                    e,
                    delay
                );
                telemetry::increment_retries();

                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break Err(cancelled(&invocation)),
                    () = tokio::time::sleep(delay) => {}
                }
            }
            Err(e) => break Err(e),
        }
    };

    let elapsed = started.elapsed();
    telemetry::record_invocation_duration(elapsed.as_secs_f64() * 1000.0);

    match &outcome {
        Ok(()) => tracing::info!("Completed in {:?} after {} attempt(s)", elapsed, attempts),
        Err(e) if e.is_cancelled() => tracing::debug!("{}", e),
        Err(e) => {
            telemetry::increment_failures();
            tracing::error!("{}", e);
        }
    }

    JobResult {
        invocation,
        worker_id,
        attempts,
        elapsed,
        outcome,
    }
}

fn cancelled(invocation: &Invocation) -> DispatchError {
    DispatchError::Cancelled {
        job_id: invocation.job_id(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_dispatch_core::{InvocationParams, LayerGeometry};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails with a non-zero exit until `succeed_on` attempts have been made.
    struct Flaky {
        calls: AtomicU32,
        succeed_on: u32,
    }

    impl Flaky {
        fn new(succeed_on: u32) -> Self {
            Self {
                calls: AtomicU32::new(0),
                succeed_on,
            }
        }
    }

    impl Launcher for Flaky {
        async fn launch(&self, invocation: &Invocation) -> Result<(), DispatchError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call >= self.succeed_on {
                Ok(())
            } else {
                Err(DispatchError::ExitStatus {
                    job_id: invocation.job_id(),
                    code: Some(1),
                })
            }
        }
    }

    struct Unspawnable;

    impl Launcher for Unspawnable {
        async fn launch(&self, invocation: &Invocation) -> Result<(), DispatchError> {
            Err(DispatchError::Spawn {
                job_id: invocation.job_id(),
                program: "missing".to_owned(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            })
        }
    }

    struct Hangs;

    impl Launcher for Hangs {
        async fn launch(&self, _invocation: &Invocation) -> Result<(), DispatchError> {
            std::future::pending().await
        }
    }

    fn invocation() -> Invocation {
        let range = LayerGeometry::preset(3).unwrap().range(5).unwrap();
        let params = InvocationParams::new(2, "graph", "queue").unwrap();
        Invocation::new(range, Arc::new(params))
    }

    #[test]
    fn default_policy_does_not_retry() {
        let retry = RetryPolicy::default();
        assert_eq!(retry.retries, 0);
        assert_eq!(retry.backoff, Duration::from_secs(1));
    }

    #[test]
    fn backoff_grows_linearly() {
        let retry = RetryPolicy::new(3, Duration::from_millis(250));
        assert_eq!(retry.delay_after(1), Duration::from_millis(250));
        assert_eq!(retry.delay_after(3), Duration::from_millis(750));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_success() {
        let launcher = Flaky::new(3);
        let retry = RetryPolicy::new(2, Duration::from_secs(1));

        let result = run_job(0, invocation(), &launcher, &retry, &CancellationToken::new()).await;

        assert!(result.outcome.is_ok());
        assert_eq!(result.attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_the_retry_budget() {
        let launcher = Flaky::new(10);
        let retry = RetryPolicy::new(2, Duration::from_secs(1));

        let result = run_job(0, invocation(), &launcher, &retry, &CancellationToken::new()).await;

        assert!(matches!(
            result.outcome,
            Err(DispatchError::ExitStatus { code: Some(1), .. })
        ));
        assert_eq!(result.attempts, 3);
        assert_eq!(launcher.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn spawn_failures_are_not_retried() {
        let retry = RetryPolicy::new(5, Duration::ZERO);
        let result = run_job(0, invocation(), &Unspawnable, &retry, &CancellationToken::new()).await;

        assert!(matches!(result.outcome, Err(DispatchError::Spawn { .. })));
        assert_eq!(result.attempts, 1);
    }

    #[tokio::test]
    async fn cancelled_before_launch_makes_no_attempt() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = run_job(0, invocation(), &Flaky::new(1), &RetryPolicy::default(), &cancel).await;

        assert!(matches!(result.outcome, Err(DispatchError::Cancelled { .. })));
        assert_eq!(result.attempts, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_a_running_launch() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            trigger.cancel();
        });

        let result = run_job(0, invocation(), &Hangs, &RetryPolicy::default(), &cancel).await;

        assert!(matches!(result.outcome, Err(DispatchError::Cancelled { ref job_id }) if job_id == "3_20_0_0"));
        assert_eq!(result.attempts, 1);
    }
}
