//! Error types for the dispatcher.
//!
//! [`DispatchError`] captures everything that can go wrong while launching
//! invocations of the meshing tool or coordinating the workers that launch
//! them.
//!
//! ## Error Cases
//! - `Spawn`: the tool could not be started (missing binary, permissions).
//! - `Wait`: the tool started but waiting on it failed.
//! - `ExitStatus`: the tool ran and exited non-zero or was killed by a signal.
//! - `Timeout`: the tool did not finish within the configured timeout.
//! - `Cancelled`: the run was cancelled before or while the job ran.
//! - `ChannelError`: an internal channel between tasks closed unexpectedly.
//! - `PoolShutdown`: work was submitted after the pool began shutting down.
//! - `Output`: writing dry-run output failed.

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DispatchError {
    /// The tool process could not be started.
    #[error("Failed to spawn `{program}` for job {job_id}: {source}")]
    Spawn {
        job_id: String,
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Waiting on a started process failed.
    #[error("Failed waiting on job {job_id}: {source}")]
    Wait {
        job_id: String,
        #[source]
        source: std::io::Error,
    },

    /// The tool exited unsuccessfully.
    #[error("Job {job_id} {}", describe_exit(.code))]
    ExitStatus { job_id: String, code: Option<i32> },

    /// The tool exceeded the per-invocation timeout and was killed.
    #[error("Job {job_id} timed out after {after:?}")]
    Timeout { job_id: String, after: Duration },

    /// The run was cancelled (Ctrl+C, SIGTERM, or fail-fast).
    #[error("Job {job_id} cancelled")]
    Cancelled { job_id: String },

    /// Internal channel send/receive failure.
    #[error("Channel communication error: {context}")]
    ChannelError { context: String },

    /// The worker pool no longer accepts work.
    #[error("Worker pool is shutting down")]
    PoolShutdown,

    /// Dry-run output could not be written.
    #[error("Failed to write output for job {job_id}: {source}")]
    Output {
        job_id: String,
        #[source]
        source: std::io::Error,
    },
}

impl DispatchError {
    /// Whether launching the same invocation again might succeed.
    ///
    /// Non-zero exits and timeouts are retried; a tool that cannot be spawned
    /// will not start on the next attempt either.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::ExitStatus { .. } | Self::Timeout { .. })
    }

    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. } | Self::PoolShutdown)
    }
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exited with status {code}"),
        None => "was terminated by a signal".to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_status_messages_name_the_job() {
        let err = DispatchError::ExitStatus {
            job_id: "4_248_0_0".to_owned(),
            code: Some(3),
        };
        assert_eq!(err.to_string(), "Job 4_248_0_0 exited with status 3");

        let err = DispatchError::ExitStatus {
            job_id: "2_0_0_0".to_owned(),
            code: None,
        };
        assert_eq!(err.to_string(), "Job 2_0_0_0 was terminated by a signal");
    }

    #[test]
    fn only_exit_failures_and_timeouts_are_retryable() {
        let spawn = DispatchError::Spawn {
            job_id: "2_0_0_0".to_owned(),
            program: "missing".to_owned(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        let timeout = DispatchError::Timeout {
            job_id: "2_0_0_0".to_owned(),
            after: Duration::from_secs(1),
        };

        assert!(!spawn.is_retryable());
        assert!(timeout.is_retryable());
        assert!(!DispatchError::PoolShutdown.is_retryable());
        assert!(DispatchError::PoolShutdown.is_cancelled());
    }
}
