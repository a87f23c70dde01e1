//! Launchers run a single [`Invocation`] of the meshing tool.
//!
//! The [`Launcher`] trait is the seam between the worker pool and the outside
//! world. Workers never spawn processes themselves; they hand each invocation
//! to their launcher and act on the result.
//!
//! - [`ProcessLauncher`] spawns the tool, waits for it and checks its exit
//!   status, with an optional timeout. Dropping the launch future (for example
//!   when the run is cancelled) kills the child.
//! - [`DryRunLauncher`] writes the command line to stdout (or any writer)
//!   instead.

use crate::dispatch::error::DispatchError;
use mesh_dispatch_core::{Invocation, ToolCommand};
use std::io::{Stdout, Write};
use std::process::Stdio;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::process::Command;

/// Runs one invocation to completion.
pub trait Launcher: Send + Sync + 'static {
    fn launch(
        &self,
        invocation: &Invocation,
    ) -> impl Future<Output = Result<(), DispatchError>> + Send;
}

/// Spawns the external tool once per invocation.
#[derive(Clone, Debug)]
pub struct ProcessLauncher {
    tool: ToolCommand,
    timeout: Option<Duration>,
}

impl ProcessLauncher {
    pub const fn new(tool: ToolCommand, timeout: Option<Duration>) -> Self {
        Self { tool, timeout }
    }

    fn command(&self, invocation: &Invocation) -> Command {
        let mut command = Command::new(&self.tool.program);
        command
            .args(&self.tool.args)
            .args(invocation.args())
            .stdin(Stdio::null())
            .kill_on_drop(true);
        command
    }
}

impl Launcher for ProcessLauncher {
    async fn launch(&self, invocation: &Invocation) -> Result<(), DispatchError> {
        let job_id = invocation.job_id();
        tracing::debug!(%job_id, "Spawning `{}`", invocation.command_line(&self.tool));

        let mut child = self
            .command(invocation)
            .spawn()
            .map_err(|source| DispatchError::Spawn {
                job_id: job_id.clone(),
                program: self.tool.program.clone(),
                source,
            })?;

        let waited = match self.timeout {
            Some(after) => match tokio::time::timeout(after, child.wait()).await {
                Ok(waited) => waited,
                Err(_) => {
                    if let Err(e) = child.kill().await {
                        tracing::warn!(%job_id, "Failed to kill timed out job: {e}");
                    }
                    return Err(DispatchError::Timeout { job_id, after });
                }
            },
            None => child.wait().await,
        };

        let status = waited.map_err(|source| DispatchError::Wait {
            job_id: job_id.clone(),
            source,
        })?;

        if status.success() {
            Ok(())
        } else {
            Err(DispatchError::ExitStatus {
                job_id,
                code: status.code(),
            })
        }
    }
}

/// Writes each command line instead of running it.
///
/// Lines go to stdout unless another writer is supplied. Workers share the
/// writer, so each line is written whole.
#[derive(Debug)]
pub struct DryRunLauncher<W = Stdout> {
    tool: ToolCommand,
    out: Mutex<W>,
}

impl DryRunLauncher {
    pub fn new(tool: ToolCommand) -> Self {
        Self::with_writer(tool, std::io::stdout())
    }
}

impl<W: Write + Send + 'static> DryRunLauncher<W> {
    pub const fn with_writer(tool: ToolCommand, out: W) -> Self {
        Self {
            tool,
            out: Mutex::new(out),
        }
    }
}

impl<W: Write + Send + 'static> Launcher for DryRunLauncher<W> {
    async fn launch(&self, invocation: &Invocation) -> Result<(), DispatchError> {
        let line = invocation.command_line(&self.tool);
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        writeln!(out, "{line}")
            .and_then(|()| out.flush())
            .map_err(|source| DispatchError::Output {
                job_id: invocation.job_id(),
                source,
            })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use mesh_dispatch_core::{InvocationParams, LayerGeometry};
    use std::sync::Arc;

    fn invocation() -> Invocation {
        let range = LayerGeometry::preset(4).unwrap().range(0).unwrap();
        let params = InvocationParams::new(2, "graph", "https://queue.example/q").unwrap();
        Invocation::new(range, Arc::new(params))
    }

    fn sh(script: &str) -> ToolCommand {
        // `sh -c <script> <$0>` followed by the range flags as $1..
        ToolCommand::new("sh", ["-c", script, "meshing_batch"])
    }

    #[tokio::test]
    async fn zero_exit_is_success() {
        let launcher = ProcessLauncher::new(sh("exit 0"), None);
        launcher.launch(&invocation()).await.unwrap();
    }

    #[tokio::test]
    async fn range_flags_reach_the_tool() {
        let script = r#"[ "$1" = "--layer" ] && [ "$2" = "4" ] && [ "$8" = "4" ] && [ "$9" = "175" ]"#;
        let launcher = ProcessLauncher::new(sh(script), None);
        launcher.launch(&invocation()).await.unwrap();
    }

    #[tokio::test]
    async fn non_zero_exit_is_reported_with_its_code() {
        let launcher = ProcessLauncher::new(sh("exit 7"), None);
        let err = launcher.launch(&invocation()).await.unwrap_err();

        assert!(matches!(
            err,
            DispatchError::ExitStatus { ref job_id, code: Some(7) } if job_id == "4_0_0_0"
        ));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let tool = ToolCommand::new("/nonexistent/meshing-tool", Vec::<String>::new());
        let launcher = ProcessLauncher::new(tool, None);
        let err = launcher.launch(&invocation()).await.unwrap_err();

        assert!(matches!(err, DispatchError::Spawn { .. }));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn slow_jobs_time_out() {
        let launcher = ProcessLauncher::new(sh("sleep 5"), Some(Duration::from_millis(50)));
        let err = launcher.launch(&invocation()).await.unwrap_err();

        assert!(matches!(err, DispatchError::Timeout { .. }));
    }

    /// Cloneable in-memory writer.
    #[derive(Clone, Default)]
    struct Captured(Arc<std::sync::Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().write(buf)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn dry_run_writes_the_command_line_without_spawning() {
        let captured = Captured::default();
        let tool = ToolCommand::new("/nonexistent/meshing-tool", ["x"]);
        let launcher = DryRunLauncher::with_writer(tool, captured.clone());

        launcher.launch(&invocation()).await.unwrap();
        launcher.launch(&invocation()).await.unwrap();

        let written = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        let line = "/nonexistent/meshing-tool x --layer 4 --chunk_start 0 0 0 --chunk_end 4 175 11 \
                    --mip 2 --cg_name graph --queue_name https://queue.example/q";
        assert_eq!(written, format!("{line}\n{line}\n"));
    }
}
