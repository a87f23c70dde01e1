//! Command-line formatting for the external meshing batch tool.
//!
//! Every invocation has the shape
//!
//! ```text
//! <program> [args...] --layer <int> --chunk_start <x> <y> <z> --chunk_end <x> <y> <z> \
//!     --mip <int> --cg_name <string> --queue_name <url>
//! ```
//!
//! [`ToolCommand`] holds the program and its leading arguments,
//! [`InvocationParams`] the values shared by every invocation of a run, and
//! [`Invocation`] pairs those with one [`ChunkRange`].

use crate::{ChunkRange, PlanError, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Program used when none is configured.
pub const DEFAULT_PROGRAM: &str = "python";

/// Leading argument used when none is configured.
pub const DEFAULT_SCRIPT: &str = "meshing_batch.py";

/// Default resolution level passed to the tool.
pub const DEFAULT_MIP: u32 = 2;

/// The external program and the arguments placed before the range flags.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

impl Default for ToolCommand {
    fn default() -> Self {
        Self::new(DEFAULT_PROGRAM, [DEFAULT_SCRIPT])
    }
}

/// Values passed unchanged to every invocation of a run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationParams {
    mip: u32,
    cg_name: String,
    queue_name: String,
}

impl InvocationParams {
    /// Rejects blank dataset names and queue identifiers.
    pub fn new(mip: u32, cg_name: impl Into<String>, queue_name: impl Into<String>) -> Result<Self> {
        let cg_name = cg_name.into();
        let queue_name = queue_name.into();

        if cg_name.trim().is_empty() {
            return Err(PlanError::InvalidParams {
                reason: "cg_name must not be empty".to_owned(),
            });
        }
        if queue_name.trim().is_empty() {
            return Err(PlanError::InvalidParams {
                reason: "queue_name must not be empty".to_owned(),
            });
        }

        Ok(Self {
            mip,
            cg_name,
            queue_name,
        })
    }

    pub const fn mip(&self) -> u32 {
        self.mip
    }

    pub fn cg_name(&self) -> &str {
        &self.cg_name
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }
}

/// A single call of the meshing tool for one [`ChunkRange`].
///
/// Cheap to clone; the shared parameters sit behind an [`Arc`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invocation {
    range: ChunkRange,
    params: Arc<InvocationParams>,
}

impl Invocation {
    pub const fn new(range: ChunkRange, params: Arc<InvocationParams>) -> Self {
        Self { range, params }
    }

    pub const fn range(&self) -> &ChunkRange {
        &self.range
    }

    pub fn params(&self) -> &InvocationParams {
        &self.params
    }

    pub fn job_id(&self) -> String {
        self.range.job_id()
    }

    /// The flags that follow the tool's own leading arguments.
    pub fn args(&self) -> Vec<String> {
        let [sx, sy, sz] = self.range.start().to_args();
        let [ex, ey, ez] = self.range.end().to_args();

        vec![
            "--layer".to_owned(),
            self.range.layer().to_string(),
            "--chunk_start".to_owned(),
            sx,
            sy,
            sz,
            "--chunk_end".to_owned(),
            ex,
            ey,
            ez,
            "--mip".to_owned(),
            self.params.mip.to_string(),
            "--cg_name".to_owned(),
            self.params.cg_name.clone(),
            "--queue_name".to_owned(),
            self.params.queue_name.clone(),
        ]
    }

    /// Full argument vector, program first.
    pub fn argv(&self, tool: &ToolCommand) -> Vec<String> {
        let mut argv = Vec::with_capacity(1 + tool.args.len() + 16);
        argv.push(tool.program.clone());
        argv.extend(tool.args.iter().cloned());
        argv.extend(self.args());
        argv
    }

    /// Space-joined command line for display. Arguments are not quoted.
    pub fn command_line(&self, tool: &ToolCommand) -> String {
        self.argv(tool).join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LayerGeometry;

    fn params() -> Arc<InvocationParams> {
        Arc::new(InvocationParams::new(2, "pinky100", "https://queue.example/mesh").unwrap())
    }

    #[test]
    fn formats_the_documented_argument_shape() {
        let range = LayerGeometry::preset(4).unwrap().range(62).unwrap();
        let invocation = Invocation::new(range, params());

        assert_eq!(
            invocation.command_line(&ToolCommand::default()),
            "python meshing_batch.py --layer 4 --chunk_start 248 0 0 --chunk_end 252 175 11 \
             --mip 2 --cg_name pinky100 --queue_name https://queue.example/mesh"
        );
    }

    #[test]
    fn custom_tool_args_precede_range_flags() {
        let range = LayerGeometry::preset(2).unwrap().range(0).unwrap();
        let invocation = Invocation::new(range, params());
        let tool = ToolCommand::new("/usr/bin/python3", ["-u", "batch.py"]);

        let argv = invocation.argv(&tool);
        assert_eq!(&argv[..4], ["/usr/bin/python3", "-u", "batch.py", "--layer"]);
        assert_eq!(argv.len(), 3 + 16);
    }

    #[test]
    fn blank_names_are_rejected() {
        assert!(matches!(
            InvocationParams::new(2, " ", "q"),
            Err(PlanError::InvalidParams { .. })
        ));
        assert!(matches!(
            InvocationParams::new(2, "graph", ""),
            Err(PlanError::InvalidParams { .. })
        ));
    }
}
