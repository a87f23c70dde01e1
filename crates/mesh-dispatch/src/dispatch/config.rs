use crate::dispatch::{
    coordinator::DispatchOptions,
    job::{DEFAULT_RETRY_BACKOFF_MS, RetryPolicy},
};
use anyhow::{Context, bail};
use clap::{Parser, ValueEnum};
use mesh_dispatch_core::{
    ChunkCoord, DEFAULT_MIP, DEFAULT_PROGRAM, DEFAULT_SCRIPT, DEFAULT_STRIDE, DispatchPlan,
    GeometryOverrides, InvocationParams, LayerGeometry, PlanError, ToolCommand,
};
use std::path::PathBuf;
use std::time::Duration;

/// Runtime configuration for the `mesh-dispatch` binary.
///
/// Every value is parsed from CLI arguments or environment variables (a `.env`
/// file is loaded first). The defaults reproduce the fixed table the meshing
/// pipeline was first run with: built-in layer geometry, `python
/// meshing_batch.py`, one invocation at a time.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "mesh-dispatch",
    version,
    about = "Queues meshing work for a chunked graph, one batch invocation per chunk range"
)]
pub struct CliArgs {
    /// Layer(s) to dispatch. Repeat the flag or pass a comma-separated list.
    ///
    /// Environment variable: `MESH_LAYERS`
    #[arg(
        long = "layer",
        env = "MESH_LAYERS",
        value_delimiter = ',',
        conflicts_with = "all_layers"
    )]
    pub layers: Vec<u8>,

    /// Dispatch every layer: the built-in ones, or with `--base-bounds` every
    /// layer from 2 up to the one that collapses to a single chunk.
    #[arg(long, default_value_t = false)]
    pub all_layers: bool,

    /// Name of the chunked graph the meshes belong to.
    ///
    /// Environment variable: `CG_NAME`
    #[arg(long, env = "CG_NAME")]
    pub cg_name: String,

    /// Queue the batch tool pushes its tasks to.
    ///
    /// Environment variable: `QUEUE_NAME`
    #[arg(long, env = "QUEUE_NAME")]
    pub queue_name: String,

    /// Resolution level passed through to the tool.
    ///
    /// Environment variable: `MESH_MIP`
    #[arg(long, env = "MESH_MIP", default_value_t = DEFAULT_MIP)]
    pub mip: u32,

    /// Program to run once per chunk range.
    ///
    /// Environment variable: `MESH_TOOL`
    #[arg(long, env = "MESH_TOOL", default_value_t = String::from(DEFAULT_PROGRAM))]
    pub tool: String,

    /// Arguments placed before the range flags, typically the script path.
    ///
    /// Environment variable: `MESH_TOOL_ARGS` (comma-separated)
    #[arg(
        long = "tool-arg",
        env = "MESH_TOOL_ARGS",
        value_delimiter = ',',
        default_value = DEFAULT_SCRIPT,
        allow_hyphen_values = true
    )]
    pub tool_args: Vec<String>,

    /// Replaces the X extent of the layer geometry.
    #[arg(long)]
    pub x_extent: Option<u64>,

    /// Replaces the Y span passed in every `--chunk_end`.
    #[arg(long)]
    pub y_span: Option<u64>,

    /// Replaces the Z span passed in every `--chunk_end`.
    #[arg(long)]
    pub z_span: Option<u64>,

    /// Replaces the X stride between consecutive ranges.
    #[arg(long)]
    pub stride: Option<u64>,

    /// Chunk-grid bounds at layer 2. Derives every layer's geometry from them
    /// instead of using the built-in table.
    #[arg(long, num_args = 3, value_names = ["X", "Y", "Z"])]
    pub base_bounds: Vec<u64>,

    /// Chunks per axis merged into one chunk of the next layer.
    #[arg(long, default_value_t = 2)]
    pub fanout: u64,

    /// First stride index to dispatch (inclusive).
    #[arg(long)]
    pub from_index: Option<u64>,

    /// Last stride index to dispatch (inclusive).
    #[arg(long)]
    pub to_index: Option<u64>,

    /// Number of invocations to run concurrently. `0` uses one per CPU.
    ///
    /// Environment variable: `MESH_JOBS`
    #[arg(long, env = "MESH_JOBS", default_value_t = 1)]
    pub jobs: usize,

    /// Extra attempts for an invocation that exits non-zero or times out.
    ///
    /// Environment variable: `MESH_RETRIES`
    #[arg(long, env = "MESH_RETRIES", default_value_t = 0)]
    pub retries: u32,

    /// Base delay before a retry; attempt `n` waits `n` times this long.
    ///
    /// Environment variable: `MESH_RETRY_BACKOFF_MS`
    #[arg(long, env = "MESH_RETRY_BACKOFF_MS", default_value_t = DEFAULT_RETRY_BACKOFF_MS)]
    pub retry_backoff_ms: u64,

    /// Kill an invocation that runs longer than this.
    ///
    /// Environment variable: `MESH_TIMEOUT_SECS`
    #[arg(long, env = "MESH_TIMEOUT_SECS")]
    pub timeout_secs: Option<u64>,

    /// Stop the whole run after the first invocation that fails for good.
    #[arg(long, default_value_t = false)]
    pub fail_fast: bool,

    /// Print each command line instead of running it.
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,

    /// Print the plan in the given format and exit without dispatching.
    #[arg(long, value_enum)]
    pub emit_plan: Option<PlanFormat>,

    /// Write a JSON report of the run to this path.
    ///
    /// Environment variable: `MESH_REPORT`
    #[arg(long, env = "MESH_REPORT")]
    pub report: Option<PathBuf>,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlanFormat {
    /// One summary line per layer followed by its command lines.
    Text,
    /// A JSON array with each layer's summary and argument vectors.
    Json,
}

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// One plan per layer, in ascending layer order.
    pub plans: Vec<DispatchPlan>,
    pub tool: ToolCommand,
    pub options: DispatchOptions,
    pub timeout: Option<Duration>,
    pub dry_run: bool,
    pub emit_plan: Option<PlanFormat>,
    pub report: Option<PathBuf>,
}

impl TryFrom<CliArgs> for DispatchConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        let params = InvocationParams::new(args.mip, args.cg_name, args.queue_name)?;

        let base = match args.base_bounds.as_slice() {
            [] => None,
            &[x, y, z] => Some(ChunkCoord::new(x, y, z)),
            other => bail!("--base-bounds takes 3 values, got {}", other.len()),
        };

        let layers = resolve_layers(&args.layers, args.all_layers, base, args.fanout)?;

        let overrides = GeometryOverrides {
            x_extent: args.x_extent,
            y_span: args.y_span,
            z_span: args.z_span,
            stride: args.stride,
        };
        let windowed = args.from_index.is_some() || args.to_index.is_some();
        let reshaped = overrides.x_extent.is_some()
            || overrides.y_span.is_some()
            || overrides.z_span.is_some();
        if layers.len() > 1 && (windowed || reshaped) {
            bail!(
                "--from-index/--to-index and --x-extent/--y-span/--z-span apply to a single layer, got {} layers",
                layers.len()
            );
        }

        let plans = layers
            .iter()
            .map(|&layer| {
                let geometry = resolve_geometry(layer, base, args.fanout, &overrides)?;
                let plan = DispatchPlan::new(geometry, params.clone())
                    .with_window(args.from_index, args.to_index)?;
                Ok(plan)
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        if args.timeout_secs == Some(0) {
            bail!("MESH_TIMEOUT_SECS must be greater than 0");
        }

        let jobs = match args.jobs {
            0 => num_cpus::get(),
            n => n,
        };

        Ok(Self {
            plans,
            tool: ToolCommand::new(args.tool, args.tool_args),
            options: DispatchOptions {
                jobs,
                retry: RetryPolicy::new(args.retries, Duration::from_millis(args.retry_backoff_ms)),
                fail_fast: args.fail_fast,
                ..Default::default()
            },
            timeout: args.timeout_secs.map(Duration::from_secs),
            dry_run: args.dry_run,
            emit_plan: args.emit_plan,
            report: args.report,
        })
    }
}

/// Sorted, deduplicated layers to dispatch.
fn resolve_layers(
    requested: &[u8],
    all_layers: bool,
    base: Option<ChunkCoord>,
    fanout: u64,
) -> anyhow::Result<Vec<u8>> {
    let mut layers: Vec<u8> = match (all_layers, base) {
        (true, Some(base)) => (2..=LayerGeometry::top_layer(base, fanout)?).collect(),
        (true, None) => LayerGeometry::preset_layers().collect(),
        (false, _) if requested.is_empty() => {
            bail!("No layer selected; pass --layer <N> (or MESH_LAYERS) or --all-layers")
        }
        (false, _) => requested.to_vec(),
    };
    layers.sort_unstable();
    layers.dedup();
    Ok(layers)
}

/// Geometry for `layer`: derived from `base` when given, else the built-in
/// table, with `overrides` applied on top.
fn resolve_geometry(
    layer: u8,
    base: Option<ChunkCoord>,
    fanout: u64,
    overrides: &GeometryOverrides,
) -> anyhow::Result<LayerGeometry> {
    if let Some(base) = base {
        let stride = overrides
            .stride
            .or_else(|| LayerGeometry::preset(layer).ok().map(|g| g.stride()))
            .unwrap_or(DEFAULT_STRIDE);
        let geometry = LayerGeometry::derive(layer, base, fanout, stride)?;
        return Ok(geometry.with_overrides(overrides)?);
    }

    match LayerGeometry::preset(layer) {
        Ok(preset) => Ok(preset.with_overrides(overrides)?),
        Err(PlanError::UnknownLayer(_)) => match (overrides.x_extent, overrides.y_span, overrides.z_span) {
            (Some(x), Some(y), Some(z)) => Ok(LayerGeometry::new(
                layer,
                x,
                y,
                z,
                overrides.stride.unwrap_or(DEFAULT_STRIDE),
            )?),
            _ => Err(PlanError::UnknownLayer(layer)).context(
                "pass --base-bounds, or --x-extent, --y-span and --z-span together",
            ),
        },
        Err(e) => Err(e.into()),
    }
}
