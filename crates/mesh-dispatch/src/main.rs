#![doc = include_str!("../README.md")]

mod dispatch;

use anyhow::Context;
use clap::Parser;
use dispatch::config::{CliArgs, DispatchConfig, PlanFormat};
use dispatch::coordinator::Dispatcher;
use dispatch::launcher::{DryRunLauncher, Launcher, ProcessLauncher};
use dispatch::report::DispatchReport;
use dispatch::telemetry::init_telemetry;
use mesh_dispatch_core::{DispatchPlan, PlanSummary, ToolCommand};
use serde::Serialize;
use std::io::Write;
use std::path::Path;
use tokio::signal;
use tokio_util::sync::CancellationToken;

// Using mimalloc for better performance with many short-lived child processes
// and musl builds.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = DispatchConfig::try_from(args)?;

    if let Some(format) = config.emit_plan {
        return emit_plan(&config.plans, &config.tool, format);
    }

    let providers = init_telemetry()?;
    log_startup_info(&config);

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel.clone()));

    let outcome = if config.dry_run {
        let launcher = DryRunLauncher::new(config.tool.clone());
        run(launcher, &config, &cancel).await
    } else {
        let launcher = ProcessLauncher::new(config.tool.clone(), config.timeout);
        run(launcher, &config, &cancel).await
    };

    if let Ok(report) = &outcome {
        log_summary(report);
    }
    providers.shutdown();
    let report = outcome?;

    if let Some(path) = &config.report {
        write_report(path, &report)?;
    }

    report.ensure_success()
}

async fn run<L: Launcher>(
    launcher: L,
    config: &DispatchConfig,
    cancel: &CancellationToken,
) -> anyhow::Result<DispatchReport> {
    let dispatcher = Dispatcher::new(launcher, config.options);
    let report = dispatcher.run(&config.plans, config.dry_run, cancel).await?;
    Ok(report)
}

fn log_startup_info(config: &DispatchConfig) {
    if cfg!(debug_assertions) {
        tracing::info!("Starting dispatch with full config: {:#?}", config);
    } else {
        let layers: Vec<_> = config.plans.iter().map(DispatchPlan::layer).collect();
        tracing::info!(
            "Starting dispatch of layer(s) {:?} with {} worker(s){}",
            layers,
            config.options.jobs,
            if config.dry_run { " (dry run)" } else { "" }
        );
    }
}

fn log_summary(report: &DispatchReport) {
    tracing::info!(
        "Dispatched {} of {} invocation(s): {} succeeded, {} failed, {} cancelled",
        report.succeeded() + report.failed(),
        report.planned(),
        report.succeeded(),
        report.failed(),
        report.cancelled()
    );
    for layer in &report.layers {
        for failed in &layer.failed {
            tracing::error!(
                job_id = %failed.job_id,
                "Failed after {} attempt(s): {}",
                failed.attempts,
                failed.error
            );
        }
    }
}

fn write_report(path: &Path, report: &DispatchReport) -> anyhow::Result<()> {
    let json = serde_json::to_vec_pretty(report)?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write report to {}", path.display()))
}

/// One layer of `--emit-plan json` output.
#[derive(Serialize)]
struct PlanListing {
    #[serde(flatten)]
    summary: PlanSummary,
    invocations: Vec<Vec<String>>,
}

fn emit_plan(plans: &[DispatchPlan], tool: &ToolCommand, format: PlanFormat) -> anyhow::Result<()> {
    let mut out = std::io::stdout().lock();

    match format {
        PlanFormat::Text => {
            for plan in plans {
                let s = plan.summary();
                writeln!(
                    out,
                    "# layer {}: {} invocation(s), x extent {}, stride {}, y {}, z {}",
                    s.layer, s.count, s.x_extent, s.stride, s.y_span, s.z_span
                )?;
                for invocation in plan.invocations() {
                    writeln!(out, "{}", invocation.command_line(tool))?;
                }
            }
        }
        PlanFormat::Json => {
            let listings: Vec<_> = plans
                .iter()
                .map(|plan| PlanListing {
                    summary: plan.summary(),
                    invocations: plan.invocations().map(|i| i.argv(tool)).collect(),
                })
                .collect();
            serde_json::to_writer_pretty(&mut out, &listings)?;
            writeln!(out)?;
        }
    }

    out.flush()?;
    Ok(())
}

/// Cancels `cancel` on Ctrl+C or SIGTERM. Running children are killed and
/// queued invocations are reported as cancelled.
async fn shutdown_signal(cancel: CancellationToken) {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        },
        () = terminate => {
            tracing::info!("Received SIGTERM signal");
        },
    }

    tracing::info!("Shutdown signal received, cancelling outstanding invocations...");
    cancel.cancel();
}
