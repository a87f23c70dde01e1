//! Components of the `mesh-dispatch` binary.
//!
//! This module contains everything between a parsed command line and the
//! external meshing tool: configuration, launching, the worker pool and the
//! run report.
//!
//! ## Submodules
//!
//! - [`config`] - CLI arguments and their validation into plans.
//! - [`coordinator`] - Runs plans layer by layer through a worker pool.
//! - [`launcher`] - Spawns (or prints) a single invocation.
//! - [`pool`] - Worker tasks and round-robin request distribution.
//! - [`telemetry`] - Structured logging and optional OpenTelemetry export.
//!
//! These components are wired together in the binary's `main.rs`.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod job;
pub mod launcher;
pub mod pool;
pub mod report;
pub mod telemetry;
