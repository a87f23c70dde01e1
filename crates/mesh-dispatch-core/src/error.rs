//! Error types for dispatch planning.
//!
//! Everything that can go wrong before the first invocation is launched is a
//! [`PlanError`]: the layer geometry is inconsistent, no preset exists for the
//! requested layer, the shared invocation parameters are unusable, or an index
//! window does not fit the layer.
//!
//! ## Error Cases
//! - `InvalidGeometry`: zero stride, zero span, or a layer below 2.
//! - `UnknownLayer`: no preset geometry exists for the layer.
//! - `InvalidParams`: empty dataset name or queue identifier.
//! - `IndexWindow`: `from > to` or `to` past the layer's last index.

use thiserror::Error;

/// A result type defaulting to [`PlanError`].
pub type Result<T, E = PlanError> = core::result::Result<T, E>;

/// Unified error type for building dispatch plans.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    /// The geometry for a layer cannot produce a valid partition.
    #[error("Invalid geometry for layer {layer}: {reason}")]
    InvalidGeometry { layer: u8, reason: String },

    /// No preset geometry exists for the layer.
    #[error("No preset geometry for layer {0}; supply extents or base bounds explicitly")]
    UnknownLayer(u8),

    /// The parameters shared by every invocation are unusable.
    #[error("Invalid invocation parameters: {reason}")]
    InvalidParams { reason: String },

    /// The requested index window does not fit the layer.
    #[error("Index window {from}..={to} is outside 0..={max_index} for layer {layer}")]
    IndexWindow {
        layer: u8,
        from: u64,
        to: u64,
        max_index: u64,
    },
}
