//! # Layer Geometry
//!
//! A layer of the chunked grid is dispatched as a sequence of strides along
//! the X axis. [`LayerGeometry`] carries everything needed to compute those
//! strides:
//!
//! - `x_extent`: the chunk count along X; the last stride index is
//!   `x_extent / stride` (floor), so a layer has `x_extent / stride + 1`
//!   ranges.
//! - `y_span`, `z_span`: the fixed Y/Z end coordinates of every range.
//! - `stride`: the X width of each range.
//!
//! Stride `k` covers `(k * stride, 0, 0)` to `(k * stride + stride, y_span,
//! z_span)`. Ends are computed from the index alone and are never clamped to
//! the extent, so the ranges of a layer are contiguous, non-overlapping, and
//! together cover `[0, x_extent]`.
//!
//! ## Sources
//!
//! - [`LayerGeometry::preset`]: the built-in table for layers 2 to 5.
//! - [`LayerGeometry::derive`]: layer-2 grid bounds divided by
//!   `fanout^(layer - 2)`, rounding up on every axis.
//! - [`GeometryOverrides`]: replace individual fields of either source.

use crate::{ChunkCoord, ChunkRange, PlanError, Result};
use serde::{Deserialize, Serialize};

/// Lowest layer that holds meshable chunks.
pub const MIN_LAYER: u8 = 2;

/// Built-in geometry: `(layer, x_extent, y_span, z_span, stride)`.
///
/// The X extents give last indices of 251, 125, 62 and 62. Layers 3 and 4
/// equal the layer-2 extent of 1004 halved (rounding up); layer 5 does not,
/// since `ceil(1004 / 8)` is 126, and [`LayerGeometry::derive`] yields one
/// more range there than this table.
const PRESETS: [(u8, u64, u64, u64, u64); 4] = [
    (2, 1004, 697, 42, 4),
    (3, 502, 349, 21, 4),
    (4, 251, 175, 11, 4),
    (5, 125, 88, 6, 2),
];

/// Stride width used when geometry is derived and no stride is given.
pub const DEFAULT_STRIDE: u64 = 4;

/// How one layer is split into chunk ranges.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LayerGeometry {
    layer: u8,
    x_extent: u64,
    y_span: u64,
    z_span: u64,
    stride: u64,
}

impl LayerGeometry {
    /// Creates a geometry, rejecting zero strides, zero Y/Z spans and layers
    /// below [`MIN_LAYER`].
    pub fn new(layer: u8, x_extent: u64, y_span: u64, z_span: u64, stride: u64) -> Result<Self> {
        let invalid = |reason: &str| PlanError::InvalidGeometry {
            layer,
            reason: reason.to_owned(),
        };

        if layer < MIN_LAYER {
            return Err(invalid("layers below 2 hold no meshable chunks"));
        }
        if stride == 0 {
            return Err(invalid("stride must be greater than 0"));
        }
        if y_span == 0 || z_span == 0 {
            return Err(invalid("Y and Z spans must be greater than 0"));
        }
        // The end of the last range must be representable.
        (x_extent / stride)
            .checked_mul(stride)
            .and_then(|start| start.checked_add(stride))
            .ok_or_else(|| invalid("X extent overflows the coordinate range"))?;

        Ok(Self {
            layer,
            x_extent,
            y_span,
            z_span,
            stride,
        })
    }

    /// Looks up the built-in geometry for `layer`.
    pub fn preset(layer: u8) -> Result<Self> {
        let &(layer, x, y, z, stride) = PRESETS
            .iter()
            .find(|(l, ..)| *l == layer)
            .ok_or(PlanError::UnknownLayer(layer))?;
        Self::new(layer, x, y, z, stride)
    }

    /// Layers that have a built-in geometry, in ascending order.
    pub fn preset_layers() -> impl Iterator<Item = u8> {
        PRESETS.iter().map(|(layer, ..)| *layer)
    }

    /// Derives the geometry of `layer` from the chunk-grid bounds at layer 2.
    ///
    /// Each layer merges `fanout` chunks per axis of the layer below, so the
    /// bounds at `layer` are `base / fanout^(layer - 2)`, rounded up.
    pub fn derive(layer: u8, base: ChunkCoord, fanout: u64, stride: u64) -> Result<Self> {
        if layer < MIN_LAYER {
            return Err(PlanError::InvalidGeometry {
                layer,
                reason: "layers below 2 hold no meshable chunks".to_owned(),
            });
        }
        if fanout == 0 {
            return Err(PlanError::InvalidGeometry {
                layer,
                reason: "fan-out must be greater than 0".to_owned(),
            });
        }

        let factor = fanout
            .checked_pow(u32::from(layer - MIN_LAYER))
            .ok_or_else(|| PlanError::InvalidGeometry {
                layer,
                reason: format!("fan-out {fanout} overflows at this layer"),
            })?;
        let bounds = base.div_ceil(factor);

        Self::new(layer, bounds.x, bounds.y, bounds.z, stride)
    }

    /// The first layer at which `base` collapses to a single chunk.
    ///
    /// Layers `2..=top_layer` are the ones holding chunks to mesh.
    pub fn top_layer(base: ChunkCoord, fanout: u64) -> Result<u8> {
        if fanout < 2 {
            return Err(PlanError::InvalidGeometry {
                layer: MIN_LAYER,
                reason: format!("fan-out {fanout} never reaches a single root chunk"),
            });
        }

        let mut layer = MIN_LAYER;
        let mut bounds = base;
        while bounds.x > 1 || bounds.y > 1 || bounds.z > 1 {
            layer = layer.checked_add(1).ok_or(PlanError::InvalidGeometry {
                layer,
                reason: "too many layers".to_owned(),
            })?;
            bounds = bounds.div_ceil(fanout);
        }
        Ok(layer)
    }

    /// Applies the `Some` fields of `overrides` and revalidates.
    pub fn with_overrides(self, overrides: &GeometryOverrides) -> Result<Self> {
        Self::new(
            self.layer,
            overrides.x_extent.unwrap_or(self.x_extent),
            overrides.y_span.unwrap_or(self.y_span),
            overrides.z_span.unwrap_or(self.z_span),
            overrides.stride.unwrap_or(self.stride),
        )
    }

    pub const fn layer(&self) -> u8 {
        self.layer
    }

    pub const fn x_extent(&self) -> u64 {
        self.x_extent
    }

    pub const fn y_span(&self) -> u64 {
        self.y_span
    }

    pub const fn z_span(&self) -> u64 {
        self.z_span
    }

    pub const fn stride(&self) -> u64 {
        self.stride
    }

    /// Last stride index, inclusive.
    pub const fn max_index(&self) -> u64 {
        self.x_extent / self.stride
    }

    /// Number of ranges in the whole layer.
    pub const fn range_count(&self) -> u64 {
        self.max_index() + 1
    }

    /// The range for stride `index`, or `None` past [`Self::max_index`].
    pub fn range(&self, index: u64) -> Option<ChunkRange> {
        if index > self.max_index() {
            return None;
        }
        // Cannot overflow: `new` checked the end of the last range.
        let start_x = index * self.stride;
        Some(ChunkRange::new(
            self.layer,
            index,
            ChunkCoord::new(start_x, 0, 0),
            ChunkCoord::new(start_x + self.stride, self.y_span, self.z_span),
        ))
    }

    /// Lazily yields every range of the layer in index order.
    pub fn ranges(&self) -> ChunkRanges {
        ChunkRanges {
            geometry: *self,
            front: 0,
            remaining: self.range_count(),
        }
    }

    /// Lazily yields the ranges with indices in `from..=to`.
    ///
    /// Either bound defaults to the corresponding end of the layer.
    pub fn ranges_within(&self, from: Option<u64>, to: Option<u64>) -> Result<ChunkRanges> {
        let max_index = self.max_index();
        let from = from.unwrap_or(0);
        let to = to.unwrap_or(max_index);

        if from > to || to > max_index {
            return Err(PlanError::IndexWindow {
                layer: self.layer,
                from,
                to,
                max_index,
            });
        }

        Ok(ChunkRanges {
            geometry: *self,
            front: from,
            remaining: to - from + 1,
        })
    }
}

/// Field-by-field replacements for a [`LayerGeometry`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GeometryOverrides {
    pub x_extent: Option<u64>,
    pub y_span: Option<u64>,
    pub z_span: Option<u64>,
    pub stride: Option<u64>,
}

impl GeometryOverrides {
    pub const fn is_empty(&self) -> bool {
        self.x_extent.is_none()
            && self.y_span.is_none()
            && self.z_span.is_none()
            && self.stride.is_none()
    }
}

/// Iterator over the [`ChunkRange`]s of a layer.
///
/// Each item is computed from its index; no state carries over between
/// items besides the cursor.
#[derive(Clone, Debug)]
pub struct ChunkRanges {
    geometry: LayerGeometry,
    front: u64,
    remaining: u64,
}

impl ChunkRanges {
    pub const fn geometry(&self) -> &LayerGeometry {
        &self.geometry
    }

    /// First and last index still to be yielded, if any.
    pub const fn index_bounds(&self) -> Option<(u64, u64)> {
        match self.remaining {
            0 => None,
            n => Some((self.front, self.front + n - 1)),
        }
    }
}

impl Iterator for ChunkRanges {
    type Item = ChunkRange;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let range = self.geometry.range(self.front)?;
        self.front += 1;
        self.remaining -= 1;
        Some(range)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let len = usize::try_from(self.remaining).unwrap_or(usize::MAX);
        (len, Some(len))
    }
}

impl ExactSizeIterator for ChunkRanges {}

impl core::iter::FusedIterator for ChunkRanges {}
