use crate::ChunkCoord;
use serde::{Deserialize, Serialize};

/// One stride of a layer: the chunk-coordinate box handed to a single
/// invocation of the meshing tool.
///
/// Only the X axis varies between the ranges of a layer. Ranges are built by
/// [`LayerGeometry::range`](crate::LayerGeometry::range), which guarantees
/// `start.x <= end.x`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkRange {
    layer: u8,
    index: u64,
    start: ChunkCoord,
    end: ChunkCoord,
}

impl ChunkRange {
    pub(crate) const fn new(layer: u8, index: u64, start: ChunkCoord, end: ChunkCoord) -> Self {
        Self {
            layer,
            index,
            start,
            end,
        }
    }

    pub const fn layer(&self) -> u8 {
        self.layer
    }

    /// Stride index within the layer.
    pub const fn index(&self) -> u64 {
        self.index
    }

    pub const fn start(&self) -> ChunkCoord {
        self.start
    }

    pub const fn end(&self) -> ChunkCoord {
        self.end
    }

    /// Label of the form `layer_x_y_z`, taken from the start coordinate.
    ///
    /// Unique per layer, so it doubles as a job id in logs and reports.
    pub fn job_id(&self) -> String {
        format!(
            "{}_{}_{}_{}",
            self.layer, self.start.x, self.start.y, self.start.z
        )
    }
}
