use crate::{ChunkRanges, Invocation, InvocationParams, LayerGeometry, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// The invocations for one layer, enumerated lazily.
///
/// A plan covers either the whole layer or an inclusive window of stride
/// indices (see [`DispatchPlan::with_window`]), which is how a partially
/// completed layer is resumed or a single stuck range is re-queued.
#[derive(Clone, Debug)]
pub struct DispatchPlan {
    ranges: ChunkRanges,
    params: Arc<InvocationParams>,
}

impl DispatchPlan {
    /// A plan over every range of `geometry`.
    pub fn new(geometry: LayerGeometry, params: InvocationParams) -> Self {
        Self {
            ranges: geometry.ranges(),
            params: Arc::new(params),
        }
    }

    /// Restricts the plan to stride indices `from..=to`.
    pub fn with_window(self, from: Option<u64>, to: Option<u64>) -> Result<Self> {
        let ranges = self.ranges.geometry().ranges_within(from, to)?;
        Ok(Self { ranges, ..self })
    }

    pub const fn geometry(&self) -> &LayerGeometry {
        self.ranges.geometry()
    }

    pub const fn layer(&self) -> u8 {
        self.ranges.geometry().layer()
    }

    pub fn params(&self) -> &InvocationParams {
        &self.params
    }

    /// Number of invocations the plan yields.
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ranges(&self) -> ChunkRanges {
        self.ranges.clone()
    }

    /// Lazily yields one [`Invocation`] per range, in index order.
    ///
    /// The iterator owns its state, so it can be moved into a task.
    pub fn invocations(&self) -> impl ExactSizeIterator<Item = Invocation> + Send + 'static {
        let params = Arc::clone(&self.params);
        self.ranges
            .clone()
            .map(move |range| Invocation::new(range, Arc::clone(&params)))
    }

    pub fn summary(&self) -> PlanSummary {
        let geometry = self.geometry();
        let bounds = self.ranges.index_bounds();

        PlanSummary {
            layer: geometry.layer(),
            x_extent: geometry.x_extent(),
            y_span: geometry.y_span(),
            z_span: geometry.z_span(),
            stride: geometry.stride(),
            first_index: bounds.map(|(first, _)| first),
            last_index: bounds.map(|(_, last)| last),
            count: self.len(),
        }
    }
}

/// Serializable overview of a [`DispatchPlan`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSummary {
    pub layer: u8,
    pub x_extent: u64,
    pub y_span: u64,
    pub z_span: u64,
    pub stride: u64,
    pub first_index: Option<u64>,
    pub last_index: Option<u64>,
    pub count: usize,
}
