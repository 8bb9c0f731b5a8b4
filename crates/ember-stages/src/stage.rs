//! The stage trait.

use crate::error::Result;
use ember_gpu::{Dispatcher, Tensor};
use std::sync::Arc;

/// One forward-computation unit in an inference pipeline (a "layer").
///
/// A stage owns its output tensor and any auxiliary tensors it needs, and
/// lazily (re)establishes them when the input shape changes:
///
/// - first forward call: allocate output/auxiliary state for the input shape
/// - same shape again: reuse the existing buffers, no reallocation
/// - different shape: tear down and rebuild for the new shape
///
/// Parameter-derived state (weights, normalized kernels) is computed at most
/// once; parameters are immutable after construction.
///
/// `forward` never mutates its input. The returned tensor shares the stage's
/// owned output buffer (or, for pass-through stages, the input itself), so
/// callers must not hold it across a later forward call expecting stable
/// contents.
pub trait Stage {
    /// Stage name, as written in diagnostics and model listings.
    fn name(&self) -> &'static str;

    /// Run the forward operation, leaving the result in the stage's owned
    /// output tensor and returning a shared handle to it.
    fn forward(&mut self, disp: &mut Dispatcher, input: &Arc<Tensor>) -> Result<Arc<Tensor>>;
}
