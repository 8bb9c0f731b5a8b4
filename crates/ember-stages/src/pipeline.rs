//! Sequential stage container.

use crate::error::Result;
use crate::stage::Stage;
use ember_gpu::{Dispatcher, Tensor};
use std::sync::Arc;

/// An ordered, owning sequence of stages: the output of stage *i* is the
/// input of stage *i + 1*. No branching, no cycles.
#[derive(Default)]
pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
}

impl Pipeline {
    /// An empty pipeline (the identity function until stages are pushed).
    pub fn new() -> Self {
        Self { stages: Vec::new() }
    }

    /// Take ownership of the given stages, in execution order.
    pub fn from_stages(stages: Vec<Box<dyn Stage>>) -> Self {
        Self { stages }
    }

    /// Append a stage to the end of the sequence.
    pub fn push(&mut self, stage: Box<dyn Stage>) {
        self.stages.push(stage);
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// The stage names, in execution order.
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stage_names())
            .finish()
    }
}

impl Stage for Pipeline {
    fn name(&self) -> &'static str {
        "Pipeline"
    }

    /// Thread `input` through every stage in order.
    ///
    /// Fails fast: the first stage to fail aborts the remaining sequence
    /// and its error propagates unchanged.
    fn forward(&mut self, disp: &mut Dispatcher, input: &Arc<Tensor>) -> Result<Arc<Tensor>> {
        let mut current = Arc::clone(input);
        for stage in &mut self.stages {
            tracing::trace!(stage = stage.name(), shape = %current.shape(), "forward");
            current = stage.forward(disp, &current)?;
        }
        Ok(current)
    }
}
