//! Identity stage: passes its input through unchanged.

use crate::error::Result;
use crate::stage::Stage;
use ember_gpu::{Dispatcher, Tensor};
use std::sync::Arc;

/// Pass-through stage. The output *is* the input tensor: ownership of the
/// value is shared, not duplicated, and no kernel is dispatched.
#[derive(Debug, Default)]
pub struct Identity;

impl Identity {
    pub fn new() -> Self {
        Self
    }
}

impl Stage for Identity {
    fn name(&self) -> &'static str {
        "Identity"
    }

    fn forward(&mut self, _disp: &mut Dispatcher, input: &Arc<Tensor>) -> Result<Arc<Tensor>> {
        Ok(Arc::clone(input))
    }
}
