//! Elementwise hyperbolic tangent stage.

use crate::error::{Result, StageError};
use crate::stage::Stage;
use ember_gpu::{Dispatcher, GpuError, KernelSource, Launch, Shape, ShaderDefs, Tensor, padded_global};
use naga_oil::compose::ShaderDefValue;
use std::path::PathBuf;
use std::sync::Arc;

const WG: u32 = 256;

/// Applies `tanh` to every element; output shape equals input shape.
#[derive(Default)]
pub struct Tanh {
    state: Option<TanhState>,
}

struct TanhState {
    input_shape: Shape,
    output: Arc<Tensor>,
}

impl Tanh {
    pub fn new() -> Self {
        Self { state: None }
    }

    fn init(&mut self, disp: &mut Dispatcher, input: &Tensor) -> Result<()> {
        if let Some(state) = &self.state
            && state.input_shape == *input.shape()
        {
            return Ok(());
        }
        let shape = input.shape().clone();
        let output = Arc::new(Tensor::new(disp.context(), shape.clone())?);
        self.state = Some(TanhState {
            input_shape: shape,
            output,
        });
        Ok(())
    }
}

impl Stage for Tanh {
    fn name(&self) -> &'static str {
        "Tanh"
    }

    fn forward(&mut self, disp: &mut Dispatcher, input: &Arc<Tensor>) -> Result<Arc<Tensor>> {
        self.init(disp, input)?;
        let state = self.state.as_ref().ok_or_else(|| {
            StageError::Gpu(GpuError::Execution(
                "tanh state missing after init".to_string(),
            ))
        })?;

        let count = input.len() as u32;
        let mut immediates = Vec::new();
        immediates.extend_from_slice(&count.to_le_bytes());

        let mut defs = ShaderDefs::new();
        defs.insert("WG_SIZE".to_string(), ShaderDefValue::UInt(WG));

        let source = KernelSource::File(PathBuf::from("tanh.wgsl"));
        let kernel = disp.kernel(&source, "tanh_forward", &defs)?;
        disp.launch(
            kernel,
            &Launch {
                bindings: vec![input.as_ref(), state.output.as_ref()],
                immediates,
                global: [padded_global(count, WG), 1, 1],
                blocking: false,
            },
        )?;

        Ok(Arc::clone(&state.output))
    }
}
