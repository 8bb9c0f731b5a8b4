//! Nearest-neighbor spatial upsampling stage.

use crate::error::{Result, StageError};
use crate::stage::Stage;
use ember_gpu::{
    Dispatcher, GpuError, KernelSource, Launch, Shape, ShaderDefs, Tensor, padded_global,
};
use std::path::PathBuf;
use std::sync::Arc;

const WG: u32 = 8;

/// Scales the two spatial dimensions of a `width x height x feats` input by
/// an integer factor, replicating each source pixel (no interpolation).
pub struct SpatialUpSamplingNearest {
    scale: u32,
    state: Option<UpsampleState>,
}

struct UpsampleState {
    input_shape: Shape,
    output: Arc<Tensor>,
}

impl SpatialUpSamplingNearest {
    /// Build an upsampling stage.
    ///
    /// # Errors
    /// [`StageError::InvalidScale`] unless `scale` is a positive integer.
    pub fn new(scale: i32) -> Result<Self> {
        if scale < 1 {
            return Err(StageError::InvalidScale(format!(
                "upsampling scale must be a positive integer, got {scale}"
            )));
        }
        Ok(Self {
            scale: scale as u32,
            state: None,
        })
    }

    pub fn scale(&self) -> u32 {
        self.scale
    }

    fn init(&mut self, disp: &mut Dispatcher, input: &Tensor) -> Result<()> {
        if input.shape().rank() != 3 {
            return Err(StageError::TypeMismatch(format!(
                "upsampling expects a 3-D tensor, got rank {}",
                input.shape().rank()
            )));
        }
        if let Some(state) = &self.state
            && state.input_shape == *input.shape()
        {
            return Ok(());
        }

        let shape = input.shape().clone();
        let scale = self.scale as usize;
        let out_shape = Shape::new(&[
            shape.extent(0) * scale,
            shape.extent(1) * scale,
            shape.extent(2),
        ])?;
        let output = Arc::new(Tensor::new(disp.context(), out_shape)?);
        self.state = Some(UpsampleState {
            input_shape: shape,
            output,
        });
        Ok(())
    }
}

impl Stage for SpatialUpSamplingNearest {
    fn name(&self) -> &'static str {
        "SpatialUpSamplingNearest"
    }

    fn forward(&mut self, disp: &mut Dispatcher, input: &Arc<Tensor>) -> Result<Arc<Tensor>> {
        self.init(disp, input)?;
        let state = self.state.as_ref().ok_or_else(|| {
            StageError::Gpu(GpuError::Execution(
                "upsampling state missing after init".to_string(),
            ))
        })?;

        let out_shape = state.output.shape();
        let (out_w, out_h, feats) = (
            out_shape.extent(0) as u32,
            out_shape.extent(1) as u32,
            out_shape.extent(2) as u32,
        );

        let mut immediates = Vec::new();
        immediates.extend_from_slice(&out_w.to_le_bytes());
        immediates.extend_from_slice(&out_h.to_le_bytes());
        immediates.extend_from_slice(&self.scale.to_le_bytes());

        let source = KernelSource::File(PathBuf::from("spatial_up_sampling_nearest.wgsl"));
        let kernel = disp.kernel(&source, "upsample_nearest", &ShaderDefs::new())?;
        disp.launch(
            kernel,
            &Launch {
                bindings: vec![input.as_ref(), state.output.as_ref()],
                immediates,
                global: [padded_global(out_w, WG), padded_global(out_h, WG), feats],
                blocking: false,
            },
        )?;

        Ok(Arc::clone(&state.output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_positive_scale() {
        assert!(matches!(
            SpatialUpSamplingNearest::new(0),
            Err(StageError::InvalidScale(_))
        ));
        assert!(matches!(
            SpatialUpSamplingNearest::new(-2),
            Err(StageError::InvalidScale(_))
        ));
    }

    #[test]
    fn scale_one_is_valid() {
        let stage = SpatialUpSamplingNearest::new(1).unwrap();
        assert_eq!(stage.scale(), 1);
    }
}
