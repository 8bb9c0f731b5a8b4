//! Spatial divisive normalization stage.
//!
//! Divides every element by an estimate of the local standard deviation:
//! the squared input is filtered with a normalized averaging kernel
//! (separably when the kernel is 1-D), summed across feature maps, square-
//! rooted, corrected by precomputed border coefficients and floored at a
//! threshold, then the input is divided elementwise by the result.

use crate::error::{Result, StageError};
use crate::stage::Stage;
use ember_gpu::{
    Dispatcher, GpuError, KernelSource, Launch, Shape, ShaderDefs, Tensor, padded_global,
};
use std::path::PathBuf;
use std::sync::Arc;

/// Workgroup extent of every normalization pass (8x8x1).
const WG: u32 = 8;

fn sdn_source() -> KernelSource {
    KernelSource::File(PathBuf::from("spatial_divisive_normalization.wgsl"))
}

/// Divisive normalization over a `width x height x feats` input.
///
/// The averaging kernel must be odd-sized in both spatial dimensions with a
/// channel depth of 1. A 1-D kernel selects the separable two-pass filter;
/// a 2-D kernel runs a single full pass.
#[derive(Debug)]
pub struct SpatialDivisiveNormalization {
    kernel_host: Vec<f32>,
    kernel_w: usize,
    kernel_h: usize,
    threshold: f32,
    state: Option<SdnState>,
}

/// Shape-dependent device state, torn down and rebuilt whenever the input
/// shape changes.
#[derive(Debug)]
struct SdnState {
    input_shape: Shape,
    kernel_norm: Tensor,
    std_coef: Tensor,
    std_pass1: Tensor,
    std_pass2: Tensor,
    std_dev: Tensor,
    output: Arc<Tensor>,
}

impl SpatialDivisiveNormalization {
    /// Build a normalization stage from an averaging kernel.
    ///
    /// `extents` is the kernel shape: `[w]` for a separable 1-D kernel,
    /// `[w, h]` for a full 2-D kernel, `[w, h, 1]` accepted for symmetry.
    ///
    /// # Errors
    /// [`StageError::InvalidKernelShape`] if either spatial extent is even,
    /// the channel depth is not 1, or `kernel` does not match `extents`.
    pub fn new(kernel: &[f32], extents: &[usize], threshold: f32) -> Result<Self> {
        if extents.is_empty() || extents.len() > 3 {
            return Err(StageError::InvalidKernelShape(format!(
                "kernel rank {} outside 1..=3",
                extents.len()
            )));
        }
        if extents.len() == 3 && extents[2] != 1 {
            return Err(StageError::InvalidKernelShape(format!(
                "kernel channel depth must be 1, got {}",
                extents[2]
            )));
        }
        let kernel_w = extents[0];
        let kernel_h = extents.get(1).copied().unwrap_or(1);
        if kernel_w == 0 || kernel_h == 0 {
            return Err(StageError::InvalidKernelShape(
                "kernel extents must be positive".to_string(),
            ));
        }
        if kernel_w % 2 == 0 || kernel_h % 2 == 0 {
            return Err(StageError::InvalidKernelShape(format!(
                "averaging kernel must be odd-sized, got {kernel_w}x{kernel_h}"
            )));
        }
        if kernel.len() != kernel_w * kernel_h {
            return Err(StageError::InvalidKernelShape(format!(
                "kernel has {} values, {kernel_w}x{kernel_h} needs {}",
                kernel.len(),
                kernel_w * kernel_h
            )));
        }

        Ok(Self {
            kernel_host: kernel.to_vec(),
            kernel_w,
            kernel_h,
            threshold,
            state: None,
        })
    }

    /// True if the kernel is 1-D and the filter runs as two passes.
    pub fn is_separable(&self) -> bool {
        self.kernel_h == 1
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    fn init(&mut self, disp: &mut Dispatcher, input: &Tensor) -> Result<()> {
        if input.shape().rank() != 3 {
            return Err(StageError::TypeMismatch(format!(
                "normalization expects a 3-D tensor, got rank {}",
                input.shape().rank()
            )));
        }
        if let Some(state) = &self.state
            && state.input_shape == *input.shape()
        {
            return Ok(());
        }

        // Input shape changed (or first call): rebuild everything, the
        // normalized kernel included, since its scaling depends on the feature
        // count.
        let ctx = disp.context().clone();
        let shape = input.shape().clone();
        let (width, height, feats) = (shape.extent(0), shape.extent(1), shape.extent(2));

        let kernel_shape = if self.is_separable() {
            Shape::new(&[self.kernel_w])?
        } else {
            Shape::new(&[self.kernel_w, self.kernel_h])?
        };
        let kernel_norm = Tensor::from_host(&ctx, kernel_shape, &self.kernel_host)?;
        let sum = kernel_norm.slow_sum(&ctx)?;
        let div_val = if self.is_separable() {
            sum * (feats as f32).sqrt()
        } else {
            sum * feats as f32
        };
        kernel_norm.scale(&ctx, 1.0 / div_val)?;

        // The border coefficients come from convolving an all-ones image
        // with the normalized kernel, once per shape on the host.
        let norm_host = kernel_norm.read(&ctx)?;
        let coef = normalization_coefficients(
            &norm_host,
            self.kernel_w,
            self.kernel_h,
            width,
            height,
            feats,
        );
        let std_coef = Tensor::from_host(&ctx, Shape::new(&[width, height])?, &coef)?;

        self.state = Some(SdnState {
            std_pass1: Tensor::new(&ctx, shape.clone())?,
            std_pass2: Tensor::new(&ctx, shape.clone())?,
            std_dev: Tensor::new(&ctx, Shape::new(&[width, height])?)?,
            output: Arc::new(Tensor::new(&ctx, shape.clone())?),
            input_shape: shape,
            kernel_norm,
            std_coef,
        });
        Ok(())
    }

    fn immediates(&self, shape: &Shape) -> Vec<u8> {
        let rad_u = ((self.kernel_w - 1) / 2) as i32;
        let rad_v = if self.is_separable() {
            rad_u
        } else {
            ((self.kernel_h - 1) / 2) as i32
        };

        let mut bytes = Vec::new();
        bytes.extend_from_slice(&(shape.extent(0) as u32).to_le_bytes());
        bytes.extend_from_slice(&(shape.extent(1) as u32).to_le_bytes());
        bytes.extend_from_slice(&(shape.extent(2) as u32).to_le_bytes());
        bytes.extend_from_slice(&rad_u.to_le_bytes());
        bytes.extend_from_slice(&rad_v.to_le_bytes());
        bytes.extend_from_slice(&self.threshold.to_le_bytes());
        bytes
    }
}

impl Stage for SpatialDivisiveNormalization {
    fn name(&self) -> &'static str {
        "SpatialDivisiveNormalization"
    }

    fn forward(&mut self, disp: &mut Dispatcher, input: &Arc<Tensor>) -> Result<Arc<Tensor>> {
        self.init(disp, input)?;
        let state = self.state.as_ref().ok_or_else(|| {
            StageError::Gpu(GpuError::Execution(
                "normalization state missing after init".to_string(),
            ))
        })?;

        let shape = &state.input_shape;
        let immediates = self.immediates(shape);
        let defs = ShaderDefs::new();
        let source = sdn_source();

        let plane = [
            padded_global(shape.extent(0) as u32, WG),
            padded_global(shape.extent(1) as u32, WG),
            1,
        ];
        let volume = [plane[0], plane[1], shape.extent(2) as u32];

        if self.is_separable() {
            let horiz = disp.kernel(&source, "sdn_horiz", &defs)?;
            disp.launch(
                horiz,
                &Launch {
                    bindings: vec![input.as_ref(), &state.std_pass1, &state.kernel_norm],
                    immediates: immediates.clone(),
                    global: volume,
                    blocking: false,
                },
            )?;

            let vert = disp.kernel(&source, "sdn_vert", &defs)?;
            disp.launch(
                vert,
                &Launch {
                    bindings: vec![&state.std_pass1, &state.std_pass2, &state.kernel_norm],
                    immediates: immediates.clone(),
                    global: volume,
                    blocking: false,
                },
            )?;
        } else {
            let full = disp.kernel(&source, "sdn_2d", &defs)?;
            disp.launch(
                full,
                &Launch {
                    bindings: vec![input.as_ref(), &state.std_pass2, &state.kernel_norm],
                    immediates: immediates.clone(),
                    global: volume,
                    blocking: false,
                },
            )?;
        }

        let accum = disp.kernel(&source, "sdn_accum_div", &defs)?;
        disp.launch(
            accum,
            &Launch {
                bindings: vec![&state.std_pass2, &state.std_dev, &state.std_coef],
                immediates: immediates.clone(),
                global: plane,
                blocking: false,
            },
        )?;

        let divide = disp.kernel(&source, "sdn_divide", &defs)?;
        disp.launch(
            divide,
            &Launch {
                bindings: vec![input.as_ref(), state.output.as_ref(), &state.std_dev],
                immediates,
                global: volume,
                blocking: false,
            },
        )?;

        Ok(Arc::clone(&state.output))
    }
}

/// Border-correction coefficients: the normalized kernel convolved over an
/// all-ones image, divided by the feature count.
///
/// O(width * height * kernel area) on the host, run once per input shape
/// and amortized across every subsequent forward call.
fn normalization_coefficients(
    kernel_norm: &[f32],
    kernel_w: usize,
    kernel_h: usize,
    width: usize,
    height: usize,
    feats: usize,
) -> Vec<f32> {
    let mut coef = vec![0.0f32; width * height];
    let rad_u = (kernel_w as i32 - 1) / 2;

    if kernel_h == 1 {
        // Separable kernel applied twice: the coefficient at each pixel is
        // the sum of the outer product over the in-bounds window.
        for y in 0..height as i32 {
            for x in 0..width as i32 {
                let mut sum = 0.0f32;
                for v in -rad_u..=rad_u {
                    for u in -rad_u..=rad_u {
                        let x_in = x + u;
                        let y_in = y + v;
                        if x_in >= 0 && x_in < width as i32 && y_in >= 0 && y_in < height as i32 {
                            sum += kernel_norm[(v + rad_u) as usize]
                                * kernel_norm[(u + rad_u) as usize];
                        }
                    }
                }
                coef[y as usize * width + x as usize] = sum / feats as f32;
            }
        }
    } else {
        let rad_v = (kernel_h as i32 - 1) / 2;
        for y in 0..height as i32 {
            for x in 0..width as i32 {
                let mut sum = 0.0f32;
                for v in -rad_v..=rad_v {
                    for u in -rad_u..=rad_u {
                        let x_in = x + u;
                        let y_in = y + v;
                        if x_in >= 0 && x_in < width as i32 && y_in >= 0 && y_in < height as i32 {
                            sum += kernel_norm[(v + rad_v) as usize * kernel_w + (u + rad_u) as usize];
                        }
                    }
                }
                coef[y as usize * width + x as usize] = sum / feats as f32;
            }
        }
    }

    coef
}
