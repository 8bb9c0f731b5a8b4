//! Linear (dense) stage: `output = W·input + bias`.

use crate::error::{Result, StageError};
use crate::stage::Stage;
use ember_gpu::{
    Dispatcher, KernelId, KernelSource, Launch, Shape, ShaderDefs, Tensor, matvec_partition,
    padded_global,
};
use naga_oil::compose::ShaderDefValue;
use std::sync::Arc;

/// Workgroup width of the bias-accumulate pass.
const ACCUM_WG: u32 = 64;

// Row-parallel matrix-vector multiply with a workgroup tree reduction over
// column partial sums, plus a separate bias accumulation entry point.
// The weight matrix is stored column-major so the row index is the fastest-
// moving one: consecutive invocations of one column chunk read consecutive
// addresses.
const LINEAR_WGSL: &str = r#"
struct MatVecParams {
    m: u32,
    n: u32,
}

@group(0) @binding(0) var<storage, read> weights: array<f32>;
@group(0) @binding(1) var<storage, read> vector: array<f32>;
@group(0) @binding(2) var<storage, read_write> result: array<f32>;
@group(0) @binding(3) var<storage, read> biases: array<f32>;

var<immediate> params: MatVecParams;

var<workgroup> partials: array<f32, #{WG_TOTAL}>;

@compute @workgroup_size(#{WG_ROWS}, #{WG_COLS}, 1)
fn mat_vec_mult(
    @builtin(global_invocation_id) gid: vec3<u32>,
    @builtin(local_invocation_id) lid: vec3<u32>,
) {
    // Partial dot product: each column lane strides over the columns.
    // The chunk count is uniform so the barriers below stay in uniform
    // control flow.
    let row = gid.x;
    let chunks = (params.n + #{WG_COLS}u - 1u) / #{WG_COLS}u;
    var sum = 0.0;
    var c = 0u;
    while c < chunks {
        let k = gid.y + c * #{WG_COLS}u;
        if k < params.n {
            sum = sum + weights[row + params.m * k] * vector[k];
        }
        c = c + 1u;
    }

    let ii = lid.x;
    let jj = lid.y;
    partials[ii + #{WG_ROWS}u * jj] = sum;
    workgroupBarrier();

    // Reduce the column partials in log2(WG_COLS) steps.
    var cols = #{WG_COLS}u;
    while cols > 1u {
        cols = cols >> 1u;
        if jj < cols {
            partials[ii + #{WG_ROWS}u * jj] =
                partials[ii + #{WG_ROWS}u * jj] + partials[ii + #{WG_ROWS}u * (jj + cols)];
        }
        workgroupBarrier();
    }

    if jj == 0u {
        result[row] = partials[ii];
    }
}

@compute @workgroup_size(#{WG_ACCUM}, 1, 1)
fn accum_bias(@builtin(global_invocation_id) gid: vec3<u32>) {
    if gid.x < params.m {
        result[gid.x] = result[gid.x] + biases[gid.x];
    }
}
"#;

const LINEAR_SOURCE: KernelSource = KernelSource::Inline {
    label: "linear",
    source: LINEAR_WGSL,
};

/// Dense layer over a 1-D input of length `n_inputs`, producing a 1-D
/// output of length `n_outputs`.
///
/// Weights and biases are construction parameters; they are staged on the
/// host and uploaded to the device once, on the first forward call.
pub struct Linear {
    n_inputs: usize,
    n_outputs: usize,
    /// Column-major `[n_outputs x n_inputs]`; transposed from the row-major
    /// construction layout for the kernel's access pattern.
    weights_host: Vec<f32>,
    biases_host: Vec<f32>,
    weights: Option<Tensor>,
    biases: Option<Tensor>,
    output: Option<Arc<Tensor>>,
}

impl Linear {
    /// Build a dense layer from row-major weights (`n_outputs` rows of
    /// `n_inputs` values) and `n_outputs` biases.
    ///
    /// # Errors
    /// [`StageError::ShapeMismatch`] if a dimension is zero or the slices
    /// do not match the declared dimensions.
    pub fn new(n_inputs: usize, n_outputs: usize, weights: &[f32], biases: &[f32]) -> Result<Self> {
        if n_inputs == 0 || n_outputs == 0 {
            return Err(StageError::ShapeMismatch(format!(
                "linear layer dimensions must be positive, got {n_outputs}x{n_inputs}"
            )));
        }
        if weights.len() != n_inputs * n_outputs {
            return Err(StageError::ShapeMismatch(format!(
                "weight matrix has {} values, {n_outputs}x{n_inputs} layer needs {}",
                weights.len(),
                n_inputs * n_outputs
            )));
        }
        if biases.len() != n_outputs {
            return Err(StageError::ShapeMismatch(format!(
                "bias vector has {} values, layer has {n_outputs} outputs",
                biases.len()
            )));
        }

        // Transpose once at construction; the kernel indexes [row + m * col].
        let mut weights_host = vec![0.0f32; weights.len()];
        for row in 0..n_outputs {
            for col in 0..n_inputs {
                weights_host[row + n_outputs * col] = weights[row * n_inputs + col];
            }
        }

        Ok(Self {
            n_inputs,
            n_outputs,
            weights_host,
            biases_host: biases.to_vec(),
            weights: None,
            biases: None,
            output: None,
        })
    }

    pub fn n_inputs(&self) -> usize {
        self.n_inputs
    }

    pub fn n_outputs(&self) -> usize {
        self.n_outputs
    }

    fn init(&mut self, disp: &mut Dispatcher, input: &Tensor) -> Result<()> {
        if input.shape().rank() != 1 {
            return Err(StageError::TypeMismatch(format!(
                "linear stage expects a 1-D tensor, got rank {}",
                input.shape().rank()
            )));
        }
        if input.len() != self.n_inputs {
            return Err(StageError::ShapeMismatch(format!(
                "linear stage expects {} inputs, got {}",
                self.n_inputs,
                input.len()
            )));
        }

        let ctx = disp.context().clone();
        if self.weights.is_none() {
            let shape = Shape::new(&[self.n_outputs, self.n_inputs])?;
            self.weights = Some(Tensor::from_host(&ctx, shape, &self.weights_host)?);
        }
        if self.biases.is_none() {
            let shape = Shape::new(&[self.n_outputs])?;
            self.biases = Some(Tensor::from_host(&ctx, shape, &self.biases_host)?);
        }
        if self.output.is_none() {
            let shape = Shape::new(&[self.n_outputs])?;
            self.output = Some(Arc::new(Tensor::new(&ctx, shape)?));
        }
        Ok(())
    }

    fn kernels(&self, disp: &mut Dispatcher, local: [u32; 3]) -> Result<(KernelId, KernelId)> {
        let mut defs = ShaderDefs::new();
        defs.insert("WG_ROWS".to_string(), ShaderDefValue::UInt(local[0]));
        defs.insert("WG_COLS".to_string(), ShaderDefValue::UInt(local[1]));
        defs.insert(
            "WG_TOTAL".to_string(),
            ShaderDefValue::UInt(local[0] * local[1]),
        );
        defs.insert("WG_ACCUM".to_string(), ShaderDefValue::UInt(ACCUM_WG));

        let matvec = disp.kernel(&LINEAR_SOURCE, "mat_vec_mult", &defs)?;
        let accum = disp.kernel(&LINEAR_SOURCE, "accum_bias", &defs)?;
        Ok((matvec, accum))
    }
}

impl Stage for Linear {
    fn name(&self) -> &'static str {
        "Linear"
    }

    fn forward(&mut self, disp: &mut Dispatcher, input: &Arc<Tensor>) -> Result<Arc<Tensor>> {
        self.init(disp, input)?;
        let (weights, biases, output) = match (&self.weights, &self.biases, &self.output) {
            (Some(w), Some(b), Some(o)) => (w, b, Arc::clone(o)),
            _ => {
                return Err(StageError::Gpu(ember_gpu::GpuError::Execution(
                    "linear state missing after init".to_string(),
                )));
            }
        };

        let m = self.n_outputs as u32;
        let n = self.n_inputs as u32;
        let partition = matvec_partition(m, disp.max_workgroup_size(), disp.max_workitem_size(1)?);
        let (matvec, accum) = self.kernels(disp, partition.local)?;

        let mut immediates = Vec::new();
        immediates.extend_from_slice(&m.to_le_bytes());
        immediates.extend_from_slice(&n.to_le_bytes());

        disp.launch(
            matvec,
            &Launch {
                bindings: vec![weights, input.as_ref(), output.as_ref()],
                immediates: immediates.clone(),
                global: partition.global,
                blocking: false,
            },
        )?;

        // The queue is in-order: the bias pass reads the matvec result
        // without an explicit wait.
        disp.launch(
            accum,
            &Launch {
                bindings: vec![output.as_ref(), biases],
                immediates,
                global: [padded_global(m, ACCUM_WG), 1, 1],
                blocking: false,
            },
        )?;

        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_dimensions() {
        assert!(Linear::new(0, 3, &[], &[0.0; 3]).is_err());
        assert!(Linear::new(3, 0, &[], &[]).is_err());
    }

    #[test]
    fn rejects_mismatched_parameters() {
        assert!(matches!(
            Linear::new(2, 3, &[0.0; 5], &[0.0; 3]),
            Err(StageError::ShapeMismatch(_))
        ));
        assert!(matches!(
            Linear::new(2, 3, &[0.0; 6], &[0.0; 2]),
            Err(StageError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn weights_are_transposed_at_construction() {
        // Row-major input:  [[1, 2],
        //                    [3, 4],
        //                    [5, 6]]  (3 outputs x 2 inputs)
        let l = Linear::new(2, 3, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[0.0; 3]).unwrap();
        // Column-major storage: rows fastest.
        assert_eq!(l.weights_host, vec![1.0, 3.0, 5.0, 2.0, 4.0, 6.0]);
    }

    #[test]
    fn one_by_one_layer_is_valid() {
        let l = Linear::new(1, 1, &[2.5], &[0.5]).unwrap();
        assert_eq!(l.n_inputs(), 1);
        assert_eq!(l.n_outputs(), 1);
    }
}
