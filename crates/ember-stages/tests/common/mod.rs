//! Shared helpers for the GPU stage tests.

use ember_gpu::{Dispatcher, GpuContext, Shape, Tensor};
use std::sync::Arc;

/// Create a device context and a dispatcher rooted at this crate's shaders.
pub fn gpu() -> (GpuContext, Dispatcher) {
    let ctx = GpuContext::new_blocking().expect("GPU context should initialize");
    let disp = Dispatcher::with_source_root(&ctx, ember_stages::shader_root());
    (ctx, disp)
}

/// Upload a tensor from host values.
pub fn tensor(ctx: &GpuContext, extents: &[usize], data: &[f32]) -> Arc<Tensor> {
    let shape = Shape::new(extents).expect("valid shape");
    Arc::new(Tensor::from_host(ctx, shape, data).expect("upload should succeed"))
}

/// Relative comparison with the tolerance used throughout the suite.
pub fn assert_close(actual: &[f32], expected: &[f32], what: &str) {
    assert_eq!(actual.len(), expected.len(), "{what}: length mismatch");
    for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
        let scale = e.abs().max(1.0);
        assert!(
            (a - e).abs() <= 1e-4 * scale,
            "{what}: element {i} differs: got {a}, expected {e}"
        );
    }
}
