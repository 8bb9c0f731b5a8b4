//! Load a serialized model from disk and run it forward on the GPU.

use ember_gpu::{Dispatcher, GpuContext, Shape, Tensor};
use ember_model::{load_model, tags};
use ember_stages::Stage;
use std::sync::Arc;

fn le_i32(bytes: &mut Vec<u8>, v: i32) {
    bytes.extend_from_slice(&v.to_le_bytes());
}

fn le_f32s(bytes: &mut Vec<u8>, vs: &[f32]) {
    for v in vs {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
}

#[test]
#[ignore = "requires a GPU"]
fn model_file_runs_forward() {
    // Reshape(-1) -> Linear(4 -> 2) -> Identity over a 2x2 input.
    //
    // W = [[1, 0, 1, 0],   b = [10, 20]
    //      [0, 2, 0, 2]]
    let mut bytes = Vec::new();
    le_i32(&mut bytes, 3);

    le_i32(&mut bytes, tags::RESHAPE);
    le_i32(&mut bytes, 1);
    le_i32(&mut bytes, -1);

    le_i32(&mut bytes, tags::LINEAR);
    le_i32(&mut bytes, 2); // n_outputs
    le_i32(&mut bytes, 4); // n_inputs
    le_f32s(&mut bytes, &[1.0, 0.0, 1.0, 0.0, 0.0, 2.0, 0.0, 2.0]);
    le_f32s(&mut bytes, &[10.0, 20.0]);

    le_i32(&mut bytes, tags::IDENTITY);

    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("e2e.emb");
    std::fs::write(&path, &bytes).expect("write model");

    let mut pipeline = load_model(&path).expect("model should load");
    assert_eq!(
        pipeline.stage_names(),
        vec!["Reshape", "Linear", "Identity"]
    );

    let ctx = GpuContext::new_blocking().expect("GPU context");
    let mut disp = Dispatcher::with_source_root(&ctx, ember_stages::shader_root());

    let input = Arc::new(
        Tensor::from_host(
            &ctx,
            Shape::new(&[2, 2]).unwrap(),
            &[1.0, 2.0, 3.0, 4.0],
        )
        .unwrap(),
    );
    let output = pipeline.forward(&mut disp, &input).expect("forward");

    // [1 + 3 + 10, 2*2 + 2*4 + 20]
    assert_eq!(output.shape().extents(), &[2]);
    assert_eq!(output.read(&ctx).unwrap(), vec![14.0, 32.0]);
}
