//! Integration tests for kernel compilation, caching and launch.

use ember_gpu::{
    Dispatcher, GpuContext, GpuError, KernelSource, Launch, Shape, ShaderDefs, Tensor,
};
use naga_oil::compose::ShaderDefValue;

const SCALE_WGSL: &str = r#"
struct ScaleParams {
    count: u32,
    factor: f32,
}

@group(0) @binding(0) var<storage, read> src: array<f32>;
@group(0) @binding(1) var<storage, read_write> dst: array<f32>;

var<immediate> params: ScaleParams;

@compute @workgroup_size(#{WG_SIZE}, 1, 1)
fn scale(@builtin(global_invocation_id) gid: vec3<u32>) {
    if gid.x < params.count {
        dst[gid.x] = src[gid.x] * params.factor;
    }
}
"#;

const SCALE_SOURCE: KernelSource = KernelSource::Inline {
    label: "scale_test",
    source: SCALE_WGSL,
};

fn defs(wg: u32) -> ShaderDefs {
    let mut defs = ShaderDefs::new();
    defs.insert("WG_SIZE".to_string(), ShaderDefValue::UInt(wg));
    defs
}

fn immediates(count: u32, factor: f32) -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&count.to_le_bytes());
    bytes.extend_from_slice(&factor.to_le_bytes());
    bytes
}

#[test]
#[ignore = "requires a GPU"]
fn compile_and_launch_inline_kernel() {
    let ctx = GpuContext::new_blocking().unwrap();
    let mut disp = Dispatcher::new(&ctx);

    let kernel = disp.kernel(&SCALE_SOURCE, "scale", &defs(64)).unwrap();

    let data: Vec<f32> = (0..100).map(|i| i as f32).collect();
    let src = Tensor::from_host(&ctx, Shape::new(&[100]).unwrap(), &data).unwrap();
    let dst = Tensor::new(&ctx, Shape::new(&[100]).unwrap()).unwrap();

    disp.launch(
        kernel,
        &Launch {
            bindings: vec![&src, &dst],
            immediates: immediates(100, 2.5),
            global: [128, 1, 1], // padded to the workgroup granule
            blocking: true,
        },
    )
    .unwrap();

    let expected: Vec<f32> = data.iter().map(|v| v * 2.5).collect();
    assert_eq!(dst.read(&ctx).unwrap(), expected);
}

#[test]
#[ignore = "requires a GPU"]
fn kernels_compile_at_most_once_per_key() {
    let ctx = GpuContext::new_blocking().unwrap();
    let mut disp = Dispatcher::new(&ctx);

    let first = disp.kernel(&SCALE_SOURCE, "scale", &defs(64)).unwrap();
    let again = disp.kernel(&SCALE_SOURCE, "scale", &defs(64)).unwrap();
    assert_eq!(first, again);

    // A different specialization is a different cache entry.
    let other = disp.kernel(&SCALE_SOURCE, "scale", &defs(128)).unwrap();
    assert_ne!(first, other);
}

#[test]
#[ignore = "requires a GPU"]
fn launch_rejects_non_divisible_global_size() {
    let ctx = GpuContext::new_blocking().unwrap();
    let mut disp = Dispatcher::new(&ctx);
    let kernel = disp.kernel(&SCALE_SOURCE, "scale", &defs(64)).unwrap();

    let src = Tensor::new(&ctx, Shape::new(&[8]).unwrap()).unwrap();
    let dst = Tensor::new(&ctx, Shape::new(&[8]).unwrap()).unwrap();

    let err = disp
        .launch(
            kernel,
            &Launch {
                bindings: vec![&src, &dst],
                immediates: immediates(8, 1.0),
                global: [100, 1, 1], // not a multiple of 64
                blocking: false,
            },
        )
        .unwrap_err();
    assert!(matches!(err, GpuError::InvalidWorkSize(_)));
}

#[test]
#[ignore = "requires a GPU"]
fn launch_rejects_wrong_binding_count() {
    let ctx = GpuContext::new_blocking().unwrap();
    let mut disp = Dispatcher::new(&ctx);
    let kernel = disp.kernel(&SCALE_SOURCE, "scale", &defs(64)).unwrap();

    let src = Tensor::new(&ctx, Shape::new(&[8]).unwrap()).unwrap();
    let err = disp
        .launch(
            kernel,
            &Launch {
                bindings: vec![&src],
                immediates: immediates(8, 1.0),
                global: [64, 1, 1],
                blocking: false,
            },
        )
        .unwrap_err();
    assert!(matches!(err, GpuError::Execution(_)));
}

#[test]
#[ignore = "requires a GPU"]
fn compilation_failure_carries_the_log() {
    let ctx = GpuContext::new_blocking().unwrap();
    let mut disp = Dispatcher::new(&ctx);

    let broken = KernelSource::Inline {
        label: "broken_test",
        source: "@compute @workgroup_size(1) fn main() { this is not wgsl }",
    };
    match disp.kernel(&broken, "main", &ShaderDefs::new()) {
        Err(GpuError::Compilation { label, log }) => {
            assert!(label.contains("broken_test"));
            assert!(!log.is_empty());
        }
        other => panic!("expected Compilation error, got {other:?}"),
    }
}

#[test]
#[ignore = "requires a GPU"]
fn missing_entry_point_is_a_compile_error() {
    let ctx = GpuContext::new_blocking().unwrap();
    let mut disp = Dispatcher::new(&ctx);
    let err = disp
        .kernel(&SCALE_SOURCE, "no_such_entry", &defs(64))
        .unwrap_err();
    assert!(matches!(err, GpuError::Compilation { .. }));
}
