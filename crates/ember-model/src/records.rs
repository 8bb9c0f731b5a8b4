//! Per-stage record readers.
//!
//! One record per layer, fields in declaration order, all integers signed
//! 32-bit little-endian and all floats 32-bit IEEE-754 little-endian. Each
//! reader consumes exactly its record and hands the decoded parameters to
//! the stage constructor, so construction-time validation (odd kernels,
//! positive scales) applies to file input too.

use crate::error::{ModelError, Result};
use crate::reader::RecordReader;
use ember_stages::{
    Identity, Linear, Reshape, SpatialDivisiveNormalization, SpatialUpSamplingNearest, Stage, Tanh,
};

pub fn read_identity(_r: &mut RecordReader<'_>) -> Result<Box<dyn Stage>> {
    Ok(Box::new(Identity::new()))
}

pub fn read_tanh(_r: &mut RecordReader<'_>) -> Result<Box<dyn Stage>> {
    Ok(Box::new(Tanh::new()))
}

/// `i32 n_outputs`, `i32 n_inputs`, `f32[n_outputs * n_inputs]` row-major
/// weights, `f32[n_outputs]` biases.
pub fn read_linear(r: &mut RecordReader<'_>) -> Result<Box<dyn Stage>> {
    let n_outputs = r.read_i32("linear output count")?;
    let n_inputs = r.read_i32("linear input count")?;
    if n_outputs < 1 || n_inputs < 1 {
        return Err(ModelError::InvalidHeader(format!(
            "linear layer declares {n_outputs}x{n_inputs} parameters"
        )));
    }
    let (n_outputs, n_inputs) = (n_outputs as usize, n_inputs as usize);
    let weights = r.read_f32_vec(n_outputs * n_inputs, "linear weights")?;
    let biases = r.read_f32_vec(n_outputs, "linear biases")?;
    Ok(Box::new(Linear::new(n_inputs, n_outputs, &weights, &biases)?))
}

/// `i32 rank`, `i32[rank]` extents; `-1` marks the inferred dimension.
pub fn read_reshape(r: &mut RecordReader<'_>) -> Result<Box<dyn Stage>> {
    let rank = r.read_i32("reshape rank")?;
    if !(1..=3).contains(&rank) {
        return Err(ModelError::InvalidHeader(format!(
            "reshape declares rank {rank}, supported range is 1..=3"
        )));
    }
    let mut target = Vec::with_capacity(rank as usize);
    for axis in 0..rank {
        target.push(r.read_i32(&format!("reshape extent {axis}"))?);
    }
    Ok(Box::new(Reshape::new(&target)?))
}

/// `i32 kernel_size_inner`, `i32 kernel_size_outer` (outer = 1 signals a
/// separable 1-D kernel), `f32[inner * outer]` kernel weights,
/// `f32 threshold`.
pub fn read_spatial_divisive_normalization(r: &mut RecordReader<'_>) -> Result<Box<dyn Stage>> {
    let inner = r.read_i32("normalization kernel inner size")?;
    let outer = r.read_i32("normalization kernel outer size")?;
    if inner < 1 || outer < 1 {
        return Err(ModelError::InvalidHeader(format!(
            "normalization kernel declares {inner}x{outer} extents"
        )));
    }
    let (inner, outer) = (inner as usize, outer as usize);
    let kernel = r.read_f32_vec(inner * outer, "normalization kernel weights")?;
    let threshold = r.read_f32("normalization threshold")?;

    let stage = if outer > 1 {
        SpatialDivisiveNormalization::new(&kernel, &[inner, outer], threshold)?
    } else {
        SpatialDivisiveNormalization::new(&kernel, &[inner], threshold)?
    };
    Ok(Box::new(stage))
}

/// `i32 scale`.
pub fn read_spatial_up_sampling_nearest(r: &mut RecordReader<'_>) -> Result<Box<dyn Stage>> {
    let scale = r.read_i32("upsampling scale")?;
    Ok(Box::new(SpatialUpSamplingNearest::new(scale)?))
}
