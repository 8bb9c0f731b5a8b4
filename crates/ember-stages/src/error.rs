//! Error types for the stage layer.

use ember_gpu::GpuError;
use thiserror::Error;

/// Errors raised by stage construction and forward passes.
#[derive(Debug, Error)]
pub enum StageError {
    /// The input tensor has the wrong rank for this stage.
    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    /// The input tensor has the right rank but incompatible extents.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    /// A normalization kernel violates the odd-size/depth-1 contract.
    #[error("invalid normalization kernel: {0}")]
    InvalidKernelShape(String),

    /// An upsampling scale factor is not a positive integer.
    #[error("invalid scale factor: {0}")]
    InvalidScale(String),

    /// Device-layer failure (allocation, compilation, launch).
    #[error(transparent)]
    Gpu(#[from] GpuError),
}

/// Specialized Result type for stage operations.
pub type Result<T> = std::result::Result<T, StageError>;
