//! Error types for the GPU layer.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by device setup, tensor transfers and kernel dispatch.
#[derive(Debug, Error)]
pub enum GpuError {
    /// GPU initialization failed (no adapter, device request rejected).
    #[error("GPU initialization failed: {0}")]
    Init(String),

    /// Tensor extents are outside the supported range.
    #[error("invalid tensor shape: {0}")]
    InvalidShape(String),

    /// A file-identified kernel source could not be read.
    #[error("kernel source '{path}' could not be read: {source}")]
    SourceRead {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Kernel compilation failed. `log` carries the composer diagnostics.
    #[error("kernel '{label}' failed to compile:\n{log}")]
    Compilation { label: String, log: String },

    /// A launch requested an illegal work partition.
    #[error("invalid work size: {0}")]
    InvalidWorkSize(String),

    /// Host/device data transfer failed.
    #[error("transfer failed: {0}")]
    Transfer(String),

    /// Kernel execution failed.
    #[error("execution failed: {0}")]
    Execution(String),

    /// Staging buffer mapping failed during readback.
    #[error("buffer mapping failed: {0}")]
    BufferAsync(#[from] wgpu::BufferAsyncError),
}

/// Specialized Result type for GPU operations.
pub type Result<T> = std::result::Result<T, GpuError>;
