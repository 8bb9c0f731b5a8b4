//! GPU device layer for the ember inference runtime.
//!
//! This crate provides the pieces every stage builds on:
//! - [`GpuContext`]: device/queue handle and limit queries
//! - [`Tensor`] / [`Shape`]: device-resident f32 arrays with fixed extents
//! - [`Dispatcher`]: kernel compilation cache and launch path
//! - [`partition`]: work-partition heuristics

pub mod context;
pub mod dispatch;
pub mod error;
pub mod partition;
pub mod tensor;

pub use context::GpuContext;
pub use dispatch::{Dispatcher, KernelId, KernelSource, Launch, ShaderDefs};
pub use error::{GpuError, Result};
pub use partition::{MatVecPartition, matvec_partition, padded_global};
pub use tensor::{Shape, Tensor};
