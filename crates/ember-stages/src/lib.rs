//! Forward-computation stages for the ember inference runtime.
//!
//! A [`Stage`] is one layer of a pretrained model: it owns its output
//! tensor, lazily (re)allocates state when the input shape changes, and
//! issues kernel dispatches through an [`ember_gpu::Dispatcher`]. A
//! [`Pipeline`] chains stages in sequence.
//!
//! The built-in variants are a closed set: [`Identity`], [`Reshape`],
//! [`Linear`], [`SpatialDivisiveNormalization`], [`SpatialUpSamplingNearest`]
//! and [`Tanh`]. The model-file registry in `ember-model` maps serialized
//! type tags onto these variants.

pub mod error;
pub mod pipeline;
pub mod stage;
pub mod stages;

pub use error::{Result, StageError};
pub use pipeline::Pipeline;
pub use stage::Stage;
pub use stages::{
    Identity, INFER, Linear, Reshape, SpatialDivisiveNormalization, SpatialUpSamplingNearest, Tanh,
};

use std::path::PathBuf;

/// Root directory of this crate's WGSL kernel sources.
///
/// Pass to [`ember_gpu::Dispatcher::with_source_root`] so the file-identified
/// kernels of the spatial stages resolve.
pub fn shader_root() -> PathBuf {
    PathBuf::from(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders"))
}
