//! The built-in stage variants.

pub mod identity;
pub mod linear;
pub mod reshape;
pub mod spatial_divisive_normalization;
pub mod spatial_up_sampling_nearest;
pub mod tanh;

pub use identity::Identity;
pub use linear::Linear;
pub use reshape::{INFER, Reshape};
pub use spatial_divisive_normalization::SpatialDivisiveNormalization;
pub use spatial_up_sampling_nearest::SpatialUpSamplingNearest;
pub use tanh::Tanh;
