//! Binary model-file loader for the ember inference runtime.
//!
//! A model file is a sequence of layer records in model order: a stage
//! count, then per stage a type tag and the stage's fixed binary record
//! (scalar header fields followed by raw little-endian f32 payloads).
//! [`StageRegistry`] maps tags to record readers; [`load_model`] assembles
//! the result into an [`ember_stages::Pipeline`].
//!
//! Loading is host-only: no GPU is touched until the pipeline's first
//! forward call.

pub mod error;
pub mod loader;
pub mod reader;
pub mod records;
pub mod registry;

pub use error::{ModelError, Result};
pub use loader::{load_model, read_pipeline};
pub use reader::RecordReader;
pub use registry::{StageRegistry, tags};
