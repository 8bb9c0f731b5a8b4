//! Error types for model loading.

use ember_stages::StageError;
use thiserror::Error;

/// Errors raised while reading a serialized model.
#[derive(Debug, Error)]
pub enum ModelError {
    /// The file ended before a declared field was fully read.
    #[error("model file truncated while reading {context} at byte {offset}")]
    TruncatedFile { context: String, offset: u64 },

    /// A record carried a stage tag with no registered reader.
    #[error("unknown stage tag {0}")]
    UnknownStageTag(i32),

    /// A header field holds an out-of-range value.
    #[error("invalid model header: {0}")]
    InvalidHeader(String),

    /// A record decoded cleanly but stage construction rejected it.
    #[error(transparent)]
    Stage(#[from] StageError),

    /// Underlying I/O failure other than a short read.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Specialized Result type for model loading.
pub type Result<T> = std::result::Result<T, ModelError>;
