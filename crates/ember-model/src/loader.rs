//! Model-file loading: the outer container of tagged stage records.

use crate::error::{ModelError, Result};
use crate::reader::RecordReader;
use crate::registry::StageRegistry;
use ember_stages::Pipeline;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Read a pipeline from an open stream: `i32 n_stages`, then `n_stages`
/// records, each `i32 tag` followed by the stage's record body.
///
/// Fails without returning a partial model: the first malformed record
/// aborts the load.
pub fn read_pipeline(r: &mut RecordReader<'_>, registry: &StageRegistry) -> Result<Pipeline> {
    let n_stages = r.read_i32("stage count")?;
    if n_stages < 0 {
        return Err(ModelError::InvalidHeader(format!(
            "negative stage count {n_stages}"
        )));
    }

    let mut pipeline = Pipeline::new();
    for index in 0..n_stages {
        let tag = r.read_i32("stage tag")?;
        let (name, reader) = registry
            .get(tag)
            .ok_or(ModelError::UnknownStageTag(tag))?;
        tracing::debug!(index, tag, stage = name, "reading stage record");
        pipeline.push(reader(r)?);
    }
    Ok(pipeline)
}

/// Load a model file into a pipeline using the default stage registry.
pub fn load_model(path: impl AsRef<Path>) -> Result<Pipeline> {
    let path = path.as_ref();
    tracing::info!(path = %path.display(), "loading model");
    let mut file = BufReader::new(File::open(path)?);
    let mut reader = RecordReader::new(&mut file);
    read_pipeline(&mut reader, &StageRegistry::with_defaults())
}
