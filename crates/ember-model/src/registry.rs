//! Stage-type registry: serialized tags to record readers.

use crate::error::Result;
use crate::reader::RecordReader;
use crate::records;
use ember_stages::Stage;
use std::collections::HashMap;

/// Stage tags as written in model files. The set is closed; new variants
/// get new tags, existing tags never change meaning.
pub mod tags {
    pub const IDENTITY: i32 = 1;
    pub const LINEAR: i32 = 2;
    pub const RESHAPE: i32 = 3;
    pub const SPATIAL_DIVISIVE_NORMALIZATION: i32 = 4;
    pub const SPATIAL_UP_SAMPLING_NEAREST: i32 = 5;
    pub const TANH: i32 = 6;
}

/// Reads one stage record from the stream, tag already consumed.
pub type StageReader = fn(&mut RecordReader<'_>) -> Result<Box<dyn Stage>>;

/// Maps stage tags to their record readers.
pub struct StageRegistry {
    readers: HashMap<i32, (&'static str, StageReader)>,
}

impl StageRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            readers: HashMap::new(),
        }
    }

    /// A registry holding every built-in stage variant.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(tags::IDENTITY, "Identity", records::read_identity);
        registry.register(tags::LINEAR, "Linear", records::read_linear);
        registry.register(tags::RESHAPE, "Reshape", records::read_reshape);
        registry.register(
            tags::SPATIAL_DIVISIVE_NORMALIZATION,
            "SpatialDivisiveNormalization",
            records::read_spatial_divisive_normalization,
        );
        registry.register(
            tags::SPATIAL_UP_SAMPLING_NEAREST,
            "SpatialUpSamplingNearest",
            records::read_spatial_up_sampling_nearest,
        );
        registry.register(tags::TANH, "Tanh", records::read_tanh);
        registry
    }

    /// Register a reader for a tag, replacing any previous entry.
    pub fn register(&mut self, tag: i32, name: &'static str, reader: StageReader) {
        self.readers.insert(tag, (name, reader));
    }

    /// Look up the (name, reader) pair for a tag.
    pub fn get(&self, tag: i32) -> Option<(&'static str, StageReader)> {
        self.readers.get(&tag).copied()
    }
}

impl Default for StageRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_covers_all_tags() {
        let registry = StageRegistry::with_defaults();
        for (tag, name) in [
            (tags::IDENTITY, "Identity"),
            (tags::LINEAR, "Linear"),
            (tags::RESHAPE, "Reshape"),
            (
                tags::SPATIAL_DIVISIVE_NORMALIZATION,
                "SpatialDivisiveNormalization",
            ),
            (
                tags::SPATIAL_UP_SAMPLING_NEAREST,
                "SpatialUpSamplingNearest",
            ),
            (tags::TANH, "Tanh"),
        ] {
            let (registered, _) = registry.get(tag).expect("tag should be registered");
            assert_eq!(registered, name);
        }
    }

    #[test]
    fn unknown_tag_is_absent() {
        let registry = StageRegistry::with_defaults();
        assert!(registry.get(0).is_none());
        assert!(registry.get(99).is_none());
    }
}
