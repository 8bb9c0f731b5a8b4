//! Primitive readers for the little-endian layer format.

use crate::error::{ModelError, Result};
use std::io::Read;

/// Tracks the byte offset while decoding records, so truncation errors can
/// say where the file ran out.
pub struct RecordReader<'a> {
    inner: &'a mut dyn Read,
    offset: u64,
}

impl<'a> RecordReader<'a> {
    pub fn new(inner: &'a mut dyn Read) -> Self {
        Self { inner, offset: 0 }
    }

    /// Bytes consumed so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Read one little-endian `i32`. `context` names the field for the
    /// truncation error.
    pub fn read_i32(&mut self, context: &str) -> Result<i32> {
        let mut buf = [0u8; 4];
        self.fill(&mut buf, context)?;
        Ok(i32::from_le_bytes(buf))
    }

    /// Read one little-endian IEEE-754 `f32`.
    pub fn read_f32(&mut self, context: &str) -> Result<f32> {
        let mut buf = [0u8; 4];
        self.fill(&mut buf, context)?;
        Ok(f32::from_le_bytes(buf))
    }

    /// Read `count` little-endian `f32` values.
    pub fn read_f32_vec(&mut self, count: usize, context: &str) -> Result<Vec<f32>> {
        let mut bytes = vec![0u8; count * 4];
        self.fill(&mut bytes, context)?;
        Ok(bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }

    fn fill(&mut self, buf: &mut [u8], context: &str) -> Result<()> {
        match self.inner.read_exact(buf) {
            Ok(()) => {
                self.offset += buf.len() as u64;
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                Err(ModelError::TruncatedFile {
                    context: context.to_string(),
                    offset: self.offset,
                })
            }
            Err(e) => Err(ModelError::Io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_little_endian_primitives() {
        let mut bytes: Vec<u8> = Vec::new();
        bytes.extend_from_slice(&42i32.to_le_bytes());
        bytes.extend_from_slice(&(-7i32).to_le_bytes());
        bytes.extend_from_slice(&1.5f32.to_le_bytes());

        let mut cursor = bytes.as_slice();
        let mut r = RecordReader::new(&mut cursor);
        assert_eq!(r.read_i32("a").unwrap(), 42);
        assert_eq!(r.read_i32("b").unwrap(), -7);
        assert_eq!(r.read_f32("c").unwrap(), 1.5);
        assert_eq!(r.offset(), 12);
    }

    #[test]
    fn short_read_reports_context_and_offset() {
        let bytes = 42i32.to_le_bytes()[..2].to_vec();
        let mut cursor = bytes.as_slice();
        let mut r = RecordReader::new(&mut cursor);
        match r.read_i32("stage tag").unwrap_err() {
            ModelError::TruncatedFile { context, offset } => {
                assert_eq!(context, "stage tag");
                assert_eq!(offset, 0);
            }
            other => panic!("expected TruncatedFile, got {other:?}"),
        }
    }

    #[test]
    fn vector_read_is_all_or_nothing() {
        let mut bytes: Vec<u8> = Vec::new();
        for v in [1.0f32, 2.0, 3.0] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        // Ask for four values with only three present.
        let mut cursor = bytes.as_slice();
        let mut r = RecordReader::new(&mut cursor);
        assert!(matches!(
            r.read_f32_vec(4, "weights").unwrap_err(),
            ModelError::TruncatedFile { .. }
        ));
    }
}
