//! Reshape stage: view the input's elements under new extents.

use crate::error::{Result, StageError};
use crate::stage::Stage;
use ember_gpu::{Dispatcher, Shape, Tensor};
use std::sync::Arc;

/// Sentinel extent meaning "compute this dimension from the element count".
pub const INFER: i32 = -1;

/// Reshapes the input to a target shape without moving data: the output is
/// a view sharing the input's device buffer.
///
/// At most one target extent may be [`INFER`]; it is resolved from the
/// input's total element count at forward time.
#[derive(Debug)]
pub struct Reshape {
    target: Vec<i32>,
}

impl Reshape {
    /// Build a reshape onto `target` extents (`INFER` allowed once).
    ///
    /// # Errors
    /// [`StageError::ShapeMismatch`] if the rank is outside 1..=3, an extent
    /// is zero or negative (other than the sentinel), or more than one
    /// extent is inferred.
    pub fn new(target: &[i32]) -> Result<Self> {
        if target.is_empty() || target.len() > 3 {
            return Err(StageError::ShapeMismatch(format!(
                "reshape target rank {} outside 1..=3",
                target.len()
            )));
        }
        let inferred = target.iter().filter(|&&e| e == INFER).count();
        if inferred > 1 {
            return Err(StageError::ShapeMismatch(
                "reshape target may infer at most one dimension".to_string(),
            ));
        }
        if target.iter().any(|&e| e <= 0 && e != INFER) {
            return Err(StageError::ShapeMismatch(format!(
                "reshape target {target:?} has a non-positive extent"
            )));
        }
        Ok(Self {
            target: target.to_vec(),
        })
    }

    /// The target extents, with the infer sentinel unresolved.
    pub fn target(&self) -> &[i32] {
        &self.target
    }

    /// Resolve the target against a concrete element count.
    fn resolve(&self, element_count: usize) -> Result<Shape> {
        let known: usize = self
            .target
            .iter()
            .filter(|&&e| e != INFER)
            .map(|&e| e as usize)
            .product();

        let mut extents = Vec::with_capacity(self.target.len());
        for &e in &self.target {
            if e == INFER {
                if known == 0 || element_count % known != 0 {
                    return Err(StageError::ShapeMismatch(format!(
                        "cannot infer a dimension of {:?} from {} elements",
                        self.target, element_count
                    )));
                }
                extents.push(element_count / known);
            } else {
                extents.push(e as usize);
            }
        }

        let shape = Shape::new(&extents)?;
        if shape.element_count() != element_count {
            return Err(StageError::ShapeMismatch(format!(
                "reshape target {} has {} elements, input has {}",
                shape,
                shape.element_count(),
                element_count
            )));
        }
        Ok(shape)
    }
}

impl Stage for Reshape {
    fn name(&self) -> &'static str {
        "Reshape"
    }

    fn forward(&mut self, _disp: &mut Dispatcher, input: &Arc<Tensor>) -> Result<Arc<Tensor>> {
        let shape = self.resolve(input.len())?;
        Ok(Arc::new(input.view(shape)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_targets() {
        assert!(Reshape::new(&[]).is_err());
        assert!(Reshape::new(&[1, 2, 3, 4]).is_err());
        assert!(Reshape::new(&[4, 0]).is_err());
        assert!(Reshape::new(&[-2, 4]).is_err());
        assert!(Reshape::new(&[INFER, INFER, 4]).is_err());
        assert!(Reshape::new(&[INFER, 4]).is_ok());
    }

    #[test]
    fn resolves_exact_target() {
        let r = Reshape::new(&[3, 4]).unwrap();
        assert_eq!(r.resolve(12).unwrap(), Shape::new(&[3, 4]).unwrap());
        assert!(matches!(
            r.resolve(13),
            Err(StageError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn resolves_inferred_dimension() {
        let r = Reshape::new(&[2, INFER, 3]).unwrap();
        assert_eq!(r.resolve(30).unwrap(), Shape::new(&[2, 5, 3]).unwrap());
    }

    #[test]
    fn rejects_non_divisible_inference() {
        let r = Reshape::new(&[4, INFER]).unwrap();
        assert!(matches!(
            r.resolve(10),
            Err(StageError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn flatten_to_one_dimension() {
        let r = Reshape::new(&[INFER]).unwrap();
        assert_eq!(r.resolve(24).unwrap(), Shape::new(&[24]).unwrap());
    }
}
