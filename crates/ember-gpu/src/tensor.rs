//! Device-resident tensors.
//!
//! A [`Tensor`] is an N-dimensional (1–3) array of `f32` values living in a
//! GPU storage buffer. Extents are fixed at construction; a shape change
//! anywhere in the system means replacing the tensor, never resizing it.
//! The underlying buffer is `Arc`-shared so pass-through stages can hand the
//! same value downstream and reshape views can alias the same storage under
//! different extents.

use crate::context::GpuContext;
use crate::error::{GpuError, Result};
use std::sync::Arc;

/// Tensor shape: 1 to 3 strictly positive extents.
///
/// Shape equality is a pure value comparison; it is the gating condition for
/// cache invalidation throughout the stage layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shape {
    extents: Vec<usize>,
}

impl Shape {
    /// Build a shape from its extents.
    ///
    /// # Errors
    /// Returns [`GpuError::InvalidShape`] if the rank is outside 1..=3 or
    /// any extent is zero.
    pub fn new(extents: &[usize]) -> Result<Self> {
        if extents.is_empty() || extents.len() > 3 {
            return Err(GpuError::InvalidShape(format!(
                "rank {} outside supported range 1..=3",
                extents.len()
            )));
        }
        if let Some(zero) = extents.iter().position(|&e| e == 0) {
            return Err(GpuError::InvalidShape(format!(
                "extent {zero} is zero in {extents:?}"
            )));
        }
        Ok(Self {
            extents: extents.to_vec(),
        })
    }

    /// Number of dimensions (1–3).
    pub fn rank(&self) -> usize {
        self.extents.len()
    }

    /// The extents, innermost dimension first.
    pub fn extents(&self) -> &[usize] {
        &self.extents
    }

    /// Extent along `axis`, treating missing trailing dimensions as 1.
    pub fn extent(&self, axis: usize) -> usize {
        self.extents.get(axis).copied().unwrap_or(1)
    }

    /// Total number of elements.
    pub fn element_count(&self) -> usize {
        self.extents.iter().product()
    }
}

impl std::fmt::Display for Shape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for e in &self.extents {
            if !first {
                write!(f, "x")?;
            }
            write!(f, "{e}")?;
            first = false;
        }
        Ok(())
    }
}

/// Device-resident f32 array with fixed shape.
#[derive(Debug, Clone)]
pub struct Tensor {
    shape: Shape,
    buffer: Arc<wgpu::Buffer>,
}

const ELEMENT_SIZE: usize = std::mem::size_of::<f32>();

impl Tensor {
    /// Allocate a zero-initialized tensor.
    pub fn new(ctx: &GpuContext, shape: Shape) -> Result<Self> {
        let size_bytes = Self::buffer_size(&shape);
        // wgpu zero-initializes buffers, matching the construction contract.
        let buffer = ctx.device().create_buffer(&wgpu::BufferDescriptor {
            label: Some(&format!("tensor {shape}")),
            size: size_bytes,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Ok(Self {
            shape,
            buffer: Arc::new(buffer),
        })
    }

    /// Allocate a tensor and upload `data` into it.
    pub fn from_host(ctx: &GpuContext, shape: Shape, data: &[f32]) -> Result<Self> {
        let tensor = Self::new(ctx, shape)?;
        tensor.write(ctx, data)?;
        Ok(tensor)
    }

    /// Upload exactly `element_count` values from the host.
    ///
    /// # Errors
    /// Returns [`GpuError::Transfer`] if `data` is not exactly the tensor's
    /// element count.
    pub fn write(&self, ctx: &GpuContext, data: &[f32]) -> Result<()> {
        if data.len() != self.shape.element_count() {
            return Err(GpuError::Transfer(format!(
                "host slice has {} elements, tensor {} holds {}",
                data.len(),
                self.shape,
                self.shape.element_count()
            )));
        }
        ctx.queue()
            .write_buffer(&self.buffer, 0, bytemuck::cast_slice(data));
        Ok(())
    }

    /// Download the tensor contents to the host.
    ///
    /// Synchronous: drains outstanding GPU work on this queue first, so a
    /// readback after a sequence of non-blocking launches observes their
    /// results.
    pub fn read(&self, ctx: &GpuContext) -> Result<Vec<f32>> {
        let size = self.buffer.size();

        let staging = ctx.device().create_buffer(&wgpu::BufferDescriptor {
            label: Some("tensor readback staging"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = ctx
            .device()
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("tensor readback"),
            });
        encoder.copy_buffer_to_buffer(&self.buffer, 0, &staging, 0, size);
        ctx.queue().submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = futures::channel::oneshot::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        ctx.wait()?;

        pollster::block_on(rx)
            .map_err(|_| GpuError::Transfer("map callback dropped".to_string()))?
            .map_err(GpuError::BufferAsync)?;

        let mapped = slice.get_mapped_range();
        let mut out = vec![0.0f32; self.shape.element_count()];
        out.copy_from_slice(bytemuck::cast_slice(
            &mapped[..self.shape.element_count() * ELEMENT_SIZE],
        ));
        drop(mapped);
        staging.unmap();

        Ok(out)
    }

    /// Allocate a new tensor with the same shape and a copy of the contents.
    pub fn duplicate(&self, ctx: &GpuContext) -> Result<Self> {
        let copy = Self::new(ctx, self.shape.clone())?;
        let mut encoder = ctx
            .device()
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("tensor duplicate"),
            });
        encoder.copy_buffer_to_buffer(&self.buffer, 0, &copy.buffer, 0, self.buffer.size());
        ctx.queue().submit(std::iter::once(encoder.finish()));
        Ok(copy)
    }

    /// A view of the same buffer under a different shape.
    ///
    /// # Errors
    /// Returns [`GpuError::InvalidShape`] if the element counts differ.
    pub fn view(&self, shape: Shape) -> Result<Self> {
        if shape.element_count() != self.shape.element_count() {
            return Err(GpuError::InvalidShape(format!(
                "cannot view {} ({} elements) as {} ({} elements)",
                self.shape,
                self.shape.element_count(),
                shape,
                shape.element_count()
            )));
        }
        Ok(Self {
            shape,
            buffer: Arc::clone(&self.buffer),
        })
    }

    /// Sum of all elements, computed on the host.
    ///
    /// Round-trips through a staging buffer; only for one-time auxiliary
    /// precomputation, never the hot forward path.
    pub fn slow_sum(&self, ctx: &GpuContext) -> Result<f32> {
        Ok(self.read(ctx)?.iter().sum())
    }

    /// Multiply every element by `factor`, on the host.
    ///
    /// Same caveat as [`Tensor::slow_sum`].
    pub fn scale(&self, ctx: &GpuContext, factor: f32) -> Result<()> {
        let mut data = self.read(ctx)?;
        for v in &mut data {
            *v *= factor;
        }
        self.write(ctx, &data)
    }

    /// The tensor's shape.
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Total number of elements.
    pub fn len(&self) -> usize {
        self.shape.element_count()
    }

    /// True if the tensor holds no elements (never, by construction).
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The underlying storage buffer.
    pub fn buffer(&self) -> &Arc<wgpu::Buffer> {
        &self.buffer
    }

    /// True if two tensors alias the same device buffer.
    pub fn same_buffer(a: &Tensor, b: &Tensor) -> bool {
        Arc::ptr_eq(&a.buffer, &b.buffer)
    }

    fn buffer_size(shape: &Shape) -> u64 {
        let size = (shape.element_count() * ELEMENT_SIZE) as u64;
        // wgpu requires at least 4 bytes, aligned to 4.
        (size.max(4) + 3) & !3
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_rejects_zero_extent() {
        let err = Shape::new(&[4, 0, 2]).unwrap_err();
        assert!(matches!(err, GpuError::InvalidShape(_)));
    }

    #[test]
    fn shape_rejects_bad_rank() {
        assert!(Shape::new(&[]).is_err());
        assert!(Shape::new(&[1, 2, 3, 4]).is_err());
        assert!(Shape::new(&[1]).is_ok());
        assert!(Shape::new(&[5, 6, 7]).is_ok());
    }

    #[test]
    fn shape_equality_is_by_value() {
        assert_eq!(Shape::new(&[3, 2]).unwrap(), Shape::new(&[3, 2]).unwrap());
        assert_ne!(Shape::new(&[3, 2]).unwrap(), Shape::new(&[2, 3]).unwrap());
        assert_ne!(Shape::new(&[6]).unwrap(), Shape::new(&[6, 1]).unwrap());
    }

    #[test]
    fn shape_pads_missing_axes() {
        let s = Shape::new(&[8, 4]).unwrap();
        assert_eq!(s.extent(0), 8);
        assert_eq!(s.extent(1), 4);
        assert_eq!(s.extent(2), 1);
        assert_eq!(s.element_count(), 32);
    }

    #[test]
    fn shape_display() {
        assert_eq!(Shape::new(&[16, 8, 3]).unwrap().to_string(), "16x8x3");
    }

    #[pollster::test]
    #[ignore = "requires a GPU"]
    async fn tensor_roundtrip() {
        let ctx = GpuContext::new().await.unwrap();
        let shape = Shape::new(&[2, 3]).unwrap();
        let data = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let t = Tensor::from_host(&ctx, shape, &data).unwrap();
        assert_eq!(t.read(&ctx).unwrap(), data);
    }

    #[pollster::test]
    #[ignore = "requires a GPU"]
    async fn tensor_zero_initialized() {
        let ctx = GpuContext::new().await.unwrap();
        let t = Tensor::new(&ctx, Shape::new(&[7]).unwrap()).unwrap();
        assert_eq!(t.read(&ctx).unwrap(), vec![0.0; 7]);
    }

    #[pollster::test]
    #[ignore = "requires a GPU"]
    async fn tensor_write_rejects_short_slice() {
        let ctx = GpuContext::new().await.unwrap();
        let t = Tensor::new(&ctx, Shape::new(&[4]).unwrap()).unwrap();
        assert!(matches!(
            t.write(&ctx, &[1.0, 2.0]),
            Err(GpuError::Transfer(_))
        ));
    }

    #[pollster::test]
    #[ignore = "requires a GPU"]
    async fn tensor_duplicate_is_independent() {
        let ctx = GpuContext::new().await.unwrap();
        let a = Tensor::from_host(&ctx, Shape::new(&[3]).unwrap(), &[1.0, 2.0, 3.0]).unwrap();
        let b = a.duplicate(&ctx).unwrap();
        assert!(!Tensor::same_buffer(&a, &b));
        a.write(&ctx, &[9.0, 9.0, 9.0]).unwrap();
        assert_eq!(b.read(&ctx).unwrap(), vec![1.0, 2.0, 3.0]);
    }

    #[pollster::test]
    #[ignore = "requires a GPU"]
    async fn tensor_view_shares_buffer() {
        let ctx = GpuContext::new().await.unwrap();
        let a = Tensor::new(&ctx, Shape::new(&[2, 3]).unwrap()).unwrap();
        let v = a.view(Shape::new(&[6]).unwrap()).unwrap();
        assert!(Tensor::same_buffer(&a, &v));
        assert!(a.view(Shape::new(&[5]).unwrap()).is_err());
    }

    #[pollster::test]
    #[ignore = "requires a GPU"]
    async fn tensor_slow_sum_and_scale() {
        let ctx = GpuContext::new().await.unwrap();
        let t = Tensor::from_host(&ctx, Shape::new(&[4]).unwrap(), &[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(t.slow_sum(&ctx).unwrap(), 10.0);
        t.scale(&ctx, 0.5).unwrap();
        assert_eq!(t.read(&ctx).unwrap(), vec![0.5, 1.0, 1.5, 2.0]);
    }
}
