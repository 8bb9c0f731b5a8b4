//! GPU device initialization and limit queries.

use crate::error::{GpuError, Result};
use std::sync::Arc;

/// Shared handle to a GPU device and its command queue.
///
/// Create one `GpuContext` per process and keep it for the lifetime of the
/// application; device creation is expensive, cloning the context is cheap
/// (the device and queue are `Arc`-shared).
#[derive(Clone)]
pub struct GpuContext {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    adapter_info: wgpu::AdapterInfo,
    limits: wgpu::Limits,
}

impl GpuContext {
    /// Initialize a context on the best available GPU adapter.
    ///
    /// # Errors
    /// Returns [`GpuError::Init`] if no suitable adapter is found or the
    /// device request fails.
    pub async fn new() -> Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| GpuError::Init(format!("no suitable GPU adapter: {e}")))?;

        Self::with_adapter(&adapter).await
    }

    /// Initialize a context on a specific adapter (multi-GPU systems).
    pub async fn with_adapter(adapter: &wgpu::Adapter) -> Result<Self> {
        let adapter_info = adapter.get_info();
        tracing::info!(
            name = %adapter_info.name,
            backend = ?adapter_info.backend,
            "initializing GPU device"
        );

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor::default())
            .await
            .map_err(|e| GpuError::Init(format!("device request failed: {e}")))?;

        let limits = device.limits();

        Ok(Self {
            device: Arc::new(device),
            queue: Arc::new(queue),
            adapter_info,
            limits,
        })
    }

    /// Blocking wrapper around [`GpuContext::new`] for synchronous callers.
    pub fn new_blocking() -> Result<Self> {
        pollster::block_on(Self::new())
    }

    /// The wgpu device.
    pub fn device(&self) -> &Arc<wgpu::Device> {
        &self.device
    }

    /// The command queue.
    pub fn queue(&self) -> &Arc<wgpu::Queue> {
        &self.queue
    }

    /// Information about the adapter the device was created on.
    pub fn adapter_info(&self) -> &wgpu::AdapterInfo {
        &self.adapter_info
    }

    /// Device limits as reported by wgpu.
    pub fn limits(&self) -> &wgpu::Limits {
        &self.limits
    }

    /// Maximum number of invocations in one workgroup.
    pub fn max_workgroup_size(&self) -> u32 {
        self.limits.max_compute_invocations_per_workgroup
    }

    /// Maximum workgroup extent along one grid axis (0, 1 or 2).
    ///
    /// # Errors
    /// Returns [`GpuError::InvalidWorkSize`] for an axis outside 0..3.
    pub fn max_workitem_size(&self, axis: usize) -> Result<u32> {
        match axis {
            0 => Ok(self.limits.max_compute_workgroup_size_x),
            1 => Ok(self.limits.max_compute_workgroup_size_y),
            2 => Ok(self.limits.max_compute_workgroup_size_z),
            _ => Err(GpuError::InvalidWorkSize(format!(
                "work axis {axis} out of range (grids are at most 3-D)"
            ))),
        }
    }

    /// Block until all submitted GPU work has completed.
    pub fn wait(&self) -> Result<()> {
        self.device
            .poll(wgpu::PollType::Wait {
                submission_index: None,
                timeout: None,
            })
            .map_err(|e| GpuError::Execution(format!("GPU poll failed: {e:?}")))?;
        Ok(())
    }
}
