//! Kernel cache and dispatcher.
//!
//! Kernels are identified by a *source identity* (an inline WGSL string or a
//! file path under the dispatcher's source root) plus an entry-point name.
//! The first request for a (source, entry, specialization) triple compiles it
//! through naga_oil into a compute pipeline; the compiled pipeline is cached
//! for the lifetime of the process; there is no invalidation path.
//!
//! Arguments are never persistent: every launch carries its full binding
//! list and immediate bytes, and the bind group is rebuilt per dispatch.

use crate::context::GpuContext;
use crate::error::{GpuError, Result};
use crate::tensor::Tensor;
use naga_oil::compose::{Composer, NagaModuleDescriptor, ShaderDefValue};
use std::borrow::Cow;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Specialization values substituted into kernel source before compilation.
///
/// Workgroup dimensions are passed this way: WGSL fixes them at compile
/// time, so each distinct workgroup shape of an entry point is its own cache
/// entry (still compiled at most once per process).
pub type ShaderDefs = HashMap<String, ShaderDefValue>;

/// Identity of a compilable kernel source unit.
///
/// Inline strings and source files are the same concept: both resolve to a
/// WGSL payload that is compiled and cached identically.
#[derive(Debug, Clone)]
pub enum KernelSource {
    /// WGSL embedded in the binary. `label` names the unit in diagnostics
    /// and cache keys.
    Inline {
        label: &'static str,
        source: &'static str,
    },
    /// Path to a WGSL file, relative to the dispatcher's source root.
    File(PathBuf),
}

impl KernelSource {
    fn key(&self) -> String {
        match self {
            KernelSource::Inline { label, .. } => format!("inline:{label}"),
            KernelSource::File(path) => format!("file:{}", path.display()),
        }
    }

    fn resolve(&self, root: &Path) -> Result<Cow<'static, str>> {
        match self {
            KernelSource::Inline { source, .. } => Ok(Cow::Borrowed(source)),
            KernelSource::File(path) => {
                let full = root.join(path);
                let text = std::fs::read_to_string(&full).map_err(|source| {
                    GpuError::SourceRead { path: full, source }
                })?;
                Ok(Cow::Owned(text))
            }
        }
    }
}

/// Handle to a compiled kernel in the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelId(usize);

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct KernelKey {
    source: String,
    entry: String,
    defs: Vec<(String, String)>,
}

struct CachedKernel {
    label: String,
    pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    /// Shader binding indices used by this entry point, ascending. Launch
    /// bindings are positional against this list.
    binding_slots: Vec<u32>,
    workgroup_size: [u32; 3],
    immediate_size: u32,
}

/// One launch request: buffers bound positionally, immediate bytes for
/// scalar parameters, a global work size, and a completion mode.
pub struct Launch<'a> {
    /// Buffers in entry-point binding order.
    pub bindings: Vec<&'a Tensor>,
    /// Immediate (push-constant) bytes; must match the entry point's
    /// declared immediate size exactly, or be empty if it declares none.
    pub immediates: Vec<u8>,
    /// Global work size per axis. Unused axes are 1. Every axis must be a
    /// multiple of the kernel's workgroup size on that axis.
    pub global: [u32; 3],
    /// Wait for device completion before returning. Non-blocking launches
    /// rely on the queue's in-order execution for read-after-write chains.
    pub blocking: bool,
}

/// Compiles, caches and launches compute kernels on one device.
///
/// All kernel-related calls funnel through `&mut self`, serializing argument
/// binding and submission per device: two stages can never interleave their
/// bindings on the same dispatcher.
pub struct Dispatcher {
    ctx: GpuContext,
    source_root: PathBuf,
    keys: HashMap<KernelKey, KernelId>,
    kernels: Vec<CachedKernel>,
}

impl Dispatcher {
    /// Create a dispatcher resolving file sources against `./shaders`.
    pub fn new(ctx: &GpuContext) -> Self {
        Self::with_source_root(ctx, "shaders")
    }

    /// Create a dispatcher with an explicit kernel-source root directory.
    pub fn with_source_root(ctx: &GpuContext, root: impl Into<PathBuf>) -> Self {
        Self {
            ctx: ctx.clone(),
            source_root: root.into(),
            keys: HashMap::new(),
            kernels: Vec::new(),
        }
    }

    /// The device context this dispatcher submits to.
    pub fn context(&self) -> &GpuContext {
        &self.ctx
    }

    /// Maximum invocations per workgroup (pass-through device limit).
    pub fn max_workgroup_size(&self) -> u32 {
        self.ctx.max_workgroup_size()
    }

    /// Maximum workgroup extent along `axis` (pass-through device limit).
    pub fn max_workitem_size(&self, axis: usize) -> Result<u32> {
        self.ctx.max_workitem_size(axis)
    }

    /// Look up or compile a kernel.
    ///
    /// # Errors
    /// [`GpuError::SourceRead`] if a file source cannot be read,
    /// [`GpuError::Compilation`] (carrying the composer log) if the source
    /// does not compile or lacks the entry point. Compilation failure is
    /// fatal for the requesting stage; there is no retry.
    pub fn kernel(
        &mut self,
        source: &KernelSource,
        entry: &str,
        defs: &ShaderDefs,
    ) -> Result<KernelId> {
        let key = KernelKey {
            source: source.key(),
            entry: entry.to_string(),
            defs: render_defs(defs),
        };
        if let Some(&id) = self.keys.get(&key) {
            return Ok(id);
        }

        let label = format!("{}:{}", key.source, entry);
        tracing::debug!(kernel = %label, "compiling kernel");

        let text = source.resolve(&self.source_root)?;
        let mut composer = Composer::default().with_capabilities(naga::valid::Capabilities::all());
        let module = composer
            .make_naga_module(NagaModuleDescriptor {
                source: &text,
                file_path: &key.source,
                shader_defs: defs.clone(),
                ..Default::default()
            })
            .map_err(|e| GpuError::Compilation {
                label: label.clone(),
                log: e.emit_to_string(&composer),
            })?;

        let entry_point = module
            .entry_points
            .iter()
            .find(|ep| ep.name == entry)
            .ok_or_else(|| GpuError::Compilation {
                label: label.clone(),
                log: format!("entry point '{entry}' not found in source unit"),
            })?;
        let workgroup_size = entry_point.workgroup_size;

        let (bind_group_layout, binding_slots) =
            self.bind_group_layout_for_entry(&label, &module, entry)?;
        let immediate_size = immediate_size(&module)?;

        let shader_module = self
            .ctx
            .device()
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(&label),
                source: wgpu::ShaderSource::Naga(Cow::Owned(module)),
            });

        let pipeline_layout =
            self.ctx
                .device()
                .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                    label: Some(&format!("{label} layout")),
                    bind_group_layouts: &[&bind_group_layout],
                    immediate_size,
                });

        let pipeline = self
            .ctx
            .device()
            .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(&label),
                layout: Some(&pipeline_layout),
                module: &shader_module,
                entry_point: Some(entry),
                compilation_options: Default::default(),
                cache: None,
            });

        let id = KernelId(self.kernels.len());
        self.kernels.push(CachedKernel {
            label,
            pipeline,
            bind_group_layout,
            binding_slots,
            workgroup_size,
            immediate_size,
        });
        self.keys.insert(key, id);
        Ok(id)
    }

    /// Launch a compiled kernel over `launch.global` work items.
    ///
    /// # Errors
    /// [`GpuError::InvalidWorkSize`] if the kernel's workgroup size exceeds
    /// device limits or does not evenly divide the global size;
    /// [`GpuError::Execution`] on binding or immediate mismatches.
    pub fn launch(&mut self, id: KernelId, launch: &Launch<'_>) -> Result<()> {
        let kernel = self
            .kernels
            .get(id.0)
            .ok_or_else(|| GpuError::Execution(format!("unknown kernel id {:?}", id)))?;

        self.validate_partition(kernel, launch.global)?;

        if launch.bindings.len() != kernel.binding_slots.len() {
            return Err(GpuError::Execution(format!(
                "kernel '{}' expects {} bindings, launch provides {}",
                kernel.label,
                kernel.binding_slots.len(),
                launch.bindings.len()
            )));
        }
        if launch.immediates.len() as u32 != kernel.immediate_size {
            return Err(GpuError::Execution(format!(
                "kernel '{}' expects {} immediate bytes, launch provides {}",
                kernel.label,
                kernel.immediate_size,
                launch.immediates.len()
            )));
        }

        let entries: Vec<wgpu::BindGroupEntry> = kernel
            .binding_slots
            .iter()
            .zip(&launch.bindings)
            .map(|(&slot, tensor)| wgpu::BindGroupEntry {
                binding: slot,
                resource: tensor.buffer().as_entire_binding(),
            })
            .collect();

        let bind_group = self
            .ctx
            .device()
            .create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(&kernel.label),
                layout: &kernel.bind_group_layout,
                entries: &entries,
            });

        let workgroups = [
            launch.global[0] / kernel.workgroup_size[0],
            launch.global[1] / kernel.workgroup_size[1],
            launch.global[2] / kernel.workgroup_size[2],
        ];

        let mut encoder = self
            .ctx
            .device()
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some(&kernel.label),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(&kernel.label),
                timestamp_writes: None,
            });
            pass.set_pipeline(&kernel.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            if !launch.immediates.is_empty() {
                pass.set_immediates(0, &launch.immediates);
            }
            pass.dispatch_workgroups(workgroups[0], workgroups[1], workgroups[2]);
        }
        self.ctx.queue().submit(std::iter::once(encoder.finish()));

        if launch.blocking {
            self.ctx.wait()?;
        }
        Ok(())
    }

    fn validate_partition(&self, kernel: &CachedKernel, global: [u32; 3]) -> Result<()> {
        let wg = kernel.workgroup_size;
        let invocations = wg[0] * wg[1] * wg[2];
        if invocations > self.ctx.max_workgroup_size() {
            return Err(GpuError::InvalidWorkSize(format!(
                "kernel '{}' workgroup {:?} has {} invocations, device limit is {}",
                kernel.label,
                wg,
                invocations,
                self.ctx.max_workgroup_size()
            )));
        }
        for axis in 0..3 {
            if wg[axis] > self.ctx.max_workitem_size(axis)? {
                return Err(GpuError::InvalidWorkSize(format!(
                    "kernel '{}' workgroup extent {} on axis {axis} exceeds device limit {}",
                    kernel.label,
                    wg[axis],
                    self.ctx.max_workitem_size(axis)?
                )));
            }
            if global[axis] == 0 || global[axis] % wg[axis] != 0 {
                return Err(GpuError::InvalidWorkSize(format!(
                    "global size {} on axis {axis} is not a positive multiple of workgroup extent {}",
                    global[axis], wg[axis]
                )));
            }
        }
        Ok(())
    }

    /// Build a bind group layout for the globals the entry point uses.
    ///
    /// Derived from the compiled module rather than declared per call site,
    /// so one source unit can host several entry points with different
    /// binding subsets.
    fn bind_group_layout_for_entry(
        &self,
        label: &str,
        module: &naga::Module,
        entry: &str,
    ) -> Result<(wgpu::BindGroupLayout, Vec<u32>)> {
        let entry_point = module
            .entry_points
            .iter()
            .find(|ep| ep.name == entry)
            .ok_or_else(|| GpuError::Compilation {
                label: label.to_string(),
                log: format!("entry point '{entry}' not found"),
            })?;

        let mut entries = Vec::new();
        for (handle, var) in module.global_variables.iter() {
            let Some(binding) = var.binding.as_ref() else {
                continue;
            };
            let is_used = entry_point
                .function
                .expressions
                .iter()
                .any(|(_, expr)| matches!(expr, naga::Expression::GlobalVariable(h) if *h == handle));
            if !is_used {
                continue;
            }

            let read_only = match var.space {
                naga::AddressSpace::Storage { access } => {
                    !access.contains(naga::StorageAccess::STORE)
                }
                _ => false,
            };

            entries.push(wgpu::BindGroupLayoutEntry {
                binding: binding.binding,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Storage { read_only },
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            });
        }
        entries.sort_by_key(|e| e.binding);
        let slots = entries.iter().map(|e| e.binding).collect();

        let layout = self
            .ctx
            .device()
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(&format!("{label} bindings")),
                entries: &entries,
            });
        Ok((layout, slots))
    }
}

fn render_defs(defs: &ShaderDefs) -> Vec<(String, String)> {
    let mut rendered: Vec<(String, String)> = defs
        .iter()
        .map(|(k, v)| (k.clone(), format!("{v:?}")))
        .collect();
    rendered.sort();
    rendered
}

/// Total immediate bytes declared by the module.
fn immediate_size(module: &naga::Module) -> Result<u32> {
    let mut max_size = 0u32;
    for (_, var) in module.global_variables.iter() {
        if matches!(var.space, naga::AddressSpace::Immediate) {
            let inner = &module.types[var.ty].inner;
            max_size = max_size.max(type_size(module, inner)?);
        }
    }
    Ok(max_size)
}

fn type_size(module: &naga::Module, inner: &naga::TypeInner) -> Result<u32> {
    use naga::TypeInner;
    match inner {
        TypeInner::Scalar(scalar) => Ok(scalar.width as u32),
        TypeInner::Vector { scalar, size } => Ok(scalar.width as u32 * vector_len(*size)),
        TypeInner::Struct { members, .. } => match members.last() {
            Some(last) => {
                let last_size = type_size(module, &module.types[last.ty].inner)?;
                Ok(last.offset + last_size)
            }
            None => Ok(0),
        },
        other => Err(GpuError::Execution(format!(
            "unsupported immediate type: {other:?}"
        ))),
    }
}

fn vector_len(size: naga::VectorSize) -> u32 {
    match size {
        naga::VectorSize::Bi => 2,
        naga::VectorSize::Tri => 3,
        naga::VectorSize::Quad => 4,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_keys_distinguish_inline_and_file() {
        let inline = KernelSource::Inline {
            label: "matvec",
            source: "",
        };
        let file = KernelSource::File(PathBuf::from("matvec.wgsl"));
        assert_ne!(inline.key(), file.key());
        assert_eq!(inline.key(), "inline:matvec");
        assert_eq!(file.key(), "file:matvec.wgsl");
    }

    #[test]
    fn missing_source_file_is_reported() {
        let source = KernelSource::File(PathBuf::from("does_not_exist.wgsl"));
        let err = source.resolve(Path::new("/nonexistent-root")).unwrap_err();
        assert!(matches!(err, GpuError::SourceRead { .. }));
    }

    #[test]
    fn def_rendering_is_order_independent() {
        let mut a = ShaderDefs::new();
        a.insert("WG_X".to_string(), ShaderDefValue::UInt(8));
        a.insert("WG_Y".to_string(), ShaderDefValue::UInt(4));
        let mut b = ShaderDefs::new();
        b.insert("WG_Y".to_string(), ShaderDefValue::UInt(4));
        b.insert("WG_X".to_string(), ShaderDefValue::UInt(8));
        assert_eq!(render_defs(&a), render_defs(&b));

        let mut c = ShaderDefs::new();
        c.insert("WG_X".to_string(), ShaderDefValue::UInt(16));
        c.insert("WG_Y".to_string(), ShaderDefValue::UInt(4));
        assert_ne!(render_defs(&a), render_defs(&c));
    }
}
