// src/dispatch.rs
//! GPU operator: 向 3D 标注体写入实心球
//!
//! 将标注体绑定为只写 storage texture，对笔刷包围盒内的每个体素派发一次调用。

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytemuck::{Pod, Zeroable};
use glam::{IVec3, UVec3, Vec4};
use wgpu::{ShaderStages, util::DeviceExt};

use crate::error::LabelError;
use crate::format::LabelFormat;
use crate::mapping::BrushRegion;
use crate::shader_cache::{GlobalShader, GpuDevice, ShaderCache};
use crate::volume::{ResourceState, VolumeResource};

/// Threads per workgroup along each axis, must match `write_sphere.wgsl`.
pub const WORKGROUP_SIZE: u32 = 4;

/// Linear RGBA fill value. Single-channel volumes keep only `r`.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct LinearColor {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl LinearColor {
    pub const WHITE: Self = Self::new(1.0, 1.0, 1.0, 1.0);
    pub const BLACK: Self = Self::new(0.0, 0.0, 0.0, 1.0);

    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// Gray value, the common case for single-channel label masks.
    pub const fn gray(value: f32) -> Self {
        Self::new(value, value, value, 1.0)
    }
}

impl From<Vec4> for LinearColor {
    fn from(v: Vec4) -> Self {
        Self::new(v.x, v.y, v.z, v.w)
    }
}

#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct SphereParams {
    pub center: IVec3,
    _padding0: u32,
    pub size: IVec3,
    _padding1: u32,
    pub color: LinearColor,
}

impl SphereParams {
    pub fn new(region: BrushRegion, color: LinearColor) -> Self {
        Self {
            center: region.center,
            _padding0: 0,
            size: region.size,
            _padding1: 0,
            color,
        }
    }

    pub fn min_binding_size() -> wgpu::BufferSize {
        const SIZE: wgpu::BufferSize =
            match wgpu::BufferSize::new(std::mem::size_of::<SphereParams>() as u64) {
                Some(size) => size,
                None => panic!("SphereParams is not empty"),
            };
        SIZE
    }
}

/// Workgroups needed to cover `size` voxels. Non-positive axes get none.
pub fn workgroup_count(size: IVec3) -> UVec3 {
    let size = size.max(IVec3::ZERO).as_uvec3();
    (size + UVec3::splat(WORKGROUP_SIZE - 1)) / WORKGROUP_SIZE
}

/// Compute pipeline for one storage format.
///
/// `compile` wraps pipeline creation in a validation error scope. wgpu keeps
/// one scope stack per device, not per thread, so compiling while another
/// thread creates resources on the same device can pick up that thread's
/// error. `VolumeLabeler::new` compiles every supported format up front for
/// this reason.
pub struct WriteSphereShader {
    pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    format: LabelFormat,
}

impl GlobalShader for WriteSphereShader {
    const NAME: &'static str = "write_sphere";

    fn compile(device: &wgpu::Device, format: LabelFormat) -> Result<Self, LabelError> {
        if !format.is_supported_by(device) {
            return Err(LabelError::UnsupportedFormat(format));
        }

        let source = include_str!("write_sphere.wgsl")
            .replace("{{STORAGE_FORMAT}}", format.wgsl_storage_format());

        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("write_sphere.wgsl"),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });
        // binding 0: label volume, binding 1: brush parameters
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("write_sphere_layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::StorageTexture {
                        access: wgpu::StorageTextureAccess::WriteOnly,
                        format: format.texture_format(),
                        view_dimension: wgpu::TextureViewDimension::D3,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: Some(SphereParams::min_binding_size()),
                    },
                    count: None,
                },
            ],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("write_sphere_pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });
        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("write_sphere_pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: Some("cs_main"),
            compilation_options: Default::default(),
            cache: None,
        });
        if let Some(error) = pollster::block_on(device.pop_error_scope()) {
            return Err(LabelError::ShaderCompilation(error.to_string()));
        }

        Ok(Self {
            pipeline,
            bind_group_layout,
            format,
        })
    }
}

impl WriteSphereShader {
    pub fn format(&self) -> LabelFormat {
        self.format
    }

    /// Records the brush pass into `encoder`.
    pub fn record(
        &self,
        device: &wgpu::Device,
        encoder: &mut wgpu::CommandEncoder,
        target: &VolumeResource,
        region: BrushRegion,
        color: LinearColor,
    ) {
        let params = SphereParams::new(region, color);
        let params_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("sphere_params_buffer"),
            contents: bytemuck::bytes_of(&params),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("write_sphere_bind_group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(target.storage_view()),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: params_buffer.as_entire_binding(),
                },
            ],
        });

        let groups = workgroup_count(region.size);
        let mut compute_pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("write_sphere_compute_pass"),
            timestamp_writes: None,
        });
        compute_pass.set_pipeline(&self.pipeline);
        compute_pass.set_bind_group(0, &bind_group, &[]);
        compute_pass.dispatch_workgroups(groups.x, groups.y, groups.z);
        // Dropping the pass ends it and releases the storage binding.
    }
}

/// Counters for GPU work issued by the render thread.
#[derive(Debug, Default)]
pub struct GpuStats {
    dispatches: AtomicU64,
    transitions: AtomicU64,
    uploads: AtomicU64,
}

impl GpuStats {
    pub fn dispatches(&self) -> u64 {
        self.dispatches.load(Ordering::Acquire)
    }

    pub fn transitions(&self) -> u64 {
        self.transitions.load(Ordering::Acquire)
    }

    pub fn uploads(&self) -> u64 {
        self.uploads.load(Ordering::Acquire)
    }

    pub(crate) fn record_upload(&self) {
        self.uploads.fetch_add(1, Ordering::AcqRel);
    }
}

/// State owned by the render thread.
pub struct GpuContext {
    pub gpu: GpuDevice,
    pub stats: Arc<GpuStats>,
}

impl GpuContext {
    pub fn new(gpu: GpuDevice) -> Self {
        Self {
            gpu,
            stats: Arc::new(GpuStats::default()),
        }
    }

    /// Records a barrier moving `resource` from `from` to `to` and updates its
    /// tracked state.
    fn transition(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        resource: &VolumeResource,
        from: ResourceState,
        to: ResourceState,
    ) {
        encoder.transition_resources(
            std::iter::empty(),
            std::iter::once(wgpu::TextureTransition {
                texture: resource.texture(),
                selector: None,
                state: to.texture_uses(),
            }),
        );
        let previous = resource.transition(to);
        if previous != from {
            log::warn!("label volume was in {previous:?}, expected {from:?} before {to:?}");
        }
        self.stats.transitions.fetch_add(1, Ordering::AcqRel);
    }
}

/// Writes `color` into `region` of `target`. Render thread only.
pub fn write_sphere(
    ctx: &GpuContext,
    target: &VolumeResource,
    region: BrushRegion,
    color: LinearColor,
) -> Result<(), LabelError> {
    let shader = ShaderCache::global().get::<WriteSphereShader>(&ctx.gpu, target.format())?;
    let device = &ctx.gpu.device;

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("write_sphere_command_encoder"),
    });

    // 图形管线正在采样该纹理，先切换到计算写入状态
    let (read, write) = (ResourceState::GraphicsRead, ResourceState::ComputeWrite);
    ctx.transition(&mut encoder, target, read, write);
    shader.record(device, &mut encoder, target, region, color);
    ctx.transition(&mut encoder, target, write, read);

    ctx.gpu.queue.submit(std::iter::once(encoder.finish()));
    ctx.stats.dispatches.fetch_add(1, Ordering::AcqRel);
    log::trace!(
        "wrote sphere at {:?} size {:?} into {:?} volume",
        region.center,
        region.size,
        target.format()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workgroup_count_rounds_up() {
        assert_eq!(workgroup_count(IVec3::new(16, 8, 4)), UVec3::new(4, 2, 1));
        assert_eq!(workgroup_count(IVec3::new(17, 1, 5)), UVec3::new(5, 1, 2));
    }

    #[test]
    fn test_workgroup_count_empty_axes() {
        assert_eq!(workgroup_count(IVec3::ZERO), UVec3::ZERO);
        assert_eq!(workgroup_count(IVec3::new(-3, 4, 0)), UVec3::new(0, 1, 0));
    }

    #[test]
    fn test_linear_color_constructors() {
        assert_eq!(
            LinearColor::from(Vec4::new(0.25, 0.5, 0.75, 1.0)),
            LinearColor::new(0.25, 0.5, 0.75, 1.0)
        );
        assert_eq!(LinearColor::from(Vec4::ZERO.with_w(1.0)), LinearColor::BLACK);
        assert_eq!(LinearColor::gray(1.0), LinearColor::WHITE);
    }

    #[test]
    fn test_sphere_params_layout() {
        // vec3 + pad, vec3 + pad, vec4 as laid out in the WGSL uniform block
        assert_eq!(std::mem::size_of::<SphereParams>(), 48);
        assert_eq!(SphereParams::min_binding_size().get(), 48);

        let region = BrushRegion {
            center: IVec3::new(1, 2, 3),
            size: IVec3::new(4, 5, 6),
        };
        let params = SphereParams::new(region, LinearColor::gray(0.5));
        let words: &[i32] = bytemuck::cast_slice(bytemuck::bytes_of(&params));
        assert_eq!(&words[0..3], &[1, 2, 3]);
        assert_eq!(&words[4..7], &[4, 5, 6]);
        assert_eq!(f32::from_bits(words[8] as u32), 0.5);
    }
}
