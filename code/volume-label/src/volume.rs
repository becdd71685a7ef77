use std::sync::Arc;

use glam::UVec3;
use parking_lot::{Mutex, RwLock};

use crate::format::LabelFormat;

/// Pipeline access a volume texture is currently prepared for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceState {
    /// Sampled by graphics passes (raymarching). State after upload.
    GraphicsRead,
    /// Bound as a writable storage texture in a compute pass.
    ComputeWrite,
}

impl ResourceState {
    /// Texture usage wgpu is told to transition to for this state.
    pub fn texture_uses(self) -> wgpu::TextureUses {
        match self {
            ResourceState::GraphicsRead => wgpu::TextureUses::RESOURCE,
            ResourceState::ComputeWrite => wgpu::TextureUses::STORAGE_WRITE_ONLY,
        }
    }
}

/// GPU side of a labeling volume.
pub struct VolumeResource {
    texture: wgpu::Texture,
    storage_view: wgpu::TextureView,
    dims: UVec3,
    format: LabelFormat,
    state: Mutex<ResourceState>,
}

impl VolumeResource {
    pub(crate) fn new(device: &wgpu::Device, label: &str, dims: UVec3, format: LabelFormat) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width: dims.x,
                height: dims.y,
                depth_or_array_layers: dims.z,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D3,
            format: format.texture_format(),
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::STORAGE_BINDING
                | wgpu::TextureUsages::COPY_DST
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let storage_view = texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some("label_volume_storage_view"),
            dimension: Some(wgpu::TextureViewDimension::D3),
            ..Default::default()
        });
        Self {
            texture,
            storage_view,
            dims,
            format,
            state: Mutex::new(ResourceState::GraphicsRead),
        }
    }

    pub fn texture(&self) -> &wgpu::Texture {
        &self.texture
    }

    pub fn storage_view(&self) -> &wgpu::TextureView {
        &self.storage_view
    }

    pub fn dimensions(&self) -> UVec3 {
        self.dims
    }

    pub fn format(&self) -> LabelFormat {
        self.format
    }

    pub fn state(&self) -> ResourceState {
        *self.state.lock()
    }

    /// Moves the resource into `to`, returning the state it was in.
    pub(crate) fn transition(&self, to: ResourceState) -> ResourceState {
        std::mem::replace(&mut *self.state.lock(), to)
    }

    /// Full-texture copy target used for uploads.
    pub(crate) fn write_all(&self, queue: &wgpu::Queue, voxels: &[u8]) {
        let bytes_per_row = self.dims.x * self.format.bytes_per_voxel() as u32;
        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            voxels,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(bytes_per_row),
                rows_per_image: Some(self.dims.y),
            },
            self.texture.size(),
        );
    }
}

/// A labeling volume owned by the application.
///
/// The GPU resource is optional: a freshly declared volume, or one whose
/// resource was released, is skipped by brush writes.
pub struct LabelVolume {
    name: String,
    format: LabelFormat,
    inner: RwLock<VolumeInner>,
}

struct VolumeInner {
    dims: UVec3,
    resource: Option<Arc<VolumeResource>>,
}

impl LabelVolume {
    /// Declares a volume without any GPU storage behind it.
    pub fn new(name: impl Into<String>, dims: UVec3, format: LabelFormat) -> Self {
        Self {
            name: name.into(),
            format,
            inner: RwLock::new(VolumeInner {
                dims,
                resource: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn format(&self) -> LabelFormat {
        self.format
    }

    pub fn dimensions(&self) -> UVec3 {
        self.inner.read().dims
    }

    pub fn is_allocated(&self) -> bool {
        self.inner.read().resource.is_some()
    }

    pub fn resource(&self) -> Option<Arc<VolumeResource>> {
        self.inner.read().resource.clone()
    }

    /// Replaces the backing resource. Commands already holding the old one
    /// keep it alive until they finish.
    pub(crate) fn attach(&self, resource: Arc<VolumeResource>) {
        let mut inner = self.inner.write();
        inner.dims = resource.dimensions();
        inner.resource = Some(resource);
    }

    pub fn release_resource(&self) -> Option<Arc<VolumeResource>> {
        self.inner.write().resource.take()
    }
}

impl std::fmt::Debug for LabelVolume {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("LabelVolume")
            .field("name", &self.name)
            .field("format", &self.format)
            .field("dims", &inner.dims)
            .field("allocated", &inner.resource.is_some())
            .finish()
    }
}
