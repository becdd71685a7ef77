use std::sync::Arc;

use glam::UVec3;

use crate::dispatch::GpuContext;
use crate::error::LabelError;
use crate::format::{LabelFormat, volume_byte_size};
use crate::labeling::VolumeLabeler;
use crate::volume::{LabelVolume, VolumeResource};

/// Creates and overwrites volume textures from raw voxel bytes.
///
/// `voxels` is taken by value so the implementation decides when the staging
/// memory is released.
pub trait VolumeAssets {
    fn create_volume(
        &self,
        name: &str,
        format: LabelFormat,
        dims: UVec3,
        voxels: Vec<u8>,
    ) -> Result<Arc<LabelVolume>, LabelError>;

    fn update_volume(
        &self,
        volume: &LabelVolume,
        format: LabelFormat,
        dims: UVec3,
        voxels: Vec<u8>,
    ) -> Result<(), LabelError>;

    /// Whether `update_volume` only schedules the write instead of finishing
    /// it before returning.
    fn defers_updates(&self) -> bool {
        true
    }
}

// Textures are created on the calling thread and uploaded from the render
// thread, so uploads stay ordered with brush writes.
impl VolumeLabeler {
    fn validate(&self, format: LabelFormat, dims: UVec3, voxels: &[u8]) -> Result<(), LabelError> {
        let limit = self.gpu.device.limits().max_texture_dimension_3d;
        if dims.min_element() == 0 || dims.max_element() > limit {
            return Err(LabelError::InvalidDimensions { dims, limit });
        }
        if !format.is_supported_by(&self.gpu.device) {
            return Err(LabelError::UnsupportedFormat(format));
        }
        let expected = volume_byte_size(dims, format).ok_or(LabelError::VolumeTooLarge { dims })?;
        if voxels.len() != expected {
            return Err(LabelError::BufferSizeMismatch {
                expected,
                actual: voxels.len(),
            });
        }
        Ok(())
    }

    fn upload(&self, resource: Arc<VolumeResource>, voxels: Vec<u8>) -> Result<(), LabelError> {
        self.render.enqueue("upload_volume", move |ctx: &mut GpuContext| {
            resource.write_all(&ctx.gpu.queue, &voxels);
            ctx.stats.record_upload();
        })
    }
}

impl VolumeAssets for VolumeLabeler {
    fn create_volume(
        &self,
        name: &str,
        format: LabelFormat,
        dims: UVec3,
        voxels: Vec<u8>,
    ) -> Result<Arc<LabelVolume>, LabelError> {
        self.validate(format, dims, &voxels)?;
        let volume = Arc::new(LabelVolume::new(name, dims, format));
        let resource = Arc::new(VolumeResource::new(&self.gpu.device, name, dims, format));
        volume.attach(resource.clone());
        self.upload(resource, voxels)?;
        log::info!("created labeling volume '{name}' {dims:?} {format:?}");
        Ok(volume)
    }

    fn update_volume(
        &self,
        volume: &LabelVolume,
        format: LabelFormat,
        dims: UVec3,
        voxels: Vec<u8>,
    ) -> Result<(), LabelError> {
        if volume.format() != format {
            return Err(LabelError::FormatMismatch {
                expected: volume.format(),
                actual: format,
            });
        }
        self.validate(format, dims, &voxels)?;

        let resource = match volume.resource() {
            Some(existing) if existing.dimensions() == dims => existing,
            _ => {
                log::debug!("allocating new texture for '{}' at {dims:?}", volume.name());
                let resource =
                    Arc::new(VolumeResource::new(&self.gpu.device, volume.name(), dims, format));
                volume.attach(resource.clone());
                resource
            }
        };
        self.upload(resource, voxels)
    }
}
