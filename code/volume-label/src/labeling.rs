// ===============================================================================
// 标注入口: 创建 / 清零 / 写球
// ===============================================================================

use std::sync::Arc;

use glam::{UVec3, Vec3};

use crate::assets::VolumeAssets;
use crate::dispatch::{self, GpuContext, GpuStats, LinearColor};
use crate::error::{LabelError, LabelStatus};
use crate::format::{LabelFormat, zeroed_voxels};
use crate::mapping::{self, WorldParameters};
use crate::render_thread::{QueueCounters, RenderThread, RenderThreadConfig};
use crate::shader_cache::{GpuDevice, ShaderCache};
use crate::volume::LabelVolume;

/// Creates a zero-filled single-channel labeling volume.
pub fn create_labeling_volume<A: VolumeAssets + ?Sized>(
    assets: &A,
    name: &str,
    dims: UVec3,
) -> Result<Arc<LabelVolume>, LabelError> {
    create_labeling_volume_with_format(assets, name, dims, LabelFormat::default())
}

pub fn create_labeling_volume_with_format<A: VolumeAssets + ?Sized>(
    assets: &A,
    name: &str,
    dims: UVec3,
    format: LabelFormat,
) -> Result<Arc<LabelVolume>, LabelError> {
    let created = zeroed_voxels(dims, format)
        .and_then(|voxels| assets.create_volume(name, format, dims, voxels));
    if let Err(e) = &created {
        log::warn!("failed creating the labeling volume '{name}': {e}");
    }
    created
}

/// Overwrites `volume` with zeros, resizing it to `dims` if needed.
///
/// Returns `Queued` when the host defers the upload, as `VolumeLabeler`
/// does; call `VolumeLabeler::flush` before reading the volume back.
pub fn init_labeling_volume<A: VolumeAssets + ?Sized>(
    assets: &A,
    volume: &LabelVolume,
    dims: UVec3,
) -> LabelStatus {
    let format = volume.format();
    let updated = zeroed_voxels(dims, format)
        .and_then(|voxels| assets.update_volume(volume, format, dims, voxels));
    match updated {
        Ok(()) if assets.defers_updates() => LabelStatus::Queued,
        Ok(()) => LabelStatus::Completed,
        Err(e) => {
            log::warn!("failed initializing the labeling volume '{}': {e}", volume.name());
            LabelStatus::Failed(e)
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LabelerConfig {
    pub render_thread: RenderThreadConfig,
    /// Formats the labeler must be able to write. Construction fails if one
    /// of them cannot be compiled on the device.
    pub warm_formats: Vec<LabelFormat>,
}

impl LabelerConfig {
    pub fn with_render_thread(mut self, render_thread: RenderThreadConfig) -> Self {
        self.render_thread = render_thread;
        self
    }

    pub fn with_warm_format(mut self, format: LabelFormat) -> Self {
        self.warm_formats.push(format);
        self
    }
}

/// Owns the render thread that performs every GPU write for labeling
/// volumes created on one device.
pub struct VolumeLabeler {
    pub(crate) gpu: GpuDevice,
    pub(crate) render: RenderThread<GpuContext>,
    stats: Arc<GpuStats>,
}

impl VolumeLabeler {
    /// Compiles the brush pipeline for every storage format the device
    /// supports, then starts the render thread.
    ///
    /// Pipelines are built here on the calling thread so the render thread
    /// never opens an error scope while the host is creating resources.
    ///
    /// On the GL backend 3D storage textures are bound one layer at a time,
    /// so only the `z = 0` slice of a volume is writable there. Prefer
    /// `wgpu::Backends::PRIMARY` when requesting the adapter.
    pub fn new(
        device: Arc<wgpu::Device>,
        queue: Arc<wgpu::Queue>,
        config: LabelerConfig,
    ) -> Result<Self, LabelError> {
        let gpu = GpuDevice::new(device, queue);
        let cache = ShaderCache::global();
        let supported = LabelFormat::ALL
            .into_iter()
            .filter(|format| format.is_supported_by(&gpu.device));
        let compiled = supported
            .chain(config.warm_formats.iter().copied())
            .try_for_each(|format| {
                cache
                    .get::<dispatch::WriteSphereShader>(&gpu, format)
                    .map(drop)
            });
        let context = GpuContext::new(gpu.clone());
        let stats = context.stats.clone();
        let render = compiled.and_then(|()| RenderThread::spawn(config.render_thread, context));
        match render {
            Ok(render) => Ok(Self { gpu, render, stats }),
            Err(e) => {
                cache.evict_device(gpu.id());
                Err(e)
            }
        }
    }

    pub fn gpu(&self) -> &GpuDevice {
        &self.gpu
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.gpu.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.gpu.queue
    }

    pub fn stats(&self) -> &GpuStats {
        &self.stats
    }

    pub fn queue_counters(&self) -> &QueueCounters {
        self.render.counters()
    }

    /// Stamps a sphere into `volume` on the render thread.
    ///
    /// Returns as soon as the write is queued. Volumes without a GPU
    /// resource are skipped without touching the queue.
    pub fn label_sphere(
        &self,
        volume: &LabelVolume,
        world_center: Vec3,
        world_radius: f32,
        world: &WorldParameters,
        color: LinearColor,
    ) -> LabelStatus {
        let Some(resource) = volume.resource() else {
            return LabelStatus::SkippedNoResource;
        };
        let world = *world;
        let queued = self.render.enqueue("write_sphere", move |ctx: &mut GpuContext| {
            let region =
                mapping::brush_region(&world, world_center, world_radius, resource.dimensions());
            if let Err(e) = dispatch::write_sphere(ctx, &resource, region, color) {
                log::error!("sphere write failed: {e}");
            }
        });
        match queued {
            Ok(()) => LabelStatus::Queued,
            Err(e) => LabelStatus::Failed(e),
        }
    }

    /// Waits until every previously queued upload and brush write has been
    /// submitted to the GPU queue.
    pub fn flush(&self) -> Result<(), LabelError> {
        self.render.flush()
    }
}

impl Drop for VolumeLabeler {
    fn drop(&mut self) {
        if let Err(e) = self.render.flush() {
            log::warn!("render thread gone before labeler shutdown: {e}");
        }
        let evicted = ShaderCache::global().evict_device(self.gpu.id());
        log::debug!("evicted {evicted} cached pipelines for device {}", self.gpu.id());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Asset host that records what it was handed.
    #[derive(Default)]
    struct RecordingAssets {
        fail: bool,
        immediate: bool,
        received: Mutex<Vec<(String, LabelFormat, UVec3, usize, bool)>>,
    }

    impl RecordingAssets {
        fn record(&self, name: &str, format: LabelFormat, dims: UVec3, voxels: &[u8]) {
            let all_zero = voxels.iter().all(|&b| b == 0);
            self.received
                .lock()
                .unwrap()
                .push((name.to_string(), format, dims, voxels.len(), all_zero));
        }
    }

    impl VolumeAssets for RecordingAssets {
        fn create_volume(
            &self,
            name: &str,
            format: LabelFormat,
            dims: UVec3,
            voxels: Vec<u8>,
        ) -> Result<Arc<LabelVolume>, LabelError> {
            self.record(name, format, dims, &voxels);
            if self.fail {
                return Err(LabelError::UnsupportedFormat(format));
            }
            Ok(Arc::new(LabelVolume::new(name, dims, format)))
        }

        fn update_volume(
            &self,
            volume: &LabelVolume,
            format: LabelFormat,
            dims: UVec3,
            voxels: Vec<u8>,
        ) -> Result<(), LabelError> {
            self.record(volume.name(), format, dims, &voxels);
            if self.fail {
                return Err(LabelError::RenderThreadClosed);
            }
            Ok(())
        }

        fn defers_updates(&self) -> bool {
            !self.immediate
        }
    }

    #[test]
    fn test_create_passes_zeroed_buffer() {
        let assets = RecordingAssets::default();
        let dims = UVec3::new(16, 8, 4);
        let volume = create_labeling_volume(&assets, "labels", dims).unwrap();
        assert_eq!(volume.format(), LabelFormat::R8Unorm);
        assert_eq!(volume.dimensions(), dims);

        let received = assets.received.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(
            received[0],
            ("labels".to_string(), LabelFormat::R8Unorm, dims, 16 * 8 * 4, true)
        );
    }

    #[test]
    fn test_create_with_format_sizes_by_voxel_bytes() {
        let assets = RecordingAssets::default();
        let dims = UVec3::splat(4);
        create_labeling_volume_with_format(&assets, "rgba", dims, LabelFormat::Rgba8Unorm).unwrap();
        assert_eq!(assets.received.lock().unwrap()[0].3, 4 * 4 * 4 * 4);
    }

    #[test]
    fn test_create_failure_is_returned() {
        let assets = RecordingAssets {
            fail: true,
            ..Default::default()
        };
        let result = create_labeling_volume(&assets, "labels", UVec3::splat(8));
        assert!(matches!(result, Err(LabelError::UnsupportedFormat(_))));
        // The buffer still reached the host exactly once.
        assert_eq!(assets.received.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_create_overflow_never_reaches_host() {
        let assets = RecordingAssets::default();
        let result = create_labeling_volume(&assets, "huge", UVec3::splat(u32::MAX));
        assert!(matches!(result, Err(LabelError::VolumeTooLarge { .. })));
        assert!(assets.received.lock().unwrap().is_empty());
    }

    #[test]
    fn test_init_uses_volume_format() {
        let assets = RecordingAssets::default();
        let volume = LabelVolume::new("existing", UVec3::splat(2), LabelFormat::R32Float);
        let status = init_labeling_volume(&assets, &volume, UVec3::new(3, 3, 3));
        assert!(matches!(status, LabelStatus::Queued));

        let received = assets.received.lock().unwrap();
        assert_eq!(received[0].1, LabelFormat::R32Float);
        assert_eq!(received[0].3, 27 * 4);
        assert!(received[0].4);
    }

    #[test]
    fn test_init_on_immediate_host_completes() {
        let assets = RecordingAssets {
            immediate: true,
            ..Default::default()
        };
        let volume = LabelVolume::new("existing", UVec3::splat(2), LabelFormat::R8Unorm);
        let status = init_labeling_volume(&assets, &volume, UVec3::splat(2));
        assert!(matches!(status, LabelStatus::Completed));
    }

    #[test]
    fn test_init_failure_reports_status() {
        let assets = RecordingAssets {
            fail: true,
            ..Default::default()
        };
        let volume = LabelVolume::new("existing", UVec3::splat(2), LabelFormat::R8Unorm);
        let status = init_labeling_volume(&assets, &volume, UVec3::splat(2));
        assert!(status.is_failed());
        assert_eq!(assets.received.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_config_builder() {
        let config = LabelerConfig::default()
            .with_render_thread(RenderThreadConfig::default().with_name("labels-gpu"))
            .with_warm_format(LabelFormat::Rgba8Unorm);
        assert_eq!(config.render_thread.name, "labels-gpu");
        assert_eq!(config.warm_formats, vec![LabelFormat::Rgba8Unorm]);
    }
}
