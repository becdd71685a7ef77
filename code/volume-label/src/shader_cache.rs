//! Process-wide registry of compiled compute pipelines.
//! 全局着色器缓存
//!
//! Entries are keyed by device, shader type and storage format, built at most
//! once and shared as `Arc`s afterwards.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;

use crate::error::LabelError;
use crate::format::LabelFormat;

/// A `wgpu` device/queue pair with a process-unique id.
#[derive(Clone)]
pub struct GpuDevice {
    id: u64,
    pub device: Arc<wgpu::Device>,
    pub queue: Arc<wgpu::Queue>,
}

impl GpuDevice {
    pub fn new(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>) -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            device,
            queue,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

/// A compute program that can be compiled for a given storage format.
pub trait GlobalShader: Send + Sync + Sized + 'static {
    const NAME: &'static str;

    fn compile(device: &wgpu::Device, format: LabelFormat) -> Result<Self, LabelError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct ShaderKey {
    device_id: u64,
    shader: TypeId,
    format: LabelFormat,
}

impl ShaderKey {
    fn of<S: GlobalShader>(gpu: &GpuDevice, format: LabelFormat) -> Self {
        Self {
            device_id: gpu.id(),
            shader: TypeId::of::<S>(),
            format,
        }
    }
}

type CachedShader = Arc<dyn Any + Send + Sync>;

#[derive(Default)]
pub struct ShaderCache {
    entries: RwLock<HashMap<ShaderKey, CachedShader>>,
}

impl ShaderCache {
    pub fn global() -> &'static ShaderCache {
        static CACHE: OnceLock<ShaderCache> = OnceLock::new();
        CACHE.get_or_init(ShaderCache::default)
    }

    pub fn get<S: GlobalShader>(
        &self,
        gpu: &GpuDevice,
        format: LabelFormat,
    ) -> Result<Arc<S>, LabelError> {
        let key = ShaderKey::of::<S>(gpu, format);
        if let Some(shader) = self.entries.read().get(&key) {
            return downcast(shader.clone());
        }

        let mut entries = self.entries.write();
        // Another thread may have compiled it while we waited for the lock.
        if let Some(shader) = entries.get(&key) {
            return downcast(shader.clone());
        }
        log::debug!("compiling {} for {:?} on device {}", S::NAME, format, gpu.id());
        let shader = Arc::new(S::compile(&gpu.device, format)?);
        entries.insert(key, shader.clone());
        Ok(shader)
    }

    /// Whether `S` is already built for `format` on `gpu`. Never compiles.
    pub fn contains<S: GlobalShader>(&self, gpu: &GpuDevice, format: LabelFormat) -> bool {
        self.entries
            .read()
            .contains_key(&ShaderKey::of::<S>(gpu, format))
    }

    /// Drops every pipeline built for `device_id`.
    pub fn evict_device(&self, device_id: u64) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|key, _| key.device_id != device_id);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

fn downcast<S: GlobalShader>(shader: CachedShader) -> Result<Arc<S>, LabelError> {
    shader
        .downcast::<S>()
        .map_err(|_| LabelError::ShaderCompilation(format!("cache entry is not a {}", S::NAME)))
}
