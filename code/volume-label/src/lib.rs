//! Writes spherical brushes into 3D label volumes on the GPU.
//!
//! Brush requests are accepted on any thread and executed on a dedicated
//! render thread that owns command submission for the device.

mod assets;
pub mod dispatch;
mod error;
mod format;
mod labeling;
pub mod mapping;
pub mod render_thread;
pub mod shader_cache;
mod volume;

pub use assets::VolumeAssets;
pub use dispatch::{GpuStats, LinearColor};
pub use error::{LabelError, LabelStatus};
pub use format::{LabelFormat, volume_byte_size, zeroed_voxels};
pub use labeling::{
    LabelerConfig, VolumeLabeler, create_labeling_volume, create_labeling_volume_with_format,
    init_labeling_volume,
};
pub use mapping::{BrushRegion, WorldParameters};
pub use render_thread::RenderThreadConfig;
pub use volume::{LabelVolume, ResourceState, VolumeResource};
