use glam::UVec3;

use crate::error::LabelError;

// ============================================================================
// 1. 体素格式 (Voxel formats a labeling volume can be stored in)
// ============================================================================

/// Texel format of a labeling volume.
///
/// Only float-sampled formats are listed because the brush shader stores a
/// `vec4<f32>` fill value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LabelFormat {
    /// Single 8-bit channel, the usual label mask.
    #[default]
    R8Unorm,
    Rgba8Unorm,
    R32Float,
}

impl LabelFormat {
    pub const ALL: [LabelFormat; 3] = [
        LabelFormat::R8Unorm,
        LabelFormat::Rgba8Unorm,
        LabelFormat::R32Float,
    ];

    pub const fn bytes_per_voxel(self) -> usize {
        match self {
            LabelFormat::R8Unorm => 1,
            LabelFormat::Rgba8Unorm => 4,
            LabelFormat::R32Float => 4,
        }
    }

    pub const fn texture_format(self) -> wgpu::TextureFormat {
        match self {
            LabelFormat::R8Unorm => wgpu::TextureFormat::R8Unorm,
            LabelFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
            LabelFormat::R32Float => wgpu::TextureFormat::R32Float,
        }
    }

    /// Texel format name used in `texture_storage_3d<..>` declarations.
    pub const fn wgsl_storage_format(self) -> &'static str {
        match self {
            LabelFormat::R8Unorm => "r8unorm",
            LabelFormat::Rgba8Unorm => "rgba8unorm",
            LabelFormat::R32Float => "r32float",
        }
    }

    /// Device features needed to bind this format as a storage texture.
    ///
    /// `r8unorm` is not part of the core WebGPU storage format list.
    pub const fn required_features(self) -> wgpu::Features {
        match self {
            LabelFormat::R8Unorm => wgpu::Features::TEXTURE_ADAPTER_SPECIFIC_FORMAT_FEATURES,
            LabelFormat::Rgba8Unorm | LabelFormat::R32Float => wgpu::Features::empty(),
        }
    }

    /// Whether `device` can bind this format for compute writes.
    ///
    /// This does not account for the GL backend, which binds 3D storage
    /// textures by single layer and so only writes the `z = 0` slice.
    pub fn is_supported_by(self, device: &wgpu::Device) -> bool {
        device.features().contains(self.required_features())
    }
}

// ============================================================================
// 2. 缓冲区大小 (Buffer sizing)
// ============================================================================

/// Total byte size of a volume, or `None` on overflow.
pub fn volume_byte_size(dims: UVec3, format: LabelFormat) -> Option<usize> {
    (dims.x as usize)
        .checked_mul(dims.y as usize)?
        .checked_mul(dims.z as usize)?
        .checked_mul(format.bytes_per_voxel())
}

/// Zero-filled voxel buffer sized exactly `x * y * z * bytes_per_voxel`.
pub fn zeroed_voxels(dims: UVec3, format: LabelFormat) -> Result<Vec<u8>, LabelError> {
    let size = volume_byte_size(dims, format).ok_or(LabelError::VolumeTooLarge { dims })?;
    Ok(vec![0u8; size])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zeroed_voxels_size() {
        let dims = UVec3::new(4, 5, 6);
        let r8 = zeroed_voxels(dims, LabelFormat::R8Unorm).unwrap();
        assert_eq!(r8.len(), 120);
        assert!(r8.iter().all(|&b| b == 0));

        let rgba = zeroed_voxels(dims, LabelFormat::Rgba8Unorm).unwrap();
        assert_eq!(rgba.len(), 480);
    }

    #[test]
    fn test_zeroed_voxels_overflow() {
        let dims = UVec3::splat(u32::MAX);
        assert!(matches!(
            zeroed_voxels(dims, LabelFormat::R32Float),
            Err(LabelError::VolumeTooLarge { .. })
        ));
    }

    #[test]
    fn test_empty_axis_gives_empty_buffer() {
        let dims = UVec3::new(8, 0, 8);
        assert_eq!(volume_byte_size(dims, LabelFormat::R8Unorm), Some(0));
    }

    #[test]
    fn test_format_tables_agree() {
        for format in LabelFormat::ALL {
            let block = format.texture_format().block_copy_size(None);
            assert_eq!(block, Some(format.bytes_per_voxel() as u32));
        }
        assert_eq!(LabelFormat::default(), LabelFormat::R8Unorm);
        assert!(
            LabelFormat::Rgba8Unorm.required_features().is_empty()
                && !LabelFormat::R8Unorm.required_features().is_empty()
        );
    }
}
