// ===============================================================================
// 错误类型定义
// ===============================================================================

use crate::format::LabelFormat;

/// 标注错误类型
/// Errors raised while building pipelines, validating volumes or talking to
/// the render thread.
#[derive(Debug, thiserror::Error)]
pub enum LabelError {
    #[error("Shader compilation failed: {0}")]
    ShaderCompilation(String),

    #[error("Invalid volume dimensions {dims:?} (limit {limit} per axis)")]
    InvalidDimensions { dims: glam::UVec3, limit: u32 },

    #[error("Volume {dims:?} does not fit in addressable memory")]
    VolumeTooLarge { dims: glam::UVec3 },

    #[error("Format {0:?} is not writable from compute on this device")]
    UnsupportedFormat(LabelFormat),

    #[error("Format mismatch: expected {expected:?}, got {actual:?}")]
    FormatMismatch {
        expected: LabelFormat,
        actual: LabelFormat,
    },

    #[error("Voxel buffer size mismatch: expected {expected} bytes, got {actual}")]
    BufferSizeMismatch { expected: usize, actual: usize },

    #[error("Failed to spawn render thread: {0}")]
    RenderThreadSpawn(#[from] std::io::Error),

    #[error("Render thread is no longer accepting commands")]
    RenderThreadClosed,
}

/// Outcome of a best-effort labeling operation.
///
/// None of these are raised as errors; the host decides whether a failure
/// deserves to be surfaced.
#[derive(Debug)]
pub enum LabelStatus {
    /// The work finished before the call returned.
    Completed,
    /// The work was handed to the render thread and runs later, in order.
    Queued,
    /// The volume had no GPU resource, nothing was submitted.
    SkippedNoResource,
    Failed(LabelError),
}

impl LabelStatus {
    pub fn is_failed(&self) -> bool {
        matches!(self, LabelStatus::Failed(_))
    }
}
