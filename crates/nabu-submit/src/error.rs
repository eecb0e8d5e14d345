use crate::pipeline::PipelineSignature;
use crate::rect::PixelRect;
use crate::shader::ShaderId;
use crate::texture::TextureFormat;

/// Failure of a resource-creation entry point. No handle is produced.
#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum ResourceError {
    #[error("texture dimensions must be non-zero (got {width}x{height})")]
    ZeroSize { width: u32, height: u32 },

    #[error("{width}x{height} exceeds the maximum texture size of {max}")]
    TooLarge { width: u32, height: u32, max: u32 },

    #[error("{levels} mip levels requested; a {width}x{height} texture has at most {max}")]
    InvalidMipCount {
        levels: u32,
        max: u32,
        width: u32,
        height: u32,
    },

    #[error("initial data supplies {supplied} of {levels} mip levels")]
    MissingMipData { supplied: usize, levels: u32 },

    #[error("mip level {level} expects {expected} bytes, got {actual}")]
    InitialDataSize {
        level: u32,
        expected: usize,
        actual: usize,
    },

    #[error("{region:?} lies outside mip level {level} ({width}x{height})")]
    RegionOutOfBounds {
        region: PixelRect,
        level: u32,
        width: u32,
        height: u32,
    },

    #[error("{0:?} is not supported for this use")]
    UnsupportedFormat(TextureFormat),

    #[error("sample count {0} is not supported")]
    UnsupportedSampleCount(u32),

    #[error("texture handle is stale or was never created")]
    UnknownTexture,

    #[error("shader source is not supported by this backend")]
    UnsupportedShader,

    #[error("backend error: {0}")]
    Backend(String),
}

/// Why a signature did not resolve to a pipeline.
#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum PipelineError {
    #[error("shader {0:?} is not registered")]
    UnknownShader(ShaderId),

    #[error("invalid pipeline state for {signature:?}: {reason}")]
    Rejected {
        signature: PipelineSignature,
        reason: &'static str,
    },

    #[error("pipeline build failed: {0}")]
    Build(ResourceError),
}
