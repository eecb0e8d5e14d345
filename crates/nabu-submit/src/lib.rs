//! Nabu render submission engine.
//!
//! Backend-agnostic core that turns a stream of draw batches into GPU
//! commands while recycling transient memory behind a submission fence.
//! Concrete graphics APIs plug in through [`Backend`].

pub mod backend;
pub mod batch;
pub mod binding;
pub mod config;
pub mod deferred;
pub mod descriptor;
pub mod device;
pub mod error;
pub mod fence;
pub mod pipeline;
pub mod rect;
pub mod ring;
pub mod shader;
pub mod state;
pub mod texture;

#[cfg(test)]
mod mock;

pub use backend::{Backend, Capabilities, DescriptorWrites, LoadAction, PassDesc, PipelineDesc, TextureUsage};
pub use batch::{
    Batch, DrawOutcome, FilterMode, MipFilter, SamplerKey, SkipReason, TextureBinding, UniformBlock, UniformSlot,
    WrapMode,
};
pub use config::EngineConfig;
pub use device::{DeviceStats, FrameStats, MappedSpan, Phase, RenderDevice};
pub use error::{PipelineError, ResourceError};
pub use fence::{FenceSignal, FenceTracker, SubmissionSerial};
pub use rect::PixelRect;
pub use ring::{BufferKind, PageId, PageMemory};
pub use shader::{ShaderEntry, ShaderId, ShaderLayout, ShaderSource, ShaderTable, VertexAttribute, VertexFormat};
pub use state::{BlendMode, RenderState, StencilMode};
pub use texture::{RenderTargetDesc, RenderTargetId, TextureDesc, TextureFormat, TextureId, TextureState};
