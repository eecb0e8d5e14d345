//! Per-draw input supplied by the scene layer.

use std::hash::Hasher;

use rustc_hash::FxHasher;

use crate::rect::PixelRect;
use crate::shader::ShaderId;
use crate::state::RenderState;
use crate::texture::TextureId;

pub const MAX_TEXTURE_SLOTS: usize = 4;
pub const MAX_UNIFORM_BLOCKS: usize = 4;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

/// Uniform block slot. Each slot streams through its own ring.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum UniformSlot {
    Vertex0,
    Vertex1,
    Fragment0,
    Fragment1,
}

impl UniformSlot {
    pub const ALL: [UniformSlot; MAX_UNIFORM_BLOCKS] = [
        UniformSlot::Vertex0,
        UniformSlot::Vertex1,
        UniformSlot::Fragment0,
        UniformSlot::Fragment1,
    ];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    #[inline]
    pub fn stage(self) -> ShaderStage {
        match self {
            Self::Vertex0 | Self::Vertex1 => ShaderStage::Vertex,
            Self::Fragment0 | Self::Fragment1 => ShaderStage::Fragment,
        }
    }
}

// ── sampler state ─────────────────────────────────────────────────────────

#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Hash)]
pub enum WrapMode {
    #[default]
    ClampToEdge,
    Repeat,
    MirrorRepeat,
}

#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Hash)]
pub enum FilterMode {
    Nearest,
    #[default]
    Linear,
}

#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Hash)]
pub enum MipFilter {
    /// Sample level 0 only.
    #[default]
    Disabled,
    Nearest,
    Linear,
}

/// Sampler cache key.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Hash)]
pub struct SamplerKey {
    pub wrap: WrapMode,
    pub filter: FilterMode,
    pub mip: MipFilter,
}

impl SamplerKey {
    pub const NEAREST_CLAMP: SamplerKey = SamplerKey {
        wrap: WrapMode::ClampToEdge,
        filter: FilterMode::Nearest,
        mip: MipFilter::Disabled,
    };
}

// ── bound resources ───────────────────────────────────────────────────────

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct TextureBinding {
    pub texture: TextureId,
    pub sampler: SamplerKey,
}

/// Borrowed uniform data with its content hash.
#[derive(Debug, Copy, Clone)]
pub struct UniformBlock<'a> {
    pub data: &'a [u8],
    pub hash: u64,
}

impl<'a> UniformBlock<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            hash: content_hash(data),
        }
    }

    /// Uses a hash the caller already tracks.
    pub fn with_hash(data: &'a [u8], hash: u64) -> Self {
        Self { data, hash }
    }

    pub fn from_pod<T: bytemuck::Pod>(value: &'a T) -> Self {
        Self::new(bytemuck::bytes_of(value))
    }
}

pub fn content_hash(data: &[u8]) -> u64 {
    let mut hasher = FxHasher::default();
    hasher.write_usize(data.len());
    hasher.write(data);
    hasher.finish()
}

// ── batch ─────────────────────────────────────────────────────────────────

/// One draw call.
///
/// `base_vertex` and `first_index` are element offsets into the pages
/// returned by the most recent `map_vertices` / `map_indices`.
#[derive(Debug, Copy, Clone)]
pub struct Batch<'a> {
    pub shader: ShaderId,
    pub state: RenderState,
    pub stencil_ref: u32,
    /// Used only when `state.scissor()` is set.
    pub scissor: PixelRect,
    pub base_vertex: u32,
    pub first_index: u32,
    pub index_count: u32,
    pub textures: [Option<TextureBinding>; MAX_TEXTURE_SLOTS],
    pub uniforms: [Option<UniformBlock<'a>>; MAX_UNIFORM_BLOCKS],
}

impl<'a> Batch<'a> {
    pub fn new(shader: ShaderId) -> Self {
        Self {
            shader,
            state: RenderState::new(),
            stencil_ref: 0,
            scissor: PixelRect::default(),
            base_vertex: 0,
            first_index: 0,
            index_count: 0,
            textures: [None; MAX_TEXTURE_SLOTS],
            uniforms: [None; MAX_UNIFORM_BLOCKS],
        }
    }

    pub fn with_state(mut self, state: RenderState) -> Self {
        self.state = state;
        self
    }

    pub fn with_stencil_ref(mut self, reference: u32) -> Self {
        self.stencil_ref = reference;
        self
    }

    /// Enables the scissor test with `rect`.
    pub fn with_scissor(mut self, rect: PixelRect) -> Self {
        self.state = self.state.with_scissor(true);
        self.scissor = rect;
        self
    }

    pub fn with_range(mut self, base_vertex: u32, first_index: u32, index_count: u32) -> Self {
        self.base_vertex = base_vertex;
        self.first_index = first_index;
        self.index_count = index_count;
        self
    }

    /// # Panics
    /// When `slot` is not below [`MAX_TEXTURE_SLOTS`].
    pub fn with_texture(mut self, slot: usize, texture: TextureId, sampler: SamplerKey) -> Self {
        assert!(
            slot < MAX_TEXTURE_SLOTS,
            "texture slot {slot} out of range; batches have {MAX_TEXTURE_SLOTS} slots"
        );
        self.textures[slot] = Some(TextureBinding { texture, sampler });
        self
    }

    pub fn with_uniform(mut self, slot: UniformSlot, block: UniformBlock<'a>) -> Self {
        self.uniforms[slot.index()] = Some(block);
        self
    }
}

// ── outcome ───────────────────────────────────────────────────────────────

/// Why a batch was not drawn. Skips are expected with heterogeneous batch streams.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SkipReason {
    UnknownShader,
    MissingTexture { slot: usize },
    MissingUniform { slot: UniformSlot },
    /// The handle refers to a texture that was released.
    StaleTexture { slot: usize },
    /// The texture is the color attachment currently being drawn into.
    TargetFeedback { slot: usize },
    /// No indices, or the scissor and current tile leave nothing visible.
    EmptyRange,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum DrawOutcome {
    Drawn,
    Skipped(SkipReason),
}

impl DrawOutcome {
    #[inline]
    pub fn is_drawn(self) -> bool {
        self == DrawOutcome::Drawn
    }
}
