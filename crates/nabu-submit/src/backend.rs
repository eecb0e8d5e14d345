//! Seam between the submission engine and a concrete graphics API.
//!
//! The engine decides *what* to record and when it is safe to reuse memory;
//! a [`Backend`] turns those decisions into API objects and commands. All
//! methods are called from the device thread. Commands are only issued
//! between `begin_frame` and `submit`; draw and bind commands only inside a
//! pass.

use crate::batch::{MAX_TEXTURE_SLOTS, MAX_UNIFORM_BLOCKS, SamplerKey, UniformSlot};
use crate::error::ResourceError;
use crate::fence::{FenceSignal, SubmissionSerial};
use crate::pipeline::PipelineSignature;
use crate::rect::PixelRect;
use crate::ring::{BufferKind, PageId, PageMemory};
use crate::shader::{ShaderEntry, ShaderId};
use crate::state::{BlendFactors, FillMode, StencilOps};
use crate::texture::{TextureDesc, TextureFormat, TextureState};

/// What the backend can do; queried once at construction.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Capabilities {
    /// Pipelines can be derived from a parent for faster builds.
    pub pipeline_derivation: bool,
    /// Resources bind through pooled descriptor sets rather than per slot.
    pub explicit_descriptors: bool,
    /// Pipelines are tied to render-pass objects, so a new target
    /// configuration invalidates them.
    pub render_pass_objects: bool,
    pub wireframe: bool,
    /// Offset alignment for uniform blocks.
    pub uniform_alignment: u64,
    /// Row pitch alignment for buffer-to-texture copies.
    pub staging_row_alignment: u32,
    pub max_texture_size: u32,
    pub max_samples: u32,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            pipeline_derivation: false,
            explicit_descriptors: true,
            render_pass_objects: false,
            wireframe: false,
            uniform_alignment: 256,
            staging_row_alignment: 256,
            max_texture_size: 8192,
            max_samples: 4,
        }
    }
}

/// How a texture will be used; picks API usage flags.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum TextureUsage {
    /// Sampled and written by copies.
    Sampled,
    /// Sampled, copied into, and rendered to or resolved into.
    ColorTarget,
    /// Multisampled color attachment. Never sampled directly.
    MultisampleColor { samples: u32 },
    /// Depth/stencil attachment; the backend picks the format.
    DepthStencil { samples: u32 },
}

/// Fully decoded pipeline state for one signature.
#[derive(Debug, Clone, Copy)]
pub struct PipelineDesc<'a> {
    pub signature: PipelineSignature,
    pub shader: &'a ShaderEntry,
    pub blend: Option<BlendFactors>,
    pub stencil: Option<StencilOps>,
    pub fill: FillMode,
    pub color_write: bool,
}

/// Resources written into a freshly allocated descriptor set.
///
/// Uniforms are bound by page with the block size; the per-draw offset is
/// supplied dynamically at bind time.
pub struct DescriptorWrites<'a, B: Backend + ?Sized> {
    pub uniforms: [Option<(&'a B::Page, u32)>; MAX_UNIFORM_BLOCKS],
    pub textures: [Option<(&'a B::TextureView, &'a B::Sampler)>; MAX_TEXTURE_SLOTS],
}

impl<B: Backend + ?Sized> Default for DescriptorWrites<'_, B> {
    fn default() -> Self {
        Self {
            uniforms: [None; MAX_UNIFORM_BLOCKS],
            textures: [None; MAX_TEXTURE_SLOTS],
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum LoadAction {
    Load,
    /// Clears color to premultiplied RGBA and stencil to zero.
    Clear([f32; 4]),
}

pub struct PassDesc<'a, B: Backend + ?Sized> {
    /// Multisample attachment when the target has one, otherwise the color texture.
    pub color: &'a B::TextureView,
    pub depth_stencil: Option<&'a B::TextureView>,
    pub load: LoadAction,
    pub width: u32,
    pub height: u32,
}

pub trait Backend {
    type Page: PageMemory;
    type Pipeline;
    type DescriptorPool;
    type DescriptorSet;
    type Sampler;
    type Texture;
    type TextureView;

    fn capabilities(&self) -> Capabilities;

    // ── memory ────────────────────────────────────────────────────────────

    /// Allocates ring page storage. Failure here is fatal.
    fn create_page(&mut self, kind: BufferKind, id: PageId, size: u64) -> Self::Page;

    /// Makes CPU writes to `page` visible to subsequently submitted work.
    fn flush_page(&mut self, page: &mut Self::Page);

    // ── resources ─────────────────────────────────────────────────────────

    fn create_texture(
        &mut self,
        desc: &TextureDesc,
        usage: TextureUsage,
    ) -> Result<Self::Texture, ResourceError>;

    fn create_view(&mut self, texture: &Self::Texture, format: TextureFormat) -> Self::TextureView;

    /// Immediate upload outside any recording, used for initial data.
    fn write_texture(
        &mut self,
        texture: &Self::Texture,
        level: u32,
        rect: PixelRect,
        data: &[u8],
        bytes_per_row: u32,
    );

    fn create_sampler(&mut self, key: SamplerKey) -> Self::Sampler;

    fn build_pipeline(
        &mut self,
        desc: &PipelineDesc<'_>,
        parent: Option<&Self::Pipeline>,
    ) -> Result<Self::Pipeline, ResourceError>;

    /// Drops per-shader objects cached for `shader` after it was cleared.
    /// Its pipelines are already retired; the id is never built again.
    fn release_shader(&mut self, shader: ShaderId);

    // ── descriptors (explicit_descriptors backends) ───────────────────────

    fn create_descriptor_pool(&mut self, capacity: u32) -> Self::DescriptorPool;

    /// Returns every set of `pool` at once.
    fn reset_descriptor_pool(&mut self, pool: &mut Self::DescriptorPool);

    /// Allocates from a pool the engine knows still has capacity.
    fn allocate_descriptor_set(
        &mut self,
        pool: &mut Self::DescriptorPool,
        pipeline: &Self::Pipeline,
        writes: &DescriptorWrites<'_, Self>,
    ) -> Self::DescriptorSet;

    // ── recording ─────────────────────────────────────────────────────────

    fn begin_frame(&mut self);

    fn begin_pass(&mut self, pass: &PassDesc<'_, Self>);

    fn end_pass(&mut self);

    fn transition(&mut self, texture: &Self::Texture, from: TextureState, to: TextureState);

    fn copy_to_texture(
        &mut self,
        page: &Self::Page,
        offset: u64,
        bytes_per_row: u32,
        texture: &Self::Texture,
        level: u32,
        rect: PixelRect,
    );

    fn bind_pipeline(&mut self, pipeline: &Self::Pipeline);

    fn bind_vertex_page(&mut self, page: &Self::Page);

    /// Index pages hold 16-bit indices.
    fn bind_index_page(&mut self, page: &Self::Page);

    fn bind_descriptor_set(&mut self, set: &Self::DescriptorSet, dynamic_offsets: &[u32]);

    /// Per-slot binding for backends without explicit descriptors.
    fn bind_uniform(&mut self, slot: UniformSlot, page: &Self::Page, offset: u64, size: u32);

    /// Per-slot binding for backends without explicit descriptors.
    fn bind_texture(&mut self, slot: usize, view: &Self::TextureView, sampler: &Self::Sampler);

    fn set_stencil_reference(&mut self, reference: u32);

    fn set_scissor(&mut self, rect: PixelRect);

    fn draw_indexed(&mut self, first_index: u32, index_count: u32, base_vertex: u32);

    /// Averages `source` samples into `destination`, restricted to `tiles`.
    /// Called outside a pass.
    fn resolve(
        &mut self,
        source: &Self::TextureView,
        destination: &Self::TextureView,
        format: TextureFormat,
        samples: u32,
        tiles: &[PixelRect],
    );

    /// Submits the frame and arranges for `signal` to complete `serial`
    /// once the GPU finishes it.
    fn submit(&mut self, serial: SubmissionSerial, signal: FenceSignal);

    /// Processes completion callbacks without blocking.
    fn poll(&mut self);

    /// Blocks until submitted work completes. Only used at shutdown.
    fn wait_idle(&mut self) {
        self.poll();
    }
}
