//! The submission engine for one GPU device.
//!
//! [`RenderDevice`] composes the fence tracker, ring allocators, caches and
//! texture manager around a single [`Backend`]. It is driven from one thread:
//!
//! ```text
//! begin_frame ─► set_render_target ─► (map_* + draw_batch)* ─► resolve ─► end_frame
//! ```
//!
//! Resource creation may fail and reports a [`ResourceError`]. Everything on
//! the draw path either succeeds, skips the batch, or panics on a
//! configuration defect.

mod dispatch;
mod frame;


use std::sync::Arc;

use crate::backend::{Backend, Capabilities, LoadAction};
use crate::batch::{MAX_UNIFORM_BLOCKS, UniformSlot};
use crate::binding::{BindStats, SamplerCache, StateCache, UniformUploads};
use crate::config::EngineConfig;
use crate::deferred::DeferredQueue;
use crate::descriptor::{DescriptorCache, DescriptorStats};
use crate::error::ResourceError;
use crate::fence::{FenceTracker, SubmissionSerial};
use crate::pipeline::{PipelineCache, PipelineStats};
use crate::rect::PixelRect;
use crate::ring::{BufferKind, PageId, PageMemory, RingAllocator, RingStats};
use crate::shader::{ShaderEntry, ShaderId, ShaderTable};
use crate::texture::{
    ReleasedTexture, RenderTargetDesc, RenderTargetId, TextureDesc, TextureFormat, TextureId, TextureManager,
    TextureState, TransitionStats,
};

pub use frame::MappedSpan;

/// Objects whose destruction waits for the fence.
pub enum Retired<B: Backend> {
    Texture(ReleasedTexture<B>),
    Pipeline(Arc<B::Pipeline>),
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Phase {
    /// Between frames.
    Idle,
    /// Inside a frame; draws go to the current render target.
    Recording,
    /// The current target was resolved; a new one must be set before drawing.
    Resolving,
}

#[derive(Debug, Copy, Clone, PartialEq)]
enum PassState {
    None,
    /// Wanted but not begun. Begins on the next draw.
    Pending(LoadAction),
    Active,
}

#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct FrameStats {
    pub frames: u64,
    pub draws: u64,
    pub skipped: u64,
    pub passes: u64,
    /// Passes split by an upload or transition.
    pub pass_breaks: u64,
    pub resolves: u64,
    pub uploads: u64,
}

#[derive(Debug, Copy, Clone, Default)]
pub struct DeviceStats {
    pub frame: FrameStats,
    pub binds: BindStats,
    pub pipelines: PipelineStats,
    pub descriptors: DescriptorStats,
    pub transitions: TransitionStats,
    pub vertex: RingStats,
    pub index: RingStats,
    /// Summed over the uniform slots.
    pub uniform: RingStats,
    pub staging: RingStats,
    pub uniform_reuses: u64,
    pub deferred_pending: usize,
}

struct Rings<P> {
    vertex: RingAllocator<P>,
    index: RingAllocator<P>,
    uniform: [RingAllocator<P>; MAX_UNIFORM_BLOCKS],
    staging: RingAllocator<P>,
}

impl<P: PageMemory> Rings<P> {
    fn new(config: &EngineConfig, caps: &Capabilities) -> Self {
        Self {
            vertex: RingAllocator::new(BufferKind::Vertex, config.vertex_page_size, 4),
            index: RingAllocator::new(BufferKind::Index, config.index_page_size, 4),
            uniform: UniformSlot::ALL.map(|slot| {
                RingAllocator::new(BufferKind::Uniform(slot), config.uniform_page_size, caps.uniform_alignment)
            }),
            staging: RingAllocator::new(BufferKind::Staging, config.staging_page_size, 16),
        }
    }

    fn iter_mut(&mut self) -> impl Iterator<Item = &mut RingAllocator<P>> {
        [&mut self.vertex, &mut self.index, &mut self.staging]
            .into_iter()
            .chain(self.uniform.iter_mut())
    }

    fn uniform_stats(&self) -> RingStats {
        self.uniform.iter().map(RingAllocator::stats).fold(RingStats::default(), |acc, s| RingStats {
            maps: acc.maps + s.maps,
            pages_allocated: acc.pages_allocated + s.pages_allocated,
            pages_reclaimed: acc.pages_reclaimed + s.pages_reclaimed,
        })
    }
}

pub struct RenderDevice<B: Backend> {
    backend: B,
    caps: Capabilities,
    config: EngineConfig,
    shaders: ShaderTable,
    fence: FenceTracker,
    rings: Rings<B::Page>,
    deferred: DeferredQueue<Retired<B>>,
    pipelines: PipelineCache<B::Pipeline>,
    samplers: SamplerCache<B::Sampler>,
    descriptors: DescriptorCache<B>,
    state: StateCache,
    uploads: UniformUploads,
    resources: TextureManager<B>,

    phase: Phase,
    pass: PassState,
    target: Option<RenderTargetId>,
    tile: Option<PixelRect>,
    vertex_page: Option<PageId>,
    index_page: Option<PageId>,
    stats: FrameStats,
    shut_down: bool,
}

impl<B: Backend> RenderDevice<B> {
    pub fn new(backend: B, shaders: ShaderTable, config: EngineConfig) -> Self {
        let caps = backend.capabilities();
        log::info!(
            "render device ready: {} built-in shaders, {} descriptors, {} max samples",
            shaders.builtin_count(),
            if caps.explicit_descriptors { "explicit" } else { "per-slot" },
            caps.max_samples
        );
        log::debug!("capabilities: {caps:?}, config: {config:?}");

        Self {
            rings: Rings::new(&config, &caps),
            descriptors: DescriptorCache::new(config.descriptor_pool_capacity),
            backend,
            caps,
            config,
            shaders,
            fence: FenceTracker::new(),
            deferred: DeferredQueue::new(),
            pipelines: PipelineCache::new(),
            samplers: SamplerCache::default(),
            state: StateCache::new(),
            uploads: UniformUploads::default(),
            resources: TextureManager::new(),
            phase: Phase::Idle,
            pass: PassState::None,
            target: None,
            tile: None,
            vertex_page: None,
            index_page: None,
            stats: FrameStats::default(),
            shut_down: false,
        }
    }

    // ── accessors ─────────────────────────────────────────────────────────

    #[inline]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Direct backend access for platform code (presentation, readback).
    /// Must not be used to record commands inside a frame.
    #[inline]
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    #[inline]
    pub fn capabilities(&self) -> &Capabilities {
        &self.caps
    }

    #[inline]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[inline]
    pub fn fence(&self) -> &FenceTracker {
        &self.fence
    }

    #[inline]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn stats(&self) -> DeviceStats {
        DeviceStats {
            frame: self.stats,
            binds: self.state.stats(),
            pipelines: self.pipelines.stats(),
            descriptors: self.descriptors.stats(),
            transitions: self.resources.stats(),
            vertex: self.rings.vertex.stats(),
            index: self.rings.index.stats(),
            uniform: self.rings.uniform_stats(),
            staging: self.rings.staging.stats(),
            uniform_reuses: self.uploads.reused(),
            deferred_pending: self.deferred.len(),
        }
    }

    /// Feeds a serial the platform knows the GPU has completed. Backends
    /// that signal through [`FenceSignal`](crate::FenceSignal) never need this.
    pub fn update_safe(&self, serial: SubmissionSerial) {
        self.fence.update_safe(serial);
    }

    // ── shaders ───────────────────────────────────────────────────────────

    pub fn register_custom_shader(&mut self, entry: ShaderEntry) -> ShaderId {
        self.shaders.register_custom(entry)
    }

    /// Removes a custom shader and retires its pipelines. Batches naming it
    /// are skipped from now on.
    pub fn clear_custom_shader(&mut self, id: ShaderId) -> bool {
        if !self.shaders.clear_custom(id) {
            return false;
        }
        let retired = self.pipelines.invalidate_shader(id);
        log::debug!("cleared custom shader {id:?}; retiring {} pipelines", retired.len());
        self.retire_pipelines(retired);
        self.backend.release_shader(id);
        true
    }

    // ── resources ─────────────────────────────────────────────────────────

    /// Creates a sampled texture. `initial` holds every mip level, tightly
    /// packed, or is `None`.
    pub fn create_texture(&mut self, desc: TextureDesc, initial: Option<&[&[u8]]>) -> Result<TextureId, ResourceError> {
        self.resources
            .create_texture(&mut self.backend, &self.caps, desc, initial)
    }

    /// Adopts an externally created texture. Its sampling view is created on
    /// first use.
    pub fn wrap_texture(&mut self, texture: B::Texture, desc: TextureDesc, state: TextureState) -> TextureId {
        self.resources.wrap_texture(texture, desc, state)
    }

    /// Changes the view format of a wrapped texture before its first use.
    pub fn reinterpret_texture(&mut self, id: TextureId, format: TextureFormat) -> bool {
        self.resources.reinterpret(id, format)
    }

    pub fn create_render_target(&mut self, desc: RenderTargetDesc) -> Result<RenderTargetId, ResourceError> {
        self.resources
            .create_render_target(&mut self.backend, &self.caps, desc)
    }

    pub fn texture_desc(&self, id: TextureId) -> Option<TextureDesc> {
        self.resources.desc(id)
    }

    pub fn texture_state(&self, id: TextureId) -> Option<TextureState> {
        self.resources.state(id)
    }

    /// Sampled texture that a render target resolves into.
    pub fn render_target_texture(&self, id: RenderTargetId) -> Option<TextureId> {
        self.resources.target_texture(id)
    }

    /// Releases a texture once the GPU is done with the current frame.
    pub fn release_texture(&mut self, id: TextureId) -> bool {
        let Some(released) = self.resources.release_texture(id) else {
            return false;
        };
        self.deferred
            .enqueue(Retired::Texture(released), self.fence.current());
        true
    }

    pub fn release_render_target(&mut self, id: RenderTargetId) -> bool {
        if self.target == Some(id) {
            self.end_pass();
            self.target = None;
            self.tile = None;
        }
        let released = self.resources.release_render_target(id);
        if released.is_empty() {
            return false;
        }
        let serial = self.fence.current();
        for texture in released {
            self.deferred.enqueue(Retired::Texture(texture), serial);
        }
        true
    }

    fn retire_pipelines(&mut self, pipelines: Vec<Arc<B::Pipeline>>) {
        let serial = self.fence.current();
        for pipeline in pipelines {
            self.deferred.enqueue(Retired::Pipeline(pipeline), serial);
        }
    }

    // ── shutdown ──────────────────────────────────────────────────────────

    /// Finishes outstanding work and destroys everything the engine owns.
    ///
    /// Runs at most once; dropping the device calls it.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;

        if self.phase != Phase::Idle {
            log::warn!("shutting down inside a frame; submitting what was recorded");
            self.end_frame();
        }

        let mut spins = 0;
        while !self.fence.is_idle() {
            if spins >= self.config.shutdown_spin_limit {
                log::error!(
                    "GPU still busy at shutdown (current {}, safe {})",
                    self.fence.current(),
                    self.fence.safe()
                );
                break;
            }
            self.backend.wait_idle();
            spins += 1;
        }

        let pipelines = self.pipelines.invalidate_all();
        self.retire_pipelines(pipelines);
        let serial = self.fence.current();
        for texture in self.resources.release_all() {
            self.deferred.enqueue(Retired::Texture(texture), serial);
        }
        self.descriptors.clear();
        self.samplers.drain().for_each(drop);

        let destroyed = self.deferred.drain(&self.fence, true);
        log::info!(
            "render device shut down after {} frames ({destroyed} deferred releases)",
            self.stats.frames
        );
    }
}

impl<B: Backend> Drop for RenderDevice<B> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }
        self.shutdown();
    }
}
