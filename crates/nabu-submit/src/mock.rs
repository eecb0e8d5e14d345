//! Recording backend for unit tests.

use std::cell::RefCell;
use std::ops::Range;
use std::rc::Rc;

use rustc_hash::FxHashMap;
use slotmap::SlotMap;

use crate::backend::{Backend, Capabilities, DescriptorWrites, LoadAction, PassDesc, PipelineDesc, TextureUsage};
use crate::batch::{SamplerKey, UniformSlot};
use crate::error::ResourceError;
use crate::fence::{FenceSignal, SubmissionSerial};
use crate::rect::PixelRect;
use crate::ring::{BufferKind, PageId, PageMemory};
use crate::shader::ShaderId;
use crate::texture::{TextureDesc, TextureFormat, TextureId, TextureState};

/// Small deterministic generator for property tests.
pub struct XorShift(u64);

impl XorShift {
    pub fn new(seed: u64) -> Self {
        Self(seed.wrapping_mul(0x9E37_79B9_7F4A_7C15) | 1)
    }

    pub fn next(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    /// Uniform-ish value in `0..n`; `n` must be non-zero.
    pub fn below(&mut self, n: u64) -> u64 {
        self.next() % n
    }
}

#[derive(Debug)]
pub struct MockPage {
    pub id: PageId,
    pub bytes: Vec<u8>,
    pub dirty: Option<Range<u64>>,
    pub flushes: u32,
}

impl MockPage {
    pub fn new(id: PageId, size: u64) -> Self {
        Self {
            id,
            bytes: vec![0; size as usize],
            dirty: None,
            flushes: 0,
        }
    }
}

impl PageMemory for MockPage {
    fn capacity(&self) -> u64 {
        self.bytes.len() as u64
    }

    fn write_range(&mut self, range: Range<u64>) -> &mut [u8] {
        self.dirty = Some(match self.dirty.take() {
            Some(d) => d.start.min(range.start)..d.end.max(range.end),
            None => range.clone(),
        });
        &mut self.bytes[range.start as usize..range.end as usize]
    }
}

pub struct MockTexture {
    pub id: u32,
    pub usage: TextureUsage,
    destroyed: Rc<RefCell<Vec<u32>>>,
}

impl Drop for MockTexture {
    fn drop(&mut self) {
        self.destroyed.borrow_mut().push(self.id);
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct MockView {
    pub texture: u32,
    pub format: TextureFormat,
}

#[derive(Debug)]
pub struct MockPipeline {
    pub id: u32,
    pub shader: ShaderId,
    pub parent: Option<u32>,
}

pub struct MockPool {
    pub id: u32,
    pub capacity: u32,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct MockSet {
    pub id: u32,
    pub pool: u32,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct MockSampler(pub SamplerKey);

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    BeginFrame,
    BeginPass {
        color: u32,
        depth_stencil: Option<u32>,
        load: LoadAction,
    },
    EndPass,
    Transition {
        texture: u32,
        from: TextureState,
        to: TextureState,
    },
    WriteTexture {
        texture: u32,
        level: u32,
        rect: PixelRect,
        bytes_per_row: u32,
    },
    CopyToTexture {
        page: PageId,
        offset: u64,
        bytes_per_row: u32,
        texture: u32,
        level: u32,
        rect: PixelRect,
    },
    BindPipeline(u32),
    BindVertexPage(PageId),
    BindIndexPage(PageId),
    BindDescriptorSet {
        set: u32,
        offsets: Vec<u32>,
    },
    BindUniform {
        slot: UniformSlot,
        page: PageId,
        offset: u64,
        size: u32,
    },
    BindTexture {
        slot: usize,
        texture: u32,
        sampler: SamplerKey,
    },
    SetStencilReference(u32),
    SetScissor(PixelRect),
    DrawIndexed {
        first_index: u32,
        index_count: u32,
        base_vertex: u32,
    },
    Resolve {
        source: u32,
        destination: u32,
        tiles: Vec<PixelRect>,
    },
    FlushPage(PageId),
    Submit(SubmissionSerial),
    ReleaseShader(ShaderId),
}

pub struct MockBackend {
    pub caps: Capabilities,
    pub commands: Vec<Command>,
    pub fail_texture_creation: bool,
    /// Pipelines built so far, as `(id, parent)`.
    pub pipelines: Vec<(u32, Option<u32>)>,
    /// Descriptor writes seen by `allocate_descriptor_set`, as bound page ids.
    pub descriptor_pages: Vec<[Option<PageId>; 4]>,
    next_id: u32,
    texture_ids: Vec<u32>,
    views_created: u32,
    samplers_created: u32,
    pool_resets: FxHashMap<u32, u32>,
    in_flight: Vec<(SubmissionSerial, FenceSignal)>,
    destroyed: Rc<RefCell<Vec<u32>>>,
    handles: SlotMap<TextureId, ()>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::with_caps(Capabilities {
            pipeline_derivation: true,
            explicit_descriptors: true,
            render_pass_objects: false,
            wireframe: true,
            uniform_alignment: 16,
            staging_row_alignment: 4,
            max_texture_size: 4096,
            max_samples: 8,
        })
    }

    pub fn with_caps(caps: Capabilities) -> Self {
        Self {
            caps,
            commands: Vec::new(),
            fail_texture_creation: false,
            pipelines: Vec::new(),
            descriptor_pages: Vec::new(),
            next_id: 1,
            texture_ids: Vec::new(),
            views_created: 0,
            samplers_created: 0,
            pool_resets: FxHashMap::default(),
            in_flight: Vec::new(),
            destroyed: Rc::default(),
            handles: SlotMap::with_key(),
        }
    }

    fn next_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub fn count(&self, pred: impl Fn(&Command) -> bool) -> usize {
        self.commands.iter().filter(|c| pred(c)).count()
    }

    /// Position of the first command matching `pred`.
    pub fn position(&self, pred: impl Fn(&Command) -> bool) -> Option<usize> {
        self.commands.iter().position(pred)
    }

    pub fn texture_ids(&self) -> &[u32] {
        &self.texture_ids
    }

    pub fn textures_created(&self) -> usize {
        self.texture_ids.len()
    }

    pub fn views_created(&self) -> u32 {
        self.views_created
    }

    pub fn samplers_created(&self) -> u32 {
        self.samplers_created
    }

    /// Mock texture ids destroyed so far, in drop order.
    pub fn destroyed(&self) -> Vec<u32> {
        self.destroyed.borrow().clone()
    }

    /// A texture id that is not registered anywhere.
    pub fn texture_handle(&mut self) -> TextureId {
        self.handles.insert(())
    }

    pub fn mock_allocate(&mut self, pool: &mut MockPool) -> MockSet {
        MockSet {
            id: self.next_id(),
            pool: pool.id,
        }
    }

    pub fn pool_resets(&self, pool: u32) -> u32 {
        self.pool_resets.get(&pool).copied().unwrap_or(0)
    }

    pub fn submitted(&self) -> Vec<SubmissionSerial> {
        self.in_flight.iter().map(|(s, _)| *s).collect()
    }

    /// Simulates the GPU finishing every submission up to `serial`.
    pub fn complete_through(&mut self, serial: SubmissionSerial) {
        self.in_flight.retain(|(s, signal)| {
            if *s <= serial {
                signal.complete(*s);
                false
            } else {
                true
            }
        });
    }

    pub fn complete_all(&mut self) {
        self.complete_through(SubmissionSerial(u64::MAX));
    }

    pub fn clear_commands(&mut self) {
        self.commands.clear();
    }
}

impl Backend for MockBackend {
    type Page = MockPage;
    type Pipeline = MockPipeline;
    type DescriptorPool = MockPool;
    type DescriptorSet = MockSet;
    type Sampler = MockSampler;
    type Texture = MockTexture;
    type TextureView = MockView;

    fn capabilities(&self) -> Capabilities {
        self.caps
    }

    fn create_page(&mut self, _kind: BufferKind, id: PageId, size: u64) -> MockPage {
        MockPage::new(id, size)
    }

    fn flush_page(&mut self, page: &mut MockPage) {
        if page.dirty.take().is_some() {
            page.flushes += 1;
            self.commands.push(Command::FlushPage(page.id));
        }
    }

    fn create_texture(&mut self, _desc: &TextureDesc, usage: TextureUsage) -> Result<MockTexture, ResourceError> {
        if self.fail_texture_creation {
            return Err(ResourceError::Backend("mock allocation failure".into()));
        }
        let id = self.next_id();
        self.texture_ids.push(id);
        Ok(MockTexture {
            id,
            usage,
            destroyed: Rc::clone(&self.destroyed),
        })
    }

    fn create_view(&mut self, texture: &MockTexture, format: TextureFormat) -> MockView {
        self.views_created += 1;
        MockView {
            texture: texture.id,
            format,
        }
    }

    fn write_texture(&mut self, texture: &MockTexture, level: u32, rect: PixelRect, _data: &[u8], bytes_per_row: u32) {
        self.commands.push(Command::WriteTexture {
            texture: texture.id,
            level,
            rect,
            bytes_per_row,
        });
    }

    fn create_sampler(&mut self, key: SamplerKey) -> MockSampler {
        self.samplers_created += 1;
        MockSampler(key)
    }

    fn build_pipeline(
        &mut self,
        desc: &PipelineDesc<'_>,
        parent: Option<&MockPipeline>,
    ) -> Result<MockPipeline, ResourceError> {
        let id = self.next_id();
        let parent = parent.map(|p| p.id);
        self.pipelines.push((id, parent));
        Ok(MockPipeline {
            id,
            shader: desc.signature.shader,
            parent,
        })
    }

    fn release_shader(&mut self, shader: ShaderId) {
        self.commands.push(Command::ReleaseShader(shader));
    }

    fn create_descriptor_pool(&mut self, capacity: u32) -> MockPool {
        MockPool {
            id: self.next_id(),
            capacity,
        }
    }

    fn reset_descriptor_pool(&mut self, pool: &mut MockPool) {
        *self.pool_resets.entry(pool.id).or_default() += 1;
    }

    fn allocate_descriptor_set(
        &mut self,
        pool: &mut MockPool,
        _pipeline: &MockPipeline,
        writes: &DescriptorWrites<'_, Self>,
    ) -> MockSet {
        self.descriptor_pages
            .push(writes.uniforms.map(|u| u.map(|(page, _)| page.id)));
        self.mock_allocate(pool)
    }

    fn begin_frame(&mut self) {
        self.commands.push(Command::BeginFrame);
    }

    fn begin_pass(&mut self, pass: &PassDesc<'_, Self>) {
        self.commands.push(Command::BeginPass {
            color: pass.color.texture,
            depth_stencil: pass.depth_stencil.map(|v| v.texture),
            load: pass.load,
        });
    }

    fn end_pass(&mut self) {
        self.commands.push(Command::EndPass);
    }

    fn transition(&mut self, texture: &MockTexture, from: TextureState, to: TextureState) {
        self.commands.push(Command::Transition {
            texture: texture.id,
            from,
            to,
        });
    }

    fn copy_to_texture(
        &mut self,
        page: &MockPage,
        offset: u64,
        bytes_per_row: u32,
        texture: &MockTexture,
        level: u32,
        rect: PixelRect,
    ) {
        self.commands.push(Command::CopyToTexture {
            page: page.id,
            offset,
            bytes_per_row,
            texture: texture.id,
            level,
            rect,
        });
    }

    fn bind_pipeline(&mut self, pipeline: &MockPipeline) {
        self.commands.push(Command::BindPipeline(pipeline.id));
    }

    fn bind_vertex_page(&mut self, page: &MockPage) {
        self.commands.push(Command::BindVertexPage(page.id));
    }

    fn bind_index_page(&mut self, page: &MockPage) {
        self.commands.push(Command::BindIndexPage(page.id));
    }

    fn bind_descriptor_set(&mut self, set: &MockSet, dynamic_offsets: &[u32]) {
        self.commands.push(Command::BindDescriptorSet {
            set: set.id,
            offsets: dynamic_offsets.to_vec(),
        });
    }

    fn bind_uniform(&mut self, slot: UniformSlot, page: &MockPage, offset: u64, size: u32) {
        self.commands.push(Command::BindUniform {
            slot,
            page: page.id,
            offset,
            size,
        });
    }

    fn bind_texture(&mut self, slot: usize, view: &MockView, sampler: &MockSampler) {
        self.commands.push(Command::BindTexture {
            slot,
            texture: view.texture,
            sampler: sampler.0,
        });
    }

    fn set_stencil_reference(&mut self, reference: u32) {
        self.commands.push(Command::SetStencilReference(reference));
    }

    fn set_scissor(&mut self, rect: PixelRect) {
        self.commands.push(Command::SetScissor(rect));
    }

    fn draw_indexed(&mut self, first_index: u32, index_count: u32, base_vertex: u32) {
        self.commands.push(Command::DrawIndexed {
            first_index,
            index_count,
            base_vertex,
        });
    }

    fn resolve(
        &mut self,
        source: &MockView,
        destination: &MockView,
        _format: TextureFormat,
        _samples: u32,
        tiles: &[PixelRect],
    ) {
        self.commands.push(Command::Resolve {
            source: source.texture,
            destination: destination.texture,
            tiles: tiles.to_vec(),
        });
    }

    fn submit(&mut self, serial: SubmissionSerial, signal: FenceSignal) {
        self.commands.push(Command::Submit(serial));
        self.in_flight.push((serial, signal));
    }

    fn poll(&mut self) {}

    fn wait_idle(&mut self) {
        self.complete_all();
    }
}
