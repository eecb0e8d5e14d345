//! Redundant-state elimination for the draw loop.
//!
//! [`StateCache`] remembers the last value set for each piece of bound
//! state in the current recording session; a `set_*` call returns `true`
//! only when the backend call must actually be issued. It is reset whenever
//! a new session or pass starts, because bound state does not survive those.

use rustc_hash::FxHashMap;

use crate::batch::{MAX_TEXTURE_SLOTS, MAX_UNIFORM_BLOCKS, SamplerKey, UniformBlock, UniformSlot};
use crate::descriptor::DescriptorKey;
use crate::pipeline::PipelineId;
use crate::rect::PixelRect;
use crate::ring::PageId;
use crate::texture::TextureId;

#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct BindStats {
    pub issued: u64,
    pub skipped: u64,
}

#[derive(Debug, Default)]
pub struct StateCache {
    pipeline: Option<PipelineId>,
    vertex_page: Option<PageId>,
    index_page: Option<PageId>,
    stencil_ref: Option<u32>,
    scissor: Option<PixelRect>,
    descriptor_set: Option<(DescriptorKey, [u32; MAX_UNIFORM_BLOCKS])>,
    uniforms: [Option<(PageId, u64)>; MAX_UNIFORM_BLOCKS],
    textures: [Option<(TextureId, SamplerKey)>; MAX_TEXTURE_SLOTS],
    stats: BindStats,
}

impl StateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forgets all bound state. Counters are kept.
    pub fn reset(&mut self) {
        *self = Self {
            stats: self.stats,
            ..Self::default()
        };
    }

    pub fn stats(&self) -> BindStats {
        self.stats
    }

    #[inline]
    fn update<T: PartialEq>(slot: &mut Option<T>, value: T, stats: &mut BindStats) -> bool {
        if slot.as_ref() == Some(&value) {
            stats.skipped += 1;
            return false;
        }
        *slot = Some(value);
        stats.issued += 1;
        true
    }

    pub fn set_pipeline(&mut self, id: PipelineId) -> bool {
        Self::update(&mut self.pipeline, id, &mut self.stats)
    }

    pub fn set_vertex_page(&mut self, page: PageId) -> bool {
        Self::update(&mut self.vertex_page, page, &mut self.stats)
    }

    pub fn set_index_page(&mut self, page: PageId) -> bool {
        Self::update(&mut self.index_page, page, &mut self.stats)
    }

    pub fn set_stencil_ref(&mut self, reference: u32) -> bool {
        Self::update(&mut self.stencil_ref, reference, &mut self.stats)
    }

    pub fn set_scissor(&mut self, rect: PixelRect) -> bool {
        Self::update(&mut self.scissor, rect, &mut self.stats)
    }

    /// `key` identifies the set's contents; offsets are part of the bind.
    pub fn set_descriptor_set(&mut self, key: DescriptorKey, offsets: [u32; MAX_UNIFORM_BLOCKS]) -> bool {
        Self::update(&mut self.descriptor_set, (key, offsets), &mut self.stats)
    }

    pub fn set_uniform(&mut self, slot: UniformSlot, page: PageId, offset: u64) -> bool {
        Self::update(&mut self.uniforms[slot.index()], (page, offset), &mut self.stats)
    }

    pub fn set_texture(&mut self, slot: usize, texture: TextureId, sampler: SamplerKey) -> bool {
        Self::update(&mut self.textures[slot], (texture, sampler), &mut self.stats)
    }
}

/// Where a uniform block was last written.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct UniformUpload {
    pub hash: u64,
    pub page: PageId,
    pub offset: u64,
    pub size: u32,
}

/// Per-slot record of the last uploaded uniform block, so identical
/// consecutive blocks are not streamed again. Valid for one frame.
///
/// The hash only rules blocks out; reuse also needs byte-equal contents.
#[derive(Debug, Default)]
pub struct UniformUploads {
    slots: [Option<UniformUpload>; MAX_UNIFORM_BLOCKS],
    bytes: [Vec<u8>; MAX_UNIFORM_BLOCKS],
    reused: u64,
}

impl UniformUploads {
    pub fn reset(&mut self) {
        self.slots = [None; MAX_UNIFORM_BLOCKS];
    }

    /// Previous upload of identical content, if any.
    pub fn lookup(&mut self, slot: UniformSlot, block: &UniformBlock<'_>, size: u32) -> Option<UniformUpload> {
        let i = slot.index();
        let upload = self.slots[i].filter(|u| u.hash == block.hash && u.size == size)?;
        if self.bytes[i] != block.data {
            return None;
        }
        self.reused += 1;
        Some(upload)
    }

    pub fn record(&mut self, slot: UniformSlot, upload: UniformUpload, data: &[u8]) {
        let i = slot.index();
        self.slots[i] = Some(upload);
        self.bytes[i].clear();
        self.bytes[i].extend_from_slice(data);
    }

    pub fn reused(&self) -> u64 {
        self.reused
    }
}

/// One sampler per distinct key, kept for the device lifetime.
pub struct SamplerCache<S> {
    samplers: FxHashMap<SamplerKey, S>,
}

impl<S> Default for SamplerCache<S> {
    fn default() -> Self {
        Self {
            samplers: FxHashMap::default(),
        }
    }
}

impl<S> SamplerCache<S> {
    pub fn ensure(&mut self, key: SamplerKey, create: impl FnOnce(SamplerKey) -> S) {
        self.samplers.entry(key).or_insert_with(|| create(key));
    }

    pub fn get(&self, key: SamplerKey) -> Option<&S> {
        self.samplers.get(&key)
    }

    pub fn len(&self) -> usize {
        self.samplers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samplers.is_empty()
    }

    pub fn drain(&mut self) -> impl Iterator<Item = S> + '_ {
        self.samplers.drain().map(|(_, s)| s)
    }
}
