//! Injected shader table.
//!
//! Shaders are supplied by the caller at construction as a read-only table:
//! source or bytecode plus the binding signature the engine must honor when
//! filling dynamic buffers. Custom shaders may be registered and cleared at
//! runtime; their ids are never reused.
//!
//! Binding conventions shared by every backend:
//! - uniform slot `n` lives at binding `n` (dynamic offset)
//! - texture slot `n` lives at binding `4 + 2n`, its sampler at `5 + 2n`

use std::borrow::Cow;
use std::sync::Arc;

use crate::batch::{MAX_TEXTURE_SLOTS, MAX_UNIFORM_BLOCKS, UniformSlot};
use crate::pipeline::PipelineSignature;

/// Index into the shader table.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ShaderId(pub u16);

#[derive(Debug, Clone)]
pub enum ShaderSource {
    /// WGSL text with `vs_main` / `fs_main` entry points.
    Wgsl(Cow<'static, str>),
    /// Opaque backend bytecode.
    Bytecode(Arc<[u8]>),
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum VertexFormat {
    Float32x2,
    Float32x3,
    Float32x4,
    Unorm8x4,
    Uint32,
}

impl VertexFormat {
    pub fn size(self) -> u32 {
        match self {
            Self::Float32x2 => 8,
            Self::Float32x3 => 12,
            Self::Float32x4 => 16,
            Self::Unorm8x4 | Self::Uint32 => 4,
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct VertexAttribute {
    pub location: u32,
    pub format: VertexFormat,
    pub offset: u32,
}

/// Resources a shader reads and the vertex layout it expects.
#[derive(Debug, Clone, Default)]
pub struct ShaderLayout {
    pub vertex_stride: u32,
    pub vertex_attributes: Vec<VertexAttribute>,
    /// Byte size of each uniform block; 0 marks an unused slot.
    pub uniform_sizes: [u32; MAX_UNIFORM_BLOCKS],
    /// Bit `n` set when texture slot `n` is sampled.
    pub texture_slots: u8,
}

impl ShaderLayout {
    #[inline]
    pub fn uses_uniform(&self, slot: UniformSlot) -> bool {
        self.uniform_sizes[slot.index()] != 0
    }

    #[inline]
    pub fn uses_texture(&self, slot: usize) -> bool {
        slot < MAX_TEXTURE_SLOTS && self.texture_slots & (1 << slot) != 0
    }

    pub fn uniform_binding(slot: UniformSlot) -> u32 {
        slot.index() as u32
    }

    pub fn texture_binding(slot: usize) -> u32 {
        MAX_UNIFORM_BLOCKS as u32 + 2 * slot as u32
    }

    pub fn sampler_binding(slot: usize) -> u32 {
        Self::texture_binding(slot) + 1
    }
}

pub type ValidityFn = fn(&PipelineSignature) -> bool;

#[derive(Debug, Clone)]
pub struct ShaderEntry {
    pub label: Cow<'static, str>,
    pub source: ShaderSource,
    pub layout: ShaderLayout,
    /// Extra per-shader check run before any pipeline build.
    pub validity: Option<ValidityFn>,
}

impl ShaderEntry {
    pub fn wgsl(label: impl Into<Cow<'static, str>>, source: impl Into<Cow<'static, str>>, layout: ShaderLayout) -> Self {
        Self {
            label: label.into(),
            source: ShaderSource::Wgsl(source.into()),
            layout,
            validity: None,
        }
    }

    pub fn with_validity(mut self, validity: ValidityFn) -> Self {
        self.validity = Some(validity);
        self
    }
}

/// Built-in shaders followed by runtime-registered custom shaders.
#[derive(Debug, Default)]
pub struct ShaderTable {
    entries: Vec<Option<ShaderEntry>>,
    builtin: usize,
}

impl ShaderTable {
    pub fn new(builtin: Vec<ShaderEntry>) -> Self {
        let builtin_len = builtin.len();
        assert!(
            builtin_len <= u16::MAX as usize,
            "shader table holds at most {} entries",
            u16::MAX
        );
        Self {
            entries: builtin.into_iter().map(Some).collect(),
            builtin: builtin_len,
        }
    }

    #[inline]
    pub fn get(&self, id: ShaderId) -> Option<&ShaderEntry> {
        self.entries.get(id.0 as usize).and_then(Option::as_ref)
    }

    #[inline]
    pub fn is_builtin(&self, id: ShaderId) -> bool {
        (id.0 as usize) < self.builtin
    }

    pub fn builtin_count(&self) -> usize {
        self.builtin
    }

    pub fn register_custom(&mut self, entry: ShaderEntry) -> ShaderId {
        assert!(
            self.entries.len() < u16::MAX as usize,
            "shader table is full ({} entries)",
            self.entries.len()
        );
        let id = ShaderId(self.entries.len() as u16);
        log::debug!("registered custom shader {:?} ({})", id, entry.label);
        self.entries.push(Some(entry));
        id
    }

    /// Returns false for built-in ids and ids that are already cleared.
    pub fn clear_custom(&mut self, id: ShaderId) -> bool {
        if self.is_builtin(id) {
            return false;
        }
        let Some(slot) = self.entries.get_mut(id.0 as usize) else {
            return false;
        };
        slot.take().is_some()
    }
}
