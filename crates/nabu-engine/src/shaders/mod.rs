//! Built-in WGSL shader table.
//!
//! Ids are stable: the table passed to `RenderDevice::new` must start with
//! [`builtin_shaders`] in this order. Every built-in reads a [`ViewUniform`]
//! from the first vertex uniform slot.

use bytemuck::{Pod, Zeroable};

use nabu_submit::pipeline::PipelineSignature;
use nabu_submit::{
    BlendMode, ShaderEntry, ShaderId, ShaderLayout, ShaderTable, UniformSlot, VertexAttribute,
    VertexFormat,
};

pub const SOLID: ShaderId = ShaderId(0);
pub const IMAGE: ShaderId = ShaderId(1);
pub const GLYPH: ShaderId = ShaderId(2);

// ── vertex and uniform types ──────────────────────────────────────────────

/// Maps target pixels to clip space: `clip = position * scale + offset`.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct ViewUniform {
    pub scale: [f32; 2],
    pub offset: [f32; 2],
}

impl ViewUniform {
    /// Top-left origin, y down, covering a `width` x `height` target.
    pub fn pixels(width: u32, height: u32) -> Self {
        let w = width.max(1) as f32;
        let h = height.max(1) as f32;
        Self {
            scale: [2.0 / w, -2.0 / h],
            offset: [-1.0, 1.0],
        }
    }
}

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct SolidVertex {
    pub position: [f32; 2],
    /// Linear premultiplied RGBA.
    pub color: [f32; 4],
}

/// Shared by [`IMAGE`] and [`GLYPH`].
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct TexturedVertex {
    pub position: [f32; 2],
    pub uv: [f32; 2],
    pub color: [f32; 4],
}

// ── layouts ───────────────────────────────────────────────────────────────

const VIEW_SIZE: u32 = std::mem::size_of::<ViewUniform>() as u32;

fn attr(location: u32, format: VertexFormat, offset: u32) -> VertexAttribute {
    VertexAttribute { location, format, offset }
}

fn view_uniforms() -> [u32; 4] {
    let mut sizes = [0; 4];
    sizes[UniformSlot::Vertex0.index()] = VIEW_SIZE;
    sizes
}

fn solid_layout() -> ShaderLayout {
    ShaderLayout {
        vertex_stride: std::mem::size_of::<SolidVertex>() as u32,
        vertex_attributes: vec![
            attr(0, VertexFormat::Float32x2, 0),
            attr(1, VertexFormat::Float32x4, 8),
        ],
        uniform_sizes: view_uniforms(),
        texture_slots: 0,
    }
}

fn textured_layout() -> ShaderLayout {
    ShaderLayout {
        vertex_stride: std::mem::size_of::<TexturedVertex>() as u32,
        vertex_attributes: vec![
            attr(0, VertexFormat::Float32x2, 0),
            attr(1, VertexFormat::Float32x2, 8),
            attr(2, VertexFormat::Float32x4, 16),
        ],
        uniform_sizes: view_uniforms(),
        texture_slots: 0b1,
    }
}

/// Coverage is meaningless without blending.
fn glyph_validity(signature: &PipelineSignature) -> bool {
    signature.render_state().blend() != BlendMode::Replace
}

/// Built-in entries in id order.
pub fn builtin_shaders() -> Vec<ShaderEntry> {
    vec![
        ShaderEntry::wgsl("nabu solid", include_str!("solid.wgsl"), solid_layout()),
        ShaderEntry::wgsl("nabu image", include_str!("image.wgsl"), textured_layout()),
        ShaderEntry::wgsl("nabu glyph", include_str!("glyph.wgsl"), textured_layout())
            .with_validity(glyph_validity),
    ]
}

pub fn shader_table() -> ShaderTable {
    ShaderTable::new(builtin_shaders())
}
