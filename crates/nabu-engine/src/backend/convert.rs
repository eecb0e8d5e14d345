//! Engine state to wgpu descriptor conversions.

use nabu_submit::state::{
    BlendComponent, BlendFactor, BlendFactors, CompareOp, FillMode, StencilOp, StencilOps,
};
use nabu_submit::{
    FilterMode, MipFilter, PixelRect, SamplerKey, TextureFormat, TextureUsage, VertexFormat,
    WrapMode,
};

/// Format of every depth/stencil attachment.
pub(crate) const DEPTH_STENCIL_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth24PlusStencil8;

pub(crate) fn texture_format(format: TextureFormat) -> wgpu::TextureFormat {
    match format {
        TextureFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
        TextureFormat::Rgba8UnormSrgb => wgpu::TextureFormat::Rgba8UnormSrgb,
        TextureFormat::Bgra8Unorm => wgpu::TextureFormat::Bgra8Unorm,
        TextureFormat::Bgra8UnormSrgb => wgpu::TextureFormat::Bgra8UnormSrgb,
        TextureFormat::R8Unorm => wgpu::TextureFormat::R8Unorm,
        TextureFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
    }
}

pub(crate) fn vertex_format(format: VertexFormat) -> wgpu::VertexFormat {
    match format {
        VertexFormat::Float32x2 => wgpu::VertexFormat::Float32x2,
        VertexFormat::Float32x3 => wgpu::VertexFormat::Float32x3,
        VertexFormat::Float32x4 => wgpu::VertexFormat::Float32x4,
        VertexFormat::Unorm8x4 => wgpu::VertexFormat::Unorm8x4,
        VertexFormat::Uint32 => wgpu::VertexFormat::Uint32,
    }
}

/// Usage flags and sample count for a texture role.
pub(crate) fn texture_usage(usage: TextureUsage) -> (wgpu::TextureUsages, u32) {
    use wgpu::TextureUsages as U;
    match usage {
        TextureUsage::Sampled => (U::TEXTURE_BINDING | U::COPY_DST, 1),
        TextureUsage::ColorTarget => (U::TEXTURE_BINDING | U::COPY_DST | U::RENDER_ATTACHMENT, 1),
        // The resolve pass reads multisampled attachments as textures.
        TextureUsage::MultisampleColor { samples } => (U::RENDER_ATTACHMENT | U::TEXTURE_BINDING, samples),
        TextureUsage::DepthStencil { samples } => (U::RENDER_ATTACHMENT, samples),
    }
}

// ── blending ──────────────────────────────────────────────────────────────

fn blend_factor(factor: BlendFactor) -> wgpu::BlendFactor {
    match factor {
        BlendFactor::Zero => wgpu::BlendFactor::Zero,
        BlendFactor::One => wgpu::BlendFactor::One,
        BlendFactor::OneMinusSrcAlpha => wgpu::BlendFactor::OneMinusSrcAlpha,
        BlendFactor::DstColor => wgpu::BlendFactor::Dst,
        BlendFactor::OneMinusSrcColor => wgpu::BlendFactor::OneMinusSrc,
    }
}

fn blend_component(c: BlendComponent) -> wgpu::BlendComponent {
    wgpu::BlendComponent {
        src_factor: blend_factor(c.src),
        dst_factor: blend_factor(c.dst),
        operation: wgpu::BlendOperation::Add,
    }
}

pub(crate) fn blend_state(factors: BlendFactors) -> wgpu::BlendState {
    wgpu::BlendState {
        color: blend_component(factors.color),
        alpha: blend_component(factors.alpha),
    }
}

pub(crate) fn color_writes(enabled: bool) -> wgpu::ColorWrites {
    if enabled { wgpu::ColorWrites::ALL } else { wgpu::ColorWrites::empty() }
}

pub(crate) fn polygon_mode(fill: FillMode) -> wgpu::PolygonMode {
    match fill {
        FillMode::Solid => wgpu::PolygonMode::Fill,
        FillMode::Wireframe => wgpu::PolygonMode::Line,
    }
}

// ── stencil ───────────────────────────────────────────────────────────────

fn compare(op: CompareOp) -> wgpu::CompareFunction {
    match op {
        CompareOp::Always => wgpu::CompareFunction::Always,
        CompareOp::Equal => wgpu::CompareFunction::Equal,
    }
}

fn stencil_op(op: StencilOp) -> wgpu::StencilOperation {
    match op {
        StencilOp::Keep => wgpu::StencilOperation::Keep,
        StencilOp::Zero => wgpu::StencilOperation::Zero,
        StencilOp::IncrementClamp => wgpu::StencilOperation::IncrementClamp,
        StencilOp::DecrementClamp => wgpu::StencilOperation::DecrementClamp,
    }
}

/// Depth/stencil state for a target with a stencil attachment.
///
/// Depth is never tested. Without stencil ops the attachment is left untouched.
pub(crate) fn depth_stencil_state(ops: Option<StencilOps>) -> wgpu::DepthStencilState {
    let stencil = match ops {
        Some(ops) => {
            let face = wgpu::StencilFaceState {
                compare: compare(ops.compare),
                fail_op: stencil_op(ops.fail),
                depth_fail_op: stencil_op(ops.depth_fail),
                pass_op: stencil_op(ops.pass),
            };
            wgpu::StencilState {
                front: face,
                back: face,
                read_mask: 0xff,
                write_mask: 0xff,
            }
        }
        None => wgpu::StencilState {
            front: wgpu::StencilFaceState::IGNORE,
            back: wgpu::StencilFaceState::IGNORE,
            read_mask: 0,
            write_mask: 0,
        },
    };
    wgpu::DepthStencilState {
        format: DEPTH_STENCIL_FORMAT,
        depth_write_enabled: false,
        depth_compare: wgpu::CompareFunction::Always,
        stencil,
        bias: wgpu::DepthBiasState::default(),
    }
}

// ── samplers ──────────────────────────────────────────────────────────────

fn address_mode(wrap: WrapMode) -> wgpu::AddressMode {
    match wrap {
        WrapMode::ClampToEdge => wgpu::AddressMode::ClampToEdge,
        WrapMode::Repeat => wgpu::AddressMode::Repeat,
        WrapMode::MirrorRepeat => wgpu::AddressMode::MirrorRepeat,
    }
}

fn filter(mode: FilterMode) -> wgpu::FilterMode {
    match mode {
        FilterMode::Nearest => wgpu::FilterMode::Nearest,
        FilterMode::Linear => wgpu::FilterMode::Linear,
    }
}

pub(crate) fn sampler_descriptor(key: SamplerKey) -> wgpu::SamplerDescriptor<'static> {
    let address = address_mode(key.wrap);
    let (mipmap_filter, lod_max_clamp) = match key.mip {
        // Clamping the LOD range to level 0 disables mipmapping.
        MipFilter::Disabled => (wgpu::MipmapFilterMode::Nearest, 0.0),
        MipFilter::Nearest => (wgpu::MipmapFilterMode::Nearest, 32.0),
        MipFilter::Linear => (wgpu::MipmapFilterMode::Linear, 32.0),
    };
    wgpu::SamplerDescriptor {
        label: Some("nabu sampler"),
        address_mode_u: address,
        address_mode_v: address,
        address_mode_w: address,
        mag_filter: filter(key.filter),
        min_filter: filter(key.filter),
        mipmap_filter,
        lod_min_clamp: 0.0,
        lod_max_clamp,
        ..Default::default()
    }
}

// ── copies ────────────────────────────────────────────────────────────────

pub(crate) fn origin(rect: PixelRect) -> wgpu::Origin3d {
    wgpu::Origin3d { x: rect.x, y: rect.y, z: 0 }
}

pub(crate) fn extent(rect: PixelRect) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width: rect.width,
        height: rect.height,
        depth_or_array_layers: 1,
    }
}
