//! Textures, render targets and their synchronization state.
//!
//! Every texture carries the state the GPU last saw it in; `transition`
//! emits a barrier only when the required state differs. Wrapped
//! (externally created) textures get their sampling view on first use, so
//! their view format can still be reinterpreted until then.

use slotmap::SlotMap;

use crate::backend::{Backend, Capabilities, TextureUsage};
use crate::error::ResourceError;
use crate::pipeline::TargetInfo;
use crate::rect::PixelRect;

slotmap::new_key_type! {
    /// Handle to a sampleable texture.
    pub struct TextureId;
    /// Handle to a render target.
    pub struct RenderTargetId;
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum TextureFormat {
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Bgra8Unorm,
    Bgra8UnormSrgb,
    /// Single channel, e.g. glyph coverage. Sample-only.
    R8Unorm,
    Rgba16Float,
}

impl TextureFormat {
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            Self::R8Unorm => 1,
            Self::Rgba8Unorm | Self::Rgba8UnormSrgb | Self::Bgra8Unorm | Self::Bgra8UnormSrgb => 4,
            Self::Rgba16Float => 8,
        }
    }

    pub fn is_renderable(self) -> bool {
        !matches!(self, Self::R8Unorm)
    }

    pub fn is_srgb(self) -> bool {
        matches!(self, Self::Rgba8UnormSrgb | Self::Bgra8UnormSrgb)
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    pub mip_levels: u32,
    pub format: TextureFormat,
    pub has_alpha: bool,
    /// Rows are stored bottom-up.
    pub inverted: bool,
}

impl TextureDesc {
    pub fn new(width: u32, height: u32, format: TextureFormat) -> Self {
        Self {
            width,
            height,
            mip_levels: 1,
            format,
            has_alpha: true,
            inverted: false,
        }
    }

    pub fn with_mip_levels(mut self, levels: u32) -> Self {
        self.mip_levels = levels;
        self
    }

    /// Dimensions of mip `level`.
    pub fn level_size(&self, level: u32) -> (u32, u32) {
        ((self.width >> level).max(1), (self.height >> level).max(1))
    }

    pub fn level_bytes(&self, level: u32) -> usize {
        let (w, h) = self.level_size(level);
        w as usize * h as usize * self.format.bytes_per_pixel() as usize
    }

    fn validate(&self, caps: &Capabilities) -> Result<(), ResourceError> {
        let (width, height) = (self.width, self.height);
        if width == 0 || height == 0 {
            return Err(ResourceError::ZeroSize { width, height });
        }
        if width > caps.max_texture_size || height > caps.max_texture_size {
            return Err(ResourceError::TooLarge {
                width,
                height,
                max: caps.max_texture_size,
            });
        }
        let max = u32::BITS - width.max(height).leading_zeros();
        if self.mip_levels == 0 || self.mip_levels > max {
            return Err(ResourceError::InvalidMipCount {
                levels: self.mip_levels,
                max,
                width,
                height,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct RenderTargetDesc {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub samples: u32,
    pub depth_stencil: bool,
}

impl RenderTargetDesc {
    pub fn new(width: u32, height: u32, format: TextureFormat) -> Self {
        Self {
            width,
            height,
            format,
            samples: 1,
            depth_stencil: false,
        }
    }

    pub fn with_samples(mut self, samples: u32) -> Self {
        self.samples = samples;
        self
    }

    pub fn with_depth_stencil(mut self, on: bool) -> Self {
        self.depth_stencil = on;
        self
    }

    pub fn info(&self) -> TargetInfo {
        TargetInfo {
            format: self.format,
            samples: self.samples,
            depth_stencil: self.depth_stencil,
        }
    }
}

/// Synchronization state of a texture as last recorded.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Hash)]
pub enum TextureState {
    #[default]
    Undefined,
    TransferDst,
    ShaderRead,
    RenderTarget,
    ResolveDst,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Origin {
    Owned,
    Wrapped,
    Target(RenderTargetId),
}

pub(crate) struct TextureRecord<B: Backend> {
    pub(crate) texture: B::Texture,
    view: Option<B::TextureView>,
    view_format: TextureFormat,
    pub(crate) state: TextureState,
    pub(crate) desc: TextureDesc,
    origin: Origin,
}

pub(crate) struct Attachment<B: Backend> {
    pub(crate) texture: B::Texture,
    pub(crate) view: B::TextureView,
}

pub(crate) struct RenderTargetRecord<B: Backend> {
    pub(crate) desc: RenderTargetDesc,
    pub(crate) color: TextureId,
    pub(crate) msaa: Option<Attachment<B>>,
    pub(crate) depth_stencil: Option<Attachment<B>>,
    drawn: Vec<PixelRect>,
}

impl<B: Backend> RenderTargetRecord<B> {
    pub(crate) fn bounds(&self) -> PixelRect {
        PixelRect::full(self.desc.width, self.desc.height)
    }

    /// Records that `rect` was drawn into since the last resolve.
    pub(crate) fn mark_drawn(&mut self, rect: PixelRect) {
        let Some(rect) = rect.clamp_to(self.desc.width, self.desc.height) else {
            return;
        };
        if self.drawn.iter().any(|r| r.contains_rect(rect)) {
            return;
        }
        self.drawn.retain(|r| !rect.contains_rect(*r));
        self.drawn.push(rect);
    }

    pub(crate) fn take_drawn(&mut self) -> Vec<PixelRect> {
        std::mem::take(&mut self.drawn)
    }
}

/// GPU objects handed back on release, destroyed once the GPU is done.
pub struct ReleasedTexture<B: Backend> {
    pub texture: B::Texture,
    pub view: Option<B::TextureView>,
}

#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct TransitionStats {
    pub emitted: u64,
    pub skipped: u64,
}

pub struct TextureManager<B: Backend> {
    textures: SlotMap<TextureId, TextureRecord<B>>,
    targets: SlotMap<RenderTargetId, RenderTargetRecord<B>>,
    stats: TransitionStats,
}

impl<B: Backend> Default for TextureManager<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend> TextureManager<B> {
    pub fn new() -> Self {
        Self {
            textures: SlotMap::with_key(),
            targets: SlotMap::with_key(),
            stats: TransitionStats::default(),
        }
    }

    pub fn stats(&self) -> TransitionStats {
        self.stats
    }

    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    // ── creation ──────────────────────────────────────────────────────────

    /// Creates a sampled texture. `initial` must hold every mip level or be `None`.
    pub fn create_texture(
        &mut self,
        backend: &mut B,
        caps: &Capabilities,
        desc: TextureDesc,
        initial: Option<&[&[u8]]>,
    ) -> Result<TextureId, ResourceError> {
        desc.validate(caps)?;
        if let Some(levels) = initial {
            if levels.len() != desc.mip_levels as usize {
                return Err(ResourceError::MissingMipData {
                    supplied: levels.len(),
                    levels: desc.mip_levels,
                });
            }
            for (level, data) in levels.iter().enumerate() {
                let expected = desc.level_bytes(level as u32);
                if data.len() != expected {
                    return Err(ResourceError::InitialDataSize {
                        level: level as u32,
                        expected,
                        actual: data.len(),
                    });
                }
            }
        }

        let texture = backend.create_texture(&desc, TextureUsage::Sampled)?;
        let view = backend.create_view(&texture, desc.format);

        let mut state = TextureState::Undefined;
        if let Some(levels) = initial {
            for (level, data) in levels.iter().enumerate() {
                let level = level as u32;
                let (w, h) = desc.level_size(level);
                let row = w * desc.format.bytes_per_pixel();
                backend.write_texture(&texture, level, PixelRect::full(w, h), data, row);
            }
            state = TextureState::ShaderRead;
        }

        let id = self.textures.insert(TextureRecord {
            texture,
            view: Some(view),
            view_format: desc.format,
            state,
            desc,
            origin: Origin::Owned,
        });
        log::debug!("created texture {id:?} {}x{} {:?}", desc.width, desc.height, desc.format);
        Ok(id)
    }

    /// Adopts an externally created texture currently in `state`.
    pub fn wrap_texture(&mut self, texture: B::Texture, desc: TextureDesc, state: TextureState) -> TextureId {
        self.textures.insert(TextureRecord {
            texture,
            view: None,
            view_format: desc.format,
            state,
            desc,
            origin: Origin::Wrapped,
        })
    }

    /// Changes the view format of a wrapped texture that has not been used yet.
    pub fn reinterpret(&mut self, id: TextureId, format: TextureFormat) -> bool {
        match self.textures.get_mut(id) {
            Some(record) if record.view.is_none() => {
                record.view_format = format;
                true
            }
            _ => false,
        }
    }

    pub fn create_render_target(
        &mut self,
        backend: &mut B,
        caps: &Capabilities,
        desc: RenderTargetDesc,
    ) -> Result<RenderTargetId, ResourceError> {
        let color_desc = TextureDesc::new(desc.width, desc.height, desc.format);
        color_desc.validate(caps)?;
        if !desc.format.is_renderable() {
            return Err(ResourceError::UnsupportedFormat(desc.format));
        }
        if !desc.samples.is_power_of_two() || desc.samples > caps.max_samples {
            return Err(ResourceError::UnsupportedSampleCount(desc.samples));
        }

        let color = backend.create_texture(&color_desc, TextureUsage::ColorTarget)?;
        let color_view = backend.create_view(&color, desc.format);

        let msaa = if desc.samples > 1 {
            let texture = backend.create_texture(
                &color_desc,
                TextureUsage::MultisampleColor { samples: desc.samples },
            )?;
            let view = backend.create_view(&texture, desc.format);
            Some(Attachment { texture, view })
        } else {
            None
        };

        let depth_stencil = if desc.depth_stencil {
            let texture = backend.create_texture(
                &color_desc,
                TextureUsage::DepthStencil { samples: desc.samples },
            )?;
            let view = backend.create_view(&texture, desc.format);
            Some(Attachment { texture, view })
        } else {
            None
        };

        let textures = &mut self.textures;
        let id = self.targets.insert_with_key(|target| {
            let color = textures.insert(TextureRecord {
                texture: color,
                view: Some(color_view),
                view_format: desc.format,
                state: TextureState::Undefined,
                desc: color_desc,
                origin: Origin::Target(target),
            });
            RenderTargetRecord {
                desc,
                color,
                msaa,
                depth_stencil,
                drawn: Vec::new(),
            }
        });
        log::debug!(
            "created render target {id:?} {}x{} {:?} x{}{}",
            desc.width,
            desc.height,
            desc.format,
            desc.samples,
            if desc.depth_stencil { " +stencil" } else { "" }
        );
        Ok(id)
    }

    // ── queries ───────────────────────────────────────────────────────────

    pub fn contains(&self, id: TextureId) -> bool {
        self.textures.contains_key(id)
    }

    pub fn desc(&self, id: TextureId) -> Option<TextureDesc> {
        self.textures.get(id).map(|r| r.desc)
    }

    pub fn state(&self, id: TextureId) -> Option<TextureState> {
        self.textures.get(id).map(|r| r.state)
    }

    pub fn has_view(&self, id: TextureId) -> bool {
        self.textures.get(id).is_some_and(|r| r.view.is_some())
    }

    pub(crate) fn record(&self, id: TextureId) -> Option<&TextureRecord<B>> {
        self.textures.get(id)
    }

    /// Sampled texture backing a render target.
    pub fn target_texture(&self, id: RenderTargetId) -> Option<TextureId> {
        self.targets.get(id).map(|t| t.color)
    }

    pub fn target_desc(&self, id: RenderTargetId) -> Option<RenderTargetDesc> {
        self.targets.get(id).map(|t| t.desc)
    }

    pub(crate) fn target(&self, id: RenderTargetId) -> Option<&RenderTargetRecord<B>> {
        self.targets.get(id)
    }

    pub(crate) fn target_mut(&mut self, id: RenderTargetId) -> Option<&mut RenderTargetRecord<B>> {
        self.targets.get_mut(id)
    }

    // ── state ─────────────────────────────────────────────────────────────

    /// Moves `id` into `required`, emitting a barrier only if the state differs.
    /// Returns whether a barrier was emitted.
    pub fn transition(&mut self, backend: &mut B, id: TextureId, required: TextureState) -> bool {
        let Some(record) = self.textures.get_mut(id) else {
            return false;
        };
        if record.state == required {
            self.stats.skipped += 1;
            return false;
        }
        backend.transition(&record.texture, record.state, required);
        log::trace!("texture {id:?}: {:?} -> {:?}", record.state, required);
        record.state = required;
        self.stats.emitted += 1;
        true
    }

    /// Records a state reached without a barrier, e.g. after an immediate upload.
    pub(crate) fn assume_state(&mut self, id: TextureId, state: TextureState) {
        if let Some(record) = self.textures.get_mut(id) {
            record.state = state;
        }
    }

    /// Whether sampling `id` would need a barrier.
    pub fn needs_transition(&self, id: TextureId, required: TextureState) -> bool {
        self.textures.get(id).is_some_and(|r| r.state != required)
    }

    /// Sampling view, created on first use for wrapped textures.
    pub fn view(&mut self, backend: &mut B, id: TextureId) -> Option<&B::TextureView> {
        let record = self.textures.get_mut(id)?;
        if record.view.is_none() {
            log::debug!("creating deferred view for {id:?} as {:?}", record.view_format);
        }
        let format = record.view_format;
        let texture = &record.texture;
        Some(record.view.get_or_insert_with(|| backend.create_view(texture, format)))
    }

    /// Ensures the sampling view exists.
    pub fn ensure_view(&mut self, backend: &mut B, id: TextureId) -> bool {
        self.view(backend, id).is_some()
    }

    /// Sampling view if already created.
    pub(crate) fn existing_view(&self, id: TextureId) -> Option<&B::TextureView> {
        self.textures.get(id).and_then(|r| r.view.as_ref())
    }

    // ── release ───────────────────────────────────────────────────────────

    /// Removes a texture. Render-target textures go with their target.
    pub fn release_texture(&mut self, id: TextureId) -> Option<ReleasedTexture<B>> {
        if let Some(record) = self.textures.get(id)
            && let Origin::Target(target) = record.origin
        {
            log::warn!("texture {id:?} belongs to render target {target:?}; release the target instead");
            return None;
        }
        let record = self.textures.remove(id)?;
        Some(ReleasedTexture {
            texture: record.texture,
            view: record.view,
        })
    }

    /// Removes a render target and every texture it owns.
    pub fn release_render_target(&mut self, id: RenderTargetId) -> Vec<ReleasedTexture<B>> {
        let Some(target) = self.targets.remove(id) else {
            return Vec::new();
        };
        let mut released = Vec::with_capacity(3);
        if let Some(record) = self.textures.remove(target.color) {
            released.push(ReleasedTexture {
                texture: record.texture,
                view: record.view,
            });
        }
        for attachment in [target.msaa, target.depth_stencil].into_iter().flatten() {
            released.push(ReleasedTexture {
                texture: attachment.texture,
                view: Some(attachment.view),
            });
        }
        released
    }

    /// Removes everything, for shutdown.
    pub fn release_all(&mut self) -> Vec<ReleasedTexture<B>> {
        let targets: Vec<_> = self.targets.keys().collect();
        let mut released: Vec<_> = targets
            .into_iter()
            .flat_map(|id| self.release_render_target(id))
            .collect();
        released.extend(self.textures.drain().map(|(_, r)| ReleasedTexture {
            texture: r.texture,
            view: r.view,
        }));
        released
    }
}
