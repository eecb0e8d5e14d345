//! wgpu implementation of the submission [`Backend`].
//!
//! - ring pages are buffers with a CPU shadow, uploaded at flush
//! - descriptor sets are bind groups; pools only track capacity
//! - one command encoder per frame, passes recorded with erased lifetimes
//!
//! wgpu tracks resource usage itself, so recorded transitions are bookkeeping
//! only and pipelines are not tied to render-pass objects.

mod convert;
mod layout;
mod page;
mod resolve;

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use nabu_submit::batch::MAX_TEXTURE_SLOTS;
use nabu_submit::{
    Backend, BufferKind, Capabilities, DescriptorWrites, FenceSignal, LoadAction, PageId, PassDesc,
    PipelineDesc, PixelRect, ResourceError, SamplerKey, ShaderId, ShaderLayout, SubmissionSerial,
    TextureDesc, TextureFormat, TextureState, TextureUsage, UniformSlot,
};

pub use layout::WgpuPipeline;
pub use page::WgpuPage;

use convert::DEPTH_STENCIL_FORMAT;
use layout::ShaderResources;
use resolve::ResolvePass;

/// Sample counts every WebGPU implementation supports for render targets.
const SUPPORTED_SAMPLES: [u32; 2] = [1, 4];

/// Bind groups are independent objects in wgpu; a pool is a capacity budget
/// the engine rotates through like any other descriptor pool.
#[derive(Debug)]
pub struct DescriptorBudget {
    capacity: u32,
    allocated: u32,
}

pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    caps: Capabilities,
    max_texture_size: u32,
    /// Whether textures may be viewed in their sRGB counterpart format.
    reinterpret_views: bool,

    shaders: HashMap<ShaderId, ShaderResources>,
    resolve: Option<ResolvePass>,

    encoder: Option<wgpu::CommandEncoder>,
    pass: Option<wgpu::RenderPass<'static>>,
}

impl WgpuBackend {
    /// `downlevel` comes from the adapter the device was requested from.
    pub fn new(device: wgpu::Device, queue: wgpu::Queue, downlevel: wgpu::DownlevelFlags) -> Self {
        let limits = device.limits();
        let caps = Capabilities {
            pipeline_derivation: false,
            explicit_descriptors: true,
            render_pass_objects: false,
            wireframe: device.features().contains(wgpu::Features::POLYGON_MODE_LINE),
            uniform_alignment: limits.min_uniform_buffer_offset_alignment as u64,
            staging_row_alignment: wgpu::COPY_BYTES_PER_ROW_ALIGNMENT,
            max_texture_size: limits.max_texture_dimension_2d,
            max_samples: 4,
        };
        log::debug!("wgpu backend capabilities: {caps:?}");

        Self {
            device,
            queue,
            caps,
            max_texture_size: limits.max_texture_dimension_2d,
            reinterpret_views: downlevel.contains(wgpu::DownlevelFlags::VIEW_FORMATS),
            shaders: HashMap::new(),
            resolve: None,
            encoder: None,
            pass: None,
        }
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    #[track_caller]
    fn encoder(&mut self) -> &mut wgpu::CommandEncoder {
        match self.encoder.as_mut() {
            Some(encoder) => encoder,
            None => panic!("command recorded outside a frame"),
        }
    }

    #[track_caller]
    fn pass(&mut self) -> &mut wgpu::RenderPass<'static> {
        match self.pass.as_mut() {
            Some(pass) => pass,
            None => panic!("draw state recorded outside a render pass"),
        }
    }
}

/// Checks a texture request against device limits before touching wgpu.
fn validate_texture(desc: &TextureDesc, samples: u32, max: u32) -> Result<(), ResourceError> {
    if desc.width == 0 || desc.height == 0 {
        return Err(ResourceError::ZeroSize {
            width: desc.width,
            height: desc.height,
        });
    }
    if desc.width > max || desc.height > max {
        return Err(ResourceError::TooLarge {
            width: desc.width,
            height: desc.height,
            max,
        });
    }
    if !SUPPORTED_SAMPLES.contains(&samples) {
        return Err(ResourceError::UnsupportedSampleCount(samples));
    }
    Ok(())
}

/// The sRGB counterpart a texture may also be viewed as.
///
/// Declaring it needs `VIEW_FORMATS`; without it textures keep one format.
fn srgb_alternate(format: wgpu::TextureFormat, reinterpret: bool) -> Option<wgpu::TextureFormat> {
    if !reinterpret {
        return None;
    }
    let alternate = if format.is_srgb() {
        format.remove_srgb_suffix()
    } else {
        format.add_srgb_suffix()
    };
    (alternate != format).then_some(alternate)
}

/// Format for a view of a texture stored as `own`, or `None` for its own format.
fn view_format(own: wgpu::TextureFormat, requested: wgpu::TextureFormat, reinterpret: bool) -> Option<wgpu::TextureFormat> {
    // Depth attachments keep their own format regardless of the color format passed in.
    if own == DEPTH_STENCIL_FORMAT || own == requested {
        return None;
    }
    if srgb_alternate(own, reinterpret) == Some(requested) {
        return Some(requested);
    }
    log::warn!("cannot view a {own:?} texture as {requested:?}; keeping {own:?}");
    None
}

fn clear_color(c: [f32; 4]) -> wgpu::Color {
    wgpu::Color {
        r: c[0] as f64,
        g: c[1] as f64,
        b: c[2] as f64,
        a: c[3] as f64,
    }
}

impl Backend for WgpuBackend {
    type Page = WgpuPage;
    type Pipeline = WgpuPipeline;
    type DescriptorPool = DescriptorBudget;
    type DescriptorSet = wgpu::BindGroup;
    type Sampler = wgpu::Sampler;
    type Texture = wgpu::Texture;
    type TextureView = wgpu::TextureView;

    fn capabilities(&self) -> Capabilities {
        self.caps
    }

    // ── memory ────────────────────────────────────────────────────────────

    fn create_page(&mut self, kind: BufferKind, id: PageId, size: u64) -> WgpuPage {
        WgpuPage::new(&self.device, kind, id, size)
    }

    fn flush_page(&mut self, page: &mut WgpuPage) {
        page.flush(&self.queue);
    }

    // ── resources ─────────────────────────────────────────────────────────

    fn create_texture(&mut self, desc: &TextureDesc, usage: TextureUsage) -> Result<wgpu::Texture, ResourceError> {
        let (usages, samples) = convert::texture_usage(usage);
        validate_texture(desc, samples, self.max_texture_size)?;

        let format = match usage {
            TextureUsage::DepthStencil { .. } => DEPTH_STENCIL_FORMAT,
            _ => convert::texture_format(desc.format),
        };
        // Allows reinterpreting wrapped textures across the sRGB boundary.
        let alternate = srgb_alternate(format, self.reinterpret_views);

        Ok(self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("nabu texture"),
            size: wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: if samples > 1 { 1 } else { desc.mip_levels },
            sample_count: samples,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: usages,
            view_formats: alternate.as_slice(),
        }))
    }

    fn create_view(&mut self, texture: &wgpu::Texture, format: TextureFormat) -> wgpu::TextureView {
        let format = view_format(texture.format(), convert::texture_format(format), self.reinterpret_views);
        texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some("nabu texture view"),
            format,
            ..Default::default()
        })
    }

    fn write_texture(&mut self, texture: &wgpu::Texture, level: u32, rect: PixelRect, data: &[u8], bytes_per_row: u32) {
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture,
                mip_level: level,
                origin: convert::origin(rect),
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(bytes_per_row),
                rows_per_image: Some(rect.height),
            },
            convert::extent(rect),
        );
    }

    fn create_sampler(&mut self, key: SamplerKey) -> wgpu::Sampler {
        self.device.create_sampler(&convert::sampler_descriptor(key))
    }

    fn build_pipeline(
        &mut self,
        desc: &PipelineDesc<'_>,
        _parent: Option<&WgpuPipeline>,
    ) -> Result<WgpuPipeline, ResourceError> {
        let resources = match self.shaders.entry(desc.signature.shader) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => e.insert(ShaderResources::new(&self.device, desc.shader)?),
        };
        Ok(resources.build(&self.device, desc))
    }

    fn release_shader(&mut self, shader: ShaderId) {
        // Pipelines keep their own references to the module and layouts.
        if self.shaders.remove(&shader).is_some() {
            log::debug!("released shader resources for {shader:?}");
        }
    }

    // ── descriptors ───────────────────────────────────────────────────────

    fn create_descriptor_pool(&mut self, capacity: u32) -> DescriptorBudget {
        DescriptorBudget { capacity, allocated: 0 }
    }

    fn reset_descriptor_pool(&mut self, pool: &mut DescriptorBudget) {
        pool.allocated = 0;
    }

    fn allocate_descriptor_set(
        &mut self,
        pool: &mut DescriptorBudget,
        pipeline: &WgpuPipeline,
        writes: &DescriptorWrites<'_, Self>,
    ) -> wgpu::BindGroup {
        debug_assert!(pool.allocated < pool.capacity, "descriptor budget overrun");
        pool.allocated += 1;

        let mut entries = Vec::with_capacity(UniformSlot::ALL.len() + 2 * MAX_TEXTURE_SLOTS);
        for slot in UniformSlot::ALL {
            if let Some((page, size)) = writes.uniforms[slot.index()] {
                entries.push(wgpu::BindGroupEntry {
                    binding: ShaderLayout::uniform_binding(slot),
                    resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer: &page.buffer,
                        offset: 0,
                        size: wgpu::BufferSize::new(size as u64),
                    }),
                });
            }
        }
        for (slot, bound) in writes.textures.iter().enumerate() {
            if let Some((view, sampler)) = *bound {
                entries.push(wgpu::BindGroupEntry {
                    binding: ShaderLayout::texture_binding(slot),
                    resource: wgpu::BindingResource::TextureView(view),
                });
                entries.push(wgpu::BindGroupEntry {
                    binding: ShaderLayout::sampler_binding(slot),
                    resource: wgpu::BindingResource::Sampler(sampler),
                });
            }
        }

        self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("nabu bind group"),
            layout: &pipeline.bind_group_layout,
            entries: &entries,
        })
    }

    // ── recording ─────────────────────────────────────────────────────────

    fn begin_frame(&mut self) {
        debug_assert!(self.encoder.is_none(), "previous frame was never submitted");
        self.encoder = Some(self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("nabu frame encoder"),
        }));
    }

    fn begin_pass(&mut self, pass: &PassDesc<'_, Self>) {
        debug_assert!(self.pass.is_none(), "render pass already open");
        let (color_load, depth_load, stencil_load) = match pass.load {
            LoadAction::Load => (wgpu::LoadOp::Load, wgpu::LoadOp::Load, wgpu::LoadOp::Load),
            LoadAction::Clear(c) => (
                wgpu::LoadOp::Clear(clear_color(c)),
                wgpu::LoadOp::Clear(1.0),
                wgpu::LoadOp::Clear(0),
            ),
        };

        let depth_stencil_attachment = pass.depth_stencil.map(|view| wgpu::RenderPassDepthStencilAttachment {
            view,
            depth_ops: Some(wgpu::Operations {
                load: depth_load,
                store: wgpu::StoreOp::Store,
            }),
            stencil_ops: Some(wgpu::Operations {
                load: stencil_load,
                store: wgpu::StoreOp::Store,
            }),
        });

        let rpass = self
            .encoder()
            .begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("nabu pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: pass.color,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: color_load,
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment,
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            })
            .forget_lifetime();
        self.pass = Some(rpass);
    }

    fn end_pass(&mut self) {
        // Dropping the pass ends it and unlocks the encoder.
        self.pass = None;
    }

    fn transition(&mut self, _texture: &wgpu::Texture, from: TextureState, to: TextureState) {
        log::trace!("transition {from:?} -> {to:?}");
    }

    fn copy_to_texture(
        &mut self,
        page: &WgpuPage,
        offset: u64,
        bytes_per_row: u32,
        texture: &wgpu::Texture,
        level: u32,
        rect: PixelRect,
    ) {
        debug_assert!(self.pass.is_none(), "copy recorded inside a render pass");
        self.encoder().copy_buffer_to_texture(
            wgpu::TexelCopyBufferInfo {
                buffer: &page.buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset,
                    bytes_per_row: Some(bytes_per_row),
                    rows_per_image: Some(rect.height),
                },
            },
            wgpu::TexelCopyTextureInfo {
                texture,
                mip_level: level,
                origin: convert::origin(rect),
                aspect: wgpu::TextureAspect::All,
            },
            convert::extent(rect),
        );
    }

    fn bind_pipeline(&mut self, pipeline: &WgpuPipeline) {
        self.pass().set_pipeline(&pipeline.pipeline);
    }

    fn bind_vertex_page(&mut self, page: &WgpuPage) {
        self.pass().set_vertex_buffer(0, page.buffer.slice(..));
    }

    fn bind_index_page(&mut self, page: &WgpuPage) {
        self.pass().set_index_buffer(page.buffer.slice(..), wgpu::IndexFormat::Uint16);
    }

    fn bind_descriptor_set(&mut self, set: &wgpu::BindGroup, dynamic_offsets: &[u32]) {
        self.pass().set_bind_group(0, set, dynamic_offsets);
    }

    fn bind_uniform(&mut self, _slot: UniformSlot, _page: &WgpuPage, _offset: u64, _size: u32) {
        unreachable!("wgpu binds uniforms through bind groups");
    }

    fn bind_texture(&mut self, _slot: usize, _view: &wgpu::TextureView, _sampler: &wgpu::Sampler) {
        unreachable!("wgpu binds textures through bind groups");
    }

    fn set_stencil_reference(&mut self, reference: u32) {
        self.pass().set_stencil_reference(reference);
    }

    fn set_scissor(&mut self, rect: PixelRect) {
        self.pass().set_scissor_rect(rect.x, rect.y, rect.width, rect.height);
    }

    fn draw_indexed(&mut self, first_index: u32, index_count: u32, base_vertex: u32) {
        self.pass()
            .draw_indexed(first_index..first_index + index_count, base_vertex as i32, 0..1);
    }

    fn resolve(
        &mut self,
        source: &wgpu::TextureView,
        destination: &wgpu::TextureView,
        format: TextureFormat,
        samples: u32,
        tiles: &[PixelRect],
    ) {
        debug_assert!(self.pass.is_none(), "resolve recorded inside a render pass");
        log::trace!("resolving {} tiles from {samples} samples", tiles.len());

        let device = &self.device;
        let resolve = self.resolve.get_or_insert_with(|| ResolvePass::new(device));
        let Some(encoder) = self.encoder.as_mut() else {
            panic!("resolve recorded outside a frame");
        };
        resolve.encode(device, encoder, source, destination, convert::texture_format(format), tiles);
    }

    fn submit(&mut self, serial: SubmissionSerial, signal: FenceSignal) {
        debug_assert!(self.pass.is_none(), "submitting with an open render pass");
        self.pass = None;

        let encoder = match self.encoder.take() {
            Some(encoder) => encoder,
            None => self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("nabu empty frame"),
            }),
        };
        self.queue.submit(std::iter::once(encoder.finish()));
        self.queue.on_submitted_work_done(move || signal.complete(serial));
        log::trace!("submitted frame {serial}");
    }

    fn poll(&mut self) {
        if let Err(err) = self.device.poll(wgpu::PollType::Poll) {
            log::warn!("device poll failed: {err}");
        }
    }

    fn wait_idle(&mut self) {
        let wait = wgpu::PollType::Wait {
            submission_index: None,
            timeout: None,
        };
        if let Err(err) = self.device.poll(wait) {
            log::warn!("waiting for the device failed: {err}");
        }
    }
}
