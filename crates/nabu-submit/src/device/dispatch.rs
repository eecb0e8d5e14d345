//! Per-batch dispatch: check, resolve pipeline, write dynamic data, bind, draw.

use super::{Phase, RenderDevice};
use crate::backend::{Backend, DescriptorWrites};
use crate::batch::{Batch, DrawOutcome, MAX_TEXTURE_SLOTS, MAX_UNIFORM_BLOCKS, SkipReason, UniformBlock, UniformSlot};
use crate::binding::UniformUpload;
use crate::descriptor::DescriptorContents;
use crate::pipeline::{PipelineSignature, TargetInfo};
use crate::rect::PixelRect;
use crate::ring::BufferKind;
use crate::texture::{RenderTargetId, TextureState};

/// What a batch needs, worked out before anything is recorded.
struct Plan {
    target: RenderTargetId,
    info: TargetInfo,
    uniform_sizes: [u32; MAX_UNIFORM_BLOCKS],
    textures: [bool; MAX_TEXTURE_SLOTS],
    scissor: PixelRect,
}

type Uploads = [Option<UniformUpload>; MAX_UNIFORM_BLOCKS];

impl<B: Backend> RenderDevice<B> {
    /// Records one draw into the current render target.
    ///
    /// A batch that does not supply what its shader samples or reads is
    /// skipped and the reason returned; nothing is recorded for it.
    ///
    /// # Panics
    /// Outside a recording session, without a render target or mapped
    /// geometry, and when the batch's render state is invalid for the target.
    pub fn draw_batch(&mut self, batch: &Batch<'_>) -> DrawOutcome {
        assert_eq!(self.phase, Phase::Recording, "draw_batch called outside a recording session");
        let Some(target) = self.target else {
            panic!("draw_batch called without a render target");
        };

        match self.plan(target, batch) {
            Ok(plan) => {
                self.issue(&plan, batch);
                self.stats.draws += 1;
                DrawOutcome::Drawn
            }
            Err(reason) => {
                log::trace!("skipped batch for {:?}: {reason:?}", batch.shader);
                self.stats.skipped += 1;
                DrawOutcome::Skipped(reason)
            }
        }
    }

    fn plan(&self, target: RenderTargetId, batch: &Batch<'_>) -> Result<Plan, SkipReason> {
        if batch.index_count == 0 {
            return Err(SkipReason::EmptyRange);
        }
        let shader = self.shaders.get(batch.shader).ok_or(SkipReason::UnknownShader)?;
        let layout = &shader.layout;
        let Some(record) = self.resources.target(target) else {
            panic!("render target {target:?} vanished while recording");
        };

        // Sampling the attachment being drawn is only possible without MSAA.
        let attached = (record.desc.samples == 1).then_some(record.color);
        let mut textures = [false; MAX_TEXTURE_SLOTS];
        for (slot, used) in textures.iter_mut().enumerate() {
            if !layout.uses_texture(slot) {
                continue;
            }
            let binding = batch.textures[slot].ok_or(SkipReason::MissingTexture { slot })?;
            if !self.resources.contains(binding.texture) {
                return Err(SkipReason::StaleTexture { slot });
            }
            if attached == Some(binding.texture) {
                return Err(SkipReason::TargetFeedback { slot });
            }
            *used = true;
        }
        for slot in UniformSlot::ALL {
            if layout.uses_uniform(slot) && batch.uniforms[slot.index()].is_none() {
                return Err(SkipReason::MissingUniform { slot });
            }
        }

        let clip = match self.tile {
            Some(tile) => record.bounds().intersect(tile),
            None => Some(record.bounds()),
        };
        let scissor = if batch.state.scissor() {
            clip.and_then(|c| c.intersect(batch.scissor))
        } else {
            clip
        };
        let scissor = scissor.ok_or(SkipReason::EmptyRange)?;

        Ok(Plan {
            target,
            info: record.desc.info(),
            uniform_sizes: layout.uniform_sizes,
            textures,
            scissor,
        })
    }

    fn issue(&mut self, plan: &Plan, batch: &Batch<'_>) {
        let (Some(vertex_page), Some(index_page)) = (self.vertex_page, self.index_page) else {
            panic!("draw_batch called before map_vertices/map_indices in this frame");
        };

        let signature = PipelineSignature::new(batch.shader, batch.state, plan.info);
        let backend = &mut self.backend;
        let (pipeline_id, pipeline) = match self.pipelines.get_or_create(
            signature,
            &self.shaders,
            &self.caps,
            |desc, parent| backend.build_pipeline(desc, parent),
        ) {
            Ok(resolved) => resolved,
            Err(err) => panic!("cannot draw with {:?}: {err}", batch.shader),
        };

        // Barriers and object creation cannot happen inside a pass.
        for (slot, used) in plan.textures.iter().enumerate() {
            let (true, Some(binding)) = (*used, batch.textures[slot]) else {
                continue;
            };
            if self.resources.needs_transition(binding.texture, TextureState::ShaderRead) {
                self.suspend_pass();
                self.resources
                    .transition(&mut self.backend, binding.texture, TextureState::ShaderRead);
            }
            self.resources.ensure_view(&mut self.backend, binding.texture);
            let backend = &mut self.backend;
            self.samplers
                .ensure(binding.sampler, |key| backend.create_sampler(key));
        }

        let mut uploads: Uploads = [None; MAX_UNIFORM_BLOCKS];
        for slot in UniformSlot::ALL {
            let size = plan.uniform_sizes[slot.index()];
            if let (true, Some(block)) = (size != 0, &batch.uniforms[slot.index()]) {
                uploads[slot.index()] = Some(self.upload_uniform(slot, block, size));
            }
        }

        self.ensure_pass(plan.target);

        if self.state.set_pipeline(pipeline_id) {
            self.backend.bind_pipeline(&pipeline);
        }
        if self.caps.explicit_descriptors {
            self.bind_descriptors(plan, batch, &pipeline, &uploads);
        } else {
            self.bind_slots(plan, batch, &uploads);
        }
        if self.state.set_vertex_page(vertex_page)
            && let Some(page) = self.rings.vertex.page(vertex_page)
        {
            self.backend.bind_vertex_page(page);
        }
        if self.state.set_index_page(index_page)
            && let Some(page) = self.rings.index.page(index_page)
        {
            self.backend.bind_index_page(page);
        }
        if batch.state.stencil().is_enabled() && self.state.set_stencil_ref(batch.stencil_ref) {
            self.backend.set_stencil_reference(batch.stencil_ref);
        }
        if self.state.set_scissor(plan.scissor) {
            self.backend.set_scissor(plan.scissor);
        }

        self.backend
            .draw_indexed(batch.first_index, batch.index_count, batch.base_vertex);

        if let Some(target) = self.resources.target_mut(plan.target) {
            let drawn = self.tile.unwrap_or(target.bounds());
            target.mark_drawn(drawn);
        }
    }

    /// Writes a uniform block unless the same content is already in the ring
    /// this frame. Short blocks are zero-padded to the shader's size.
    fn upload_uniform(&mut self, slot: UniformSlot, block: &UniformBlock<'_>, size: u32) -> UniformUpload {
        if let Some(upload) = self.uploads.lookup(slot, block, size) {
            return upload;
        }

        let backend = &mut self.backend;
        let span = self.rings.uniform[slot.index()].map(u64::from(size), &self.fence, |id, page_size| {
            backend.create_page(BufferKind::Uniform(slot), id, page_size)
        });
        let len = block.data.len().min(size as usize);
        span.bytes[..len].copy_from_slice(&block.data[..len]);
        span.bytes[len..].fill(0);

        let upload = UniformUpload {
            hash: block.hash,
            page: span.page,
            offset: span.offset,
            size,
        };
        self.uploads.record(slot, upload, block.data);
        upload
    }

    fn bind_descriptors(&mut self, plan: &Plan, batch: &Batch<'_>, pipeline: &B::Pipeline, uploads: &Uploads) {
        let mut contents = DescriptorContents::default();
        let mut offsets = [0u32; MAX_UNIFORM_BLOCKS];
        let mut dynamic = [0u32; MAX_UNIFORM_BLOCKS];
        let mut dynamic_len = 0;
        for (slot, upload) in uploads.iter().enumerate() {
            if let Some(upload) = upload {
                contents.uniforms[slot] = Some((upload.page, upload.size));
                offsets[slot] = upload.offset as u32;
                dynamic[dynamic_len] = upload.offset as u32;
                dynamic_len += 1;
            }
        }
        for (slot, used) in plan.textures.iter().enumerate() {
            if let (true, Some(binding)) = (*used, batch.textures[slot]) {
                contents.textures[slot] = Some((binding.texture, binding.sampler));
            }
        }

        let key = contents.key(batch.shader);
        if !self.state.set_descriptor_set(key, offsets) {
            return;
        }

        let mut writes = DescriptorWrites::<B>::default();
        for (slot, entry) in contents.uniforms.iter().enumerate() {
            if let Some((page, size)) = *entry {
                writes.uniforms[slot] = self.rings.uniform[slot].page(page).map(|p| (p, size));
            }
        }
        for (slot, entry) in contents.textures.iter().enumerate() {
            if let Some((texture, sampler)) = *entry {
                writes.textures[slot] = self
                    .resources
                    .existing_view(texture)
                    .zip(self.samplers.get(sampler));
            }
        }

        let set = self
            .descriptors
            .get_or_allocate(&mut self.backend, &self.fence, key, |backend, pool| {
                backend.allocate_descriptor_set(pool, pipeline, &writes)
            });
        self.backend
            .bind_descriptor_set(set, &dynamic[..dynamic_len]);
    }

    fn bind_slots(&mut self, plan: &Plan, batch: &Batch<'_>, uploads: &Uploads) {
        for slot in UniformSlot::ALL {
            let Some(upload) = uploads[slot.index()] else {
                continue;
            };
            if self.state.set_uniform(slot, upload.page, upload.offset)
                && let Some(page) = self.rings.uniform[slot.index()].page(upload.page)
            {
                self.backend
                    .bind_uniform(slot, page, upload.offset, upload.size);
            }
        }
        for (slot, used) in plan.textures.iter().enumerate() {
            let (true, Some(binding)) = (*used, batch.textures[slot]) else {
                continue;
            };
            if self.state.set_texture(slot, binding.texture, binding.sampler)
                && let (Some(view), Some(sampler)) = (
                    self.resources.existing_view(binding.texture),
                    self.samplers.get(binding.sampler),
                )
            {
                self.backend.bind_texture(slot, view, sampler);
            }
        }
    }
}
