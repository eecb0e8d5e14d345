//! Frame, pass and upload sequencing.

use bytemuck::Pod;

use super::{PassState, Phase, RenderDevice};
use crate::backend::{Backend, LoadAction, PassDesc};
use crate::error::ResourceError;
use crate::fence::SubmissionSerial;
use crate::rect::PixelRect;
use crate::ring::{BufferKind, align_up};
use crate::texture::{RenderTargetId, TextureId, TextureState};

/// Writable region of a vertex or index page.
///
/// `first` is the element index of the region's start, ready to be used as
/// a batch's base vertex or first index. Draws read from the page of the
/// most recent map.
#[derive(Debug)]
pub struct MappedSpan<'a> {
    pub first: u32,
    pub bytes: &'a mut [u8],
}

impl<B: Backend> RenderDevice<B> {
    #[track_caller]
    pub(super) fn expect_frame(&self, op: &str) {
        assert!(self.phase != Phase::Idle, "{op} called outside begin_frame/end_frame");
    }

    // ── frame ─────────────────────────────────────────────────────────────

    /// Starts a recording session.
    ///
    /// Destroys released resources whose frames completed and forgets all
    /// bound state.
    pub fn begin_frame(&mut self) {
        assert_eq!(self.phase, Phase::Idle, "begin_frame called while a frame is being recorded");

        self.backend.poll();
        let destroyed = self.deferred.drain(&self.fence, false);
        if destroyed > 0 {
            log::trace!("destroyed {destroyed} deferred resources (safe {})", self.fence.safe());
        }

        self.backend.begin_frame();
        self.state.reset();
        self.uploads.reset();
        self.pass = PassState::None;
        self.target = None;
        self.tile = None;
        self.vertex_page = None;
        self.index_page = None;
        self.phase = Phase::Recording;
    }

    /// Flushes dynamic data, submits the frame and returns its serial.
    pub fn end_frame(&mut self) -> SubmissionSerial {
        self.expect_frame("end_frame");
        self.end_pass();
        self.target = None;
        self.tile = None;

        let backend = &mut self.backend;
        for ring in self.rings.iter_mut() {
            ring.for_each_written_mut(|page| backend.flush_page(page));
        }

        let serial = self.fence.current();
        self.backend.submit(serial, self.fence.signal());
        for ring in self.rings.iter_mut() {
            ring.end_frame(serial);
        }
        self.fence.advance();

        self.phase = Phase::Idle;
        self.stats.frames += 1;
        log::trace!("submitted frame {serial}");
        serial
    }

    // ── targets ───────────────────────────────────────────────────────────

    /// Directs subsequent draws at `id`. The pass begins with the first draw;
    /// a clear is performed even if nothing is drawn.
    ///
    /// # Panics
    /// When `id` is not a live render target.
    pub fn set_render_target(&mut self, id: RenderTargetId, load: LoadAction) {
        self.expect_frame("set_render_target");
        self.end_pass();

        let Some(target) = self.resources.target(id) else {
            panic!("set_render_target: {id:?} is not a live render target");
        };
        let (info, color) = (target.desc.info(), target.color);

        let retired = self.pipelines.observe_target(info, &self.caps);
        self.retire_pipelines(retired);

        if info.samples == 1 {
            self.resources
                .transition(&mut self.backend, color, TextureState::RenderTarget);
        }

        self.target = Some(id);
        self.tile = None;
        self.pass = PassState::Pending(load);
        self.phase = Phase::Recording;
    }

    #[inline]
    pub fn current_target(&self) -> Option<RenderTargetId> {
        self.target
    }

    /// Clips subsequent draws to `tile` and records it for the next resolve.
    pub fn begin_tile(&mut self, tile: PixelRect) {
        assert!(self.target.is_some(), "begin_tile called without a render target");
        self.tile = Some(tile);
    }

    pub fn end_tile(&mut self) {
        self.tile = None;
    }

    /// Resolves the drawn tiles of `id` into its sampled texture and leaves
    /// that texture ready for sampling.
    ///
    /// Resolving the current target ends its pass.
    pub fn resolve(&mut self, id: RenderTargetId) {
        self.expect_frame("resolve");
        if self.target == Some(id) {
            self.end_pass();
            self.target = None;
            self.tile = None;
            self.phase = Phase::Resolving;
        } else {
            self.suspend_pass();
        }

        let Some(target) = self.resources.target_mut(id) else {
            panic!("resolve: {id:?} is not a live render target");
        };
        let tiles = target.take_drawn();
        let (color, desc) = (target.color, target.desc);

        if desc.samples > 1 {
            if tiles.is_empty() {
                log::trace!("resolve of {id:?} skipped; nothing drawn");
            } else {
                self.resources
                    .transition(&mut self.backend, color, TextureState::ResolveDst);
                let msaa = self.resources.target(id).and_then(|t| t.msaa.as_ref());
                let dst = self.resources.existing_view(color);
                if let (Some(msaa), Some(dst)) = (msaa, dst) {
                    self.backend
                        .resolve(&msaa.view, dst, desc.format, desc.samples, &tiles);
                    self.stats.resolves += 1;
                }
            }
        }
        self.resources
            .transition(&mut self.backend, color, TextureState::ShaderRead);
    }

    // ── passes ────────────────────────────────────────────────────────────

    /// Ends an active pass so a command that is illegal inside one can be
    /// recorded. The next draw resumes it with `Load`.
    pub(super) fn suspend_pass(&mut self) {
        if self.pass == PassState::Active {
            self.backend.end_pass();
            self.pass = PassState::Pending(LoadAction::Load);
            self.stats.pass_breaks += 1;
        }
    }

    /// Closes the pass for the current target, running a pending clear.
    pub(super) fn end_pass(&mut self) {
        match (self.pass, self.target) {
            (PassState::Active, _) => self.backend.end_pass(),
            (PassState::Pending(LoadAction::Clear(_)), Some(id)) => {
                self.begin_pass(id);
                self.backend.end_pass();
            }
            _ => {}
        }
        self.pass = PassState::None;
    }

    pub(super) fn ensure_pass(&mut self, id: RenderTargetId) {
        if self.pass != PassState::Active {
            self.begin_pass(id);
        }
    }

    fn begin_pass(&mut self, id: RenderTargetId) {
        let load = match self.pass {
            PassState::Pending(load) => load,
            _ => LoadAction::Load,
        };
        let Some(target) = self.resources.target(id) else {
            panic!("render target {id:?} vanished while recording");
        };
        // An upload between passes may have moved the attachment away.
        if target.msaa.is_none() {
            let color = target.color;
            self.resources
                .transition(&mut self.backend, color, TextureState::RenderTarget);
        }
        let Some(target) = self.resources.target(id) else {
            panic!("render target {id:?} vanished while recording");
        };
        let color = match &target.msaa {
            Some(msaa) => Some(&msaa.view),
            None => self.resources.existing_view(target.color),
        };
        let Some(color) = color else {
            panic!("render target {id:?} has no color view");
        };

        self.backend.begin_pass(&PassDesc {
            color,
            depth_stencil: target.depth_stencil.as_ref().map(|a| &a.view),
            load,
            width: target.desc.width,
            height: target.desc.height,
        });
        let bounds = target.bounds();

        self.pass = PassState::Active;
        self.state.reset();
        self.stats.passes += 1;
        if matches!(load, LoadAction::Clear(_))
            && let Some(target) = self.resources.target_mut(id)
        {
            target.mark_drawn(bounds);
        }
    }

    // ── dynamic data ──────────────────────────────────────────────────────

    /// Reserves room for `count` vertices of `stride` bytes.
    pub fn map_vertices(&mut self, count: u32, stride: u32) -> MappedSpan<'_> {
        self.expect_frame("map_vertices");
        assert!(stride > 0, "vertex stride must be non-zero");

        let backend = &mut self.backend;
        let span = self.rings.vertex.map_aligned(
            u64::from(count) * u64::from(stride),
            u64::from(stride),
            &self.fence,
            |id, size| backend.create_page(BufferKind::Vertex, id, size),
        );
        self.vertex_page = Some(span.page);
        MappedSpan {
            first: (span.offset / u64::from(stride)) as u32,
            bytes: span.bytes,
        }
    }

    /// Reserves room for `count` 16-bit indices.
    pub fn map_indices(&mut self, count: u32) -> MappedSpan<'_> {
        self.expect_frame("map_indices");

        let backend = &mut self.backend;
        let span = self.rings.index.map_aligned(
            u64::from(count) * 2,
            2,
            &self.fence,
            |id, size| backend.create_page(BufferKind::Index, id, size),
        );
        self.index_page = Some(span.page);
        MappedSpan {
            first: (span.offset / 2) as u32,
            bytes: span.bytes,
        }
    }

    /// Copies `vertices` into the vertex ring; returns the base vertex.
    pub fn write_vertices<T: Pod>(&mut self, vertices: &[T]) -> u32 {
        let span = self.map_vertices(vertices.len() as u32, size_of::<T>() as u32);
        span.bytes.copy_from_slice(bytemuck::cast_slice(vertices));
        span.first
    }

    /// Copies `indices` into the index ring; returns the first index.
    pub fn write_indices(&mut self, indices: &[u16]) -> u32 {
        let span = self.map_indices(indices.len() as u32);
        span.bytes.copy_from_slice(bytemuck::cast_slice(indices));
        span.first
    }

    // ── texture updates ───────────────────────────────────────────────────

    /// Replaces `rect` of mip `level` with tightly packed `data`.
    ///
    /// Between frames the backend writes immediately. Inside a frame the data
    /// goes through the staging ring and the copy is recorded in order with
    /// the draws, suspending the pass if one is active.
    pub fn update_texture(
        &mut self,
        id: TextureId,
        level: u32,
        rect: PixelRect,
        data: &[u8],
    ) -> Result<(), ResourceError> {
        let desc = self.resources.desc(id).ok_or(ResourceError::UnknownTexture)?;
        let (width, height) = if level < desc.mip_levels {
            desc.level_size(level)
        } else {
            (0, 0)
        };
        if rect.is_empty() || rect.right() > width || rect.bottom() > height {
            return Err(ResourceError::RegionOutOfBounds {
                region: rect,
                level,
                width,
                height,
            });
        }
        let bpp = desc.format.bytes_per_pixel();
        let row = rect.width * bpp;
        let expected = row as usize * rect.height as usize;
        if data.len() != expected {
            return Err(ResourceError::InitialDataSize {
                level,
                expected,
                actual: data.len(),
            });
        }
        self.stats.uploads += 1;

        if self.phase == Phase::Idle {
            if let Some(record) = self.resources.record(id) {
                self.backend
                    .write_texture(&record.texture, level, rect, data, row);
            }
            self.resources.assume_state(id, TextureState::ShaderRead);
            return Ok(());
        }

        self.suspend_pass();
        self.resources
            .transition(&mut self.backend, id, TextureState::TransferDst);

        let pitch = align_up(u64::from(row), u64::from(self.caps.staging_row_alignment));
        let band = (self.rings.staging.page_size() / pitch).max(1) as u32;
        let mut y = 0;
        while y < rect.height {
            let rows = band.min(rect.height - y);
            let backend = &mut self.backend;
            let span = self.rings.staging.map_aligned(
                pitch * u64::from(rows),
                u64::from(bpp),
                &self.fence,
                |page, size| backend.create_page(BufferKind::Staging, page, size),
            );
            for r in 0..rows as usize {
                let src = (y as usize + r) * row as usize;
                let dst = r * pitch as usize;
                span.bytes[dst..dst + row as usize].copy_from_slice(&data[src..src + row as usize]);
            }
            let (page, offset) = (span.page, span.offset);

            let page = self.rings.staging.page(page);
            let record = self.resources.record(id);
            if let (Some(page), Some(record)) = (page, record) {
                self.backend.copy_to_texture(
                    page,
                    offset,
                    pitch as u32,
                    &record.texture,
                    level,
                    PixelRect::new(rect.x, rect.y + y, rect.width, rows),
                );
            }
            y += rows;
        }

        self.resources
            .transition(&mut self.backend, id, TextureState::ShaderRead);
        Ok(())
    }
}
