//! Ring pages backed by a GPU buffer and a CPU shadow copy.
//!
//! The engine writes into the shadow; [`WgpuPage::flush`] uploads the dirty
//! span with `Queue::write_buffer`, which wgpu orders before the next submit.

use std::ops::Range;

use nabu_submit::{BufferKind, PageId, PageMemory};

/// `write_buffer` offsets and sizes must be multiples of this.
const COPY_ALIGN: u64 = wgpu::COPY_BUFFER_ALIGNMENT;

/// Host-side bytes plus the span written since the last flush.
#[derive(Debug)]
pub(crate) struct Shadow {
    bytes: Vec<u8>,
    dirty: Option<Range<u64>>,
}

impl Shadow {
    pub(crate) fn new(size: u64) -> Self {
        Self {
            bytes: vec![0; size as usize],
            dirty: None,
        }
    }

    pub(crate) fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub(crate) fn write(&mut self, range: Range<u64>) -> &mut [u8] {
        debug_assert!(range.end <= self.len(), "write past page end");
        self.dirty = Some(match self.dirty.take() {
            Some(d) => d.start.min(range.start)..d.end.max(range.end),
            None => range.clone(),
        });
        &mut self.bytes[range.start as usize..range.end as usize]
    }

    /// Takes the dirty span widened to copy alignment, with its bytes.
    pub(crate) fn take_dirty(&mut self) -> Option<(u64, &[u8])> {
        let dirty = self.dirty.take()?;
        let start = dirty.start / COPY_ALIGN * COPY_ALIGN;
        let end = dirty.end.div_ceil(COPY_ALIGN) * COPY_ALIGN;
        let end = end.min(self.len());
        Some((start, &self.bytes[start as usize..end as usize]))
    }
}

pub struct WgpuPage {
    id: PageId,
    pub(crate) buffer: wgpu::Buffer,
    shadow: Shadow,
}

impl WgpuPage {
    pub(crate) fn new(device: &wgpu::Device, kind: BufferKind, id: PageId, size: u64) -> Self {
        // Shadow and buffer share a size that satisfies copy alignment.
        let size = size.div_ceil(COPY_ALIGN) * COPY_ALIGN;
        let label = format!("nabu {kind:?} page {}", id.raw());
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(&label),
            size,
            usage: buffer_usage(kind),
            mapped_at_creation: false,
        });
        Self {
            id,
            buffer,
            shadow: Shadow::new(size),
        }
    }

    #[inline]
    pub fn id(&self) -> PageId {
        self.id
    }

    pub(crate) fn flush(&mut self, queue: &wgpu::Queue) {
        if let Some((offset, bytes)) = self.shadow.take_dirty() {
            queue.write_buffer(&self.buffer, offset, bytes);
        }
    }
}

impl PageMemory for WgpuPage {
    fn capacity(&self) -> u64 {
        self.shadow.len()
    }

    fn write_range(&mut self, range: Range<u64>) -> &mut [u8] {
        self.shadow.write(range)
    }
}

fn buffer_usage(kind: BufferKind) -> wgpu::BufferUsages {
    use wgpu::BufferUsages as U;
    match kind {
        BufferKind::Vertex => U::VERTEX | U::COPY_DST,
        BufferKind::Index => U::INDEX | U::COPY_DST,
        BufferKind::Uniform(_) => U::UNIFORM | U::COPY_DST,
        BufferKind::Staging => U::COPY_SRC | U::COPY_DST,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nabu_submit::UniformSlot;

    #[test]
    fn untouched_shadow_has_nothing_to_flush() {
        let mut s = Shadow::new(64);
        assert!(s.take_dirty().is_none());
    }

    #[test]
    fn dirty_span_covers_every_write() {
        let mut s = Shadow::new(64);
        s.write(8..12).copy_from_slice(&[1, 2, 3, 4]);
        s.write(32..36).copy_from_slice(&[5, 6, 7, 8]);

        let Some((offset, bytes)) = s.take_dirty() else {
            panic!("expected dirty bytes");
        };
        assert_eq!(offset, 8);
        assert_eq!(bytes.len(), 28);
        assert_eq!(&bytes[..4], &[1, 2, 3, 4]);
        assert_eq!(&bytes[24..], &[5, 6, 7, 8]);

        assert!(s.take_dirty().is_none(), "flush clears the span");
    }

    #[test]
    fn dirty_span_widens_to_copy_alignment() {
        let mut s = Shadow::new(16);
        s.write(5..7);
        let Some((offset, bytes)) = s.take_dirty() else {
            panic!("expected dirty bytes");
        };
        assert_eq!(offset, 4);
        assert_eq!(bytes.len(), 4);
    }

    #[test]
    fn buffer_usage_matches_ring_kind() {
        assert!(buffer_usage(BufferKind::Index).contains(wgpu::BufferUsages::INDEX));
        assert!(buffer_usage(BufferKind::Uniform(UniformSlot::Fragment0)).contains(wgpu::BufferUsages::UNIFORM));
        assert!(buffer_usage(BufferKind::Staging).contains(wgpu::BufferUsages::COPY_SRC));
    }
}
