//! Paged ring allocation of transient GPU-visible data.
//!
//! Each [`RingAllocator`] owns the pages of one buffer kind. A page is only
//! written again after the serial it was retired with is safe:
//! - `Append` rings fill the current page front to back and retire it when
//!   the next request does not fit.
//! - `Discard` rings (uniform blocks) retire the current page on every map
//!   that follows a write, so a map never lands in a page the GPU may read.
//!
//! Pages written during a frame are also retired at frame end, stamped with
//! that frame's serial. Retired pages are stamped in non-decreasing order,
//! so reclamation only has to look at the front of the pending list.

use std::collections::VecDeque;
use std::ops::Range;

use crate::batch::UniformSlot;
use crate::fence::{FenceTracker, SubmissionSerial};

/// CPU-writable page storage provided by a backend.
pub trait PageMemory {
    fn capacity(&self) -> u64;

    /// Bytes for `range`, which lies within `capacity`. Implementations track
    /// the range as dirty until the backend flushes the page.
    fn write_range(&mut self, range: Range<u64>) -> &mut [u8];
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum BufferKind {
    Vertex,
    Index,
    Uniform(UniformSlot),
    /// Texture upload staging.
    Staging,
}

impl BufferKind {
    fn code(self) -> u32 {
        match self {
            Self::Vertex => 0,
            Self::Index => 1,
            Self::Uniform(slot) => 2 + slot.index() as u32,
            Self::Staging => 6,
        }
    }

    pub fn mode(self) -> RingMode {
        match self {
            Self::Uniform(_) => RingMode::Discard,
            _ => RingMode::Append,
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RingMode {
    Append,
    Discard,
}

/// Identity of a page, unique across all rings of a device.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PageId(u32);

impl PageId {
    const KIND_SHIFT: u32 = 24;

    fn new(kind: BufferKind, index: u32) -> Self {
        debug_assert!(index < 1 << Self::KIND_SHIFT);
        Self((kind.code() << Self::KIND_SHIFT) | index)
    }

    #[inline]
    pub fn raw(self) -> u32 {
        self.0
    }
}

/// Region returned by [`RingAllocator::map`]. Valid until the next map.
#[derive(Debug)]
pub struct RingSpan<'a> {
    pub page: PageId,
    pub offset: u64,
    pub bytes: &'a mut [u8],
}

#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct RingStats {
    pub maps: u64,
    pub pages_allocated: u32,
    pub pages_reclaimed: u64,
}

struct RingPage<M> {
    id: PageId,
    memory: M,
    cursor: u64,
    retired_at: SubmissionSerial,
}

pub struct RingAllocator<M> {
    kind: BufferKind,
    page_size: u64,
    alignment: u64,
    next_index: u32,
    current: Option<RingPage<M>>,
    free: VecDeque<RingPage<M>>,
    pending: VecDeque<RingPage<M>>,
    stats: RingStats,
}

impl<M: PageMemory> RingAllocator<M> {
    /// `alignment` applies to every returned offset and must be a power of two.
    pub fn new(kind: BufferKind, page_size: u64, alignment: u64) -> Self {
        assert!(page_size > 0, "{kind:?} ring page size must be non-zero");
        assert!(
            alignment.is_power_of_two(),
            "{kind:?} ring alignment {alignment} is not a power of two"
        );
        Self {
            kind,
            page_size,
            alignment,
            next_index: 0,
            current: None,
            free: VecDeque::new(),
            pending: VecDeque::new(),
            stats: RingStats::default(),
        }
    }

    #[inline]
    pub fn kind(&self) -> BufferKind {
        self.kind
    }

    #[inline]
    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    #[inline]
    pub fn stats(&self) -> RingStats {
        self.stats
    }

    /// Reserves `size` bytes, aligned to the ring alignment.
    pub fn map(
        &mut self,
        size: u64,
        fence: &FenceTracker,
        create: impl FnOnce(PageId, u64) -> M,
    ) -> RingSpan<'_> {
        self.map_aligned(size, 1, fence, create)
    }

    /// Like [`map`](Self::map), with the offset additionally a multiple of
    /// `element` (e.g. a vertex stride) so it converts to an element index.
    ///
    /// # Panics
    /// When `size` exceeds the page capacity. Page sizes must cover the
    /// largest single request.
    pub fn map_aligned(
        &mut self,
        size: u64,
        element: u64,
        fence: &FenceTracker,
        create: impl FnOnce(PageId, u64) -> M,
    ) -> RingSpan<'_> {
        assert!(
            size <= self.page_size,
            "ring buffer request exceeds page capacity: {size} bytes requested from {:?} pages of {} bytes",
            self.kind,
            self.page_size
        );
        let align = lcm(self.alignment, element.max(1));

        let fits = match (&self.current, self.kind.mode()) {
            (None, _) => false,
            (Some(page), RingMode::Discard) => page.cursor == 0,
            (Some(page), RingMode::Append) => {
                align_up(page.cursor, align).saturating_add(size) <= self.page_size
            }
        };
        if !fits {
            self.retire_current(fence.current());
        }

        let page = match self.current.take() {
            Some(page) => page,
            None => self.acquire(fence, create),
        };
        let page = self.current.insert(page);

        let offset = align_up(page.cursor, align);
        page.cursor = offset + size;
        self.stats.maps += 1;

        RingSpan {
            page: page.id,
            offset,
            bytes: page.memory.write_range(offset..offset + size),
        }
    }

    /// Retires the current page if anything was written to it this frame.
    pub fn end_frame(&mut self, serial: SubmissionSerial) {
        self.retire_current(serial);
    }

    /// Memory of a page that has not been reclaimed yet.
    pub fn page(&self, id: PageId) -> Option<&M> {
        self.current
            .iter()
            .chain(self.pending.iter().rev())
            .find(|p| p.id == id)
            .map(|p| &p.memory)
    }

    /// Visits pages that may hold unflushed writes.
    pub fn for_each_written_mut(&mut self, mut f: impl FnMut(&mut M)) {
        if let Some(page) = self.current.as_mut() {
            f(&mut page.memory);
        }
        for page in self.pending.iter_mut() {
            f(&mut page.memory);
        }
    }

    /// Pages retired and not yet proven safe.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn page_count(&self) -> usize {
        self.current.iter().count() + self.free.len() + self.pending.len()
    }

    /// Releases every page. Only valid once the device is idle.
    pub fn into_pages(self) -> impl Iterator<Item = M> {
        self.current
            .into_iter()
            .chain(self.free)
            .chain(self.pending)
            .map(|p| p.memory)
    }

    fn retire_current(&mut self, serial: SubmissionSerial) {
        let Some(mut page) = self.current.take() else {
            return;
        };
        if page.cursor == 0 {
            self.current = Some(page);
            return;
        }
        page.retired_at = serial;
        log::trace!("{:?} ring retired page {:?} at {}", self.kind, page.id, serial);
        self.pending.push_back(page);
    }

    fn acquire(&mut self, fence: &FenceTracker, create: impl FnOnce(PageId, u64) -> M) -> RingPage<M> {
        if let Some(page) = self.free.pop_front() {
            return page;
        }

        while let Some(front) = self.pending.front() {
            if !fence.is_safe(front.retired_at) {
                break;
            }
            let Some(mut page) = self.pending.pop_front() else {
                break;
            };
            page.cursor = 0;
            self.free.push_back(page);
            self.stats.pages_reclaimed += 1;
        }
        if let Some(page) = self.free.pop_front() {
            log::trace!("{:?} ring reclaimed page {:?}", self.kind, page.id);
            return page;
        }

        let id = PageId::new(self.kind, self.next_index);
        self.next_index += 1;
        self.stats.pages_allocated += 1;
        log::debug!(
            "{:?} ring allocating page {:?} ({} bytes, {} in flight)",
            self.kind,
            id,
            self.page_size,
            self.pending.len()
        );

        let memory = create(id, self.page_size);
        debug_assert!(memory.capacity() >= self.page_size);
        RingPage {
            id,
            memory,
            cursor: 0,
            retired_at: SubmissionSerial::NONE,
        }
    }
}

#[inline]
pub(crate) fn align_up(value: u64, align: u64) -> u64 {
    value.div_ceil(align) * align
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

fn lcm(a: u64, b: u64) -> u64 {
    a / gcd(a, b) * b
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::mock::{MockPage, XorShift};

    const DRAW: u64 = 64;

    fn vertex_ring() -> RingAllocator<MockPage> {
        RingAllocator::new(BufferKind::Vertex, DRAW * 4, 4)
    }

    fn map(ring: &mut RingAllocator<MockPage>, fence: &FenceTracker, fill: u8) -> (PageId, u64) {
        let span = ring.map(DRAW, fence, MockPage::new);
        span.bytes.fill(fill);
        (span.page, span.offset)
    }

    // ── append ────────────────────────────────────────────────────────────

    #[test]
    fn appends_within_a_page() {
        let fence = FenceTracker::new();
        let mut ring = vertex_ring();

        let (p0, o0) = map(&mut ring, &fence, 1);
        let (p1, o1) = map(&mut ring, &fence, 2);
        assert_eq!(p0, p1);
        assert_eq!((o0, o1), (0, DRAW));
        assert_eq!(ring.stats().pages_allocated, 1);
    }

    #[test]
    fn element_alignment_rounds_offsets() {
        let fence = FenceTracker::new();
        let mut ring = vertex_ring();

        ring.map(10, &fence, MockPage::new);
        let span = ring.map_aligned(24, 12, &fence, MockPage::new);
        // lcm(4, 12) = 12 -> next multiple after 10 is 12.
        assert_eq!(span.offset, 12);
        assert_eq!(span.bytes.len(), 24);
    }

    #[test]
    #[should_panic(expected = "ring buffer request exceeds page capacity")]
    fn oversized_request_is_fatal() {
        let fence = FenceTracker::new();
        let mut ring = vertex_ring();
        ring.map(DRAW * 4 + 1, &fence, MockPage::new);
    }

    // ── discard ───────────────────────────────────────────────────────────

    #[test]
    fn uniform_maps_always_start_a_page() {
        let fence = FenceTracker::new();
        let mut ring: RingAllocator<MockPage> =
            RingAllocator::new(BufferKind::Uniform(UniformSlot::Vertex0), 256, 16);

        let a = ring.map(32, &fence, MockPage::new);
        let (pa, oa) = (a.page, a.offset);
        let b = ring.map(32, &fence, MockPage::new);
        assert_eq!(oa, 0);
        assert_eq!(b.offset, 0);
        assert_ne!(pa, b.page);
        assert_eq!(ring.pending_len(), 1);
    }

    // ── frame scenario ────────────────────────────────────────────────────

    #[test]
    fn overflow_allocates_then_reuses_once_safe() {
        let mut fence = FenceTracker::new();
        let mut ring = vertex_ring();

        let first: Vec<_> = (0..4).map(|i| map(&mut ring, &fence, i)).collect();
        let page1 = first[0].0;
        assert!(first.iter().all(|(p, _)| *p == page1));

        // Calls 5-6: nothing is safe, so a second page is allocated.
        let (p5, _) = map(&mut ring, &fence, 5);
        let (p6, _) = map(&mut ring, &fence, 6);
        assert_ne!(p5, page1);
        assert_eq!(p5, p6);
        assert_eq!(ring.stats().pages_allocated, 2);

        // Page 1 still holds calls 1-4.
        let bytes = &ring.page(page1).unwrap().bytes;
        for i in 0..4 {
            assert!(bytes[(i * DRAW) as usize..((i + 1) * DRAW) as usize].iter().all(|b| *b == i as u8));
        }

        let submitted = fence.current();
        ring.end_frame(submitted);
        fence.advance();
        fence.update_safe(submitted);

        let (p7, o7) = map(&mut ring, &fence, 7);
        let (p8, o8) = map(&mut ring, &fence, 8);
        assert_eq!(p7, page1);
        assert_eq!(p8, page1);
        assert_eq!((o7, o8), (0, DRAW));
        assert_eq!(ring.stats().pages_allocated, 2);
        assert_eq!(ring.stats().pages_reclaimed, 2);
    }

    #[test]
    fn unwritten_page_is_not_retired_at_frame_end() {
        let mut fence = FenceTracker::new();
        let mut ring = vertex_ring();
        map(&mut ring, &fence, 0);
        ring.end_frame(fence.current());
        fence.advance();
        ring.end_frame(fence.current());
        assert_eq!(ring.pending_len(), 1);
        assert_eq!(ring.page_count(), 1);
    }

    #[test]
    fn into_pages_returns_everything() {
        let fence = FenceTracker::new();
        let mut ring = vertex_ring();
        for i in 0..9 {
            map(&mut ring, &fence, i);
        }
        assert_eq!(ring.page_count(), 3);
        assert_eq!(ring.into_pages().count(), 3);
    }

    // ── safety property ───────────────────────────────────────────────────

    /// No map may return a range that overlaps an earlier write to the same
    /// page unless that earlier write's frame has completed.
    fn check_never_overwrites_in_flight(kind: BufferKind, seed: u64) {
        let mut rng = XorShift::new(seed);
        let mut fence = FenceTracker::new();
        let mut ring: RingAllocator<MockPage> = RingAllocator::new(kind, 512, 16);
        let mut writes: HashMap<PageId, Vec<(Range<u64>, SubmissionSerial)>> = HashMap::new();
        let mut submitted: Vec<SubmissionSerial> = Vec::new();

        for _ in 0..2_000 {
            match rng.below(10) {
                0 => {
                    let serial = fence.current();
                    ring.end_frame(serial);
                    submitted.push(serial);
                    fence.advance();
                }
                1 if !submitted.is_empty() => {
                    let done = submitted[rng.below(submitted.len() as u64) as usize];
                    fence.update_safe(done);
                }
                _ => {
                    let size = 1 + rng.below(200);
                    let span = ring.map(size, &fence, MockPage::new);
                    let range = span.offset..span.offset + size;
                    let prior = writes.entry(span.page).or_default();
                    for (r, serial) in prior.iter() {
                        if r.start < range.end && range.start < r.end {
                            assert!(
                                fence.is_safe(*serial),
                                "{kind:?} page {:?} range {range:?} overlaps in-flight write {r:?} from {serial}",
                                span.page
                            );
                        }
                    }
                    prior.retain(|(r, _)| !(r.start < range.end && range.start < r.end));
                    prior.push((range, fence.current()));
                }
            }
        }
    }

    #[test]
    fn append_ring_never_overwrites_in_flight_data() {
        for seed in 1..=8 {
            check_never_overwrites_in_flight(BufferKind::Vertex, seed);
        }
    }

    #[test]
    fn discard_ring_never_overwrites_in_flight_data() {
        for seed in 1..=8 {
            check_never_overwrites_in_flight(BufferKind::Uniform(UniformSlot::Fragment0), seed);
        }
    }
}
