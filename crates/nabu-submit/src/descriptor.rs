//! Content-hashed descriptor-set reuse with pool-granular recycling.
//!
//! Sets are keyed by what they bind: page identity and size for each uniform
//! block, texture identity and sampler key for each texture. The hash only
//! picks the bucket; equal keys are compared in full.
//! Pools cannot free individual sets, so when the current pool runs out the
//! whole cache is dropped and the pool is retired with the current serial.
//! A retired pool is reset and reused once that serial is safe; until then
//! new pools are created instead of waiting.

use std::collections::VecDeque;

use rustc_hash::FxHashMap;

use crate::backend::Backend;
use crate::batch::{MAX_TEXTURE_SLOTS, MAX_UNIFORM_BLOCKS, SamplerKey};
use crate::fence::{FenceTracker, SubmissionSerial};
use crate::ring::PageId;
use crate::shader::ShaderId;
use crate::texture::TextureId;

/// Resources a descriptor set binds.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Hash)]
pub struct DescriptorContents {
    pub uniforms: [Option<(PageId, u32)>; MAX_UNIFORM_BLOCKS],
    pub textures: [Option<(TextureId, SamplerKey)>; MAX_TEXTURE_SLOTS],
}

impl DescriptorContents {
    /// Cache key. The shader is included because layouts differ per shader.
    pub fn key(&self, shader: ShaderId) -> DescriptorKey {
        DescriptorKey {
            shader,
            contents: *self,
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct DescriptorKey {
    pub shader: ShaderId,
    pub contents: DescriptorContents,
}

#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct DescriptorStats {
    pub allocations: u64,
    pub hits: u64,
    pub rotations: u64,
    pub pools_created: u32,
}

struct ActivePool<P> {
    pool: P,
    used: u32,
}

struct RetiredPool<P, S> {
    pool: P,
    sets: Vec<S>,
    serial: SubmissionSerial,
}

pub struct DescriptorCache<B: Backend> {
    sets: FxHashMap<DescriptorKey, B::DescriptorSet>,
    current: Option<ActivePool<B::DescriptorPool>>,
    retired: VecDeque<RetiredPool<B::DescriptorPool, B::DescriptorSet>>,
    capacity: u32,
    stats: DescriptorStats,
}

impl<B: Backend> DescriptorCache<B> {
    pub fn new(capacity: u32) -> Self {
        assert!(capacity > 0, "descriptor pool capacity must be non-zero");
        Self {
            sets: FxHashMap::default(),
            current: None,
            retired: VecDeque::new(),
            capacity,
            stats: DescriptorStats::default(),
        }
    }

    pub fn stats(&self) -> DescriptorStats {
        self.stats
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    pub fn retired_pools(&self) -> usize {
        self.retired.len()
    }

    /// Returns the set cached under `key`, allocating it with `allocate` on a miss.
    pub fn get_or_allocate(
        &mut self,
        backend: &mut B,
        fence: &FenceTracker,
        key: DescriptorKey,
        allocate: impl FnOnce(&mut B, &mut B::DescriptorPool) -> B::DescriptorSet,
    ) -> &B::DescriptorSet {
        if self.sets.contains_key(&key) {
            self.stats.hits += 1;
            return &self.sets[&key];
        }

        if self.current.as_ref().is_none_or(|p| p.used >= self.capacity) {
            self.rotate(backend, fence);
        }
        let Some(active) = self.current.as_mut() else {
            unreachable!("rotate always installs a pool");
        };

        let set = allocate(backend, &mut active.pool);
        active.used += 1;
        self.stats.allocations += 1;
        self.sets.entry(key).or_insert(set)
    }

    fn rotate(&mut self, backend: &mut B, fence: &FenceTracker) {
        if let Some(active) = self.current.take() {
            let sets = self.sets.drain().map(|(_, s)| s).collect();
            log::debug!(
                "descriptor pool exhausted after {} sets; retiring at {}",
                active.used,
                fence.current()
            );
            self.retired.push_back(RetiredPool {
                pool: active.pool,
                sets,
                serial: fence.current(),
            });
            self.stats.rotations += 1;
        }

        let reusable = self.retired.front().is_some_and(|r| fence.is_safe(r.serial));
        let pool = match self.retired.pop_front() {
            Some(retired) if reusable => {
                let mut pool = retired.pool;
                drop(retired.sets);
                backend.reset_descriptor_pool(&mut pool);
                pool
            }
            other => {
                if let Some(retired) = other {
                    self.retired.push_front(retired);
                }
                self.stats.pools_created += 1;
                log::debug!("creating descriptor pool ({} sets)", self.capacity);
                backend.create_descriptor_pool(self.capacity)
            }
        };
        self.current = Some(ActivePool { pool, used: 0 });
    }

    /// Releases every pool and set. Only valid once the device is idle.
    pub fn clear(&mut self) {
        self.sets.clear();
        self.current = None;
        self.retired.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::{FilterMode, UniformSlot};
    use crate::mock::{MockBackend, MockPage, MockSet};
    use crate::ring::{BufferKind, RingAllocator};

    struct Fixture {
        backend: MockBackend,
        fence: FenceTracker,
        cache: DescriptorCache<MockBackend>,
        page: PageId,
        texture: TextureId,
    }

    fn fixture(capacity: u32) -> Fixture {
        let mut backend = MockBackend::new();
        let fence = FenceTracker::new();
        let mut ring: RingAllocator<MockPage> =
            RingAllocator::new(BufferKind::Uniform(UniformSlot::Vertex0), 256, 16);
        let page = ring.map(16, &fence, MockPage::new).page;
        let texture = backend.texture_handle();
        Fixture {
            backend,
            fence,
            cache: DescriptorCache::new(capacity),
            page,
            texture,
        }
    }

    fn contents(f: &Fixture, sampler: SamplerKey, size: u32) -> DescriptorContents {
        let mut c = DescriptorContents::default();
        c.uniforms[0] = Some((f.page, size));
        c.textures[0] = Some((f.texture, sampler));
        c
    }

    fn bind(f: &mut Fixture, key: DescriptorKey) -> MockSet {
        *f.cache
            .get_or_allocate(&mut f.backend, &f.fence, key, |backend, pool| backend.mock_allocate(pool))
    }

    /// Binds the `n`th distinct set of a sequence.
    fn bind_nth(f: &mut Fixture, n: u32) -> MockSet {
        let key = contents(f, SamplerKey::default(), n).key(ShaderId(0));
        bind(f, key)
    }

    // ── hit / miss ────────────────────────────────────────────────────────

    #[test]
    fn identical_bindings_allocate_once() {
        let mut f = fixture(8);
        let key = contents(&f, SamplerKey::default(), 64).key(ShaderId(0));

        let a = bind(&mut f, key);
        let b = bind(&mut f, key);
        assert_eq!(a, b);
        assert_eq!(f.cache.stats().allocations, 1);
        assert_eq!(f.cache.stats().hits, 1);
    }

    #[test]
    fn changing_any_component_allocates_again() {
        let mut f = fixture(8);
        let base = contents(&f, SamplerKey::default(), 64);
        let nearest = SamplerKey {
            filter: FilterMode::Nearest,
            ..Default::default()
        };

        let keys = [
            base.key(ShaderId(0)),
            contents(&f, nearest, 64).key(ShaderId(0)),
            contents(&f, SamplerKey::default(), 128).key(ShaderId(0)),
            base.key(ShaderId(1)),
        ];
        for key in keys {
            bind(&mut f, key);
        }
        assert_eq!(f.cache.stats().allocations, 4);
        assert_eq!(f.cache.len(), 4);
    }

    // ── pool rotation ─────────────────────────────────────────────────────

    #[test]
    fn exhaustion_clears_cache_and_rotates_pool() {
        let mut f = fixture(2);
        bind_nth(&mut f, 1);
        bind_nth(&mut f, 2);
        assert_eq!(f.cache.stats().pools_created, 1);

        bind_nth(&mut f, 3);
        assert_eq!(f.cache.stats().rotations, 1);
        assert_eq!(f.cache.stats().pools_created, 2);
        assert_eq!(f.cache.len(), 1);
        assert_eq!(f.cache.retired_pools(), 1);

        // Set 1 was dropped with the old pool.
        bind_nth(&mut f, 1);
        assert_eq!(f.cache.stats().allocations, 4);
    }

    #[test]
    fn retired_pool_is_reused_only_once_safe() {
        let mut f = fixture(1);
        let first = bind_nth(&mut f, 1);
        let retired_at = f.fence.current();

        // Not yet safe: a second pool is created.
        let second = bind_nth(&mut f, 2);
        assert_ne!(first.pool, second.pool);

        f.fence.advance();
        f.fence.update_safe(retired_at);

        let third = bind_nth(&mut f, 3);
        assert_eq!(third.pool, first.pool);
        assert_eq!(f.cache.stats().pools_created, 2);
        assert_eq!(f.backend.pool_resets(first.pool), 1);
    }
}
