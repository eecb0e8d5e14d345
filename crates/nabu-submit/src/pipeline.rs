//! Signature-keyed pipeline cache.
//!
//! A signature is a pure function of shader id, pipeline render-state bits
//! and target configuration, so identical draws always resolve to the same
//! `Arc`. The first pipeline built per shader is kept as the parent for its
//! siblings on backends that support derivation. Invalid combinations are
//! rejected before any build is attempted.

use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::backend::{Capabilities, PipelineDesc};
use crate::error::{PipelineError, ResourceError};
use crate::shader::{ShaderEntry, ShaderId, ShaderTable};
use crate::state::RenderState;
use crate::texture::TextureFormat;

/// Render-target configuration a pipeline is built against.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct TargetInfo {
    pub format: TextureFormat,
    pub samples: u32,
    pub depth_stencil: bool,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct PipelineSignature {
    pub shader: ShaderId,
    state: u32,
    pub target: TargetInfo,
}

impl PipelineSignature {
    pub fn new(shader: ShaderId, state: RenderState, target: TargetInfo) -> Self {
        Self {
            shader,
            state: state.pipeline_bits(),
            target,
        }
    }

    #[inline]
    pub fn render_state(&self) -> RenderState {
        RenderState::from_bits(self.state).unwrap_or_default()
    }
}

/// Stable identity of a cached pipeline, used by the binding cache.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct PipelineId(u32);

#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct PipelineStats {
    pub builds: u64,
    pub derived_builds: u64,
    pub hits: u64,
    pub invalidations: u64,
}

/// Checks a signature against the shader and backend before building.
pub fn validate(
    entry: &ShaderEntry,
    signature: &PipelineSignature,
    caps: &Capabilities,
) -> Result<(), &'static str> {
    let state = signature.render_state();
    let target = signature.target;

    if state.stencil().is_enabled() && !target.depth_stencil {
        return Err("stencil mode requires a depth/stencil attachment");
    }
    if state.wireframe() && !caps.wireframe {
        return Err("wireframe fill is not supported by this backend");
    }
    if !target.samples.is_power_of_two() || target.samples > caps.max_samples {
        return Err("sample count is not supported by this backend");
    }
    if !target.format.is_renderable() {
        return Err("target format is not renderable");
    }
    if entry.layout.vertex_stride == 0 {
        return Err("shader declares no vertex stride");
    }
    if let Some(predicate) = entry.validity
        && !predicate(signature)
    {
        return Err("rejected by the shader's validity predicate");
    }
    Ok(())
}

/// Decodes a validated signature into concrete pipeline state.
pub fn describe<'a>(entry: &'a ShaderEntry, signature: PipelineSignature) -> PipelineDesc<'a> {
    let state = signature.render_state();
    PipelineDesc {
        signature,
        shader: entry,
        blend: state.blend().factors(),
        stencil: state.stencil().ops(),
        fill: state.fill_mode(),
        color_write: state.color_write(),
    }
}

struct Entry<P> {
    id: PipelineId,
    pipeline: Arc<P>,
}

pub struct PipelineCache<P> {
    entries: FxHashMap<PipelineSignature, Entry<P>>,
    parents: FxHashMap<ShaderId, Arc<P>>,
    seen_targets: FxHashSet<TargetInfo>,
    next_id: u32,
    stats: PipelineStats,
}

impl<P> Default for PipelineCache<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> PipelineCache<P> {
    pub fn new() -> Self {
        Self {
            entries: FxHashMap::default(),
            parents: FxHashMap::default(),
            seen_targets: FxHashSet::default(),
            next_id: 0,
            stats: PipelineStats::default(),
        }
    }

    #[inline]
    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, signature: &PipelineSignature) -> Option<(PipelineId, &Arc<P>)> {
        self.entries.get(signature).map(|e| (e.id, &e.pipeline))
    }

    /// Returns the cached pipeline for `signature`, building it on a miss.
    pub fn get_or_create(
        &mut self,
        signature: PipelineSignature,
        shaders: &ShaderTable,
        caps: &Capabilities,
        build: impl FnOnce(&PipelineDesc<'_>, Option<&P>) -> Result<P, ResourceError>,
    ) -> Result<(PipelineId, Arc<P>), PipelineError> {
        if let Some(entry) = self.entries.get(&signature) {
            self.stats.hits += 1;
            return Ok((entry.id, Arc::clone(&entry.pipeline)));
        }

        let shader = shaders
            .get(signature.shader)
            .ok_or(PipelineError::UnknownShader(signature.shader))?;
        validate(shader, &signature, caps)
            .map_err(|reason| PipelineError::Rejected { signature, reason })?;

        let desc = describe(shader, signature);
        let parent = if caps.pipeline_derivation {
            self.parents.get(&signature.shader).map(Arc::as_ref)
        } else {
            None
        };
        let derived = parent.is_some();

        let pipeline = Arc::new(build(&desc, parent).map_err(PipelineError::Build)?);
        self.stats.builds += 1;
        if derived {
            self.stats.derived_builds += 1;
        }
        self.parents
            .entry(signature.shader)
            .or_insert_with(|| Arc::clone(&pipeline));

        let id = PipelineId(self.next_id);
        self.next_id += 1;
        log::debug!(
            "built pipeline {:?} for {} ({:?}{})",
            id,
            shader.label,
            signature.render_state(),
            if derived { ", derived" } else { "" }
        );

        self.entries.insert(
            signature,
            Entry {
                id,
                pipeline: Arc::clone(&pipeline),
            },
        );
        Ok((id, pipeline))
    }

    /// Notes a render-target configuration. On backends whose pipelines are
    /// tied to pass objects, the first sighting of a new configuration
    /// invalidates the cache; the retired pipelines are returned.
    pub fn observe_target(&mut self, target: TargetInfo, caps: &Capabilities) -> Vec<Arc<P>> {
        if !self.seen_targets.insert(target) || !caps.render_pass_objects || self.entries.is_empty() {
            return Vec::new();
        }
        log::debug!("new render-pass configuration {target:?}; invalidating pipelines");
        self.invalidate_all()
    }

    /// Drops every pipeline built from `shader`, e.g. after a custom shader
    /// is cleared.
    pub fn invalidate_shader(&mut self, shader: ShaderId) -> Vec<Arc<P>> {
        self.parents.remove(&shader);
        let signatures: Vec<_> = self.entries.keys().filter(|s| s.shader == shader).copied().collect();
        signatures
            .into_iter()
            .filter_map(|s| self.entries.remove(&s))
            .map(|e| e.pipeline)
            .collect()
    }

    /// Empties the cache and hands back the pipelines for deferred destruction.
    pub fn invalidate_all(&mut self) -> Vec<Arc<P>> {
        self.parents.clear();
        if self.entries.is_empty() {
            return Vec::new();
        }
        self.stats.invalidations += 1;
        self.entries.drain().map(|(_, e)| e.pipeline).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shader::ShaderLayout;
    use crate::state::{BlendMode, StencilMode};

    fn table() -> ShaderTable {
        let layout = ShaderLayout {
            vertex_stride: 8,
            ..Default::default()
        };
        ShaderTable::new(vec![
            ShaderEntry::wgsl("solid", "", layout.clone()),
            ShaderEntry::wgsl("opaque-only", "", layout)
                .with_validity(|sig| sig.render_state().blend() == BlendMode::Replace),
        ])
    }

    fn target(depth_stencil: bool) -> TargetInfo {
        TargetInfo {
            format: TextureFormat::Rgba8Unorm,
            samples: 1,
            depth_stencil,
        }
    }

    fn sig(shader: u16, state: RenderState) -> PipelineSignature {
        PipelineSignature::new(ShaderId(shader), state, target(true))
    }

    /// Build routine that records whether it saw a parent.
    fn build_counting<'a>(
        builds: &'a mut Vec<Option<u32>>,
    ) -> impl FnOnce(&PipelineDesc<'_>, Option<&u32>) -> Result<u32, ResourceError> + 'a {
        move |_, parent| {
            builds.push(parent.copied());
            Ok(builds.len() as u32)
        }
    }

    // ── determinism ───────────────────────────────────────────────────────

    #[test]
    fn identical_signature_returns_same_object_without_rebuilding() {
        let shaders = table();
        let caps = Capabilities::default();
        let mut cache = PipelineCache::new();
        let mut builds = Vec::new();

        let s = sig(0, RenderState::new());
        let (id_a, a) = cache.get_or_create(s, &shaders, &caps, build_counting(&mut builds)).unwrap();
        let (id_b, b) = cache.get_or_create(s, &shaders, &caps, build_counting(&mut builds)).unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(id_a, id_b);
        assert_eq!(builds.len(), 1);
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn scissor_bit_shares_a_pipeline() {
        let shaders = table();
        let caps = Capabilities::default();
        let mut cache = PipelineCache::new();
        let mut builds = Vec::new();

        cache.get_or_create(sig(0, RenderState::new()), &shaders, &caps, build_counting(&mut builds)).unwrap();
        cache
            .get_or_create(sig(0, RenderState::new().with_scissor(true)), &shaders, &caps, build_counting(&mut builds))
            .unwrap();
        assert_eq!(builds.len(), 1);
    }

    // ── derivation ────────────────────────────────────────────────────────

    #[test]
    fn siblings_derive_from_first_build() {
        let shaders = table();
        let caps = Capabilities {
            pipeline_derivation: true,
            ..Default::default()
        };
        let mut cache = PipelineCache::new();
        let mut builds = Vec::new();

        cache.get_or_create(sig(0, RenderState::new()), &shaders, &caps, build_counting(&mut builds)).unwrap();
        cache
            .get_or_create(sig(0, RenderState::new().with_blend(BlendMode::Additive)), &shaders, &caps, build_counting(&mut builds))
            .unwrap();
        cache
            .get_or_create(sig(1, RenderState::new().with_blend(BlendMode::Replace)), &shaders, &caps, build_counting(&mut builds))
            .unwrap();

        assert_eq!(builds, vec![None, Some(1), None]);
        assert_eq!(cache.stats().derived_builds, 1);
    }

    #[test]
    fn no_parent_without_derivation_support() {
        let shaders = table();
        let caps = Capabilities::default();
        let mut cache = PipelineCache::new();
        let mut builds = Vec::new();

        cache.get_or_create(sig(0, RenderState::new()), &shaders, &caps, build_counting(&mut builds)).unwrap();
        cache
            .get_or_create(sig(0, RenderState::new().with_blend(BlendMode::Screen)), &shaders, &caps, build_counting(&mut builds))
            .unwrap();
        assert_eq!(builds, vec![None, None]);
    }

    // ── validation ────────────────────────────────────────────────────────

    #[test]
    fn stencil_without_attachment_is_rejected_before_build() {
        let shaders = table();
        let caps = Capabilities::default();
        let mut cache = PipelineCache::new();
        let mut builds = Vec::new();

        let s = PipelineSignature::new(
            ShaderId(0),
            RenderState::new().with_stencil(StencilMode::EqualKeep),
            target(false),
        );
        let err = cache.get_or_create(s, &shaders, &caps, build_counting(&mut builds)).unwrap_err();
        assert!(matches!(err, PipelineError::Rejected { .. }));
        assert!(builds.is_empty());
    }

    #[test]
    fn shader_predicate_is_consulted() {
        let shaders = table();
        let caps = Capabilities::default();
        let mut cache = PipelineCache::new();
        let mut builds = Vec::new();

        let err = cache
            .get_or_create(sig(1, RenderState::new()), &shaders, &caps, build_counting(&mut builds))
            .unwrap_err();
        assert_eq!(
            err,
            PipelineError::Rejected {
                signature: sig(1, RenderState::new()),
                reason: "rejected by the shader's validity predicate",
            }
        );
        assert!(builds.is_empty());
    }

    #[test]
    fn wireframe_needs_capability() {
        let shaders = table();
        let mut cache = PipelineCache::new();
        let mut builds = Vec::new();
        let s = sig(0, RenderState::new().with_wireframe(true));

        let caps = Capabilities::default();
        assert!(cache.get_or_create(s, &shaders, &caps, build_counting(&mut builds)).is_err());

        let caps = Capabilities {
            wireframe: true,
            ..Default::default()
        };
        assert!(cache.get_or_create(s, &shaders, &caps, build_counting(&mut builds)).is_ok());
    }

    #[test]
    fn unknown_shader_is_an_error() {
        let shaders = table();
        let mut cache: PipelineCache<u32> = PipelineCache::new();
        let err = cache
            .get_or_create(sig(9, RenderState::new()), &shaders, &Capabilities::default(), |_, _| Ok(0))
            .unwrap_err();
        assert_eq!(err, PipelineError::UnknownShader(ShaderId(9)));
    }

    // ── invalidation ──────────────────────────────────────────────────────

    #[test]
    fn invalidate_all_returns_pipelines_and_forces_rebuild() {
        let shaders = table();
        let caps = Capabilities::default();
        let mut cache = PipelineCache::new();
        let mut builds = Vec::new();
        let s = sig(0, RenderState::new());

        let (_, first) = cache.get_or_create(s, &shaders, &caps, build_counting(&mut builds)).unwrap();
        let retired = cache.invalidate_all();
        assert_eq!(retired.len(), 1);
        assert!(Arc::ptr_eq(&retired[0], &first));
        assert!(cache.is_empty());

        let (_, second) = cache.get_or_create(s, &shaders, &caps, build_counting(&mut builds)).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(builds.len(), 2);
    }

    #[test]
    fn invalidating_a_shader_keeps_the_others() {
        let shaders = table();
        let caps = Capabilities {
            pipeline_derivation: true,
            ..Default::default()
        };
        let mut cache = PipelineCache::new();
        let mut builds = Vec::new();
        let replace = RenderState::new().with_blend(BlendMode::Replace);

        cache.get_or_create(sig(0, RenderState::new()), &shaders, &caps, build_counting(&mut builds)).unwrap();
        cache.get_or_create(sig(0, replace), &shaders, &caps, build_counting(&mut builds)).unwrap();
        cache.get_or_create(sig(1, replace), &shaders, &caps, build_counting(&mut builds)).unwrap();

        assert_eq!(cache.invalidate_shader(ShaderId(0)).len(), 2);
        assert_eq!(cache.len(), 1);
        assert!(cache.get(&sig(1, replace)).is_some());

        // The parent went with the shader.
        cache.get_or_create(sig(0, replace), &shaders, &caps, build_counting(&mut builds)).unwrap();
        assert_eq!(builds.last(), Some(&None));
    }

    #[test]
    fn new_target_configuration_invalidates_only_with_pass_objects() {
        let shaders = table();
        let mut cache = PipelineCache::new();
        let mut builds = Vec::new();

        let plain = Capabilities::default();
        cache.observe_target(target(true), &plain);
        cache.get_or_create(sig(0, RenderState::new()), &shaders, &plain, build_counting(&mut builds)).unwrap();
        assert!(cache.observe_target(target(false), &plain).is_empty());
        assert_eq!(cache.len(), 1);

        let pass_bound = Capabilities {
            render_pass_objects: true,
            ..Default::default()
        };
        // Already seen: no invalidation.
        assert!(cache.observe_target(target(true), &pass_bound).is_empty());

        let msaa = TargetInfo { samples: 4, ..target(true) };
        assert_eq!(cache.observe_target(msaa, &pass_bound).len(), 1);
        assert!(cache.is_empty());
        assert_eq!(cache.stats().invalidations, 1);
    }
}
