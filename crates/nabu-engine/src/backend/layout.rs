//! Shader modules, bind group layouts and render pipelines.
//!
//! Every shader gets one bind group (group 0) laid out by the shared binding
//! convention: uniform slot `n` at binding `n` with a dynamic offset, texture
//! slot `n` at `4 + 2n` and its sampler at `5 + 2n`. Only slots the shader
//! reads get an entry.

use nabu_submit::batch::{MAX_TEXTURE_SLOTS, ShaderStage};
use nabu_submit::{PipelineDesc, ResourceError, ShaderEntry, ShaderLayout, ShaderSource, UniformSlot};

use super::convert;

/// A built pipeline with the bind group layout its sets are allocated from.
#[derive(Debug)]
pub struct WgpuPipeline {
    pub(crate) pipeline: wgpu::RenderPipeline,
    pub(crate) bind_group_layout: wgpu::BindGroupLayout,
}

/// Per-shader objects shared by every pipeline built from that shader.
pub(crate) struct ShaderResources {
    module: wgpu::ShaderModule,
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
}

fn stage(stage: ShaderStage) -> wgpu::ShaderStages {
    match stage {
        ShaderStage::Vertex => wgpu::ShaderStages::VERTEX,
        ShaderStage::Fragment => wgpu::ShaderStages::FRAGMENT,
    }
}

pub(crate) fn bind_group_layout_entries(layout: &ShaderLayout) -> Vec<wgpu::BindGroupLayoutEntry> {
    let mut entries = Vec::new();

    for slot in UniformSlot::ALL {
        let size = layout.uniform_sizes[slot.index()];
        if size == 0 {
            continue;
        }
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: ShaderLayout::uniform_binding(slot),
            visibility: stage(slot.stage()),
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: true,
                min_binding_size: wgpu::BufferSize::new(size as u64),
            },
            count: None,
        });
    }

    for slot in (0..MAX_TEXTURE_SLOTS).filter(|&s| layout.uses_texture(s)) {
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: ShaderLayout::texture_binding(slot),
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        });
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: ShaderLayout::sampler_binding(slot),
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
            count: None,
        });
    }

    entries
}

impl ShaderResources {
    pub(crate) fn new(device: &wgpu::Device, entry: &ShaderEntry) -> Result<Self, ResourceError> {
        let ShaderSource::Wgsl(source) = &entry.source else {
            return Err(ResourceError::UnsupportedShader);
        };

        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(&entry.label),
            source: wgpu::ShaderSource::Wgsl(source.clone()),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(&entry.label),
            entries: &bind_group_layout_entries(&entry.layout),
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(&entry.label),
            bind_group_layouts: &[&bind_group_layout],
            immediate_size: 0,
        });

        log::debug!("compiled shader module '{}'", entry.label);
        Ok(Self {
            module,
            bind_group_layout,
            pipeline_layout,
        })
    }

    pub(crate) fn build(&self, device: &wgpu::Device, desc: &PipelineDesc<'_>) -> WgpuPipeline {
        let layout = &desc.shader.layout;
        let target = desc.signature.target;

        let attributes: Vec<wgpu::VertexAttribute> = layout
            .vertex_attributes
            .iter()
            .map(|a| wgpu::VertexAttribute {
                format: convert::vertex_format(a.format),
                offset: a.offset as u64,
                shader_location: a.location,
            })
            .collect();

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(&desc.shader.label),
            layout: Some(&self.pipeline_layout),

            vertex: wgpu::VertexState {
                module: &self.module,
                entry_point: Some("vs_main"),
                compilation_options: Default::default(),
                buffers: &[wgpu::VertexBufferLayout {
                    array_stride: layout.vertex_stride as u64,
                    step_mode: wgpu::VertexStepMode::Vertex,
                    attributes: &attributes,
                }],
            },

            fragment: Some(wgpu::FragmentState {
                module: &self.module,
                entry_point: Some("fs_main"),
                compilation_options: Default::default(),
                targets: &[Some(wgpu::ColorTargetState {
                    format: convert::texture_format(target.format),
                    blend: desc.blend.map(convert::blend_state),
                    write_mask: convert::color_writes(desc.color_write),
                })],
            }),

            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: None,
                polygon_mode: convert::polygon_mode(desc.fill),
                unclipped_depth: false,
                conservative: false,
            },

            depth_stencil: target
                .depth_stencil
                .then(|| convert::depth_stencil_state(desc.stencil)),
            multisample: wgpu::MultisampleState {
                count: target.samples,
                mask: !0,
                alpha_to_coverage_enabled: false,
            },

            multiview_mask: None,
            cache: None,
        });

        WgpuPipeline {
            pipeline,
            bind_group_layout: self.bind_group_layout.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(uniforms: [u32; 4], textures: u8) -> ShaderLayout {
        ShaderLayout {
            vertex_stride: 8,
            vertex_attributes: Vec::new(),
            uniform_sizes: uniforms,
            texture_slots: textures,
        }
    }

    #[test]
    fn unused_slots_get_no_entries() {
        let entries = bind_group_layout_entries(&layout([0; 4], 0));
        assert!(entries.is_empty());
    }

    #[test]
    fn uniforms_use_dynamic_offsets_at_their_slot_binding() {
        let entries = bind_group_layout_entries(&layout([64, 0, 16, 0], 0));
        let bindings: Vec<u32> = entries.iter().map(|e| e.binding).collect();
        assert_eq!(bindings, vec![0, 2]);

        assert_eq!(entries[0].visibility, wgpu::ShaderStages::VERTEX);
        assert_eq!(entries[1].visibility, wgpu::ShaderStages::FRAGMENT);
        assert!(matches!(
            entries[0].ty,
            wgpu::BindingType::Buffer { has_dynamic_offset: true, min_binding_size: Some(size), .. }
                if size.get() == 64
        ));
    }

    #[test]
    fn textures_pair_with_samplers() {
        let entries = bind_group_layout_entries(&layout([0; 4], 0b1010));
        let bindings: Vec<u32> = entries.iter().map(|e| e.binding).collect();
        assert_eq!(bindings, vec![6, 7, 10, 11]);
        assert!(matches!(entries[1].ty, wgpu::BindingType::Sampler(_)));
    }
}
