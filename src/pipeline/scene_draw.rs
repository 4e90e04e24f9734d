//! Shared draw recording for passes that render scene batches
//!
//! A pass describes how its draws become pipelines with a [`DrawTemplate`]
//! and hands the batches to [`record_draws`]. The template carries the
//! preprocessed shader and the target formats of the pass, the draw supplies
//! topology, winding and culling.

use std::collections::HashSet;

use crate::backend::*;
use crate::render_graph::{NodeState, PendingShader, PrimitiveKey, ShaderCache, ShaderClass, ShaderKey};
use crate::scene::{DrawInstance, Vertex};

/// Formats and sample count a pipeline is compiled against
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineTargets {
    pub color_formats: Vec<TextureFormat>,
    pub depth_format: Option<TextureFormat>,
    pub sample_count: u32,
}

impl PipelineTargets {
    /// Targets of the node's enabled attachments.
    pub fn of(state: &NodeState) -> Self {
        Self {
            color_formats: state.colors().map(|a| a.format()).collect(),
            depth_format: state.depth().map(|a| a.format()),
            sample_count: state.sample_count(),
        }
    }
}

/// Everything needed to build a draw pipeline except the draw itself
#[derive(Debug, Clone)]
pub struct DrawTemplate {
    pub shader: ShaderClass,
    pub source: String,
    pub has_fragment: bool,
    pub bind_group_layouts: Vec<BindGroupLayoutHandle>,
    pub targets: PipelineTargets,
    /// Blend state of the first color target
    pub blend: Option<BlendState>,
    pub depth_write: bool,
}

impl DrawTemplate {
    pub fn key(&self, draw: &DrawInstance) -> ShaderKey {
        ShaderKey {
            shader: self.shader,
            primitive: PrimitiveKey {
                geometry: draw.geometry.id,
                topology: draw.geometry.topology,
            },
            material: draw.material.id,
            front_face: draw.front_face,
        }
    }

    pub fn descriptor(&self, draw: &DrawInstance) -> RenderPipelineDescriptor {
        RenderPipelineDescriptor {
            label: Some(format!("{} {:?}", self.shader.0, draw.material.id)),
            shader: self.source.clone(),
            has_fragment: self.has_fragment,
            vertex_layouts: vec![Vertex::layout()],
            bind_group_layouts: self.bind_group_layouts.clone(),
            primitive_topology: draw.geometry.topology,
            front_face: draw.front_face,
            cull_mode: if draw.material.double_sided {
                CullMode::None
            } else {
                CullMode::Back
            },
            depth_stencil: self.targets.depth_format.map(|format| DepthStencilState {
                format,
                depth_write_enabled: self.depth_write,
                depth_compare: CompareFunction::LessEqual,
            }),
            color_targets: self
                .targets
                .color_formats
                .iter()
                .enumerate()
                .map(|(i, format)| ColorTargetState {
                    format: *format,
                    blend: if i == 0 && !format.is_integer() {
                        self.blend
                    } else {
                        None
                    },
                })
                .collect(),
            sample_count: self.targets.sample_count,
        }
    }
}

/// Record `draws` into the open pass, compiling missing variants on the spot.
///
/// `shared` bind groups are bound from index 0 whenever the pipeline changes;
/// `per_draw` may supply one more group, bound right after them.
/// Returns the number of draws issued.
pub fn record_draws<'d>(
    backend: &mut dyn GraphicsBackend,
    cache: &mut ShaderCache,
    template: &DrawTemplate,
    shared: &[BindGroupHandle],
    draws: impl IntoIterator<Item = &'d DrawInstance>,
    per_draw: impl Fn(&DrawInstance) -> Option<BindGroupHandle>,
) -> BackendResult<usize> {
    let mut current = None;
    let mut issued = 0;

    for draw in draws {
        if draw.instances.is_empty() {
            continue;
        }
        let pipeline =
            cache.get_or_compile(template.key(draw), backend, |_| template.descriptor(draw))?;
        if current != Some(pipeline) {
            backend.set_render_pipeline(pipeline);
            for (index, group) in shared.iter().enumerate() {
                backend.set_bind_group(index as u32, *group);
            }
            current = Some(pipeline);
        }
        if let Some(group) = per_draw(draw) {
            backend.set_bind_group(shared.len() as u32, group);
        }

        let geometry = &draw.geometry;
        backend.set_vertex_buffer(0, geometry.vertex_buffer, 0);
        match geometry.index_buffer {
            Some(index) => {
                backend.set_index_buffer(index.buffer, 0, index.format);
                backend.draw_indexed(0..index.count, 0, draw.instances.clone());
            }
            None => backend.draw(0..geometry.vertex_count, draw.instances.clone()),
        }
        issued += 1;
    }
    Ok(issued)
}

/// Start compiling every variant `draws` will need that is not cached yet.
pub fn precompile_draws<'d>(
    backend: &mut dyn GraphicsBackend,
    cache: &ShaderCache,
    template: &DrawTemplate,
    draws: impl IntoIterator<Item = &'d DrawInstance>,
) -> Vec<PendingShader> {
    let mut seen = HashSet::new();
    draws
        .into_iter()
        .filter(|draw| seen.insert(template.key(draw)))
        .filter_map(|draw| {
            cache.compile_async(template.key(draw), backend, |_| template.descriptor(draw))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{GeometryId, GeometryRef, IndexBuffer, MaterialId, MaterialRef};

    fn template() -> DrawTemplate {
        DrawTemplate {
            shader: ShaderClass("test"),
            source: String::new(),
            has_fragment: true,
            bind_group_layouts: Vec::new(),
            targets: PipelineTargets {
                color_formats: vec![TextureFormat::Rgba16Float, TextureFormat::R32Uint],
                depth_format: Some(TextureFormat::Depth32Float),
                sample_count: 1,
            },
            blend: Some(BlendState::alpha_blending()),
            depth_write: true,
        }
    }

    fn draw(geometry: u64, indexed: bool, front_face: FrontFace) -> DrawInstance {
        DrawInstance {
            geometry: GeometryRef {
                id: GeometryId(geometry),
                topology: PrimitiveTopology::TriangleList,
                vertex_buffer: BufferHandle::from_raw(100),
                vertex_count: 3,
                index_buffer: indexed.then_some(IndexBuffer {
                    buffer: BufferHandle::from_raw(101),
                    format: IndexFormat::Uint16,
                    count: 6,
                }),
            },
            material: MaterialRef::new(MaterialId(1)),
            front_face,
            instances: 0..1,
        }
    }

    #[test]
    fn test_pipeline_shared_between_identical_keys() {
        let mut backend = RecordingBackend::new();
        let mut cache = ShaderCache::new();
        let draws = vec![
            draw(1, true, FrontFace::Ccw),
            draw(1, true, FrontFace::Ccw),
            draw(1, true, FrontFace::Cw),
            draw(2, false, FrontFace::Ccw),
        ];

        let issued =
            record_draws(&mut backend, &mut cache, &template(), &[], &draws, |_| None).unwrap();

        assert_eq!(issued, 4);
        assert_eq!(cache.len(), 3);
        let pipeline_switches = backend
            .commands()
            .iter()
            .filter(|c| matches!(c, RecordedCommand::SetPipeline(_)))
            .count();
        assert_eq!(pipeline_switches, 3);
        assert!(backend
            .commands()
            .iter()
            .any(|c| matches!(c, RecordedCommand::Draw { .. })));
    }

    #[test]
    fn test_blend_only_on_first_float_target() {
        let desc = template().descriptor(&draw(1, false, FrontFace::Ccw));
        assert!(desc.color_targets[0].blend.is_some());
        assert!(desc.color_targets[1].blend.is_none());
        assert_eq!(desc.cull_mode, CullMode::Back);
    }

    #[test]
    fn test_precompile_dedupes_keys() {
        let mut backend = RecordingBackend::new();
        let cache = ShaderCache::new();
        let draws = vec![draw(1, false, FrontFace::Ccw), draw(1, false, FrontFace::Ccw)];
        let pending = precompile_draws(&mut backend, &cache, &template(), &draws);
        assert_eq!(pending.len(), 1);
    }
}
