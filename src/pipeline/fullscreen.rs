//! Fullscreen-triangle passes
//!
//! Environment faces, SSAO and the output composite all draw one triangle
//! covering the target with no vertex buffer. Their pipelines use
//! [`ShaderKey::fullscreen`] so a pass has at most one variant per class.

use bytemuck::Pod;

use crate::backend::*;
use crate::pipeline::scene_draw::PipelineTargets;
use crate::render_graph::{PendingShader, ShaderCache, ShaderClass, ShaderKey};

pub fn fullscreen_descriptor(
    shader: ShaderClass,
    source: String,
    bind_group_layouts: Vec<BindGroupLayoutHandle>,
    targets: &PipelineTargets,
) -> RenderPipelineDescriptor {
    RenderPipelineDescriptor {
        label: Some(shader.0.to_string()),
        shader: source,
        has_fragment: true,
        vertex_layouts: Vec::new(),
        bind_group_layouts,
        primitive_topology: PrimitiveTopology::TriangleList,
        front_face: FrontFace::Ccw,
        cull_mode: CullMode::None,
        depth_stencil: None,
        color_targets: targets
            .color_formats
            .iter()
            .map(|format| ColorTargetState {
                format: *format,
                blend: None,
            })
            .collect(),
        sample_count: targets.sample_count,
    }
}

/// Bind `bind_groups` from index 0 and draw the fullscreen triangle.
pub fn draw_fullscreen(
    backend: &mut dyn GraphicsBackend,
    cache: &mut ShaderCache,
    shader: ShaderClass,
    bind_groups: &[BindGroupHandle],
    build: impl FnOnce() -> RenderPipelineDescriptor,
) -> BackendResult<()> {
    let pipeline = cache.get_or_compile(ShaderKey::fullscreen(shader), backend, |_| build())?;
    backend.set_render_pipeline(pipeline);
    for (index, group) in bind_groups.iter().enumerate() {
        backend.set_bind_group(index as u32, *group);
    }
    backend.draw(0..3, 0..1);
    Ok(())
}

pub fn precompile_fullscreen(
    backend: &mut dyn GraphicsBackend,
    cache: &ShaderCache,
    shader: ShaderClass,
    build: impl FnOnce() -> RenderPipelineDescriptor,
) -> Option<PendingShader> {
    cache.compile_async(ShaderKey::fullscreen(shader), backend, |_| build())
}

/// Uniform buffer initialised with `value`, writable afterwards.
pub fn uniform_buffer<T: Pod>(
    backend: &mut dyn GraphicsBackend,
    label: &str,
    value: &T,
) -> BackendResult<BufferHandle> {
    let data = bytemuck::bytes_of(value);
    backend.create_buffer_init(
        &BufferDescriptor {
            label: Some(label.to_string()),
            size: data.len() as u64,
            usage: BufferUsage::UNIFORM | BufferUsage::COPY_DST,
            mapped_at_creation: false,
        },
        data,
    )
}

pub fn uniform_entry(binding: u32, visibility: ShaderStageFlags) -> BindGroupLayoutEntry {
    BindGroupLayoutEntry {
        binding,
        visibility,
        ty: BindingType::UniformBuffer,
    }
}

pub fn texture_entry(
    binding: u32,
    sample_type: TextureSampleType,
    view_dimension: TextureViewDimension,
) -> BindGroupLayoutEntry {
    BindGroupLayoutEntry {
        binding,
        visibility: ShaderStageFlags::FRAGMENT,
        ty: BindingType::Texture {
            sample_type,
            view_dimension,
            multisampled: false,
        },
    }
}

pub fn sampler_entry(binding: u32, comparison: bool) -> BindGroupLayoutEntry {
    BindGroupLayoutEntry {
        binding,
        visibility: ShaderStageFlags::FRAGMENT,
        ty: BindingType::Sampler { comparison },
    }
}

pub fn buffer_binding(buffer: BufferHandle) -> BindGroupEntry {
    BindGroupEntry::Buffer {
        buffer,
        offset: 0,
        size: None,
    }
}
