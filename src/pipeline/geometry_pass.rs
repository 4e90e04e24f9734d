//! Main forward pass: lit scene geometry plus the optional G-buffer extras
//!
//! The attachment set follows [`GeometryFingerprint`]: `normal` is written
//! only when SSAO consumes it and `id` only when picking is on. Every
//! structural change clears the shader cache, since the compiled pipelines
//! bake in the target formats and sample count.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};

use crate::backend::*;
use crate::error::RenderResult;
use crate::pipeline::fullscreen::*;
use crate::pipeline::scene_draw::{precompile_draws, record_draws, DrawTemplate, PipelineTargets};
use crate::pipeline::shadow_pass::MAX_CASCADES;
use crate::pipeline::shaders::{self, BuiltinShaders, ShaderLibrary};
use crate::render_graph::*;
use crate::scene::{CameraUniform, FrameInputs, LightKind, MaterialId, MaterialRef};
use crate::settings::{FingerprintGuard, GeometryFingerprint, RenderSettings};

/// Input port for the cascaded shadow map
pub const SHADOW_MAP_INPUT: &str = "shadow_map";
/// Input port for the per-cascade light matrices
pub const CASCADES_INPUT: &str = "cascades";
/// Input port for the environment cubemap
pub const ENVIRONMENT_INPUT: &str = "environment";

const DEFAULT_SUN_DIRECTION: Vec3 = Vec3::new(-0.3, -1.0, -0.2);

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct FrameUniform {
    camera: CameraUniform,
    sun_direction: Vec4,
    sun_color: Vec4,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct CascadesUniform {
    view_proj: [Mat4; MAX_CASCADES as usize],
    count: [u32; 4],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct MaterialUniform {
    base_color: Vec4,
}

#[derive(Debug)]
struct MaterialBinding {
    buffer: BufferHandle,
    bind_group: BindGroupHandle,
    base_color: Vec4,
}

/// 1x1 texture bound when an optional producer is absent
#[derive(Debug)]
struct Fallback {
    texture: TextureHandle,
    view: TextureViewHandle,
}

impl Fallback {
    fn create(
        backend: &mut dyn GraphicsBackend,
        label: &str,
        format: TextureFormat,
        dimension: TextureViewDimension,
    ) -> BackendResult<Self> {
        let layers = if dimension == TextureViewDimension::Cube { 6 } else { 1 };
        let texture = backend.create_texture(&TextureDescriptor {
            label: Some(label.to_string()),
            array_layers: layers,
            format,
            usage: TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_DST,
            cube_compatible: dimension == TextureViewDimension::Cube,
            ..TextureDescriptor::default()
        })?;
        match backend.create_texture_view(texture, &TextureViewDescriptor::whole(dimension, layers, 1)) {
            Ok(view) => Ok(Self { texture, view }),
            Err(err) => {
                backend.destroy_texture(texture);
                Err(err)
            }
        }
    }
}

#[derive(Debug, Default)]
struct Layouts {
    frame: Option<BindGroupLayoutHandle>,
    lighting: Option<BindGroupLayoutHandle>,
    material: Option<BindGroupLayoutHandle>,
}

/// The main geometry pass
pub struct GeometryPass {
    state: NodeState,
    shaders: Arc<dyn ShaderLibrary>,
    fingerprint: FingerprintGuard<GeometryFingerprint>,
    features: Vec<&'static str>,

    layouts: Layouts,
    frame_buffer: Option<BufferHandle>,
    frame_group: Option<BindGroupHandle>,
    cascade_buffer: Option<BufferHandle>,
    shadow_sampler: Option<SamplerHandle>,
    environment_sampler: Option<SamplerHandle>,
    shadow_fallback: Option<Fallback>,
    environment_fallback: Option<Fallback>,
    lighting_group: Option<BindGroupHandle>,
    /// Views the lighting group was built from
    lighting_views: (Option<TextureViewHandle>, Option<TextureViewHandle>),
    materials: HashMap<MaterialId, MaterialBinding>,

    opaque: Option<DrawTemplate>,
    blended: Option<DrawTemplate>,
}

impl GeometryPass {
    pub fn new(name: impl Into<String>, shaders: Arc<dyn ShaderLibrary>) -> Self {
        Self {
            state: NodeState::new(name)
                .with_attachment(Attachment::color("color", TextureFormat::Rgba16Float))
                .with_attachment(Attachment::color("normal", TextureFormat::Rgba16Float))
                .with_attachment(Attachment::color("id", TextureFormat::R32Uint))
                .with_attachment(Attachment::depth("depth", TextureFormat::Depth32Float)),
            shaders,
            fingerprint: FingerprintGuard::new(),
            features: Vec::new(),
            layouts: Layouts::default(),
            frame_buffer: None,
            frame_group: None,
            cascade_buffer: None,
            shadow_sampler: None,
            environment_sampler: None,
            shadow_fallback: None,
            environment_fallback: None,
            lighting_group: None,
            lighting_views: (None, None),
            materials: HashMap::new(),
            opaque: None,
            blended: None,
        }
    }

    /// Shader features compiled into the current pipelines
    pub fn features(&self) -> &[&'static str] {
        &self.features
    }

    /// Bring the attachment set and pipeline layout in line with `fingerprint`.
    fn apply_fingerprint(
        &mut self,
        fingerprint: GeometryFingerprint,
        settings: &RenderSettings,
        backend: &mut dyn GraphicsBackend,
    ) {
        let mut samples = fingerprint.msaa_samples;
        if fingerprint.ids && samples > 1 {
            log::warn!("MSAA disabled for '{}': picking ids cannot be resolved", self.state.name());
            samples = 1;
        }
        let max_samples = backend.limits().max_sample_count.max(1);
        if samples > max_samples {
            log::warn!(
                "MSAA for '{}' clamped from {} to {} samples",
                self.state.name(),
                samples,
                max_samples
            );
            samples = max_samples;
        }

        self.state.destroy(backend);
        self.state.shader_cache_mut().clear(backend);
        self.release_lighting(backend);

        let color_format = if fingerprint.hdr {
            TextureFormat::Rgba16Float
        } else {
            TextureFormat::Rgba8Unorm
        };
        self.state.declare_attachment(
            backend,
            Attachment::color("color", color_format).with_clear_color(settings.clear_color),
        );

        let mut enabled = vec!["color", "depth"];
        let mut features = Vec::new();
        if fingerprint.normals {
            enabled.push("normal");
            features.push("NORMALS");
        }
        if fingerprint.ids {
            enabled.push("id");
            features.push("IDS");
        }
        if fingerprint.shadows {
            features.push("SHADOWS");
        }
        if fingerprint.environment {
            features.push("ENVIRONMENT");
        }
        self.state.enable_attachments(&enabled);
        self.state.set_sample_count(samples);
        self.features = features;
        self.opaque = None;
        self.blended = None;
    }

    fn release_lighting(&mut self, backend: &mut dyn GraphicsBackend) {
        if let Some(group) = self.lighting_group.take() {
            backend.destroy_bind_group(group);
        }
        self.lighting_views = (None, None);
        // The lighting layout depends on the feature set
        if let Some(layout) = self.layouts.lighting.take() {
            backend.destroy_bind_group_layout(layout);
        }
    }

    fn lighting_layout_entries(&self) -> Vec<BindGroupLayoutEntry> {
        let mut entries = Vec::new();
        if self.features.contains(&"SHADOWS") {
            entries.push(texture_entry(0, TextureSampleType::Depth, TextureViewDimension::D2Array));
            entries.push(sampler_entry(1, true));
            entries.push(uniform_entry(2, ShaderStageFlags::FRAGMENT));
        }
        if self.features.contains(&"ENVIRONMENT") {
            entries.push(texture_entry(
                3,
                TextureSampleType::Float { filterable: true },
                TextureViewDimension::Cube,
            ));
            entries.push(sampler_entry(4, false));
        }
        entries
    }

    /// Create whatever layouts, buffers and templates are missing.
    fn ensure_bindings(&mut self, backend: &mut dyn GraphicsBackend) -> BackendResult<()> {
        let frame_layout = match self.layouts.frame {
            Some(layout) => layout,
            None => {
                let layout = backend
                    .create_bind_group_layout(&[uniform_entry(0, ShaderStageFlags::VERTEX_FRAGMENT)])?;
                self.layouts.frame = Some(layout);
                layout
            }
        };
        let lighting_layout = match self.layouts.lighting {
            Some(layout) => layout,
            None => {
                let layout = backend.create_bind_group_layout(&self.lighting_layout_entries())?;
                self.layouts.lighting = Some(layout);
                layout
            }
        };
        let material_layout = match self.layouts.material {
            Some(layout) => layout,
            None => {
                let layout = backend
                    .create_bind_group_layout(&[uniform_entry(0, ShaderStageFlags::FRAGMENT)])?;
                self.layouts.material = Some(layout);
                layout
            }
        };

        if self.frame_buffer.is_none() {
            let buffer = uniform_buffer(backend, "frame", &FrameUniform::zeroed())?;
            self.frame_buffer = Some(buffer);
            self.frame_group =
                Some(backend.create_bind_group(frame_layout, &[(0, buffer_binding(buffer))])?);
        }
        if self.cascade_buffer.is_none() {
            self.cascade_buffer = Some(uniform_buffer(backend, "cascades", &CascadesUniform::zeroed())?);
        }
        if self.shadow_sampler.is_none() {
            self.shadow_sampler = Some(backend.create_sampler(&SamplerDescriptor {
                label: Some("shadow comparison".into()),
                compare: Some(CompareFunction::LessEqual),
                ..SamplerDescriptor::default()
            })?);
        }
        if self.environment_sampler.is_none() {
            self.environment_sampler = Some(backend.create_sampler(&SamplerDescriptor::default())?);
        }

        if self.opaque.is_none() || self.blended.is_none() {
            let layouts = vec![frame_layout, lighting_layout, material_layout];
            let targets = PipelineTargets::of(&self.state);
            let source = |class| {
                self.shaders
                    .source(class, &self.features)
                    .or_else(|| BuiltinShaders.source(class, &self.features))
                    .unwrap_or_default()
            };
            self.opaque = Some(DrawTemplate {
                shader: shaders::GEOMETRY,
                source: source(shaders::GEOMETRY),
                has_fragment: true,
                bind_group_layouts: layouts.clone(),
                targets: targets.clone(),
                blend: None,
                depth_write: true,
            });
            self.blended = Some(DrawTemplate {
                shader: shaders::GEOMETRY_BLEND,
                source: source(shaders::GEOMETRY_BLEND),
                has_fragment: true,
                bind_group_layouts: layouts,
                targets,
                blend: Some(BlendState::alpha_blending()),
                depth_write: false,
            });
        }
        Ok(())
    }

    /// Rebuild the lighting group if the producer views changed since last frame.
    ///
    /// Absent producers are replaced by 1x1 fallbacks so the pipeline layout
    /// never depends on the wiring.
    fn update_lighting(
        &mut self,
        shadow_map: Option<TextureViewHandle>,
        environment: Option<TextureViewHandle>,
        backend: &mut dyn GraphicsBackend,
    ) -> BackendResult<()> {
        let mut shadow_view = None;
        if self.features.contains(&"SHADOWS") {
            if shadow_map.is_none() && self.shadow_fallback.is_none() {
                self.shadow_fallback = Some(Fallback::create(
                    backend,
                    "shadow fallback",
                    TextureFormat::Depth32Float,
                    TextureViewDimension::D2Array,
                )?);
            }
            shadow_view = shadow_map.or(self.shadow_fallback.as_ref().map(|f| f.view));
        }
        let mut environment_view = None;
        if self.features.contains(&"ENVIRONMENT") {
            if environment.is_none() && self.environment_fallback.is_none() {
                self.environment_fallback = Some(Fallback::create(
                    backend,
                    "environment fallback",
                    TextureFormat::Rgba16Float,
                    TextureViewDimension::Cube,
                )?);
            }
            environment_view = environment.or(self.environment_fallback.as_ref().map(|f| f.view));
        }

        let views = (shadow_view, environment_view);
        if self.lighting_group.is_some() && self.lighting_views == views {
            return Ok(());
        }
        let (Some(layout), Some(cascades), Some(shadow_sampler), Some(environment_sampler)) = (
            self.layouts.lighting,
            self.cascade_buffer,
            self.shadow_sampler,
            self.environment_sampler,
        ) else {
            return Ok(());
        };

        let mut entries = Vec::new();
        if let Some(view) = shadow_view {
            entries.push((0, BindGroupEntry::Texture(view)));
            entries.push((1, BindGroupEntry::Sampler(shadow_sampler)));
            entries.push((2, buffer_binding(cascades)));
        }
        if let Some(view) = environment_view {
            entries.push((3, BindGroupEntry::Texture(view)));
            entries.push((4, BindGroupEntry::Sampler(environment_sampler)));
        }

        if let Some(group) = self.lighting_group.take() {
            backend.destroy_bind_group(group);
        }
        log::trace!("Rebuilding lighting bind group of '{}'", self.state.name());
        self.lighting_group = Some(backend.create_bind_group(layout, &entries)?);
        self.lighting_views = views;
        Ok(())
    }

    fn write_frame(&self, frame: &FrameInputs, cascades: Option<&[Mat4]>, backend: &mut dyn GraphicsBackend) {
        let sun = frame.lights.iter().find_map(|light| match light.kind {
            LightKind::Directional { direction } => {
                Some((direction.normalize_or_zero(), light.color * light.intensity))
            }
            LightKind::Point { .. } => None,
        });
        let (direction, color) = sun.unwrap_or((DEFAULT_SUN_DIRECTION.normalize(), Vec3::ZERO));
        if let Some(buffer) = self.frame_buffer {
            let uniform = FrameUniform {
                camera: frame.camera.uniform(),
                sun_direction: direction.extend(0.0),
                sun_color: color.extend(1.0),
            };
            backend.write_buffer(buffer, 0, bytemuck::bytes_of(&uniform));
        }

        if let Some(buffer) = self.cascade_buffer {
            let mut uniform = CascadesUniform::zeroed();
            let matrices = cascades.unwrap_or_default();
            let count = matrices.len().min(MAX_CASCADES as usize);
            uniform.view_proj[..count].copy_from_slice(&matrices[..count]);
            uniform.count[0] = count as u32;
            backend.write_buffer(buffer, 0, bytemuck::bytes_of(&uniform));
        }
    }

    /// Create or refresh the material bind group of every draw in `frame`.
    fn update_materials(&mut self, frame: &FrameInputs, backend: &mut dyn GraphicsBackend) -> BackendResult<()> {
        let Some(layout) = self.layouts.material else {
            return Ok(());
        };
        for draw in frame.all_draws() {
            let material: &MaterialRef = &draw.material;
            match self.materials.get_mut(&material.id) {
                Some(binding) => {
                    if binding.base_color != material.base_color {
                        binding.base_color = material.base_color;
                        backend.write_buffer(
                            binding.buffer,
                            0,
                            bytemuck::bytes_of(&MaterialUniform {
                                base_color: material.base_color,
                            }),
                        );
                    }
                }
                None => {
                    let buffer = uniform_buffer(
                        backend,
                        &format!("material {}", material.id.0),
                        &MaterialUniform {
                            base_color: material.base_color,
                        },
                    )?;
                    let bind_group =
                        match backend.create_bind_group(layout, &[(0, buffer_binding(buffer))]) {
                            Ok(group) => group,
                            Err(err) => {
                                backend.destroy_buffer(buffer);
                                return Err(err);
                            }
                        };
                    self.materials.insert(
                        material.id,
                        MaterialBinding {
                            buffer,
                            bind_group,
                            base_color: material.base_color,
                        },
                    );
                }
            }
        }
        Ok(())
    }

    fn release_material(binding: MaterialBinding, backend: &mut dyn GraphicsBackend) {
        backend.destroy_bind_group(binding.bind_group);
        backend.destroy_buffer(binding.buffer);
    }

    /// Number of materials with a live bind group
    pub fn material_count(&self) -> usize {
        self.materials.len()
    }
}

impl RenderNode for GeometryPass {
    fn state(&self) -> &NodeState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut NodeState {
        &mut self.state
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn reconfigure(&mut self, ctx: &mut NodeContext<'_>) -> RenderResult<()> {
        let fingerprint = GeometryFingerprint::of(ctx.settings);
        if self.fingerprint.changed(&fingerprint) {
            log::debug!("'{}' structure changed: {:?}", self.state.name(), fingerprint);
            self.apply_fingerprint(fingerprint, ctx.settings, ctx.backend);
        }
        self.state.set_clear_color("color", ctx.settings.clear_color);
        self.state.reconfigure(ctx.backend, ctx.path_size)?;
        self.ensure_bindings(ctx.backend)?;
        Ok(())
    }

    fn run(&mut self, ctx: &mut NodeContext<'_>) -> RenderResult<()> {
        let frame = ctx.require_frame(&self.state)?;
        let cascades = ctx.input(&self.state, CASCADES_INPUT).and_then(Port::matrices);
        let shadow_map = ctx.input(&self.state, SHADOW_MAP_INPUT).and_then(Port::texture_view);
        let environment = ctx.input(&self.state, ENVIRONMENT_INPUT).and_then(Port::texture_view);

        self.write_frame(frame, cascades, ctx.backend);
        self.update_lighting(shadow_map, environment, ctx.backend)?;
        self.update_materials(frame, ctx.backend)?;
        run_pass(self, ctx)
    }

    fn render(&mut self, ctx: &mut NodeContext<'_>) -> RenderResult<()> {
        let frame = ctx.require_frame(&self.state)?;
        let (Some(opaque), Some(blended), Some(frame_group), Some(lighting_group)) = (
            self.opaque.as_ref(),
            self.blended.as_ref(),
            self.frame_group,
            self.lighting_group,
        ) else {
            return Ok(());
        };

        let shared = [frame_group, lighting_group];
        let materials = &self.materials;
        let material_group = |draw: &crate::scene::DrawInstance| {
            materials.get(&draw.material.id).map(|m| m.bind_group)
        };
        let cache = self.state.shader_cache_mut();
        record_draws(
            ctx.backend,
            cache,
            opaque,
            &shared,
            frame.opaque.iter().chain(frame.transmissive.iter()),
            material_group,
        )?;
        record_draws(ctx.backend, cache, blended, &shared, &frame.alpha, material_group)?;
        Ok(())
    }

    fn precompile(&mut self, ctx: &mut NodeContext<'_>) -> RenderResult<Vec<PendingShader>> {
        let frame = ctx.require_frame(&self.state)?;
        let (Some(opaque), Some(blended)) = (self.opaque.as_ref(), self.blended.as_ref()) else {
            return Ok(Vec::new());
        };
        let cache = self.state.shader_cache();
        let mut pending = precompile_draws(
            ctx.backend,
            cache,
            opaque,
            frame.opaque.iter().chain(frame.transmissive.iter()),
        );
        pending.extend(precompile_draws(ctx.backend, cache, blended, &frame.alpha));
        Ok(pending)
    }

    fn evict_material(&mut self, material: MaterialId, backend: &mut dyn GraphicsBackend) {
        if let Some(binding) = self.materials.remove(&material) {
            Self::release_material(binding, backend);
        }
        self.state
            .shader_cache_mut()
            .evict_material(material, backend);
    }

    fn destroy(&mut self, backend: &mut dyn GraphicsBackend) {
        for (_, binding) in self.materials.drain() {
            Self::release_material(binding, backend);
        }
        self.release_lighting(backend);
        if let Some(group) = self.frame_group.take() {
            backend.destroy_bind_group(group);
        }
        for buffer in [self.frame_buffer.take(), self.cascade_buffer.take()]
            .into_iter()
            .flatten()
        {
            backend.destroy_buffer(buffer);
        }
        for fallback in [self.shadow_fallback.take(), self.environment_fallback.take()]
            .into_iter()
            .flatten()
        {
            backend.destroy_texture(fallback.texture);
        }
        for sampler in [self.shadow_sampler.take(), self.environment_sampler.take()]
            .into_iter()
            .flatten()
        {
            backend.destroy_sampler(sampler);
        }
        for layout in [self.layouts.frame.take(), self.layouts.material.take()]
            .into_iter()
            .flatten()
        {
            backend.destroy_bind_group_layout(layout);
        }
        self.state.destroy(backend);
        self.state.shader_cache_mut().clear(backend);
        self.fingerprint.reset();
        self.opaque = None;
        self.blended = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{DrawInstance, GeometryId, GeometryRef};

    fn draw(geometry: u64, material: u64) -> DrawInstance {
        DrawInstance {
            geometry: GeometryRef {
                id: GeometryId(geometry),
                topology: PrimitiveTopology::TriangleList,
                vertex_buffer: BufferHandle::from_raw(1000 + geometry),
                vertex_count: 3,
                index_buffer: None,
            },
            material: MaterialRef::new(MaterialId(material)),
            front_face: FrontFace::Ccw,
            instances: 0..1,
        }
    }

    fn frame() -> FrameInputs {
        let mut frame = FrameInputs::default();
        frame.opaque.push(draw(1, 1));
        frame.opaque.push(draw(2, 1));
        frame.alpha.push(draw(1, 2));
        frame
    }

    fn pass() -> GeometryPass {
        GeometryPass::new("main", Arc::new(BuiltinShaders))
    }

    fn enabled(pass: &GeometryPass) -> Vec<&str> {
        pass.state()
            .attachments()
            .iter()
            .filter(|a| a.enabled)
            .map(|a| a.name())
            .collect()
    }

    #[test]
    fn test_attachments_follow_settings() {
        let mut backend = RecordingBackend::new();
        let mut settings = RenderSettings::default();
        let mut node = pass();
        {
            let mut ctx = NodeContext::new(&mut backend, &settings, (64, 64));
            node.reconfigure(&mut ctx).unwrap();
        }
        assert_eq!(enabled(&node), vec!["color", "depth"]);
        assert!(node.state().output("normal").is_none());

        settings.ssao.enabled = true;
        settings.picking = true;
        settings.hdr = false;
        let mut ctx = NodeContext::new(&mut backend, &settings, (64, 64));
        node.reconfigure(&mut ctx).unwrap();

        assert_eq!(enabled(&node), vec!["color", "normal", "id", "depth"]);
        assert!(node.features().contains(&"NORMALS"));
        assert!(node.features().contains(&"IDS"));
        assert_eq!(
            node.state().attachment("color").unwrap().format(),
            TextureFormat::Rgba8Unorm
        );
        assert!(node.state().output("normal").is_some());
        assert_eq!(backend.live_texture_count(), 4);
    }

    #[test]
    fn test_msaa_clamped_and_disabled_by_picking() {
        let mut backend = RecordingBackend::with_limits(BackendLimits {
            max_sample_count: 4,
            ..BackendLimits::default()
        });
        let mut settings = RenderSettings {
            msaa_samples: 8,
            ..RenderSettings::default()
        };
        let mut node = pass();
        {
            let mut ctx = NodeContext::new(&mut backend, &settings, (64, 64));
            node.reconfigure(&mut ctx).unwrap();
        }
        assert_eq!(node.state().sample_count(), 4);

        settings.picking = true;
        let mut ctx = NodeContext::new(&mut backend, &settings, (64, 64));
        node.reconfigure(&mut ctx).unwrap();
        assert_eq!(node.state().sample_count(), 1);
    }

    #[test]
    fn test_structural_change_clears_shader_cache() {
        let mut backend = RecordingBackend::new();
        let mut settings = RenderSettings::default();
        let frame = frame();
        let mut node = pass();
        {
            let mut ctx = NodeContext::new(&mut backend, &settings, (64, 64)).with_frame(&frame);
            node.reconfigure(&mut ctx).unwrap();
            ctx.backend.begin_command_encoder(None);
            node.run(&mut ctx).unwrap();
        }
        // Two opaque geometries plus one blended draw
        assert_eq!(node.state().shader_cache().len(), 3);
        assert_eq!(node.material_count(), 2);

        settings.clear_color = [1.0, 0.0, 0.0, 1.0];
        {
            let mut ctx = NodeContext::new(&mut backend, &settings, (64, 64));
            node.reconfigure(&mut ctx).unwrap();
        }
        assert_eq!(node.state().shader_cache().len(), 3);

        settings.msaa_samples = 4;
        let mut ctx = NodeContext::new(&mut backend, &settings, (64, 64));
        node.reconfigure(&mut ctx).unwrap();
        assert!(node.state().shader_cache().is_empty());
        assert_eq!(node.state().shader_cache().invalidation_count(), 1);
        assert_eq!(backend.live_pipeline_count(), 0);
    }

    #[test]
    fn test_unwired_lighting_inputs_use_fallbacks() {
        let mut backend = RecordingBackend::new();
        let settings = RenderSettings::default();
        let frame = frame();
        let mut node = pass();
        let mut ctx = NodeContext::new(&mut backend, &settings, (64, 64)).with_frame(&frame);
        node.reconfigure(&mut ctx).unwrap();
        ctx.backend.begin_command_encoder(None);
        node.run(&mut ctx).unwrap();

        // color + depth, plus the shadow and environment fallbacks
        assert_eq!(backend.live_texture_count(), 4);
        assert!(backend
            .commands()
            .iter()
            .any(|c| matches!(c, RecordedCommand::SetBindGroup { index: 2, .. })));
    }

    #[test]
    fn test_evict_material_releases_binding() {
        let mut backend = RecordingBackend::new();
        let settings = RenderSettings::default();
        let frame = frame();
        let mut node = pass();
        {
            let mut ctx = NodeContext::new(&mut backend, &settings, (64, 64)).with_frame(&frame);
            node.reconfigure(&mut ctx).unwrap();
            ctx.backend.begin_command_encoder(None);
            node.run(&mut ctx).unwrap();
        }
        let groups = backend.live_bind_group_count();

        node.evict_material(MaterialId(2), &mut backend);
        assert_eq!(node.material_count(), 1);
        assert_eq!(node.state().shader_cache().len(), 2);
        assert_eq!(backend.live_bind_group_count(), groups - 1);

        node.destroy(&mut backend);
        assert_eq!(backend.live_bind_group_count(), 0);
        assert_eq!(backend.live_buffer_count(), 0);
        assert_eq!(backend.live_texture_count(), 0);
    }
}
