//! Cascaded shadow maps for the first shadow-casting directional light

use std::any::Any;
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

use crate::backend::*;
use crate::error::RenderResult;
use crate::pipeline::fullscreen::{buffer_binding, uniform_buffer, uniform_entry};
use crate::pipeline::scene_draw::{precompile_draws, record_draws, DrawTemplate, PipelineTargets};
use crate::pipeline::shaders::{self, ShaderLibrary};
use crate::render_graph::*;
use crate::scene::{CameraFrustum, FrameInputs};
use crate::settings::{FingerprintGuard, ShadowFingerprint};

/// Upper bound on cascades, matching the array size in the geometry shader
pub const MAX_CASCADES: u32 = 8;

/// Output port carrying one light view-projection per cascade
pub const CASCADES_PORT: &str = "cascades";

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct CascadeUniform {
    view_proj: Mat4,
}

#[derive(Debug)]
struct CascadeBinding {
    buffer: BufferHandle,
    bind_group: BindGroupHandle,
}

/// Depth-only pre-pass rendering one array layer per cascade
pub struct ShadowPass {
    state: NodeState,
    shaders: Arc<dyn ShaderLibrary>,
    fingerprint: FingerprintGuard<ShadowFingerprint>,
    layout: Option<BindGroupLayoutHandle>,
    cascades: Vec<CascadeBinding>,
    template: Option<DrawTemplate>,
}

impl ShadowPass {
    pub fn new(name: impl Into<String>, shaders: Arc<dyn ShaderLibrary>) -> Self {
        Self {
            state: NodeState::new(name)
                .with_attachment(
                    Attachment::depth("depth", TextureFormat::Depth32Float).with_array_view(),
                )
                .with_pre_pass(),
            shaders,
            fingerprint: FingerprintGuard::new(),
            layout: None,
            cascades: Vec::new(),
            template: None,
        }
    }

    /// Cascades actually allocated, after clamping to the device
    pub fn cascade_count(&self) -> u32 {
        self.state.layers()
    }

    fn release_cascades(&mut self, backend: &mut dyn GraphicsBackend) {
        for binding in self.cascades.drain(..) {
            backend.destroy_bind_group(binding.bind_group);
            backend.destroy_buffer(binding.buffer);
        }
    }

    fn apply_fingerprint(&mut self, fingerprint: ShadowFingerprint, limits: BackendLimits) {
        let max_layers = limits.max_texture_array_layers.min(MAX_CASCADES);
        let cascades = if fingerprint.cascades > max_layers {
            log::warn!(
                "Shadow cascades clamped from {} to {} by device limits",
                fingerprint.cascades,
                max_layers
            );
            max_layers
        } else {
            fingerprint.cascades
        };
        let resolution = if fingerprint.resolution > limits.max_texture_dimension_2d {
            log::warn!(
                "Shadow map resolution clamped from {} to {}",
                fingerprint.resolution,
                limits.max_texture_dimension_2d
            );
            limits.max_texture_dimension_2d
        } else {
            fingerprint.resolution
        };

        self.state.set_layers(cascades);
        self.state.set_size(Some((resolution, resolution)));
        self.template = None;
    }

    fn build_bindings(&mut self, backend: &mut dyn GraphicsBackend) -> BackendResult<()> {
        let layout = match self.layout {
            Some(layout) => layout,
            None => {
                let layout = backend
                    .create_bind_group_layout(&[uniform_entry(0, ShaderStageFlags::VERTEX)])?;
                self.layout = Some(layout);
                layout
            }
        };

        while self.cascades.len() < self.state.layers() as usize {
            let label = format!("{} cascade {}", self.state.name(), self.cascades.len());
            let buffer = uniform_buffer(
                backend,
                &label,
                &CascadeUniform {
                    view_proj: Mat4::IDENTITY,
                },
            )?;
            let bind_group = match backend.create_bind_group(layout, &[(0, buffer_binding(buffer))]) {
                Ok(group) => group,
                Err(err) => {
                    backend.destroy_buffer(buffer);
                    return Err(err);
                }
            };
            self.cascades.push(CascadeBinding { buffer, bind_group });
        }

        if self.template.is_none() {
            let source = self
                .shaders
                .source(shaders::SHADOW, &[])
                .unwrap_or_else(|| shaders::SHADOW_SHADER.to_string());
            self.template = Some(DrawTemplate {
                shader: shaders::SHADOW,
                source,
                has_fragment: false,
                bind_group_layouts: vec![layout],
                targets: PipelineTargets::of(&self.state),
                blend: None,
                depth_write: true,
            });
        }
        Ok(())
    }

    fn casters(frame: &FrameInputs) -> impl Iterator<Item = &crate::scene::DrawInstance> {
        frame.opaque.iter().chain(frame.transmissive.iter())
    }
}

impl RenderNode for ShadowPass {
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
        let fingerprint = ShadowFingerprint::of(ctx.settings);
        if self.fingerprint.changed(&fingerprint) {
            self.release_cascades(ctx.backend);
            self.state.shader_cache_mut().clear(ctx.backend);
            self.apply_fingerprint(fingerprint, ctx.backend.limits());
        }
        self.state.reconfigure(ctx.backend, ctx.path_size)?;
        self.build_bindings(ctx.backend)?;
        Ok(())
    }

    fn run(&mut self, ctx: &mut NodeContext<'_>) -> RenderResult<()> {
        let frame = ctx.require_frame(&self.state)?;
        let matrices = match frame.shadow_light().and_then(|light| light.direction()) {
            Some(direction) => {
                let splits = cascade_splits(
                    frame.camera.near,
                    frame.camera.far,
                    self.state.layers(),
                    ctx.settings.shadows.split_lambda,
                );
                cascade_matrices(&frame.camera, direction, &splits)
            }
            None => Vec::new(),
        };
        for (binding, view_proj) in self.cascades.iter().zip(&matrices) {
            ctx.backend.write_buffer(
                binding.buffer,
                0,
                bytemuck::bytes_of(&CascadeUniform {
                    view_proj: *view_proj,
                }),
            );
        }
        self.state
            .set_output(CASCADES_PORT, PortValue::Matrices(matrices));

        run_layers(self, ctx)
    }

    fn render(&mut self, ctx: &mut NodeContext<'_>) -> RenderResult<()> {
        let frame = ctx.require_frame(&self.state)?;
        if frame.shadow_light().is_none() {
            return Ok(());
        }
        let (Some(template), Some(binding)) = (
            self.template.as_ref(),
            self.cascades.get(self.state.current_layer() as usize),
        ) else {
            return Ok(());
        };

        let shared = [binding.bind_group];
        record_draws(
            ctx.backend,
            self.state.shader_cache_mut(),
            template,
            &shared,
            Self::casters(frame),
            |_| None,
        )?;
        Ok(())
    }

    fn precompile(&mut self, ctx: &mut NodeContext<'_>) -> RenderResult<Vec<PendingShader>> {
        let frame = ctx.require_frame(&self.state)?;
        let Some(template) = self.template.as_ref() else {
            return Ok(Vec::new());
        };
        Ok(precompile_draws(
            ctx.backend,
            self.state.shader_cache(),
            template,
            Self::casters(frame),
        ))
    }

    fn destroy(&mut self, backend: &mut dyn GraphicsBackend) {
        self.release_cascades(backend);
        if let Some(layout) = self.layout.take() {
            backend.destroy_bind_group_layout(layout);
        }
        self.state.destroy(backend);
        self.state.shader_cache_mut().clear(backend);
        self.state.clear_output(CASCADES_PORT);
        self.fingerprint.reset();
        self.template = None;
    }
}

/// View distances bounding each cascade, `count + 1` values from `near` to `far`.
///
/// `lambda` blends the uniform split (0) with the logarithmic one (1).
pub fn cascade_splits(near: f32, far: f32, count: u32, lambda: f32) -> Vec<f32> {
    let count = count.max(1);
    let near = near.max(f32::EPSILON);
    let lambda = lambda.clamp(0.0, 1.0);
    (0..=count)
        .map(|i| {
            let t = i as f32 / count as f32;
            let log = near * (far / near).powf(t);
            let uniform = near + (far - near) * t;
            lambda * log + (1.0 - lambda) * uniform
        })
        .collect()
}

/// Light view-projection for each window of `splits`.
///
/// Each cascade is an orthographic box around the bounding sphere of its
/// frustum slice, so its extent does not change as the camera rotates.
pub fn cascade_matrices(camera: &CameraFrustum, direction: Vec3, splits: &[f32]) -> Vec<Mat4> {
    let direction = direction.normalize_or_zero();
    if direction == Vec3::ZERO {
        return Vec::new();
    }
    let up = if direction.dot(Vec3::Y).abs() > 0.99 {
        Vec3::Z
    } else {
        Vec3::Y
    };

    splits
        .windows(2)
        .map(|window| {
            let corners = camera.slice_corners(window[0], window[1]);
            let center = corners.iter().copied().sum::<Vec3>() / corners.len() as f32;
            let radius = corners
                .iter()
                .map(|corner| corner.distance(center))
                .fold(0.0f32, f32::max);
            // Snap so small camera moves don't change the projection size
            let radius = (radius * 16.0).ceil() / 16.0;

            let eye = center - direction * radius * 2.0;
            let view = Mat4::look_to_rh(eye, direction, up);
            let projection =
                Mat4::orthographic_rh(-radius, radius, -radius, radius, 0.0, radius * 3.0);
            projection * view
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::shaders::BuiltinShaders;
    use crate::scene::{Light, MaterialRef};
    use crate::settings::RenderSettings;
    use glam::Vec4;

    #[test]
    fn test_splits_cover_range() {
        let splits = cascade_splits(0.1, 100.0, 4, 0.5);
        assert_eq!(splits.len(), 5);
        assert!((splits[0] - 0.1).abs() < 1e-5);
        assert!((splits[4] - 100.0).abs() < 1e-3);
        assert!(splits.windows(2).all(|w| w[0] < w[1]));

        let uniform = cascade_splits(0.0, 100.0, 4, 0.0);
        assert!((uniform[2] - 50.0).abs() < 1e-3);
    }

    #[test]
    fn test_slice_fits_inside_cascade() {
        let camera = CameraFrustum::default();
        let splits = cascade_splits(camera.near, camera.far, 3, 0.5);
        let direction = Vec3::new(-0.3, -1.0, -0.2);
        let matrices = cascade_matrices(&camera, direction, &splits);
        assert_eq!(matrices.len(), 3);

        for (i, matrix) in matrices.iter().enumerate() {
            for corner in camera.slice_corners(splits[i], splits[i + 1]) {
                let clip = *matrix * corner.extend(1.0);
                let ndc = clip.truncate() / clip.w;
                assert!(ndc.x.abs() <= 1.0 + 1e-4 && ndc.y.abs() <= 1.0 + 1e-4);
                assert!(ndc.z >= 0.0 && ndc.z <= 1.0);
            }
        }
    }

    #[test]
    fn test_cascades_clamped_to_array_layer_limit() {
        let mut backend = RecordingBackend::with_limits(BackendLimits {
            max_texture_array_layers: 2,
            ..BackendLimits::default()
        });
        let mut settings = RenderSettings::default();
        settings.shadows.cascades = 4;
        settings.shadows.resolution = 64;

        let mut pass = ShadowPass::new("shadow", Arc::new(BuiltinShaders));
        let mut ctx = NodeContext::new(&mut backend, &settings, (320, 240));
        pass.reconfigure(&mut ctx).unwrap();

        assert_eq!(pass.cascade_count(), 2);
        let texture = pass.state().attachment("depth").unwrap().texture().unwrap();
        let desc = backend.texture_descriptor(texture.handle).unwrap();
        assert_eq!(desc.array_layers, 2);
        assert_eq!((desc.width, desc.height), (64, 64));
    }

    #[test]
    fn test_run_renders_each_cascade_and_publishes_matrices() {
        let mut backend = RecordingBackend::new();
        let mut settings = RenderSettings::default();
        settings.shadows.cascades = 3;
        settings.shadows.resolution = 32;

        let mut frame = FrameInputs::default();
        frame.lights.push(Light::directional(Vec3::new(0.0, -1.0, -0.5)));
        frame.opaque.push(crate::scene::DrawInstance {
            geometry: crate::scene::GeometryRef {
                id: crate::scene::GeometryId(7),
                topology: PrimitiveTopology::TriangleList,
                vertex_buffer: BufferHandle::from_raw(900),
                vertex_count: 36,
                index_buffer: None,
            },
            material: MaterialRef {
                base_color: Vec4::ONE,
                ..MaterialRef::new(crate::scene::MaterialId(1))
            },
            front_face: FrontFace::Ccw,
            instances: 0..1,
        });

        let mut pass = ShadowPass::new("shadow", Arc::new(BuiltinShaders));
        {
            let mut ctx = NodeContext::new(&mut backend, &settings, (320, 240));
            pass.reconfigure(&mut ctx).unwrap();
        }
        backend.begin_command_encoder(None);
        {
            let mut ctx = NodeContext::new(&mut backend, &settings, (320, 240)).with_frame(&frame);
            pass.run(&mut ctx).unwrap();
        }

        assert_eq!(
            backend.pass_labels(),
            vec!["shadow[0]", "shadow[1]", "shadow[2]"]
        );
        let draws = backend
            .commands()
            .iter()
            .filter(|c| matches!(c, RecordedCommand::Draw { .. }))
            .count();
        assert_eq!(draws, 3);
        assert_eq!(pass.state().shader_cache().len(), 1);
        let matrices = pass.state().output(CASCADES_PORT).unwrap().matrices().unwrap();
        assert_eq!(matrices.len(), 3);
        assert_eq!(pass.state().current_layer(), 0);
    }

    #[test]
    fn test_no_light_clears_without_drawing() {
        let mut backend = RecordingBackend::new();
        let mut settings = RenderSettings::default();
        settings.shadows.cascades = 2;
        settings.shadows.resolution = 16;
        let frame = FrameInputs::default();

        let mut pass = ShadowPass::new("shadow", Arc::new(BuiltinShaders));
        let mut ctx = NodeContext::new(&mut backend, &settings, (320, 240));
        pass.reconfigure(&mut ctx).unwrap();
        let mut ctx = ctx.with_frame(&frame);
        ctx.backend.begin_command_encoder(None);
        pass.run(&mut ctx).unwrap();

        assert_eq!(backend.pass_labels().len(), 2);
        assert!(!backend
            .commands()
            .iter()
            .any(|c| matches!(c, RecordedCommand::Draw { .. })));
        assert!(pass
            .state()
            .output(CASCADES_PORT)
            .unwrap()
            .matrices()
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_destroy_releases_buffers() {
        let mut backend = RecordingBackend::new();
        let mut settings = RenderSettings::default();
        settings.shadows.resolution = 16;
        let mut pass = ShadowPass::new("shadow", Arc::new(BuiltinShaders));
        let mut ctx = NodeContext::new(&mut backend, &settings, (320, 240));
        pass.reconfigure(&mut ctx).unwrap();
        pass.destroy(&mut backend);

        assert_eq!(backend.live_buffer_count(), 0);
        assert_eq!(backend.live_texture_count(), 0);
        assert_eq!(backend.live_bind_group_count(), 0);
    }
}
