//! Procedural sky captured into a cubemap every frame

use std::any::Any;
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};

use crate::backend::*;
use crate::error::RenderResult;
use crate::pipeline::fullscreen::*;
use crate::pipeline::scene_draw::PipelineTargets;
use crate::pipeline::shaders::{self, ShaderLibrary};
use crate::render_graph::*;
use crate::settings::{EnvironmentFingerprint, FingerprintGuard};

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct FaceUniform {
    inv_view_proj: Mat4,
    zenith: Vec4,
    horizon: Vec4,
}

#[derive(Debug)]
struct FaceBinding {
    buffer: BufferHandle,
    bind_group: BindGroupHandle,
}

/// Renders one cube face per pass; wrap it in [`CubeRenderNode`] to get all six.
pub struct EnvironmentPass {
    state: NodeState,
    shaders: Arc<dyn ShaderLibrary>,
    fingerprint: FingerprintGuard<EnvironmentFingerprint>,
    zenith: Vec3,
    horizon: Vec3,
    layout: Option<BindGroupLayoutHandle>,
    faces: Vec<FaceBinding>,
}

impl EnvironmentPass {
    pub fn new(name: impl Into<String>, shaders: Arc<dyn ShaderLibrary>) -> Self {
        Self {
            state: NodeState::new(name)
                .with_attachment(Attachment::color("color", TextureFormat::Rgba16Float))
                .with_pre_pass(),
            shaders,
            fingerprint: FingerprintGuard::new(),
            zenith: Vec3::new(0.18, 0.32, 0.65),
            horizon: Vec3::new(0.75, 0.8, 0.85),
            layout: None,
            faces: Vec::new(),
        }
    }

    /// The pass wrapped so every run covers the six faces.
    pub fn cube(name: impl Into<String>, shaders: Arc<dyn ShaderLibrary>) -> CubeRenderNode<Self> {
        CubeRenderNode::new(Self::new(name, shaders))
    }

    pub fn with_sky(mut self, zenith: Vec3, horizon: Vec3) -> Self {
        self.zenith = zenith;
        self.horizon = horizon;
        self
    }

    fn release_faces(&mut self, backend: &mut dyn GraphicsBackend) {
        for face in self.faces.drain(..) {
            backend.destroy_bind_group(face.bind_group);
            backend.destroy_buffer(face.buffer);
        }
    }

    fn face_uniform(&self, face: u32) -> FaceUniform {
        let view = CubeRenderNode::<Self>::face_view(face, Vec3::ZERO);
        let projection = CubeRenderNode::<Self>::face_projection(0.1, 10.0);
        FaceUniform {
            inv_view_proj: (projection * view).inverse(),
            zenith: self.zenith.extend(1.0),
            horizon: self.horizon.extend(1.0),
        }
    }

    fn layout(&mut self, backend: &mut dyn GraphicsBackend) -> BackendResult<BindGroupLayoutHandle> {
        if let Some(layout) = self.layout {
            return Ok(layout);
        }
        let layout = backend.create_bind_group_layout(&[uniform_entry(0, ShaderStageFlags::FRAGMENT)])?;
        self.layout = Some(layout);
        Ok(layout)
    }

    fn build_faces(&mut self, backend: &mut dyn GraphicsBackend) -> BackendResult<()> {
        let layout = self.layout(backend)?;
        for face in self.faces.len() as u32..self.state.layers() {
            let uniform = self.face_uniform(face);
            let buffer = uniform_buffer(backend, &format!("{} face {}", self.state.name(), face), &uniform)?;
            let bind_group = match backend.create_bind_group(layout, &[(0, buffer_binding(buffer))]) {
                Ok(group) => group,
                Err(err) => {
                    backend.destroy_buffer(buffer);
                    return Err(err);
                }
            };
            self.faces.push(FaceBinding { buffer, bind_group });
        }
        Ok(())
    }
}

fn environment_descriptor(
    library: &dyn ShaderLibrary,
    layout: Option<BindGroupLayoutHandle>,
    targets: &PipelineTargets,
) -> RenderPipelineDescriptor {
    let source = library
        .source(shaders::ENVIRONMENT, &[])
        .unwrap_or_else(|| shaders::ENVIRONMENT_SHADER.to_string());
    fullscreen_descriptor(shaders::ENVIRONMENT, source, layout.into_iter().collect(), targets)
}

impl RenderNode for EnvironmentPass {
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
        let fingerprint = EnvironmentFingerprint::of(ctx.settings);
        if self.fingerprint.changed(&fingerprint) {
            let max = ctx.backend.limits().max_texture_dimension_2d;
            let resolution = if fingerprint.resolution > max {
                log::warn!(
                    "Environment resolution clamped from {} to {}",
                    fingerprint.resolution,
                    max
                );
                max
            } else {
                fingerprint.resolution
            };
            self.state.set_size(Some((resolution, resolution)));
        }
        self.state.reconfigure(ctx.backend, ctx.path_size)?;
        self.build_faces(ctx.backend)?;
        Ok(())
    }

    fn render(&mut self, ctx: &mut NodeContext<'_>) -> RenderResult<()> {
        let Some(face) = self.faces.get(self.state.current_layer() as usize) else {
            return Ok(());
        };
        let bind_groups = [face.bind_group];
        let targets = PipelineTargets::of(&self.state);
        let (library, layout) = (&self.shaders, self.layout);
        draw_fullscreen(
            ctx.backend,
            self.state.shader_cache_mut(),
            shaders::ENVIRONMENT,
            &bind_groups,
            || environment_descriptor(library.as_ref(), layout, &targets),
        )?;
        Ok(())
    }

    fn precompile(&mut self, ctx: &mut NodeContext<'_>) -> RenderResult<Vec<PendingShader>> {
        if self.layout.is_none() {
            return Ok(Vec::new());
        }
        let targets = PipelineTargets::of(&self.state);
        Ok(precompile_fullscreen(
            ctx.backend,
            self.state.shader_cache(),
            shaders::ENVIRONMENT,
            || environment_descriptor(self.shaders.as_ref(), self.layout, &targets),
        )
        .into_iter()
        .collect())
    }

    fn destroy(&mut self, backend: &mut dyn GraphicsBackend) {
        self.release_faces(backend);
        if let Some(layout) = self.layout.take() {
            backend.destroy_bind_group_layout(layout);
        }
        self.state.destroy(backend);
        self.state.shader_cache_mut().clear(backend);
        self.fingerprint.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::shaders::BuiltinShaders;
    use crate::scene::FrameInputs;
    use crate::settings::RenderSettings;

    #[test]
    fn test_cube_renders_six_faces_with_one_pipeline() {
        let mut backend = RecordingBackend::new();
        let mut settings = RenderSettings::default();
        settings.environment.resolution = 32;
        let frame = FrameInputs::default();

        let mut node = EnvironmentPass::cube("environment", Arc::new(BuiltinShaders));
        let mut ctx = NodeContext::new(&mut backend, &settings, (640, 480)).with_frame(&frame);
        node.reconfigure(&mut ctx).unwrap();
        ctx.backend.begin_command_encoder(None);
        node.run(&mut ctx).unwrap();

        assert_eq!(backend.pass_labels().len(), 6);
        let draws = backend
            .commands()
            .iter()
            .filter(|c| matches!(c, RecordedCommand::Draw { .. }))
            .count();
        assert_eq!(draws, 6);
        assert_eq!(node.state().shader_cache().len(), 1);
        assert_eq!(backend.live_buffer_count(), 6);

        let texture = node.state().attachment("color").unwrap().texture().unwrap();
        let desc = backend.texture_descriptor(texture.handle).unwrap();
        assert!(desc.cube_compatible);
        assert_eq!((desc.width, desc.height), (32, 32));
    }

    #[test]
    fn test_resolution_change_reallocates() {
        let mut backend = RecordingBackend::new();
        let mut settings = RenderSettings::default();
        settings.environment.resolution = 32;

        let mut node = EnvironmentPass::cube("environment", Arc::new(BuiltinShaders));
        {
            let mut ctx = NodeContext::new(&mut backend, &settings, (640, 480));
            node.reconfigure(&mut ctx).unwrap();
            node.reconfigure(&mut ctx).unwrap();
        }
        assert_eq!(backend.textures_created(), 1);

        settings.environment.resolution = 64;
        let mut ctx = NodeContext::new(&mut backend, &settings, (640, 480));
        node.reconfigure(&mut ctx).unwrap();
        assert_eq!(backend.textures_created(), 2);
        assert_eq!(backend.live_texture_count(), 1);
    }
}
