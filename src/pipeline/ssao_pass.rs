//! Screen-space ambient occlusion at a fraction of the path resolution

use std::any::Any;
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec4};

use crate::backend::*;
use crate::error::RenderResult;
use crate::pipeline::fullscreen::*;
use crate::pipeline::scene_draw::PipelineTargets;
use crate::pipeline::shaders::{self, ShaderLibrary};
use crate::render_graph::*;

pub const DEPTH_INPUT: &str = "depth";
pub const NORMAL_INPUT: &str = "normal";

const BIAS: f32 = 0.025;

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct SsaoUniform {
    proj: Mat4,
    inv_proj: Mat4,
    radius_bias: Vec4,
}

pub struct SsaoPass {
    state: NodeState,
    shaders: Arc<dyn ShaderLibrary>,
    layout: Option<BindGroupLayoutHandle>,
    params: Option<BufferHandle>,
    bind_group: Option<BindGroupHandle>,
    bound_views: Option<(TextureViewHandle, TextureViewHandle)>,
}

impl SsaoPass {
    pub fn new(name: impl Into<String>, shaders: Arc<dyn ShaderLibrary>) -> Self {
        Self {
            state: NodeState::new(name)
                .with_attachment(
                    Attachment::color("ao", TextureFormat::R8Unorm).with_clear_color([1.0; 4]),
                )
                .with_scale_factor(0.5),
            shaders,
            layout: None,
            params: None,
            bind_group: None,
            bound_views: None,
        }
    }

    fn ensure_resources(&mut self, backend: &mut dyn GraphicsBackend) -> BackendResult<()> {
        if self.layout.is_none() {
            self.layout = Some(backend.create_bind_group_layout(&[
                texture_entry(0, TextureSampleType::Depth, TextureViewDimension::D2),
                texture_entry(
                    1,
                    TextureSampleType::Float { filterable: false },
                    TextureViewDimension::D2,
                ),
                uniform_entry(2, ShaderStageFlags::FRAGMENT),
            ])?);
        }
        if self.params.is_none() {
            self.params = Some(uniform_buffer(backend, "ssao params", &SsaoUniform::zeroed())?);
        }
        Ok(())
    }

    fn update_bind_group(
        &mut self,
        views: (TextureViewHandle, TextureViewHandle),
        backend: &mut dyn GraphicsBackend,
    ) -> BackendResult<()> {
        if self.bind_group.is_some() && self.bound_views == Some(views) {
            return Ok(());
        }
        let (Some(layout), Some(params)) = (self.layout, self.params) else {
            return Ok(());
        };
        if let Some(group) = self.bind_group.take() {
            backend.destroy_bind_group(group);
        }
        self.bind_group = Some(backend.create_bind_group(
            layout,
            &[
                (0, BindGroupEntry::Texture(views.0)),
                (1, BindGroupEntry::Texture(views.1)),
                (2, buffer_binding(params)),
            ],
        )?);
        self.bound_views = Some(views);
        Ok(())
    }
}

fn ssao_descriptor(
    library: &dyn ShaderLibrary,
    layout: Option<BindGroupLayoutHandle>,
    targets: &PipelineTargets,
) -> RenderPipelineDescriptor {
    let source = library
        .source(shaders::SSAO, &[])
        .unwrap_or_else(|| shaders::SSAO_SHADER.to_string());
    fullscreen_descriptor(shaders::SSAO, source, layout.into_iter().collect(), targets)
}

impl RenderNode for SsaoPass {
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
        self.state.set_scale_factor(ctx.settings.ssao.scale);
        self.state.reconfigure(ctx.backend, ctx.path_size)?;
        self.ensure_resources(ctx.backend)?;
        Ok(())
    }

    fn run(&mut self, ctx: &mut NodeContext<'_>) -> RenderResult<()> {
        let frame = ctx.require_frame(&self.state)?;
        let depth = ctx.input(&self.state, DEPTH_INPUT).and_then(Port::texture_view);
        let normal = ctx.input(&self.state, NORMAL_INPUT).and_then(Port::texture_view);

        match (depth, normal) {
            (Some(depth), Some(normal)) => self.update_bind_group((depth, normal), ctx.backend)?,
            _ => {
                log::trace!("'{}' has no depth or normal input", self.state.name());
                if let Some(group) = self.bind_group.take() {
                    ctx.backend.destroy_bind_group(group);
                }
                self.bound_views = None;
            }
        }

        if let Some(params) = self.params {
            let proj = frame.camera.projection;
            let uniform = SsaoUniform {
                proj,
                inv_proj: proj.inverse(),
                radius_bias: Vec4::new(ctx.settings.ssao.radius, BIAS, 0.0, 0.0),
            };
            ctx.backend.write_buffer(params, 0, bytemuck::bytes_of(&uniform));
        }
        run_pass(self, ctx)
    }

    fn render(&mut self, ctx: &mut NodeContext<'_>) -> RenderResult<()> {
        // Without inputs the pass only clears to unoccluded
        let Some(group) = self.bind_group else {
            return Ok(());
        };
        let targets = PipelineTargets::of(&self.state);
        let (library, layout) = (&self.shaders, self.layout);
        draw_fullscreen(
            ctx.backend,
            self.state.shader_cache_mut(),
            shaders::SSAO,
            &[group],
            || ssao_descriptor(library.as_ref(), layout, &targets),
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
            shaders::SSAO,
            || ssao_descriptor(self.shaders.as_ref(), self.layout, &targets),
        )
        .into_iter()
        .collect())
    }

    fn destroy(&mut self, backend: &mut dyn GraphicsBackend) {
        if let Some(group) = self.bind_group.take() {
            backend.destroy_bind_group(group);
        }
        if let Some(buffer) = self.params.take() {
            backend.destroy_buffer(buffer);
        }
        if let Some(layout) = self.layout.take() {
            backend.destroy_bind_group_layout(layout);
        }
        self.bound_views = None;
        self.state.destroy(backend);
        self.state.shader_cache_mut().clear(backend);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::shaders::BuiltinShaders;
    use crate::settings::RenderSettings;

    #[test]
    fn test_runs_at_reduced_resolution() {
        let mut backend = RecordingBackend::new();
        let mut settings = RenderSettings::default();
        settings.ssao.enabled = true;
        settings.ssao.scale = 0.5;

        let mut node = SsaoPass::new("ssao", Arc::new(BuiltinShaders));
        let mut ctx = NodeContext::new(&mut backend, &settings, (301, 200));
        node.reconfigure(&mut ctx).unwrap();

        assert_eq!(node.state().attachment("ao").unwrap().size(), (151, 100));
    }

    #[test]
    fn test_missing_inputs_only_clear() {
        let mut backend = RecordingBackend::new();
        let settings = RenderSettings::default();
        let frame = crate::scene::FrameInputs::default();

        let mut node = SsaoPass::new("ssao", Arc::new(BuiltinShaders));
        let mut ctx = NodeContext::new(&mut backend, &settings, (64, 64)).with_frame(&frame);
        node.reconfigure(&mut ctx).unwrap();
        ctx.backend.begin_command_encoder(None);
        node.run(&mut ctx).unwrap();

        assert_eq!(backend.pass_labels(), vec!["ssao"]);
        assert!(!backend
            .commands()
            .iter()
            .any(|c| matches!(c, RecordedCommand::Draw { .. })));
        assert!(node.state().shader_cache().is_empty());
    }
}
