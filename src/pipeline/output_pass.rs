//! Final composite into the display format

use std::any::Any;
use std::sync::Arc;

use crate::backend::*;
use crate::error::RenderResult;
use crate::pipeline::fullscreen::*;
use crate::pipeline::scene_draw::PipelineTargets;
use crate::pipeline::shaders::{self, ShaderLibrary};
use crate::render_graph::*;
use crate::settings::{FingerprintGuard, OutputFingerprint};

pub const COLOR_INPUT: &str = "color";
pub const AO_INPUT: &str = "ao";

/// Resolves the main color into an sRGB target, applying AO and tonemapping
pub struct OutputPass {
    state: NodeState,
    shaders: Arc<dyn ShaderLibrary>,
    fingerprint: FingerprintGuard<OutputFingerprint>,
    features: Vec<&'static str>,
    layout: Option<BindGroupLayoutHandle>,
    sampler: Option<SamplerHandle>,
    bind_group: Option<BindGroupHandle>,
    bound_views: Vec<TextureViewHandle>,
}

impl OutputPass {
    pub fn new(shaders: Arc<dyn ShaderLibrary>) -> Self {
        Self {
            state: NodeState::new(OUTPUT_NODE)
                .with_attachment(Attachment::color("color", TextureFormat::Rgba8UnormSrgb)),
            shaders,
            fingerprint: FingerprintGuard::new(),
            features: Vec::new(),
            layout: None,
            sampler: None,
            bind_group: None,
            bound_views: Vec::new(),
        }
    }

    pub fn features(&self) -> &[&'static str] {
        &self.features
    }

    fn release_bind_group(&mut self, backend: &mut dyn GraphicsBackend) {
        if let Some(group) = self.bind_group.take() {
            backend.destroy_bind_group(group);
        }
        self.bound_views.clear();
    }

    fn release_layout(&mut self, backend: &mut dyn GraphicsBackend) {
        if let Some(layout) = self.layout.take() {
            backend.destroy_bind_group_layout(layout);
        }
    }

    fn ensure_layout(&mut self, backend: &mut dyn GraphicsBackend) -> BackendResult<()> {
        if self.sampler.is_none() {
            self.sampler = Some(backend.create_sampler(&SamplerDescriptor {
                label: Some("output linear".into()),
                ..SamplerDescriptor::default()
            })?);
        }
        if self.layout.is_none() {
            let float = TextureSampleType::Float { filterable: true };
            let mut entries = vec![
                texture_entry(0, float, TextureViewDimension::D2),
                sampler_entry(1, false),
            ];
            if self.features.contains(&"AO") {
                entries.push(texture_entry(2, float, TextureViewDimension::D2));
            }
            self.layout = Some(backend.create_bind_group_layout(&entries)?);
        }
        Ok(())
    }

    fn update_bind_group(
        &mut self,
        views: Vec<TextureViewHandle>,
        backend: &mut dyn GraphicsBackend,
    ) -> BackendResult<()> {
        if self.bind_group.is_some() && self.bound_views == views {
            return Ok(());
        }
        let (Some(layout), Some(sampler)) = (self.layout, self.sampler) else {
            return Ok(());
        };
        let mut entries = vec![(1, BindGroupEntry::Sampler(sampler))];
        for (view, binding) in views.iter().zip([0, 2]) {
            entries.push((binding, BindGroupEntry::Texture(*view)));
        }
        self.release_bind_group(backend);
        self.bind_group = Some(backend.create_bind_group(layout, &entries)?);
        self.bound_views = views;
        Ok(())
    }
}

fn output_descriptor(
    library: &dyn ShaderLibrary,
    features: &[&str],
    layout: Option<BindGroupLayoutHandle>,
    targets: &PipelineTargets,
) -> RenderPipelineDescriptor {
    let source = library
        .source(shaders::OUTPUT, features)
        .unwrap_or_else(|| shaders::preprocess(shaders::OUTPUT_SHADER, features));
    fullscreen_descriptor(shaders::OUTPUT, source, layout.into_iter().collect(), targets)
}

impl RenderNode for OutputPass {
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
        let mut fingerprint = OutputFingerprint::of(ctx.settings);
        // AO is composited only when something actually provides it
        fingerprint.ao &= ctx.input(&self.state, AO_INPUT).is_some();

        if self.fingerprint.changed(&fingerprint) {
            self.release_bind_group(ctx.backend);
            self.state.shader_cache_mut().clear(ctx.backend);
            self.release_layout(ctx.backend);
            self.features.clear();
            if fingerprint.ao {
                self.features.push("AO");
            }
            if fingerprint.tonemap {
                self.features.push("TONEMAP");
            }
        }
        self.state.reconfigure(ctx.backend, ctx.path_size)?;
        self.ensure_layout(ctx.backend)?;
        Ok(())
    }

    fn run(&mut self, ctx: &mut NodeContext<'_>) -> RenderResult<()> {
        let color = ctx
            .require_input(&self.state, COLOR_INPUT)?
            .texture_view()
            .ok_or_else(|| crate::error::RenderGraphError::MissingInput {
                node: self.state.name().to_string(),
                port: COLOR_INPUT.to_string(),
            })?;
        let mut views = vec![color];
        if self.features.contains(&"AO") {
            if let Some(ao) = ctx.input(&self.state, AO_INPUT).and_then(Port::texture_view) {
                views.push(ao);
            }
        }
        self.update_bind_group(views, ctx.backend)?;
        run_pass(self, ctx)
    }

    fn render(&mut self, ctx: &mut NodeContext<'_>) -> RenderResult<()> {
        let Some(group) = self.bind_group else {
            return Ok(());
        };
        let targets = PipelineTargets::of(&self.state);
        let (library, features, layout) = (&self.shaders, &self.features, self.layout);
        draw_fullscreen(
            ctx.backend,
            self.state.shader_cache_mut(),
            shaders::OUTPUT,
            &[group],
            || output_descriptor(library.as_ref(), features, layout, &targets),
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
            shaders::OUTPUT,
            || output_descriptor(self.shaders.as_ref(), &self.features, self.layout, &targets),
        )
        .into_iter()
        .collect())
    }

    fn destroy(&mut self, backend: &mut dyn GraphicsBackend) {
        self.release_bind_group(backend);
        self.release_layout(backend);
        if let Some(sampler) = self.sampler.take() {
            backend.destroy_sampler(sampler);
        }
        self.state.destroy(backend);
        self.state.shader_cache_mut().clear(backend);
        self.fingerprint.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RenderGraphError;
    use crate::pipeline::shaders::BuiltinShaders;
    use crate::scene::FrameInputs;
    use crate::settings::RenderSettings;

    #[test]
    fn test_unwired_color_is_an_error() {
        let mut backend = RecordingBackend::new();
        let settings = RenderSettings::default();
        let frame = FrameInputs::default();
        let mut node = OutputPass::new(Arc::new(BuiltinShaders));
        let mut ctx = NodeContext::new(&mut backend, &settings, (64, 64)).with_frame(&frame);
        node.reconfigure(&mut ctx).unwrap();

        assert_eq!(
            node.run(&mut ctx),
            Err(RenderGraphError::MissingInput {
                node: "output".into(),
                port: "color".into(),
            })
        );
    }

    #[test]
    fn test_ao_feature_requires_wired_input() {
        let mut backend = RecordingBackend::new();
        let mut settings = RenderSettings::default();
        settings.ssao.enabled = true;
        let mut node = OutputPass::new(Arc::new(BuiltinShaders));
        let mut ctx = NodeContext::new(&mut backend, &settings, (64, 64));
        node.reconfigure(&mut ctx).unwrap();

        assert_eq!(node.features(), &["TONEMAP"]);
    }
}
