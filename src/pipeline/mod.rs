//! Standard rendering pipeline
//!
//! This module wires the concrete passes into one render path:
//! 1. Shadow pre-pass - One depth layer per cascade
//! 2. Environment pre-pass - Procedural sky captured into a cubemap
//! 3. Main pass - Lit geometry, plus normals and ids when requested
//! 4. SSAO - Optional, at reduced resolution
//! 5. Output - Composite into the display format
//!
//! Optional nodes are added and removed by [`StandardLayout`] whenever the
//! path is reconfigured.

pub mod environment_pass;
pub mod fullscreen;
pub mod geometry_pass;
pub mod output_pass;
pub mod scene_draw;
pub mod shaders;
pub mod shadow_pass;
pub mod ssao_pass;

pub use environment_pass::EnvironmentPass;
pub use geometry_pass::GeometryPass;
pub use output_pass::OutputPass;
pub use shaders::{BuiltinShaders, ShaderLibrary};
pub use shadow_pass::ShadowPass;
pub use ssao_pass::SsaoPass;

use std::sync::Arc;

use crate::backend::GraphicsBackend;
use crate::error::RenderResult;
use crate::render_graph::{PathLayout, RenderNode, RenderPath, OUTPUT_NODE};

pub const SHADOW_NODE: &str = "shadow";
pub const ENVIRONMENT_NODE: &str = "environment";
pub const MAIN_NODE: &str = "main";
pub const SSAO_NODE: &str = "ssao";

/// Node set and wiring of the standard path, derived from its settings
pub struct StandardLayout {
    shaders: Arc<dyn ShaderLibrary>,
}

impl StandardLayout {
    pub fn new(shaders: Arc<dyn ShaderLibrary>) -> Self {
        Self { shaders }
    }
}

impl Default for StandardLayout {
    fn default() -> Self {
        Self::new(Arc::new(BuiltinShaders))
    }
}

/// Add the node when `enabled`, remove and destroy it otherwise.
fn toggle_node<N: RenderNode>(
    path: &mut RenderPath,
    backend: &mut dyn GraphicsBackend,
    name: &str,
    enabled: bool,
    make: impl FnOnce() -> N,
) {
    if enabled {
        path.ensure_node(name, make);
    } else {
        path.remove_node(name, backend);
    }
}

impl PathLayout for StandardLayout {
    fn reconfigure_node_path(
        &mut self,
        path: &mut RenderPath,
        backend: &mut dyn GraphicsBackend,
    ) -> RenderResult<()> {
        let settings = path.settings().clone();
        let shaders = &self.shaders;

        path.ensure_node(MAIN_NODE, || GeometryPass::new(MAIN_NODE, shaders.clone()));
        path.ensure_node(OUTPUT_NODE, || OutputPass::new(shaders.clone()));
        toggle_node(path, backend, SHADOW_NODE, settings.shadows.enabled, || {
            ShadowPass::new(SHADOW_NODE, shaders.clone())
        });
        toggle_node(path, backend, ENVIRONMENT_NODE, settings.environment.enabled, || {
            EnvironmentPass::cube(ENVIRONMENT_NODE, shaders.clone())
        });
        toggle_node(path, backend, SSAO_NODE, settings.ssao.enabled, || {
            SsaoPass::new(SSAO_NODE, shaders.clone())
        });

        if settings.shadows.enabled {
            path.connect(
                SHADOW_NODE,
                MAIN_NODE,
                &[
                    ("depth", geometry_pass::SHADOW_MAP_INPUT),
                    (shadow_pass::CASCADES_PORT, geometry_pass::CASCADES_INPUT),
                ],
            );
        } else {
            path.disconnect(
                MAIN_NODE,
                &[geometry_pass::SHADOW_MAP_INPUT, geometry_pass::CASCADES_INPUT],
            );
        }

        if settings.environment.enabled {
            path.connect(
                ENVIRONMENT_NODE,
                MAIN_NODE,
                &[("color", geometry_pass::ENVIRONMENT_INPUT)],
            );
        } else {
            path.disconnect(MAIN_NODE, &[geometry_pass::ENVIRONMENT_INPUT]);
        }

        path.connect(MAIN_NODE, OUTPUT_NODE, &[("color", output_pass::COLOR_INPUT)]);

        if settings.ssao.enabled {
            path.connect(
                MAIN_NODE,
                SSAO_NODE,
                &[
                    ("depth", ssao_pass::DEPTH_INPUT),
                    ("normal", ssao_pass::NORMAL_INPUT),
                ],
            );
            path.connect(SSAO_NODE, OUTPUT_NODE, &[("ao", output_pass::AO_INPUT)]);
        } else {
            path.disconnect(OUTPUT_NODE, &[output_pass::AO_INPUT]);
        }
        Ok(())
    }
}

/// A render path driven by [`StandardLayout`].
///
/// Nodes are created on the first [`RenderPath::reconfigure`].
pub fn build_standard_path(name: impl Into<String>, shaders: Arc<dyn ShaderLibrary>) -> RenderPath {
    RenderPath::new(name).with_layout(Box::new(StandardLayout::new(shaders)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::RecordingBackend;
    use crate::settings::RenderSettings;

    #[test]
    fn test_default_settings_path() {
        let mut backend = RecordingBackend::new();
        let mut path = build_standard_path("view", Arc::new(BuiltinShaders));
        path.set_size(320, 240);
        path.reconfigure(&mut backend, &RenderSettings::default()).unwrap();

        assert_eq!(path.pre_path_names(), vec![SHADOW_NODE, ENVIRONMENT_NODE]);
        assert_eq!(path.path_names(), vec![MAIN_NODE, OUTPUT_NODE]);
    }

    #[test]
    fn test_ssao_toggle_inserts_before_output() {
        let mut backend = RecordingBackend::new();
        let mut settings = RenderSettings::default();
        settings.shadows.enabled = false;
        settings.environment.enabled = false;

        let mut path = build_standard_path("view", Arc::new(BuiltinShaders));
        path.set_size(320, 240);
        path.reconfigure(&mut backend, &settings).unwrap();
        assert!(path.pre_path().is_empty());
        assert_eq!(path.path_names(), vec![MAIN_NODE, OUTPUT_NODE]);

        settings.ssao.enabled = true;
        path.reconfigure(&mut backend, &settings).unwrap();
        assert_eq!(path.path_names(), vec![MAIN_NODE, SSAO_NODE, OUTPUT_NODE]);
        assert!(path.input(OUTPUT_NODE, output_pass::AO_INPUT).is_some());

        settings.ssao.enabled = false;
        path.reconfigure(&mut backend, &settings).unwrap();
        assert_eq!(path.path_names(), vec![MAIN_NODE, OUTPUT_NODE]);
        assert!(!path.has_node(SSAO_NODE));
        assert!(path.input(OUTPUT_NODE, output_pass::AO_INPUT).is_none());
    }
}
