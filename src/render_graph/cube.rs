//! Six-face cubemap execution

use std::any::Any;

use glam::{Mat4, Vec3};

use crate::backend::GraphicsBackend;
use crate::error::RenderResult;
use crate::render_graph::node::{run_pass, NodeContext, NodeState, RenderNode};
use crate::render_graph::shader_cache::PendingShader;
use crate::scene::{GeometryId, MaterialId};

/// Wraps a node so every run renders all six faces of a cube attachment.
///
/// The inner node's attachments are allocated as six-layer cube-compatible
/// textures; `begin`, `render` and `end` run once per face with the face
/// selected through [`NodeState::set_render_layer`].
pub struct CubeRenderNode<N> {
    inner: N,
}

impl<N: RenderNode> CubeRenderNode<N> {
    pub const FACES: u32 = 6;

    pub fn new(mut inner: N) -> Self {
        let state = inner.state_mut();
        state.set_layers(Self::FACES);
        state.set_cubemap(true);
        Self { inner }
    }

    pub fn inner(&self) -> &N {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut N {
        &mut self.inner
    }

    /// View matrix looking down cube face `face` from `position`.
    ///
    /// Faces follow the +X, -X, +Y, -Y, +Z, -Z layer order.
    pub fn face_view(face: u32, position: Vec3) -> Mat4 {
        let (forward, up) = match face % Self::FACES {
            0 => (Vec3::X, Vec3::NEG_Y),
            1 => (Vec3::NEG_X, Vec3::NEG_Y),
            2 => (Vec3::Y, Vec3::Z),
            3 => (Vec3::NEG_Y, Vec3::NEG_Z),
            4 => (Vec3::Z, Vec3::NEG_Y),
            _ => (Vec3::NEG_Z, Vec3::NEG_Y),
        };
        Mat4::look_to_rh(position, forward, up)
    }

    /// 90 degree projection covering one face.
    pub fn face_projection(near: f32, far: f32) -> Mat4 {
        Mat4::perspective_rh(std::f32::consts::FRAC_PI_2, 1.0, near, far)
    }
}

impl<N: RenderNode> RenderNode for CubeRenderNode<N> {
    fn state(&self) -> &NodeState {
        self.inner.state()
    }

    fn state_mut(&mut self) -> &mut NodeState {
        self.inner.state_mut()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn reconfigure(&mut self, ctx: &mut NodeContext<'_>) -> RenderResult<()> {
        self.inner.reconfigure(ctx)
    }

    fn begin(&mut self, ctx: &mut NodeContext<'_>) -> RenderResult<()> {
        self.inner.begin(ctx)
    }

    fn render(&mut self, ctx: &mut NodeContext<'_>) -> RenderResult<()> {
        self.inner.render(ctx)
    }

    fn end(&mut self, ctx: &mut NodeContext<'_>) -> RenderResult<()> {
        self.inner.end(ctx)
    }

    fn run(&mut self, ctx: &mut NodeContext<'_>) -> RenderResult<()> {
        for face in 0..Self::FACES {
            self.state_mut().set_render_layer(face)?;
            run_pass(&mut self.inner, ctx)?;
        }
        self.state_mut().set_render_layer(0)
    }

    fn precompile(&mut self, ctx: &mut NodeContext<'_>) -> RenderResult<Vec<PendingShader>> {
        self.inner.precompile(ctx)
    }

    fn evict_geometry(&mut self, geometry: GeometryId, backend: &mut dyn GraphicsBackend) {
        self.inner.evict_geometry(geometry, backend)
    }

    fn evict_material(&mut self, material: MaterialId, backend: &mut dyn GraphicsBackend) {
        self.inner.evict_material(material, backend)
    }

    fn destroy(&mut self, backend: &mut dyn GraphicsBackend) {
        self.inner.destroy(backend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::*;
    use crate::render_graph::attachment::Attachment;
    use crate::settings::RenderSettings;

    struct CountingNode {
        state: NodeState,
        layers_rendered: Vec<u32>,
    }

    impl RenderNode for CountingNode {
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
        fn render(&mut self, _ctx: &mut NodeContext<'_>) -> RenderResult<()> {
            self.layers_rendered.push(self.state.current_layer());
            Ok(())
        }
    }

    #[test]
    fn test_runs_each_face_once() {
        let mut backend = RecordingBackend::new();
        let settings = RenderSettings::default();
        let mut node = CubeRenderNode::new(CountingNode {
            state: NodeState::new("probe")
                .with_attachment(Attachment::color("color", TextureFormat::Rgba16Float))
                .with_size((16, 16)),
            layers_rendered: Vec::new(),
        });

        let mut ctx = NodeContext::new(&mut backend, &settings, (640, 480));
        node.reconfigure(&mut ctx).unwrap();
        ctx.backend.begin_command_encoder(None);
        node.run(&mut ctx).unwrap();

        assert_eq!(node.inner().layers_rendered, vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(
            backend.pass_labels(),
            (0..6).map(|i| format!("probe[{}]", i)).collect::<Vec<_>>()
        );
        let texture = node.state().attachment("color").unwrap().texture().unwrap();
        let desc = backend.texture_descriptor(texture.handle).unwrap();
        assert!(desc.cube_compatible);
        assert_eq!(desc.array_layers, 6);
    }

    #[test]
    fn test_face_views_are_distinct() {
        let views: Vec<Mat4> = (0..6)
            .map(|face| CubeRenderNode::<CountingNode>::face_view(face, Vec3::ZERO))
            .collect();
        for (i, a) in views.iter().enumerate() {
            for b in &views[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }
}
