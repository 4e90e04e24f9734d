//! Render path: a wired set of render nodes forming one frame
//!
//! Execution order is derived from the wiring alone. Starting from every
//! pre-pass node and then from the node named [`OUTPUT_NODE`], the path walks
//! input connections backward and places each node after everything it reads.

use std::collections::HashMap;

use futures::future::join_all;

use crate::backend::GraphicsBackend;
use crate::error::{RenderGraphError, RenderResult};
use crate::render_graph::node::*;
use crate::scene::{FrameInputs, GeometryId, MaterialId};
use crate::settings::RenderSettings;

/// Name of the node whose result is the frame
pub const OUTPUT_NODE: &str = "output";

/// Rendering-mode hook that owns the optional parts of a path.
///
/// Called by [`RenderPath::reconfigure_node_path`] before the execution
/// order is recalculated. Implementations add or remove nodes for the current
/// [`RenderPath::settings`] and rewire them.
pub trait PathLayout {
    fn reconfigure_node_path(
        &mut self,
        path: &mut RenderPath,
        backend: &mut dyn GraphicsBackend,
    ) -> RenderResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

/// An ordered collection of render nodes
pub struct RenderPath {
    name: String,
    size: (u32, u32),
    settings: RenderSettings,

    ids: HashMap<String, NodeId>,
    names: Vec<String>,
    nodes: NodeArena,

    pre_path: Vec<NodeId>,
    path: Vec<NodeId>,
    dirty: bool,

    layout: Option<Box<dyn PathLayout>>,
    /// Frame data, present only while `run` executes
    pass_data: Option<FrameInputs>,
}

impl RenderPath {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size: (0, 0),
            settings: RenderSettings::default(),
            ids: HashMap::new(),
            names: Vec::new(),
            nodes: NodeArena::default(),
            pre_path: Vec::new(),
            path: Vec::new(),
            dirty: false,
            layout: None,
            pass_data: None,
        }
    }

    pub fn with_layout(mut self, layout: Box<dyn PathLayout>) -> Self {
        self.layout = Some(layout);
        self
    }

    pub fn set_layout(&mut self, layout: Box<dyn PathLayout>) {
        self.layout = Some(layout);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> (u32, u32) {
        self.size
    }

    /// Takes effect at the next reconfigure.
    pub fn set_size(&mut self, width: u32, height: u32) {
        self.size = (width, height);
    }

    pub fn settings(&self) -> &RenderSettings {
        &self.settings
    }

    // Nodes

    fn intern(&mut self, name: &str) -> NodeId {
        if let Some(id) = self.ids.get(name) {
            return *id;
        }
        let id = NodeId(self.names.len() as u32);
        self.names.push(name.to_string());
        self.ids.insert(name.to_string(), id);
        id
    }

    /// Id of a present node
    pub fn node_id(&self, name: &str) -> Option<NodeId> {
        self.ids
            .get(name)
            .copied()
            .filter(|id| self.nodes.contains(*id))
    }

    pub fn node_name(&self, id: NodeId) -> Option<&str> {
        self.names.get(id.index()).map(String::as_str)
    }

    pub fn has_node(&self, name: &str) -> bool {
        self.node_id(name).is_some()
    }

    /// Add a node under its own name.
    ///
    /// A node already registered under that name is returned, still holding
    /// its GPU resources; the caller decides whether to destroy it.
    pub fn add_node(&mut self, node: impl RenderNode) -> Option<Box<dyn RenderNode>> {
        let id = self.intern(node.name());
        log::debug!("Render path '{}': adding node '{}'", self.name, node.name());
        self.dirty = true;
        self.nodes.insert(id, Box::new(node))
    }

    /// Add the node built by `make` unless one with `name` is present.
    pub fn ensure_node<N: RenderNode>(&mut self, name: &str, make: impl FnOnce() -> N) {
        if !self.has_node(name) {
            self.add_node(make());
        }
    }

    /// Remove and destroy a node. The name keeps its id, and connections
    /// recorded by other nodes resolve to nothing until it is added again.
    pub fn remove_node(&mut self, name: &str, backend: &mut dyn GraphicsBackend) -> bool {
        let Some(mut node) = self.node_id(name).and_then(|id| self.nodes.take(id)) else {
            return false;
        };
        log::debug!("Render path '{}': removing node '{}'", self.name, name);
        node.destroy(backend);
        self.dirty = true;
        true
    }

    pub fn node(&self, name: &str) -> Option<&dyn RenderNode> {
        self.nodes.get(self.node_id(name)?)
    }

    pub fn node_mut(&mut self, name: &str) -> Option<&mut dyn RenderNode> {
        let id = self.node_id(name)?;
        self.nodes.get_mut(id)
    }

    /// Downcast a node to its concrete type
    pub fn node_as<T: RenderNode>(&self, name: &str) -> Option<&T> {
        self.node(name)?.as_any().downcast_ref::<T>()
    }

    pub fn node_as_mut<T: RenderNode>(&mut self, name: &str) -> Option<&mut T> {
        self.node_mut(name)?.as_any_mut().downcast_mut::<T>()
    }

    // Wiring

    /// Bind `(output, input)` port pairs from `src` to `dst`.
    ///
    /// Does nothing when either node is absent.
    pub fn connect(&mut self, src: &str, dst: &str, ports: &[(&str, &str)]) {
        let (Some(src_id), Some(dst_id)) = (self.node_id(src), self.node_id(dst)) else {
            log::trace!("Skipping connection {} -> {}: node absent", src, dst);
            return;
        };
        let Some(node) = self.nodes.get_mut(dst_id) else {
            return;
        };
        let state = node.state_mut();
        for (output, input) in ports {
            state.set_input(
                *input,
                PortRef {
                    node: src_id,
                    output: output.to_string(),
                },
            );
        }
        self.dirty = true;
    }

    /// Unbind input ports of `node`. Does nothing when the node is absent.
    pub fn disconnect(&mut self, node: &str, inputs: &[&str]) {
        let Some(node) = self.node_mut(node) else {
            return;
        };
        let state = node.state_mut();
        let mut removed = false;
        for input in inputs {
            removed |= state.remove_input(input).is_some();
        }
        if removed {
            self.dirty = true;
        }
    }

    /// Current value of an output port
    pub fn output(&self, node: &str, port: &str) -> Option<Port<'_>> {
        self.node(node)?.state().output(port)
    }

    /// Current value behind an input port, resolved through its connection
    pub fn input(&self, node: &str, port: &str) -> Option<Port<'_>> {
        let source = self.node(node)?.state().inputs().get(port)?;
        self.nodes.get(source.node)?.state().output(&source.output)
    }

    // Ordering

    /// Pre-pass nodes in execution order
    pub fn pre_path(&self) -> &[NodeId] {
        &self.pre_path
    }

    /// Main path nodes in execution order
    pub fn path(&self) -> &[NodeId] {
        &self.path
    }

    pub fn pre_path_names(&self) -> Vec<&str> {
        self.pre_path.iter().filter_map(|id| self.node_name(*id)).collect()
    }

    pub fn path_names(&self) -> Vec<&str> {
        self.path.iter().filter_map(|id| self.node_name(*id)).collect()
    }

    /// Derive `pre_path` and `path` from the wiring.
    ///
    /// Pre-pass nodes and their dependencies land in `pre_path`; everything
    /// else reachable from the output node lands in `path`. On a cycle the
    /// previous order is kept.
    pub fn calculate_node_path(&mut self) -> RenderResult<()> {
        let mut marks = HashMap::new();

        let mut pre_path = Vec::new();
        let pre_nodes: Vec<NodeId> = (0..self.names.len() as u32)
            .map(NodeId)
            .filter(|id| {
                self.nodes
                    .get(*id)
                    .is_some_and(|node| node.state().is_pre_pass())
            })
            .collect();
        for id in pre_nodes {
            self.walk(id, &mut marks, &mut pre_path)?;
        }

        let mut path = Vec::new();
        match self.node_id(OUTPUT_NODE) {
            Some(output) => self.walk(output, &mut marks, &mut path)?,
            None => log::warn!("Render path '{}' has no '{}' node", self.name, OUTPUT_NODE),
        }

        self.pre_path = pre_path;
        self.path = path;
        self.dirty = false;
        Ok(())
    }

    /// Present nodes read by `id`, in port order
    fn dependencies(&self, id: NodeId) -> Vec<NodeId> {
        let Some(node) = self.nodes.get(id) else {
            return Vec::new();
        };
        let mut deps: Vec<NodeId> = Vec::new();
        for source in node.state().inputs().values() {
            if self.nodes.contains(source.node) && !deps.contains(&source.node) {
                deps.push(source.node);
            }
        }
        // Popped from the back
        deps.reverse();
        deps
    }

    /// Depth-first walk over inputs with an explicit stack, appending in post-order.
    fn walk(
        &self,
        root: NodeId,
        marks: &mut HashMap<NodeId, Mark>,
        order: &mut Vec<NodeId>,
    ) -> RenderResult<()> {
        if marks.contains_key(&root) || !self.nodes.contains(root) {
            return Ok(());
        }
        marks.insert(root, Mark::Visiting);
        let mut stack = vec![(root, self.dependencies(root))];

        while let Some(top) = stack.last_mut() {
            match top.1.pop() {
                Some(dep) => match marks.get(&dep) {
                    Some(Mark::Visiting) => {
                        return Err(RenderGraphError::CyclicDependency {
                            node: self.node_name(dep).unwrap_or_default().to_string(),
                        });
                    }
                    Some(Mark::Done) => {}
                    None => {
                        marks.insert(dep, Mark::Visiting);
                        stack.push((dep, self.dependencies(dep)));
                    }
                },
                None => {
                    let id = top.0;
                    marks.insert(id, Mark::Done);
                    order.push(id);
                    stack.pop();
                }
            }
        }
        Ok(())
    }

    // Lifecycle

    /// Let the layout add, remove and rewire nodes, then recalculate the order.
    pub fn reconfigure_node_path(&mut self, backend: &mut dyn GraphicsBackend) -> RenderResult<()> {
        if let Some(mut layout) = self.layout.take() {
            let result = layout.reconfigure_node_path(self, backend);
            self.layout = Some(layout);
            result?;
        }
        self.calculate_node_path()
    }

    /// Apply new settings: rebuild the node set and reconfigure every node,
    /// pre-path first.
    pub fn reconfigure(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        settings: &RenderSettings,
    ) -> RenderResult<()> {
        log::info!(
            "Reconfiguring render path '{}' at {}x{}",
            self.name,
            self.size.0,
            self.size.1
        );
        self.settings = settings.clone();
        self.reconfigure_node_path(backend)?;
        self.for_each_scheduled(backend, |node, ctx| node.reconfigure(ctx))
    }

    /// Record and submit one frame.
    ///
    /// `frame` is readable by nodes through [`NodeContext::frame`] during this
    /// call only. Backend errors abort the frame without submitting.
    pub fn run(&mut self, backend: &mut dyn GraphicsBackend, frame: FrameInputs) -> RenderResult<()> {
        if self.dirty {
            self.calculate_node_path()?;
        }

        self.pass_data = Some(frame);
        let result = self.record_frame(backend);
        self.pass_data = None;
        result
    }

    fn record_frame(&mut self, backend: &mut dyn GraphicsBackend) -> RenderResult<()> {
        backend.begin_command_encoder(Some(self.name.as_str()));
        self.for_each_scheduled(backend, |node, ctx| node.run(ctx))?;
        backend.submit()?;
        Ok(())
    }

    /// Frame data of the run in progress
    pub fn pass_data(&self) -> Option<&FrameInputs> {
        self.pass_data.as_ref()
    }

    /// Visit `pre_path` then `path`, lending each node a context over the others.
    fn for_each_scheduled(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        mut visit: impl FnMut(&mut dyn RenderNode, &mut NodeContext<'_>) -> RenderResult<()>,
    ) -> RenderResult<()> {
        let order: Vec<NodeId> = self.pre_path.iter().chain(self.path.iter()).copied().collect();
        for id in order {
            let Some(mut node) = self.nodes.take(id) else {
                continue;
            };
            let result = {
                let mut ctx = NodeContext::new(&mut *backend, &self.settings, self.size)
                    .with_nodes(&self.nodes);
                if let Some(frame) = self.pass_data.as_ref() {
                    ctx = ctx.with_frame(frame);
                }
                visit(node.as_mut(), &mut ctx)
            };
            self.nodes.insert(id, node);
            result?;
        }
        Ok(())
    }

    /// Compile every pipeline `frame` will need before the first real run.
    ///
    /// All nodes start their compilations first; they are then awaited
    /// together and stored in the owning node's cache.
    pub async fn precompile(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        frame: &FrameInputs,
    ) -> RenderResult<()> {
        if self.dirty {
            self.calculate_node_path()?;
        }

        let mut pending = Vec::new();
        let order: Vec<NodeId> = self.pre_path.iter().chain(self.path.iter()).copied().collect();
        for id in order {
            let Some(mut node) = self.nodes.take(id) else {
                continue;
            };
            let result = {
                let mut ctx = NodeContext::new(&mut *backend, &self.settings, self.size)
                    .with_nodes(&self.nodes)
                    .with_frame(frame);
                node.precompile(&mut ctx)
            };
            self.nodes.insert(id, node);
            pending.extend(result?.into_iter().map(|shader| (id, shader)));
        }

        log::debug!(
            "Render path '{}': precompiling {} shader variants",
            self.name,
            pending.len()
        );
        let compiled = join_all(
            pending
                .into_iter()
                .map(|(id, shader)| async move { (id, shader.resolve().await) }),
        )
        .await;

        let mut first_error = None;
        for (id, (key, result)) in compiled {
            match result {
                Ok(handle) => match self.nodes.get_mut(id) {
                    Some(node) => node
                        .state_mut()
                        .shader_cache_mut()
                        .insert(key, handle, backend),
                    None => backend.destroy_render_pipeline(handle),
                },
                Err(err) => {
                    first_error.get_or_insert(err);
                }
            }
        }
        match first_error {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }

    /// Blocking form of [`precompile`](Self::precompile).
    pub fn precompile_blocking(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        frame: &FrameInputs,
    ) -> RenderResult<()> {
        pollster::block_on(self.precompile(backend, frame))
    }

    /// Drop cached variants built for a geometry the scene destroyed.
    pub fn evict_geometry(&mut self, geometry: GeometryId, backend: &mut dyn GraphicsBackend) {
        for node in self.nodes.iter_mut() {
            node.evict_geometry(geometry, backend);
        }
    }

    /// Drop cached variants built for a material the scene destroyed.
    pub fn evict_material(&mut self, material: MaterialId, backend: &mut dyn GraphicsBackend) {
        for node in self.nodes.iter_mut() {
            node.evict_material(material, backend);
        }
    }

    /// Destroy every node the path owns.
    ///
    /// The nodes stay registered but nothing is scheduled until the next
    /// [`reconfigure`](Self::reconfigure), so a stray `run` records an empty
    /// frame instead of reallocating.
    pub fn destroy(&mut self, backend: &mut dyn GraphicsBackend) {
        log::debug!("Destroying render path '{}'", self.name);
        for node in self.nodes.iter_mut() {
            node.destroy(backend);
        }
        self.pre_path.clear();
        self.path.clear();
        self.dirty = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::*;
    use crate::render_graph::attachment::Attachment;
    use crate::render_graph::shader_cache::{PendingShader, ShaderClass, ShaderKey};
    use std::any::Any;

    struct TestNode {
        state: NodeState,
        saw_frame: bool,
        require: Option<&'static str>,
    }

    impl TestNode {
        fn new(name: &str) -> Self {
            Self {
                state: NodeState::new(name)
                    .with_attachment(Attachment::color("color", TextureFormat::Rgba8Unorm)),
                saw_frame: false,
                require: None,
            }
        }

        fn pre_pass(mut self) -> Self {
            self.state = self.state.with_pre_pass();
            self
        }

        fn requiring(mut self, port: &'static str) -> Self {
            self.require = Some(port);
            self
        }
    }

    impl RenderNode for TestNode {
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

        fn render(&mut self, ctx: &mut NodeContext<'_>) -> RenderResult<()> {
            self.saw_frame = ctx.frame().is_some();
            if let Some(port) = self.require {
                ctx.require_input(&self.state, port)?;
            }
            Ok(())
        }

        fn precompile(&mut self, ctx: &mut NodeContext<'_>) -> RenderResult<Vec<PendingShader>> {
            let key = ShaderKey::fullscreen(ShaderClass("test"));
            Ok(self
                .state
                .shader_cache()
                .compile_async(key, ctx.backend, |_| RenderPipelineDescriptor {
                    label: Some("test".into()),
                    shader: String::new(),
                    has_fragment: true,
                    vertex_layouts: Vec::new(),
                    bind_group_layouts: Vec::new(),
                    primitive_topology: PrimitiveTopology::TriangleList,
                    front_face: FrontFace::Ccw,
                    cull_mode: CullMode::None,
                    depth_stencil: None,
                    color_targets: Vec::new(),
                    sample_count: 1,
                })
                .into_iter()
                .collect())
        }
    }

    fn index_of(order: &[&str], name: &str) -> usize {
        order.iter().position(|n| *n == name).unwrap()
    }

    #[test]
    fn test_producers_precede_consumers() {
        let mut path = RenderPath::new("test");
        for name in ["a", "b", "c", "output"] {
            path.add_node(TestNode::new(name));
        }
        path.connect("a", "b", &[("color", "in")]);
        path.connect("b", "output", &[("color", "first")]);
        path.connect("c", "output", &[("color", "second")]);
        path.connect("a", "c", &[("color", "in")]);
        path.calculate_node_path().unwrap();

        let order = path.path_names();
        assert_eq!(order.len(), 4);
        assert!(index_of(&order, "a") < index_of(&order, "b"));
        assert!(index_of(&order, "a") < index_of(&order, "c"));
        assert!(index_of(&order, "b") < index_of(&order, "output"));
        assert!(index_of(&order, "c") < index_of(&order, "output"));
    }

    #[test]
    fn test_unreachable_nodes_are_skipped() {
        let mut path = RenderPath::new("test");
        path.add_node(TestNode::new("output"));
        path.add_node(TestNode::new("orphan"));
        path.calculate_node_path().unwrap();
        assert_eq!(path.path_names(), vec!["output"]);
    }

    #[test]
    fn test_pre_pass_nodes_run_first() {
        let mut path = RenderPath::new("test");
        path.add_node(TestNode::new("output"));
        path.add_node(TestNode::new("main"));
        path.add_node(TestNode::new("shadow").pre_pass());
        path.add_node(TestNode::new("probe").pre_pass());
        path.connect("shadow", "main", &[("color", "shadow")]);
        path.connect("main", "output", &[("color", "color")]);
        path.calculate_node_path().unwrap();

        assert_eq!(path.pre_path_names(), vec!["shadow", "probe"]);
        assert_eq!(path.path_names(), vec!["main", "output"]);
    }

    #[test]
    fn test_cycle_is_an_error() {
        let mut path = RenderPath::new("test");
        path.add_node(TestNode::new("a"));
        path.add_node(TestNode::new("output"));
        path.connect("a", "output", &[("color", "in")]);
        path.connect("output", "a", &[("color", "in")]);

        assert!(matches!(
            path.calculate_node_path(),
            Err(RenderGraphError::CyclicDependency { .. })
        ));
    }

    #[test]
    fn test_missing_nodes_are_tolerated() {
        let mut path = RenderPath::new("test");
        path.add_node(TestNode::new("output"));
        path.connect("ssao", "output", &[("ao", "ao")]);
        path.connect("output", "ssao", &[("color", "color")]);
        path.disconnect("ssao", &["color"]);

        assert!(path.node("output").unwrap().state().inputs().is_empty());
        assert!(path.input("output", "ao").is_none());
    }

    #[test]
    fn test_inputs_alias_live_outputs() {
        let mut backend = RecordingBackend::new();
        let mut path = RenderPath::new("test");
        path.add_node(TestNode::new("a"));
        path.add_node(TestNode::new("output"));
        path.connect("a", "output", &[("color", "in")]);
        path.set_size(64, 64);
        path.reconfigure(&mut backend, &RenderSettings::default()).unwrap();

        let before = path.input("output", "in").unwrap().texture_view().unwrap();
        assert_eq!(Some(before), path.output("a", "color").unwrap().texture_view());

        path.set_size(128, 128);
        path.reconfigure(&mut backend, &RenderSettings::default()).unwrap();

        let after = path.input("output", "in").unwrap().texture_view().unwrap();
        assert_ne!(before, after);
        assert_eq!(Some(after), path.output("a", "color").unwrap().texture_view());
    }

    #[test]
    fn test_run_scopes_frame_data() {
        let mut backend = RecordingBackend::new();
        let mut path = RenderPath::new("test");
        path.add_node(TestNode::new("main"));
        path.add_node(TestNode::new("output"));
        path.connect("main", "output", &[("color", "color")]);
        path.set_size(32, 32);
        path.reconfigure(&mut backend, &RenderSettings::default()).unwrap();

        path.run(&mut backend, FrameInputs::default()).unwrap();

        assert!(path.pass_data().is_none());
        assert!(path.node_as::<TestNode>("main").unwrap().saw_frame);
        assert_eq!(backend.pass_labels(), vec!["main", "output"]);
        assert_eq!(backend.submissions(), 1);
    }

    #[test]
    fn test_failed_run_clears_frame_data() {
        let mut backend = RecordingBackend::new();
        let mut path = RenderPath::new("test");
        path.add_node(TestNode::new("output").requiring("color"));
        path.set_size(32, 32);
        path.reconfigure(&mut backend, &RenderSettings::default()).unwrap();

        let err = path.run(&mut backend, FrameInputs::default()).unwrap_err();
        assert!(matches!(err, RenderGraphError::MissingInput { .. }));
        assert!(path.pass_data().is_none());
        assert_eq!(backend.submissions(), 0);
        // The node went back into the path.
        assert!(path.has_node("output"));
    }

    #[test]
    fn test_remove_destroys_and_readd_keeps_id() {
        let mut backend = RecordingBackend::new();
        let mut path = RenderPath::new("test");
        path.add_node(TestNode::new("ssao"));
        path.add_node(TestNode::new("output"));
        path.connect("ssao", "output", &[("color", "ao")]);
        path.set_size(16, 16);
        path.reconfigure(&mut backend, &RenderSettings::default()).unwrap();
        let id = path.node_id("ssao").unwrap();
        assert_eq!(backend.live_texture_count(), 2);

        assert!(path.remove_node("ssao", &mut backend));
        assert_eq!(backend.live_texture_count(), 1);
        path.calculate_node_path().unwrap();
        assert_eq!(path.path_names(), vec!["output"]);
        assert!(path.input("output", "ao").is_none());

        path.add_node(TestNode::new("ssao"));
        assert_eq!(path.node_id("ssao"), Some(id));
        path.calculate_node_path().unwrap();
        assert_eq!(path.path_names(), vec!["ssao", "output"]);
    }

    #[test]
    fn test_precompile_fills_caches() {
        let mut backend = RecordingBackend::new();
        let mut path = RenderPath::new("test");
        path.add_node(TestNode::new("main"));
        path.add_node(TestNode::new("output"));
        path.connect("main", "output", &[("color", "color")]);
        path.calculate_node_path().unwrap();

        path.precompile_blocking(&mut backend, &FrameInputs::default())
            .unwrap();

        assert_eq!(backend.pipelines_created(), 2);
        for name in ["main", "output"] {
            assert_eq!(path.node(name).unwrap().state().shader_cache().len(), 1);
        }

        path.evict_material(MaterialId::NONE, &mut backend);
        assert_eq!(backend.live_pipeline_count(), 0);
    }

    #[test]
    fn test_destroy_releases_everything() {
        let mut backend = RecordingBackend::new();
        let mut path = RenderPath::new("test");
        path.add_node(TestNode::new("shadow").pre_pass());
        path.add_node(TestNode::new("output"));
        path.set_size(16, 16);
        path.reconfigure(&mut backend, &RenderSettings::default()).unwrap();
        assert_eq!(backend.live_texture_count(), 2);

        path.destroy(&mut backend);
        assert_eq!(backend.live_texture_count(), 0);
        assert!(path.pre_path().is_empty());
        assert!(path.path().is_empty());

        path.run(&mut backend, FrameInputs::default()).unwrap();
        assert!(backend.pass_labels().is_empty());
        assert_eq!(backend.live_texture_count(), 0);

        path.reconfigure(&mut backend, &RenderSettings::default()).unwrap();
        path.run(&mut backend, FrameInputs::default()).unwrap();
        assert_eq!(backend.pass_labels(), vec!["shadow", "output"]);
    }

    #[test]
    fn test_long_chain_orders_without_recursion() {
        const DEPTH: usize = 5000;
        let mut path = RenderPath::new("chain");
        let names: Vec<String> = (0..DEPTH).map(|i| format!("n{}", i)).collect();
        for name in &names {
            path.add_node(TestNode::new(name));
        }
        path.add_node(TestNode::new("output"));
        for pair in names.windows(2) {
            path.connect(&pair[0], &pair[1], &[("color", "in")]);
        }
        path.connect(&names[DEPTH - 1], "output", &[("color", "in")]);

        path.calculate_node_path().unwrap();

        let order = path.path_names();
        assert_eq!(order.len(), DEPTH + 1);
        assert_eq!(order[0], "n0");
        assert_eq!(order[DEPTH - 1], names[DEPTH - 1]);
        assert_eq!(order[DEPTH], "output");
    }
}
