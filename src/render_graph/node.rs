//! Render nodes: one GPU render pass each
//!
//! A node owns its attachments, a map of input ports bound to other nodes'
//! outputs, and the per-layer pass descriptors built from its attachments.
//! Concrete passes embed a [`NodeState`] and implement [`RenderNode`],
//! overriding only the lifecycle steps they need.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};

use glam::Mat4;

use crate::backend::*;
use crate::error::{RenderGraphError, RenderResult};
use crate::render_graph::attachment::Attachment;
use crate::render_graph::shader_cache::{PendingShader, ShaderCache};
use crate::scene::{FrameInputs, GeometryId, MaterialId};
use crate::settings::RenderSettings;

/// Stable identifier for a node within a render path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Binding of an input port to an output port of another node
///
/// Resolved on every read, so a producer that reallocates its attachments is
/// seen by its consumers without rewiring.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct PortRef {
    pub node: NodeId,
    pub output: String,
}

/// Non-attachment value a node can publish on an output port
#[derive(Debug, Clone, PartialEq)]
pub enum PortValue {
    Texture(TextureViewHandle),
    Buffer(BufferHandle),
    BindGroup(BindGroupHandle),
    Pipeline(RenderPipelineHandle),
    Matrices(Vec<Mat4>),
}

/// What an output port points at
#[derive(Debug, Clone, PartialEq)]
pub enum OutputSlot {
    /// The node's attachment with this name, looked up at read time
    Attachment(String),
    Value(PortValue),
}

/// A resolved port
#[derive(Debug, Clone, Copy)]
pub enum Port<'a> {
    Attachment(&'a Attachment),
    Value(&'a PortValue),
}

impl<'a> Port<'a> {
    pub fn attachment(self) -> Option<&'a Attachment> {
        match self {
            Port::Attachment(attachment) => Some(attachment),
            Port::Value(_) => None,
        }
    }

    pub fn value(self) -> Option<&'a PortValue> {
        match self {
            Port::Attachment(_) => None,
            Port::Value(value) => Some(value),
        }
    }

    /// View to sample from, whether the port is an attachment or a texture value.
    pub fn texture_view(self) -> Option<TextureViewHandle> {
        match self {
            Port::Attachment(attachment) => attachment.sampled_view(),
            Port::Value(PortValue::Texture(view)) => Some(*view),
            Port::Value(_) => None,
        }
    }

    pub fn matrices(self) -> Option<&'a [Mat4]> {
        match self {
            Port::Value(PortValue::Matrices(matrices)) => Some(matrices),
            _ => None,
        }
    }
}

/// State shared by every render node
#[derive(Debug)]
pub struct NodeState {
    name: String,
    attachments: Vec<Attachment>,
    inputs: BTreeMap<String, PortRef>,
    outputs: HashMap<String, OutputSlot>,
    scale_factor: f32,
    size: Option<(u32, u32)>,
    sample_count: u32,
    layers: u32,
    cubemap: bool,
    pre_pass: bool,
    current_layer: u32,
    /// Target size of the last allocation, `None` forces the next one
    last_size: Option<(u32, u32)>,
    pass_descriptors: Vec<RenderPassDescriptor>,
    pass_open: bool,
    shader_cache: ShaderCache,
}

impl NodeState {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attachments: Vec::new(),
            inputs: BTreeMap::new(),
            outputs: HashMap::new(),
            scale_factor: 1.0,
            size: None,
            sample_count: 1,
            layers: 1,
            cubemap: false,
            pre_pass: false,
            current_layer: 0,
            last_size: None,
            pass_descriptors: Vec::new(),
            pass_open: false,
            shader_cache: ShaderCache::new(),
        }
    }

    /// Declare an attachment. A previous declaration with the same name is replaced.
    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.retain(|a| a.name() != attachment.name());
        self.attachments.push(attachment);
        self
    }

    pub fn with_scale_factor(mut self, scale_factor: f32) -> Self {
        self.scale_factor = scale_factor;
        self
    }

    pub fn with_size(mut self, size: (u32, u32)) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_sample_count(mut self, sample_count: u32) -> Self {
        self.sample_count = sample_count.max(1);
        self
    }

    pub fn with_layers(mut self, layers: u32) -> Self {
        self.layers = layers.max(1);
        self
    }

    pub fn with_cubemap(mut self, cubemap: bool) -> Self {
        self.cubemap = cubemap;
        self
    }

    /// Mark the node as a pre-pass that runs every frame before the main path.
    pub fn with_pre_pass(mut self) -> Self {
        self.pre_pass = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    // Attachments

    pub fn attachments(&self) -> &[Attachment] {
        &self.attachments
    }

    pub fn attachment(&self, name: &str) -> Option<&Attachment> {
        self.attachments.iter().find(|a| a.name() == name)
    }

    pub fn attachment_mut(&mut self, name: &str) -> Option<&mut Attachment> {
        self.attachments.iter_mut().find(|a| a.name() == name)
    }

    /// Enabled color attachments in declaration order
    pub fn colors(&self) -> impl Iterator<Item = &Attachment> {
        self.attachments
            .iter()
            .filter(|a| a.enabled && !a.is_depth())
    }

    /// Enabled depth attachment, if any
    pub fn depth(&self) -> Option<&Attachment> {
        self.attachments.iter().find(|a| a.enabled && a.is_depth())
    }

    /// Declare or redeclare an attachment after construction.
    ///
    /// A previous attachment with the same name is released and replaced,
    /// keeping its enabled flag. Allocation is left to the next reconfigure.
    pub fn declare_attachment(&mut self, backend: &mut dyn GraphicsBackend, mut attachment: Attachment) {
        if let Some(index) = self.attachments.iter().position(|a| a.name() == attachment.name()) {
            let mut previous = self.attachments.remove(index);
            attachment.enabled = previous.enabled;
            previous.destroy(backend);
            self.attachments.insert(index, attachment);
        } else {
            self.attachments.push(attachment);
        }
        self.last_size = None;
    }

    /// Enable exactly the named attachments and disable every other one.
    ///
    /// Allocation is left to the next reconfigure.
    pub fn enable_attachments(&mut self, names: &[&str]) {
        let mut changed = false;
        for attachment in &mut self.attachments {
            let enabled = names.contains(&attachment.name());
            changed |= attachment.enabled != enabled;
            attachment.enabled = enabled;
        }
        if changed {
            self.last_size = None;
        }
    }

    /// Change the clear color of a color attachment without reallocating it.
    pub fn set_clear_color(&mut self, name: &str, color: [f32; 4]) {
        if let Some(attachment) = self.attachment_mut(name) {
            attachment.set_clear_color(color);
            self.rebuild_pass_descriptors();
        }
    }

    // Geometry

    pub fn scale_factor(&self) -> f32 {
        self.scale_factor
    }

    pub fn set_scale_factor(&mut self, scale_factor: f32) {
        self.scale_factor = scale_factor;
    }

    /// Explicit size override
    pub fn size(&self) -> Option<(u32, u32)> {
        self.size
    }

    pub fn set_size(&mut self, size: Option<(u32, u32)>) {
        self.size = size;
    }

    pub fn sample_count(&self) -> u32 {
        self.sample_count
    }

    /// Takes effect at the next allocation.
    pub fn set_sample_count(&mut self, sample_count: u32) {
        let sample_count = sample_count.max(1);
        if self.sample_count != sample_count {
            self.sample_count = sample_count;
            self.last_size = None;
        }
    }

    pub fn layers(&self) -> u32 {
        self.layers
    }

    /// Takes effect at the next allocation.
    pub fn set_layers(&mut self, layers: u32) {
        let layers = layers.max(1);
        if self.layers != layers {
            self.layers = layers;
            self.current_layer = 0;
            self.last_size = None;
        }
    }

    pub fn is_cubemap(&self) -> bool {
        self.cubemap
    }

    pub fn set_cubemap(&mut self, cubemap: bool) {
        if self.cubemap != cubemap {
            self.cubemap = cubemap;
            self.last_size = None;
        }
    }

    pub fn is_pre_pass(&self) -> bool {
        self.pre_pass
    }

    /// Size the attachments are allocated at for a path of `path_size`.
    ///
    /// The explicit size override wins. Otherwise the path size is scaled and
    /// rounded, never collapsing a non-empty dimension to zero.
    pub fn target_size(&self, path_size: (u32, u32)) -> (u32, u32) {
        if let Some(size) = self.size {
            return size;
        }
        let scale = |extent: u32| {
            if extent == 0 {
                0
            } else {
                ((extent as f32 * self.scale_factor).round() as u32).max(1)
            }
        };
        (scale(path_size.0), scale(path_size.1))
    }

    /// Allocate every enabled attachment at the target size.
    ///
    /// Memoized by target size: returns `Ok(false)` without touching the
    /// backend when nothing changed since the last call. Disabled attachments
    /// are never touched.
    pub fn init_attachments(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        path_size: (u32, u32),
    ) -> BackendResult<bool> {
        let size = self.target_size(path_size);
        if self.last_size == Some(size) {
            return Ok(false);
        }

        let empty = size.0 == 0 || size.1 == 0;
        for attachment in self.attachments.iter_mut().filter(|a| a.enabled) {
            if empty {
                attachment.destroy(backend);
            } else if let Err(err) =
                attachment.init(backend, size, self.sample_count, self.layers, self.cubemap)
            {
                // Earlier views may already be gone; no pass opens until a retry succeeds
                self.last_size = None;
                self.pass_descriptors.clear();
                return Err(err);
            }
        }

        self.last_size = Some(size);
        self.current_layer = self.current_layer.min(self.layers - 1);
        self.rebuild_pass_descriptors();
        Ok(true)
    }

    /// Rebuild the pass descriptors from the current attachments, one per layer.
    pub fn rebuild_pass_descriptors(&mut self) {
        self.pass_descriptors.clear();
        let allocated = self
            .attachments
            .iter()
            .any(|a| a.enabled && a.is_allocated());
        if !allocated {
            return;
        }

        let descriptors = (0..self.layers)
            .map(|layer| RenderPassDescriptor {
                label: Some(if self.layers == 1 {
                    self.name.clone()
                } else {
                    format!("{}[{}]", self.name, layer)
                }),
                color_attachments: self
                    .colors()
                    .filter_map(|a| a.color_target(layer))
                    .collect(),
                depth_stencil_attachment: self.depth().and_then(|a| a.depth_target(layer)),
            })
            .collect();
        self.pass_descriptors = descriptors;
    }

    /// Allocate attachments and republish their output ports.
    pub fn reconfigure(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        path_size: (u32, u32),
    ) -> BackendResult<()> {
        self.init_attachments(backend, path_size)?;
        self.publish_attachment_outputs();
        Ok(())
    }

    /// Point an output port at every enabled attachment and drop the rest.
    pub fn publish_attachment_outputs(&mut self) {
        self.outputs
            .retain(|_, slot| !matches!(slot, OutputSlot::Attachment(_)));
        for attachment in self.attachments.iter().filter(|a| a.enabled) {
            self.outputs.insert(
                attachment.name().to_string(),
                OutputSlot::Attachment(attachment.name().to_string()),
            );
        }
    }

    /// Release every attachment and forget the memoized size.
    pub fn destroy(&mut self, backend: &mut dyn GraphicsBackend) {
        for attachment in &mut self.attachments {
            attachment.destroy(backend);
        }
        self.last_size = None;
        self.pass_descriptors.clear();
        self.pass_open = false;
    }

    // Ports

    pub fn inputs(&self) -> &BTreeMap<String, PortRef> {
        &self.inputs
    }

    pub(crate) fn set_input(&mut self, port: impl Into<String>, source: PortRef) {
        self.inputs.insert(port.into(), source);
    }

    pub(crate) fn remove_input(&mut self, port: &str) -> Option<PortRef> {
        self.inputs.remove(port)
    }

    /// Resolve an output port. Absent until the node publishes it.
    pub fn output(&self, port: &str) -> Option<Port<'_>> {
        match self.outputs.get(port)? {
            OutputSlot::Attachment(name) => self
                .attachment(name)
                .filter(|a| a.enabled)
                .map(Port::Attachment),
            OutputSlot::Value(value) => Some(Port::Value(value)),
        }
    }

    pub fn output_names(&self) -> impl Iterator<Item = &str> {
        self.outputs.keys().map(String::as_str)
    }

    /// Publish a computed value.
    pub fn set_output(&mut self, port: impl Into<String>, value: PortValue) {
        self.outputs.insert(port.into(), OutputSlot::Value(value));
    }

    pub fn clear_output(&mut self, port: &str) {
        self.outputs.remove(port);
    }

    // Passes

    pub fn current_layer(&self) -> u32 {
        self.current_layer
    }

    /// Select the layer targeted by the next [`begin_pass`](Self::begin_pass).
    pub fn set_render_layer(&mut self, layer: u32) -> RenderResult<()> {
        if layer >= self.layers {
            return Err(RenderGraphError::LayerOutOfRange {
                node: self.name.clone(),
                layer,
                layers: self.layers,
            });
        }
        self.current_layer = layer;
        Ok(())
    }

    pub fn pass_descriptors(&self) -> &[RenderPassDescriptor] {
        &self.pass_descriptors
    }

    /// Descriptor of the current layer, absent while nothing is allocated
    pub fn render_pass_descriptor(&self) -> Option<&RenderPassDescriptor> {
        self.pass_descriptors.get(self.current_layer as usize)
    }

    /// Open a pass on the current layer. Returns false when there is nothing to render into.
    pub fn begin_pass(&mut self, backend: &mut dyn GraphicsBackend) -> bool {
        match self.pass_descriptors.get(self.current_layer as usize) {
            Some(desc) => {
                backend.begin_render_pass(desc);
                self.pass_open = true;
                true
            }
            None => false,
        }
    }

    pub fn end_pass(&mut self, backend: &mut dyn GraphicsBackend) {
        if self.pass_open {
            backend.end_render_pass();
            self.pass_open = false;
        }
    }

    pub fn is_pass_open(&self) -> bool {
        self.pass_open
    }

    /// Resolve the multisampled depth of the current layer, if there is one.
    pub fn resolve_depth(&self, backend: &mut dyn GraphicsBackend) {
        if let Some((source, target)) = self
            .depth()
            .and_then(|depth| depth.depth_resolve(self.current_layer))
        {
            backend.resolve_depth(source, target);
        }
    }

    pub fn shader_cache(&self) -> &ShaderCache {
        &self.shader_cache
    }

    pub fn shader_cache_mut(&mut self) -> &mut ShaderCache {
        &mut self.shader_cache
    }
}

/// Storage for the nodes of a render path, indexed by [`NodeId`]
///
/// A node being executed is taken out of its slot so the rest can be read
/// while it records.
#[derive(Default)]
pub struct NodeArena {
    slots: Vec<Option<Box<dyn RenderNode>>>,
}

impl NodeArena {
    pub fn get(&self, id: NodeId) -> Option<&dyn RenderNode> {
        self.slots.get(id.index())?.as_deref()
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut dyn RenderNode> {
        match self.slots.get_mut(id.index()) {
            Some(Some(node)) => Some(node.as_mut()),
            _ => None,
        }
    }

    pub(crate) fn insert(
        &mut self,
        id: NodeId,
        node: Box<dyn RenderNode>,
    ) -> Option<Box<dyn RenderNode>> {
        if self.slots.len() <= id.index() {
            self.slots.resize_with(id.index() + 1, || None);
        }
        self.slots[id.index()].replace(node)
    }

    pub(crate) fn take(&mut self, id: NodeId) -> Option<Box<dyn RenderNode>> {
        self.slots.get_mut(id.index())?.take()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.get(id).is_some()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Box<dyn RenderNode>> {
        self.slots.iter_mut().flatten()
    }
}

/// Everything a node can reach while it is reconfigured or recorded
pub struct NodeContext<'a> {
    pub backend: &'a mut dyn GraphicsBackend,
    pub settings: &'a RenderSettings,
    /// Width and height of the owning render path
    pub path_size: (u32, u32),
    nodes: Option<&'a NodeArena>,
    frame: Option<&'a FrameInputs>,
}

impl<'a> NodeContext<'a> {
    /// A context with no other nodes and no frame data.
    pub fn new(
        backend: &'a mut dyn GraphicsBackend,
        settings: &'a RenderSettings,
        path_size: (u32, u32),
    ) -> Self {
        Self {
            backend,
            settings,
            path_size,
            nodes: None,
            frame: None,
        }
    }

    pub(crate) fn with_nodes(mut self, nodes: &'a NodeArena) -> Self {
        self.nodes = Some(nodes);
        self
    }

    pub fn with_frame(mut self, frame: &'a FrameInputs) -> Self {
        self.frame = Some(frame);
        self
    }

    /// Frame data of the current run, absent outside one
    pub fn frame(&self) -> Option<&'a FrameInputs> {
        self.frame
    }

    pub fn require_frame(&self, state: &NodeState) -> RenderResult<&'a FrameInputs> {
        self.frame.ok_or_else(|| RenderGraphError::MissingFrameInputs {
            node: state.name().to_string(),
        })
    }

    /// Resolve an input port of `state` through the connected node's output.
    ///
    /// `None` means the port is unwired or the producer does not publish it,
    /// which callers treat as the feature being off.
    pub fn input(&self, state: &NodeState, port: &str) -> Option<Port<'a>> {
        let source = state.inputs().get(port)?;
        self.nodes?.get(source.node)?.state().output(&source.output)
    }

    pub fn require_input(&self, state: &NodeState, port: &str) -> RenderResult<Port<'a>> {
        self.input(state, port)
            .ok_or_else(|| RenderGraphError::MissingInput {
                node: state.name().to_string(),
                port: port.to_string(),
            })
    }
}

/// A single GPU render pass in a render path
///
/// Every lifecycle step has a default that works off [`NodeState`]; concrete
/// passes usually override `render` and, when their attachment set depends on
/// settings, `reconfigure`.
pub trait RenderNode: 'static {
    fn state(&self) -> &NodeState;
    fn state_mut(&mut self) -> &mut NodeState;

    /// Allow downcasting
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;

    fn name(&self) -> &str {
        self.state().name()
    }

    /// Bring attachments and outputs in line with the current settings and size.
    ///
    /// Idempotent; each call supersedes the previous configuration.
    fn reconfigure(&mut self, ctx: &mut NodeContext<'_>) -> RenderResult<()> {
        let size = ctx.path_size;
        self.state_mut().reconfigure(ctx.backend, size)?;
        Ok(())
    }

    /// Open the pass for the current layer
    fn begin(&mut self, ctx: &mut NodeContext<'_>) -> RenderResult<()> {
        self.state_mut().begin_pass(ctx.backend);
        Ok(())
    }

    /// Record draws into the open pass
    fn render(&mut self, _ctx: &mut NodeContext<'_>) -> RenderResult<()> {
        Ok(())
    }

    /// Close the pass
    fn end(&mut self, ctx: &mut NodeContext<'_>) -> RenderResult<()> {
        self.state_mut().end_pass(ctx.backend);
        Ok(())
    }

    /// Record the node's work for one frame
    fn run(&mut self, ctx: &mut NodeContext<'_>) -> RenderResult<()> {
        run_pass(self, ctx)
    }

    /// Start compiling the pipelines the given frame will need.
    fn precompile(&mut self, _ctx: &mut NodeContext<'_>) -> RenderResult<Vec<PendingShader>> {
        Ok(Vec::new())
    }

    /// Forget everything built for a geometry the scene destroyed.
    fn evict_geometry(&mut self, geometry: GeometryId, backend: &mut dyn GraphicsBackend) {
        self.state_mut()
            .shader_cache_mut()
            .evict_geometry(geometry, backend);
    }

    /// Forget everything built for a material the scene destroyed.
    fn evict_material(&mut self, material: MaterialId, backend: &mut dyn GraphicsBackend) {
        self.state_mut()
            .shader_cache_mut()
            .evict_material(material, backend);
    }

    /// Release attachments and cached pipelines.
    fn destroy(&mut self, backend: &mut dyn GraphicsBackend) {
        let state = self.state_mut();
        state.destroy(backend);
        state.shader_cache_mut().clear(backend);
    }
}

/// `begin`, `render`, `end`, then the depth resolve, on the current layer.
///
/// `render` is skipped when `begin` opened nothing.
pub fn run_pass<N: RenderNode + ?Sized>(node: &mut N, ctx: &mut NodeContext<'_>) -> RenderResult<()> {
    node.begin(ctx)?;
    if node.state().is_pass_open() {
        node.render(ctx)?;
    }
    node.end(ctx)?;
    node.state().resolve_depth(ctx.backend);
    Ok(())
}

/// Run one pass per layer, then select layer 0 again.
pub fn run_layers<N: RenderNode + ?Sized>(node: &mut N, ctx: &mut NodeContext<'_>) -> RenderResult<()> {
    for layer in 0..node.state().layers() {
        node.state_mut().set_render_layer(layer)?;
        run_pass(node, ctx)?;
    }
    node.state_mut().set_render_layer(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render_graph::attachment::Attachment;

    struct TestNode {
        state: NodeState,
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
    }

    fn color_depth_node() -> NodeState {
        NodeState::new("test")
            .with_attachment(Attachment::color("color", TextureFormat::Rgba8Unorm))
            .with_attachment(Attachment::color("extra", TextureFormat::R8Unorm).with_enabled(false))
            .with_attachment(Attachment::depth("depth", TextureFormat::Depth32Float))
    }

    fn texture_of(state: &NodeState, name: &str) -> Option<TextureHandle> {
        state.attachment(name)?.texture().map(|t| t.handle)
    }

    #[test]
    fn test_target_size_scaling() {
        let state = NodeState::new("half").with_scale_factor(0.5);
        assert_eq!(state.target_size((101, 50)), (51, 25));
        assert_eq!(state.target_size((1, 1)), (1, 1));
        assert_eq!(state.target_size((0, 10)), (0, 5));

        let fixed = NodeState::new("fixed").with_size((512, 512)).with_scale_factor(0.5);
        assert_eq!(fixed.target_size((1920, 1080)), (512, 512));
    }

    #[test]
    fn test_reconfigure_is_idempotent() {
        let mut backend = RecordingBackend::new();
        let mut state = color_depth_node();

        state.reconfigure(&mut backend, (64, 64)).unwrap();
        let color = texture_of(&state, "color");
        let depth = texture_of(&state, "depth");
        let created = backend.textures_created();

        state.reconfigure(&mut backend, (64, 64)).unwrap();
        assert_eq!(texture_of(&state, "color"), color);
        assert_eq!(texture_of(&state, "depth"), depth);
        assert_eq!(backend.textures_created(), created);
    }

    #[test]
    fn test_resize_reallocates_enabled_only() {
        let mut backend = RecordingBackend::new();
        let mut state = color_depth_node();
        state.reconfigure(&mut backend, (64, 64)).unwrap();
        let color = texture_of(&state, "color");

        state.reconfigure(&mut backend, (128, 64)).unwrap();
        assert_ne!(texture_of(&state, "color"), color);
        assert_eq!(state.attachment("color").unwrap().size(), (128, 64));
        assert_eq!(texture_of(&state, "extra"), None);
        assert_eq!(backend.live_texture_count(), 2);
    }

    #[test]
    fn test_failed_resize_opens_no_pass() {
        let mut backend = RecordingBackend::new();
        let mut state = color_depth_node();
        state.reconfigure(&mut backend, (64, 64)).unwrap();

        backend.fail_next_texture(BackendError::OutOfMemory);
        let err = state.reconfigure(&mut backend, (128, 128)).unwrap_err();
        assert_eq!(err, BackendError::OutOfMemory);
        assert!(!state.attachment("color").unwrap().is_allocated());
        assert!(state.pass_descriptors().is_empty());

        backend.begin_command_encoder(None);
        assert!(!state.begin_pass(&mut backend));

        // The same size is retried instead of being treated as current
        state.reconfigure(&mut backend, (128, 128)).unwrap();
        let desc = &state.pass_descriptors()[0];
        for target in &desc.color_attachments {
            assert!(backend.view_info(target.view).is_some());
        }
        let depth = desc.depth_stencil_attachment.as_ref().unwrap();
        assert!(backend.view_info(depth.view).is_some());
        assert_eq!(state.attachment("color").unwrap().size(), (128, 128));
    }

    #[test]
    fn test_outputs_follow_enabled_set() {
        let mut backend = RecordingBackend::new();
        let mut state = color_depth_node();
        assert!(state.output("color").is_none());

        state.reconfigure(&mut backend, (32, 32)).unwrap();
        assert!(state.output("color").is_some());
        assert!(state.output("extra").is_none());

        state.destroy(&mut backend);
        state.enable_attachments(&["extra", "depth"]);
        state.reconfigure(&mut backend, (32, 32)).unwrap();

        assert!(state.output("color").is_none());
        assert!(state.output("extra").unwrap().texture_view().is_some());
        assert!(!state.attachment("color").unwrap().is_allocated());
    }

    #[test]
    fn test_layer_bounds() {
        let mut backend = RecordingBackend::new();
        let mut state = NodeState::new("cascades")
            .with_attachment(Attachment::depth("depth", TextureFormat::Depth32Float))
            .with_layers(3);
        state.reconfigure(&mut backend, (16, 16)).unwrap();
        assert_eq!(state.pass_descriptors().len(), 3);

        assert!(state.set_render_layer(2).is_ok());
        let err = state.set_render_layer(3).unwrap_err();
        assert_eq!(
            err,
            RenderGraphError::LayerOutOfRange {
                node: "cascades".into(),
                layer: 3,
                layers: 3
            }
        );
        // A rejected layer leaves the selection alone.
        assert_eq!(state.current_layer(), 2);
    }

    #[test]
    fn test_begin_targets_selected_layer() {
        let mut backend = RecordingBackend::new();
        let mut state = NodeState::new("cascades")
            .with_attachment(Attachment::depth("depth", TextureFormat::Depth32Float))
            .with_layers(4);
        state.reconfigure(&mut backend, (16, 16)).unwrap();
        let expected = state.attachment("depth").unwrap().texture().unwrap().layer_views[2];

        state.set_render_layer(2).unwrap();
        backend.begin_command_encoder(None);
        assert!(state.begin_pass(&mut backend));
        state.end_pass(&mut backend);

        let desc = backend
            .commands()
            .iter()
            .find_map(|c| match c {
                RecordedCommand::BeginRenderPass(desc) => Some(desc.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(desc.depth_stencil_attachment.unwrap().view, expected);
        assert_eq!(desc.label.as_deref(), Some("cascades[2]"));
    }

    #[test]
    fn test_zero_size_allocates_nothing() {
        let mut backend = RecordingBackend::new();
        let mut node = TestNode {
            state: color_depth_node(),
        };
        let settings = RenderSettings::default();
        let mut ctx = NodeContext::new(&mut backend, &settings, (0, 0));
        node.reconfigure(&mut ctx).unwrap();
        node.run(&mut ctx).unwrap();

        assert!(node.state().render_pass_descriptor().is_none());
        assert_eq!(backend.live_texture_count(), 0);
        assert!(backend.commands().is_empty());
    }

    #[test]
    fn test_destroy_forces_reallocation() {
        let mut backend = RecordingBackend::new();
        let mut state = color_depth_node();
        state.reconfigure(&mut backend, (8, 8)).unwrap();
        let color = texture_of(&state, "color");

        state.destroy(&mut backend);
        assert_eq!(backend.live_texture_count(), 0);

        assert!(state.init_attachments(&mut backend, (8, 8)).unwrap());
        assert_ne!(texture_of(&state, "color"), color);
    }

    #[test]
    fn test_multisampled_run_resolves_depth() {
        let mut backend = RecordingBackend::new();
        let mut node = TestNode {
            state: color_depth_node().with_sample_count(4),
        };
        let settings = RenderSettings::default();
        let mut ctx = NodeContext::new(&mut backend, &settings, (8, 8));
        node.reconfigure(&mut ctx).unwrap();
        ctx.backend.begin_command_encoder(None);
        node.run(&mut ctx).unwrap();

        let resolves = backend
            .commands()
            .iter()
            .filter(|c| matches!(c, RecordedCommand::ResolveDepth { .. }))
            .count();
        assert_eq!(resolves, 1);
    }

    #[test]
    fn test_unwired_input_is_absent() {
        let mut backend = RecordingBackend::new();
        let settings = RenderSettings::default();
        let state = NodeState::new("consumer");
        let ctx = NodeContext::new(&mut backend, &settings, (8, 8));

        assert!(ctx.input(&state, "color").is_none());
        assert_eq!(
            ctx.require_input(&state, "color").unwrap_err(),
            RenderGraphError::MissingInput {
                node: "consumer".into(),
                port: "color".into()
            }
        );
        assert!(ctx.require_frame(&state).is_err());
    }
}
