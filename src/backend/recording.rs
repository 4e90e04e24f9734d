//! Recording backend for testing and dry runs.
//!
//! This backend doesn't touch a GPU. It hands out unique handles, validates
//! descriptors against its limits, and records every command so the order of
//! passes and draws can be inspected after a frame.

use std::collections::{HashMap, HashSet};
use std::ops::Range;

use crate::backend::traits::*;
use crate::backend::types::*;

/// A command captured by [`RecordingBackend`].
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCommand {
    BeginEncoder { label: Option<String> },
    BeginRenderPass(RenderPassDescriptor),
    EndRenderPass,
    SetPipeline(RenderPipelineHandle),
    SetBindGroup { index: u32, bind_group: BindGroupHandle },
    SetVertexBuffer { slot: u32, buffer: BufferHandle },
    SetIndexBuffer { buffer: BufferHandle, format: IndexFormat },
    SetViewport { width: f32, height: f32 },
    Draw { vertices: Range<u32>, instances: Range<u32> },
    DrawIndexed { indices: Range<u32>, base_vertex: i32, instances: Range<u32> },
    ResolveDepth { source: TextureViewHandle, target: TextureViewHandle },
    Submit,
}

/// Headless backend that records instead of executing.
#[derive(Debug, Default)]
pub struct RecordingBackend {
    limits: BackendLimits,
    next_id: u64,

    buffers: HashMap<u64, BufferDescriptor>,
    textures: HashMap<u64, TextureDescriptor>,
    views: HashMap<u64, (TextureHandle, TextureViewDescriptor)>,
    pipelines: HashMap<u64, RenderPipelineDescriptor>,
    samplers: HashSet<u64>,
    bind_group_layouts: HashSet<u64>,
    bind_group_layouts_created: usize,
    bind_groups: HashMap<u64, BindGroupLayoutHandle>,
    bind_groups_created: usize,

    pipelines_created: usize,
    textures_created: usize,
    submissions: usize,

    encoder_open: bool,
    commands: Vec<RecordedCommand>,

    fail_next_texture: Option<BackendError>,
    fail_next_pipeline: Option<BackendError>,
}

impl RecordingBackend {
    /// Create a new recording backend with default limits.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a recording backend reporting the given limits.
    pub fn with_limits(limits: BackendLimits) -> Self {
        Self {
            limits,
            ..Self::default()
        }
    }

    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn record(&mut self, command: RecordedCommand) {
        log::trace!("RecordingBackend: {:?}", command);
        self.commands.push(command);
    }

    /// Reject the next texture creation with `error`.
    pub fn fail_next_texture(&mut self, error: BackendError) {
        self.fail_next_texture = Some(error);
    }

    /// Reject the next pipeline creation with `error`.
    pub fn fail_next_pipeline(&mut self, error: BackendError) {
        self.fail_next_pipeline = Some(error);
    }

    /// Commands recorded since the last [`clear_commands`](Self::clear_commands).
    pub fn commands(&self) -> &[RecordedCommand] {
        &self.commands
    }

    pub fn clear_commands(&mut self) {
        self.commands.clear();
    }

    /// Labels of every render pass begun, in order.
    pub fn pass_labels(&self) -> Vec<String> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                RecordedCommand::BeginRenderPass(desc) => {
                    Some(desc.label.clone().unwrap_or_default())
                }
                _ => None,
            })
            .collect()
    }

    pub fn live_texture_count(&self) -> usize {
        self.textures.len()
    }

    pub fn live_buffer_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn textures_created(&self) -> usize {
        self.textures_created
    }

    pub fn is_texture_alive(&self, texture: TextureHandle) -> bool {
        self.textures.contains_key(&texture.0)
    }

    pub fn texture_descriptor(&self, texture: TextureHandle) -> Option<&TextureDescriptor> {
        self.textures.get(&texture.0)
    }

    /// Texture and descriptor a view was created from, while it is alive.
    pub fn view_info(&self, view: TextureViewHandle) -> Option<&(TextureHandle, TextureViewDescriptor)> {
        self.views.get(&view.0)
    }

    pub fn live_pipeline_count(&self) -> usize {
        self.pipelines.len()
    }

    pub fn pipelines_created(&self) -> usize {
        self.pipelines_created
    }

    pub fn pipeline_descriptor(&self, pipeline: RenderPipelineHandle) -> Option<&RenderPipelineDescriptor> {
        self.pipelines.get(&pipeline.0)
    }

    pub fn bind_groups_created(&self) -> usize {
        self.bind_groups_created
    }

    pub fn live_bind_group_count(&self) -> usize {
        self.bind_groups.len()
    }

    pub fn bind_group_layouts_created(&self) -> usize {
        self.bind_group_layouts_created
    }

    pub fn live_bind_group_layout_count(&self) -> usize {
        self.bind_group_layouts.len()
    }

    pub fn live_sampler_count(&self) -> usize {
        self.samplers.len()
    }

    pub fn submissions(&self) -> usize {
        self.submissions
    }
}

impl GraphicsBackend for RecordingBackend {
    fn name(&self) -> &str {
        "Recording Backend"
    }

    fn limits(&self) -> BackendLimits {
        self.limits
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle> {
        if desc.size == 0 {
            return Err(BackendError::BufferCreationFailed(format!(
                "{:?}: zero-sized buffer",
                desc.label
            )));
        }
        let id = self.allocate_id();
        self.buffers.insert(id, desc.clone());
        Ok(BufferHandle(id))
    }

    fn create_buffer_init(
        &mut self,
        desc: &BufferDescriptor,
        data: &[u8],
    ) -> BackendResult<BufferHandle> {
        let desc = BufferDescriptor {
            size: desc.size.max(data.len() as u64),
            ..desc.clone()
        };
        self.create_buffer(&desc)
    }

    fn write_buffer(&mut self, buffer: BufferHandle, _offset: u64, data: &[u8]) {
        log::trace!("RecordingBackend: write {} bytes to {:?}", data.len(), buffer);
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        self.buffers.remove(&buffer.0);
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        if let Some(error) = self.fail_next_texture.take() {
            return Err(error);
        }
        if desc.width == 0 || desc.height == 0 {
            return Err(BackendError::TextureCreationFailed(format!(
                "{:?}: zero-sized texture",
                desc.label
            )));
        }
        if desc.width > self.limits.max_texture_dimension_2d
            || desc.height > self.limits.max_texture_dimension_2d
        {
            return Err(BackendError::TextureCreationFailed(format!(
                "{:?}: {}x{} exceeds the dimension limit",
                desc.label, desc.width, desc.height
            )));
        }
        if desc.array_layers > self.limits.max_texture_array_layers {
            return Err(BackendError::TextureCreationFailed(format!(
                "{:?}: {} layers exceed the array-layer limit",
                desc.label, desc.array_layers
            )));
        }
        if desc.sample_count > self.limits.max_sample_count {
            return Err(BackendError::TextureCreationFailed(format!(
                "{:?}: sample count {} unsupported",
                desc.label, desc.sample_count
            )));
        }
        if desc.cube_compatible && desc.array_layers % 6 != 0 {
            return Err(BackendError::TextureCreationFailed(format!(
                "{:?}: cube textures need a multiple of 6 layers",
                desc.label
            )));
        }

        let id = self.allocate_id();
        log::trace!(
            "RecordingBackend: creating texture {:?} ({}x{}x{}, {} samples)",
            desc.label,
            desc.width,
            desc.height,
            desc.array_layers,
            desc.sample_count
        );
        self.textures.insert(id, desc.clone());
        self.textures_created += 1;
        Ok(TextureHandle(id))
    }

    fn create_texture_view(
        &mut self,
        texture: TextureHandle,
        desc: &TextureViewDescriptor,
    ) -> BackendResult<TextureViewHandle> {
        let Some(tex) = self.textures.get(&texture.0) else {
            return Err(BackendError::InvalidHandle(format!("{:?}", texture)));
        };
        if desc.base_array_layer + desc.array_layer_count > tex.array_layers {
            return Err(BackendError::TextureCreationFailed(format!(
                "view layers {}..{} out of range for {:?}",
                desc.base_array_layer,
                desc.base_array_layer + desc.array_layer_count,
                tex.label
            )));
        }
        let id = self.allocate_id();
        self.views.insert(id, (texture, desc.clone()));
        Ok(TextureViewHandle(id))
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        if self.textures.remove(&texture.0).is_some() {
            self.views.retain(|_, (owner, _)| *owner != texture);
        }
    }

    fn create_sampler(&mut self, _desc: &SamplerDescriptor) -> BackendResult<SamplerHandle> {
        let id = self.allocate_id();
        self.samplers.insert(id);
        Ok(SamplerHandle(id))
    }

    fn destroy_sampler(&mut self, sampler: SamplerHandle) {
        self.samplers.remove(&sampler.0);
    }

    fn create_bind_group_layout(
        &mut self,
        _entries: &[BindGroupLayoutEntry],
    ) -> BackendResult<BindGroupLayoutHandle> {
        let id = self.allocate_id();
        self.bind_group_layouts.insert(id);
        self.bind_group_layouts_created += 1;
        Ok(BindGroupLayoutHandle(id))
    }

    fn destroy_bind_group_layout(&mut self, layout: BindGroupLayoutHandle) {
        self.bind_group_layouts.remove(&layout.0);
    }

    fn create_bind_group(
        &mut self,
        layout: BindGroupLayoutHandle,
        entries: &[(u32, BindGroupEntry)],
    ) -> BackendResult<BindGroupHandle> {
        for (binding, entry) in entries {
            if let BindGroupEntry::Texture(view) = entry {
                if !self.views.contains_key(&view.0) {
                    return Err(BackendError::InvalidHandle(format!(
                        "binding {binding}: stale texture view {:?}",
                        view
                    )));
                }
            }
        }
        let id = self.allocate_id();
        self.bind_groups.insert(id, layout);
        self.bind_groups_created += 1;
        Ok(BindGroupHandle(id))
    }

    fn destroy_bind_group(&mut self, bind_group: BindGroupHandle) {
        self.bind_groups.remove(&bind_group.0);
    }

    fn create_render_pipeline(
        &mut self,
        desc: &RenderPipelineDescriptor,
    ) -> BackendResult<RenderPipelineHandle> {
        if let Some(error) = self.fail_next_pipeline.take() {
            return Err(error);
        }
        let id = self.allocate_id();
        log::trace!("RecordingBackend: creating pipeline {:?}", desc.label);
        self.pipelines.insert(id, desc.clone());
        self.pipelines_created += 1;
        Ok(RenderPipelineHandle(id))
    }

    fn destroy_render_pipeline(&mut self, pipeline: RenderPipelineHandle) {
        self.pipelines.remove(&pipeline.0);
    }

    fn begin_command_encoder(&mut self, label: Option<&str>) {
        self.encoder_open = true;
        self.record(RecordedCommand::BeginEncoder {
            label: label.map(str::to_string),
        });
    }

    fn begin_render_pass(&mut self, desc: &RenderPassDescriptor) {
        self.record(RecordedCommand::BeginRenderPass(desc.clone()));
    }

    fn end_render_pass(&mut self) {
        self.record(RecordedCommand::EndRenderPass);
    }

    fn set_render_pipeline(&mut self, pipeline: RenderPipelineHandle) {
        self.record(RecordedCommand::SetPipeline(pipeline));
    }

    fn set_bind_group(&mut self, index: u32, bind_group: BindGroupHandle) {
        self.record(RecordedCommand::SetBindGroup { index, bind_group });
    }

    fn set_vertex_buffer(&mut self, slot: u32, buffer: BufferHandle, _offset: u64) {
        self.record(RecordedCommand::SetVertexBuffer { slot, buffer });
    }

    fn set_index_buffer(&mut self, buffer: BufferHandle, _offset: u64, format: IndexFormat) {
        self.record(RecordedCommand::SetIndexBuffer { buffer, format });
    }

    fn set_viewport(&mut self, _x: f32, _y: f32, width: f32, height: f32, _min_depth: f32, _max_depth: f32) {
        self.record(RecordedCommand::SetViewport { width, height });
    }

    fn draw(&mut self, vertices: Range<u32>, instances: Range<u32>) {
        self.record(RecordedCommand::Draw { vertices, instances });
    }

    fn draw_indexed(&mut self, indices: Range<u32>, base_vertex: i32, instances: Range<u32>) {
        self.record(RecordedCommand::DrawIndexed {
            indices,
            base_vertex,
            instances,
        });
    }

    fn resolve_depth(&mut self, source: TextureViewHandle, target: TextureViewHandle) {
        self.record(RecordedCommand::ResolveDepth { source, target });
    }

    fn submit(&mut self) -> BackendResult<()> {
        if !self.encoder_open {
            return Err(BackendError::NoEncoder);
        }
        self.encoder_open = false;
        self.submissions += 1;
        self.record(RecordedCommand::Submit);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handles_are_unique() {
        let mut backend = RecordingBackend::new();
        let a = backend.create_texture(&TextureDescriptor::default()).unwrap();
        let b = backend.create_texture(&TextureDescriptor::default()).unwrap();
        assert_ne!(a, b);
        assert_eq!(backend.live_texture_count(), 2);
    }

    #[test]
    fn test_destroy_texture_drops_views() {
        let mut backend = RecordingBackend::new();
        let texture = backend.create_texture(&TextureDescriptor::default()).unwrap();
        let view = backend
            .create_texture_view(texture, &TextureViewDescriptor::layer(0))
            .unwrap();
        backend.destroy_texture(texture);
        assert!(backend.view_info(view).is_none());
        assert_eq!(backend.live_texture_count(), 0);
    }

    #[test]
    fn test_rejects_zero_size_and_limits() {
        let mut backend = RecordingBackend::with_limits(BackendLimits {
            max_texture_array_layers: 4,
            ..BackendLimits::default()
        });
        let zero = TextureDescriptor {
            width: 0,
            ..TextureDescriptor::default()
        };
        assert!(backend.create_texture(&zero).is_err());

        let too_many_layers = TextureDescriptor {
            array_layers: 5,
            ..TextureDescriptor::default()
        };
        assert!(backend.create_texture(&too_many_layers).is_err());
    }

    #[test]
    fn test_injected_failure_is_one_shot() {
        let mut backend = RecordingBackend::new();
        backend.fail_next_texture(BackendError::OutOfMemory);
        assert_eq!(
            backend.create_texture(&TextureDescriptor::default()),
            Err(BackendError::OutOfMemory)
        );
        assert!(backend.create_texture(&TextureDescriptor::default()).is_ok());
    }

    #[test]
    fn test_submit_requires_encoder() {
        let mut backend = RecordingBackend::new();
        assert_eq!(backend.submit(), Err(BackendError::NoEncoder));
        backend.begin_command_encoder(Some("frame"));
        assert!(backend.submit().is_ok());
        assert_eq!(backend.submissions(), 1);
    }
}
