//! Core backend abstraction traits
//!
//! The render graph never touches a graphics API directly. Everything it needs
//! from the GPU goes through [`GraphicsBackend`].

use crate::backend::types::*;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Backend error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("Failed to initialize backend: {0}")]
    InitializationFailed(String),
    #[error("Failed to create device: {0}")]
    DeviceCreationFailed(String),
    #[error("Failed to create buffer: {0}")]
    BufferCreationFailed(String),
    #[error("Failed to create texture: {0}")]
    TextureCreationFailed(String),
    #[error("Failed to create pipeline: {0}")]
    PipelineCreationFailed(String),
    #[error("Invalid handle: {0}")]
    InvalidHandle(String),
    #[error("No command encoder is open")]
    NoEncoder,
    #[error("Out of memory")]
    OutOfMemory,
    #[error("Device lost")]
    DeviceLost,
}

pub type BackendResult<T> = Result<T, BackendError>;

macro_rules! define_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub(crate) u64);

        impl $name {
            /// Wrap a backend-specific id.
            pub fn from_raw(id: u64) -> Self {
                Self(id)
            }

            pub fn raw(&self) -> u64 {
                self.0
            }
        }
    };
}

define_handle!(
    /// Handle to a GPU buffer
    BufferHandle
);
define_handle!(
    /// Handle to a GPU texture
    TextureHandle
);
define_handle!(
    /// Handle to a texture view
    TextureViewHandle
);
define_handle!(
    /// Handle to a sampler
    SamplerHandle
);
define_handle!(
    /// Handle to a render pipeline
    RenderPipelineHandle
);
define_handle!(
    /// Handle to a bind group
    BindGroupHandle
);
define_handle!(
    /// Handle to a bind group layout
    BindGroupLayoutHandle
);

/// Bind group entry for creating bind groups
#[derive(Debug, Clone, PartialEq)]
pub enum BindGroupEntry {
    Buffer {
        buffer: BufferHandle,
        offset: u64,
        size: Option<u64>,
    },
    Texture(TextureViewHandle),
    Sampler(SamplerHandle),
}

/// Bind group layout entry
#[derive(Debug, Clone, PartialEq)]
pub struct BindGroupLayoutEntry {
    pub binding: u32,
    pub visibility: ShaderStageFlags,
    pub ty: BindingType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaderStageFlags(u32);

impl ShaderStageFlags {
    pub const VERTEX: Self = Self(1 << 0);
    pub const FRAGMENT: Self = Self(1 << 1);
    pub const VERTEX_FRAGMENT: Self = Self((1 << 0) | (1 << 1));

    pub fn contains(&self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }
}

impl std::ops::BitOr for ShaderStageFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

/// Binding type
#[derive(Debug, Clone, PartialEq)]
pub enum BindingType {
    UniformBuffer,
    Texture {
        sample_type: TextureSampleType,
        view_dimension: TextureViewDimension,
        multisampled: bool,
    },
    Sampler {
        comparison: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureSampleType {
    Float { filterable: bool },
    Depth,
    Uint,
}

/// Render pipeline descriptor
///
/// Both stages live in one WGSL module with `vs_main` / `fs_main` entry points.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderPipelineDescriptor {
    pub label: Option<String>,
    pub shader: String,
    pub has_fragment: bool,
    pub vertex_layouts: Vec<VertexBufferLayout>,
    pub bind_group_layouts: Vec<BindGroupLayoutHandle>,
    pub primitive_topology: PrimitiveTopology,
    pub front_face: FrontFace,
    pub cull_mode: CullMode,
    pub depth_stencil: Option<DepthStencilState>,
    pub color_targets: Vec<ColorTargetState>,
    pub sample_count: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DepthStencilState {
    pub format: TextureFormat,
    pub depth_write_enabled: bool,
    pub depth_compare: CompareFunction,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColorTargetState {
    pub format: TextureFormat,
    pub blend: Option<BlendState>,
}

/// Operation performed on an attachment when a pass begins
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadOp {
    #[default]
    Clear,
    Load,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreOp {
    #[default]
    Store,
    Discard,
}

/// Color attachment for render pass
#[derive(Debug, Clone, PartialEq)]
pub struct ColorAttachment {
    pub view: TextureViewHandle,
    pub resolve_target: Option<TextureViewHandle>,
    pub load_op: LoadOp,
    pub store_op: StoreOp,
    pub clear_value: [f32; 4],
}

/// Depth stencil attachment for render pass
#[derive(Debug, Clone, PartialEq)]
pub struct DepthStencilAttachment {
    pub view: TextureViewHandle,
    pub depth_load_op: LoadOp,
    pub depth_store_op: StoreOp,
    pub depth_clear_value: f32,
}

/// Render pass descriptor
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RenderPassDescriptor {
    pub label: Option<String>,
    pub color_attachments: Vec<ColorAttachment>,
    pub depth_stencil_attachment: Option<DepthStencilAttachment>,
}

/// Index format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexFormat {
    Uint16,
    Uint32,
}

/// Pipeline compilation that may finish on another thread.
pub type PipelineFuture =
    Pin<Box<dyn Future<Output = BackendResult<RenderPipelineHandle>> + Send + 'static>>;

/// Main graphics backend trait
///
/// Object safe; the render graph drives it as `&mut dyn GraphicsBackend`.
pub trait GraphicsBackend {
    /// Backend name for logging
    fn name(&self) -> &str;

    /// Device limits
    fn limits(&self) -> BackendLimits;

    // Resource creation

    /// Create a buffer
    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle>;

    /// Create a buffer with initial data
    fn create_buffer_init(&mut self, desc: &BufferDescriptor, data: &[u8])
        -> BackendResult<BufferHandle>;

    /// Write data to a buffer
    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]);

    /// Destroy a buffer
    fn destroy_buffer(&mut self, buffer: BufferHandle);

    /// Create a texture
    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle>;

    /// Create a view into a texture
    fn create_texture_view(
        &mut self,
        texture: TextureHandle,
        desc: &TextureViewDescriptor,
    ) -> BackendResult<TextureViewHandle>;

    /// Destroy a texture together with every view created from it
    fn destroy_texture(&mut self, texture: TextureHandle);

    /// Create a sampler
    fn create_sampler(&mut self, desc: &SamplerDescriptor) -> BackendResult<SamplerHandle>;

    /// Destroy a sampler
    fn destroy_sampler(&mut self, sampler: SamplerHandle);

    /// Create a bind group layout
    fn create_bind_group_layout(
        &mut self,
        entries: &[BindGroupLayoutEntry],
    ) -> BackendResult<BindGroupLayoutHandle>;

    /// Release a bind group layout. Bind groups and pipelines created from it
    /// stay valid.
    fn destroy_bind_group_layout(&mut self, layout: BindGroupLayoutHandle);

    /// Create a bind group
    fn create_bind_group(
        &mut self,
        layout: BindGroupLayoutHandle,
        entries: &[(u32, BindGroupEntry)],
    ) -> BackendResult<BindGroupHandle>;

    /// Release a bind group
    fn destroy_bind_group(&mut self, bind_group: BindGroupHandle);

    // Pipelines

    /// Create a render pipeline, blocking until it is ready
    fn create_render_pipeline(
        &mut self,
        desc: &RenderPipelineDescriptor,
    ) -> BackendResult<RenderPipelineHandle>;

    /// Start compiling a render pipeline.
    ///
    /// Backends without driver-side async compilation resolve immediately.
    fn create_render_pipeline_async(&mut self, desc: &RenderPipelineDescriptor) -> PipelineFuture {
        Box::pin(std::future::ready(self.create_render_pipeline(desc)))
    }

    /// Release a render pipeline
    fn destroy_render_pipeline(&mut self, pipeline: RenderPipelineHandle);

    // Command recording and execution

    /// Open the command encoder for a frame
    fn begin_command_encoder(&mut self, label: Option<&str>);

    /// Begin a render pass
    fn begin_render_pass(&mut self, desc: &RenderPassDescriptor);

    /// End the current render pass
    fn end_render_pass(&mut self);

    /// Set the render pipeline
    fn set_render_pipeline(&mut self, pipeline: RenderPipelineHandle);

    /// Set a bind group
    fn set_bind_group(&mut self, index: u32, bind_group: BindGroupHandle);

    /// Set vertex buffer
    fn set_vertex_buffer(&mut self, slot: u32, buffer: BufferHandle, offset: u64);

    /// Set index buffer
    fn set_index_buffer(&mut self, buffer: BufferHandle, offset: u64, format: IndexFormat);

    /// Set viewport
    fn set_viewport(&mut self, x: f32, y: f32, width: f32, height: f32, min_depth: f32, max_depth: f32);

    /// Draw primitives
    fn draw(&mut self, vertices: std::ops::Range<u32>, instances: std::ops::Range<u32>);

    /// Draw indexed primitives
    fn draw_indexed(
        &mut self,
        indices: std::ops::Range<u32>,
        base_vertex: i32,
        instances: std::ops::Range<u32>,
    );

    /// Resolve a multisampled depth view into a single-sample one.
    ///
    /// Depth cannot go through the color resolve path on every API, so it is
    /// an explicit step recorded after the pass that produced it.
    fn resolve_depth(&mut self, source: TextureViewHandle, target: TextureViewHandle);

    /// Finish the open encoder and submit it to the queue
    fn submit(&mut self) -> BackendResult<()>;
}
