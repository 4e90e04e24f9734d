//! wgpu backend implementation
//!
//! Handles are plain ids into per-kind maps. Render pass commands are
//! buffered and replayed when the pass ends, so the wgpu pass never has to
//! borrow the backend across calls.

mod depth_resolve;

use crate::backend::traits::*;
use crate::backend::types::*;
use depth_resolve::DepthResolver;
use std::collections::HashMap;
use std::ops::Range;
use wgpu::util::DeviceExt;

/// Buffered render pass command
#[derive(Clone)]
enum RenderCommand {
    SetPipeline(RenderPipelineHandle),
    SetBindGroup { index: u32, bind_group: BindGroupHandle },
    SetVertexBuffer { slot: u32, buffer: BufferHandle, offset: u64 },
    SetIndexBuffer { buffer: BufferHandle, offset: u64, format: IndexFormat },
    SetViewport { x: f32, y: f32, width: f32, height: f32, min_depth: f32, max_depth: f32 },
    Draw { vertices: Range<u32>, instances: Range<u32> },
    DrawIndexed { indices: Range<u32>, base_vertex: i32, instances: Range<u32> },
}

/// Pending render pass with buffered commands
struct PendingRenderPass {
    descriptor: RenderPassDescriptor,
    commands: Vec<RenderCommand>,
}

struct TextureEntry {
    texture: wgpu::Texture,
    format: wgpu::TextureFormat,
}

struct ViewEntry {
    view: wgpu::TextureView,
    owner: u64,
    format: wgpu::TextureFormat,
}

/// wgpu backend implementation
pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    limits: BackendLimits,

    // Resource storage
    buffers: HashMap<u64, wgpu::Buffer>,
    textures: HashMap<u64, TextureEntry>,
    texture_views: HashMap<u64, ViewEntry>,
    samplers: HashMap<u64, wgpu::Sampler>,
    bind_group_layouts: HashMap<u64, wgpu::BindGroupLayout>,
    bind_groups: HashMap<u64, wgpu::BindGroup>,
    render_pipelines: HashMap<u64, wgpu::RenderPipeline>,

    // One counter for every handle kind keeps ids unique across kinds
    next_id: u64,

    // Command encoding
    encoder: Option<wgpu::CommandEncoder>,
    pending_render_pass: Option<PendingRenderPass>,

    depth_resolver: DepthResolver,
}

impl WgpuBackend {
    /// Wrap a device the application already owns.
    pub fn from_device(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        let device_limits = device.limits();
        let limits = BackendLimits {
            max_texture_dimension_2d: device_limits.max_texture_dimension_2d,
            max_texture_array_layers: device_limits.max_texture_array_layers,
            // WebGPU guarantees 4x for every renderable format we declare
            max_sample_count: 4,
        };
        Self {
            device,
            queue,
            limits,
            buffers: HashMap::new(),
            textures: HashMap::new(),
            texture_views: HashMap::new(),
            samplers: HashMap::new(),
            bind_group_layouts: HashMap::new(),
            bind_groups: HashMap::new(),
            render_pipelines: HashMap::new(),
            next_id: 1,
            encoder: None,
            pending_render_pass: None,
            depth_resolver: DepthResolver::default(),
        }
    }

    /// Create a backend without a surface
    pub async fn new_headless_async() -> BackendResult<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| BackendError::InitializationFailed("No suitable adapter found".into()))?;

        let adapter_info = adapter.get_info();
        log::info!(
            "Selected GPU: {} ({:?} backend)",
            adapter_info.name,
            adapter_info.backend
        );

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Render Graph Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                },
                None,
            )
            .await
            .map_err(|e| BackendError::DeviceCreationFailed(e.to_string()))?;

        Ok(Self::from_device(device, queue))
    }

    pub fn new_headless() -> BackendResult<Self> {
        pollster::block_on(Self::new_headless_async())
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Underlying wgpu view, e.g. to copy the final output out.
    pub fn texture_view(&self, view: TextureViewHandle) -> Option<&wgpu::TextureView> {
        self.texture_views.get(&view.0).map(|entry| &entry.view)
    }

    /// Block until the GPU has finished all submitted work.
    pub fn wait_idle(&self) {
        self.device.poll(wgpu::Maintain::Wait);
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn convert_texture_format(format: TextureFormat) -> wgpu::TextureFormat {
        match format {
            TextureFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
            TextureFormat::Rgba8UnormSrgb => wgpu::TextureFormat::Rgba8UnormSrgb,
            TextureFormat::Bgra8Unorm => wgpu::TextureFormat::Bgra8Unorm,
            TextureFormat::Bgra8UnormSrgb => wgpu::TextureFormat::Bgra8UnormSrgb,
            TextureFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
            TextureFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
            TextureFormat::R8Unorm => wgpu::TextureFormat::R8Unorm,
            TextureFormat::R32Float => wgpu::TextureFormat::R32Float,
            TextureFormat::R32Uint => wgpu::TextureFormat::R32Uint,
            TextureFormat::Rg32Float => wgpu::TextureFormat::Rg32Float,
            TextureFormat::Depth32Float => wgpu::TextureFormat::Depth32Float,
            TextureFormat::Depth24PlusStencil8 => wgpu::TextureFormat::Depth24PlusStencil8,
        }
    }

    fn convert_buffer_usage(usage: BufferUsage) -> wgpu::BufferUsages {
        const PAIRS: [(BufferUsage, wgpu::BufferUsages); 8] = [
            (BufferUsage::MAP_READ, wgpu::BufferUsages::MAP_READ),
            (BufferUsage::MAP_WRITE, wgpu::BufferUsages::MAP_WRITE),
            (BufferUsage::COPY_SRC, wgpu::BufferUsages::COPY_SRC),
            (BufferUsage::COPY_DST, wgpu::BufferUsages::COPY_DST),
            (BufferUsage::INDEX, wgpu::BufferUsages::INDEX),
            (BufferUsage::VERTEX, wgpu::BufferUsages::VERTEX),
            (BufferUsage::UNIFORM, wgpu::BufferUsages::UNIFORM),
            (BufferUsage::STORAGE, wgpu::BufferUsages::STORAGE),
        ];
        PAIRS
            .iter()
            .filter(|(ours, _)| usage.contains(*ours))
            .fold(wgpu::BufferUsages::empty(), |acc, (_, theirs)| acc | *theirs)
    }

    fn convert_texture_usage(usage: TextureUsage) -> wgpu::TextureUsages {
        let mut result = wgpu::TextureUsages::empty();
        if usage.contains(TextureUsage::COPY_SRC) {
            result |= wgpu::TextureUsages::COPY_SRC;
        }
        if usage.contains(TextureUsage::COPY_DST) {
            result |= wgpu::TextureUsages::COPY_DST;
        }
        if usage.contains(TextureUsage::TEXTURE_BINDING) {
            result |= wgpu::TextureUsages::TEXTURE_BINDING;
        }
        if usage.contains(TextureUsage::STORAGE_BINDING) {
            result |= wgpu::TextureUsages::STORAGE_BINDING;
        }
        if usage.contains(TextureUsage::RENDER_ATTACHMENT) {
            result |= wgpu::TextureUsages::RENDER_ATTACHMENT;
        }
        result
    }

    fn convert_view_dimension(dimension: TextureViewDimension) -> wgpu::TextureViewDimension {
        match dimension {
            TextureViewDimension::D2 => wgpu::TextureViewDimension::D2,
            TextureViewDimension::D2Array => wgpu::TextureViewDimension::D2Array,
            TextureViewDimension::Cube => wgpu::TextureViewDimension::Cube,
        }
    }

    fn convert_shader_stages(flags: ShaderStageFlags) -> wgpu::ShaderStages {
        let mut visibility = wgpu::ShaderStages::empty();
        if flags.contains(ShaderStageFlags::VERTEX) {
            visibility |= wgpu::ShaderStages::VERTEX;
        }
        if flags.contains(ShaderStageFlags::FRAGMENT) {
            visibility |= wgpu::ShaderStages::FRAGMENT;
        }
        visibility
    }

    fn convert_vertex_format(format: VertexFormat) -> wgpu::VertexFormat {
        match format {
            VertexFormat::Float32 => wgpu::VertexFormat::Float32,
            VertexFormat::Float32x2 => wgpu::VertexFormat::Float32x2,
            VertexFormat::Float32x3 => wgpu::VertexFormat::Float32x3,
            VertexFormat::Float32x4 => wgpu::VertexFormat::Float32x4,
            VertexFormat::Uint32 => wgpu::VertexFormat::Uint32,
            VertexFormat::Sint32 => wgpu::VertexFormat::Sint32,
        }
    }

    fn convert_compare_function(func: CompareFunction) -> wgpu::CompareFunction {
        match func {
            CompareFunction::Never => wgpu::CompareFunction::Never,
            CompareFunction::Less => wgpu::CompareFunction::Less,
            CompareFunction::Equal => wgpu::CompareFunction::Equal,
            CompareFunction::LessEqual => wgpu::CompareFunction::LessEqual,
            CompareFunction::Greater => wgpu::CompareFunction::Greater,
            CompareFunction::NotEqual => wgpu::CompareFunction::NotEqual,
            CompareFunction::GreaterEqual => wgpu::CompareFunction::GreaterEqual,
            CompareFunction::Always => wgpu::CompareFunction::Always,
        }
    }

    fn convert_blend_factor(factor: BlendFactor) -> wgpu::BlendFactor {
        match factor {
            BlendFactor::Zero => wgpu::BlendFactor::Zero,
            BlendFactor::One => wgpu::BlendFactor::One,
            BlendFactor::Src => wgpu::BlendFactor::Src,
            BlendFactor::OneMinusSrc => wgpu::BlendFactor::OneMinusSrc,
            BlendFactor::SrcAlpha => wgpu::BlendFactor::SrcAlpha,
            BlendFactor::OneMinusSrcAlpha => wgpu::BlendFactor::OneMinusSrcAlpha,
            BlendFactor::Dst => wgpu::BlendFactor::Dst,
            BlendFactor::OneMinusDst => wgpu::BlendFactor::OneMinusDst,
            BlendFactor::DstAlpha => wgpu::BlendFactor::DstAlpha,
            BlendFactor::OneMinusDstAlpha => wgpu::BlendFactor::OneMinusDstAlpha,
        }
    }

    fn convert_blend_component(component: &BlendComponent) -> wgpu::BlendComponent {
        wgpu::BlendComponent {
            src_factor: Self::convert_blend_factor(component.src_factor),
            dst_factor: Self::convert_blend_factor(component.dst_factor),
            operation: match component.operation {
                BlendOperation::Add => wgpu::BlendOperation::Add,
                BlendOperation::Subtract => wgpu::BlendOperation::Subtract,
                BlendOperation::ReverseSubtract => wgpu::BlendOperation::ReverseSubtract,
                BlendOperation::Min => wgpu::BlendOperation::Min,
                BlendOperation::Max => wgpu::BlendOperation::Max,
            },
        }
    }

    fn convert_filter_mode(mode: FilterMode) -> wgpu::FilterMode {
        match mode {
            FilterMode::Nearest => wgpu::FilterMode::Nearest,
            FilterMode::Linear => wgpu::FilterMode::Linear,
        }
    }

    fn convert_address_mode(mode: AddressMode) -> wgpu::AddressMode {
        match mode {
            AddressMode::ClampToEdge => wgpu::AddressMode::ClampToEdge,
            AddressMode::Repeat => wgpu::AddressMode::Repeat,
            AddressMode::MirrorRepeat => wgpu::AddressMode::MirrorRepeat,
        }
    }

    fn convert_load<V>(op: LoadOp, clear: V) -> wgpu::LoadOp<V> {
        match op {
            LoadOp::Clear => wgpu::LoadOp::Clear(clear),
            LoadOp::Load => wgpu::LoadOp::Load,
        }
    }

    fn convert_store(op: StoreOp) -> wgpu::StoreOp {
        match op {
            StoreOp::Store => wgpu::StoreOp::Store,
            StoreOp::Discard => wgpu::StoreOp::Discard,
        }
    }

    /// Create the pipeline inside a validation scope.
    ///
    /// The pipeline is stored right away; the returned future reports
    /// whether wgpu accepted it.
    fn create_render_pipeline_scoped(
        &mut self,
        desc: &RenderPipelineDescriptor,
    ) -> (
        RenderPipelineHandle,
        impl std::future::Future<Output = Option<wgpu::Error>> + Send + 'static,
    ) {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);

        let shader = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: desc.label.as_deref(),
            source: wgpu::ShaderSource::Wgsl(desc.shader.as_str().into()),
        });

        let layouts: Vec<&wgpu::BindGroupLayout> = desc
            .bind_group_layouts
            .iter()
            .filter_map(|h| self.bind_group_layouts.get(&h.0))
            .collect();

        let pipeline_layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: None,
                bind_group_layouts: &layouts,
                push_constant_ranges: &[],
            });

        // Attribute storage must outlive the layouts borrowing it
        let vertex_attrs: Vec<Vec<wgpu::VertexAttribute>> = desc
            .vertex_layouts
            .iter()
            .map(|layout| {
                layout
                    .attributes
                    .iter()
                    .map(|a| wgpu::VertexAttribute {
                        format: Self::convert_vertex_format(a.format),
                        offset: a.offset,
                        shader_location: a.location,
                    })
                    .collect()
            })
            .collect();

        let vertex_buffers: Vec<wgpu::VertexBufferLayout> = desc
            .vertex_layouts
            .iter()
            .zip(vertex_attrs.iter())
            .map(|(layout, attrs)| wgpu::VertexBufferLayout {
                array_stride: layout.array_stride,
                step_mode: match layout.step_mode {
                    VertexStepMode::Vertex => wgpu::VertexStepMode::Vertex,
                    VertexStepMode::Instance => wgpu::VertexStepMode::Instance,
                },
                attributes: attrs,
            })
            .collect();

        let color_targets: Vec<Option<wgpu::ColorTargetState>> = desc
            .color_targets
            .iter()
            .map(|target| {
                Some(wgpu::ColorTargetState {
                    format: Self::convert_texture_format(target.format),
                    blend: target.blend.as_ref().map(|b| wgpu::BlendState {
                        color: Self::convert_blend_component(&b.color),
                        alpha: Self::convert_blend_component(&b.alpha),
                    }),
                    write_mask: wgpu::ColorWrites::ALL,
                })
            })
            .collect();

        let primitive = wgpu::PrimitiveState {
            topology: match desc.primitive_topology {
                PrimitiveTopology::PointList => wgpu::PrimitiveTopology::PointList,
                PrimitiveTopology::LineList => wgpu::PrimitiveTopology::LineList,
                PrimitiveTopology::LineStrip => wgpu::PrimitiveTopology::LineStrip,
                PrimitiveTopology::TriangleList => wgpu::PrimitiveTopology::TriangleList,
                PrimitiveTopology::TriangleStrip => wgpu::PrimitiveTopology::TriangleStrip,
            },
            strip_index_format: None,
            front_face: match desc.front_face {
                FrontFace::Ccw => wgpu::FrontFace::Ccw,
                FrontFace::Cw => wgpu::FrontFace::Cw,
            },
            cull_mode: match desc.cull_mode {
                CullMode::None => None,
                CullMode::Front => Some(wgpu::Face::Front),
                CullMode::Back => Some(wgpu::Face::Back),
            },
            ..Default::default()
        };

        let depth_stencil = desc.depth_stencil.as_ref().map(|ds| wgpu::DepthStencilState {
            format: Self::convert_texture_format(ds.format),
            depth_write_enabled: ds.depth_write_enabled,
            depth_compare: Self::convert_compare_function(ds.depth_compare),
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        });

        let pipeline = self
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: desc.label.as_deref(),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &shader,
                    entry_point: "vs_main",
                    buffers: &vertex_buffers,
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                },
                fragment: desc.has_fragment.then(|| wgpu::FragmentState {
                    module: &shader,
                    entry_point: "fs_main",
                    targets: &color_targets,
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                }),
                primitive,
                depth_stencil,
                multisample: wgpu::MultisampleState {
                    count: desc.sample_count.max(1),
                    ..Default::default()
                },
                multiview: None,
            });

        let id = self.allocate_id();
        self.render_pipelines.insert(id, pipeline);
        (RenderPipelineHandle(id), self.device.pop_error_scope())
    }

    fn resolve_view(&self, view: TextureViewHandle) -> Option<&wgpu::TextureView> {
        self.texture_views.get(&view.0).map(|entry| &entry.view)
    }
}

impl GraphicsBackend for WgpuBackend {
    fn name(&self) -> &str {
        "wgpu"
    }

    fn limits(&self) -> BackendLimits {
        self.limits
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle> {
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: desc.label.as_deref(),
            size: desc.size,
            usage: Self::convert_buffer_usage(desc.usage),
            mapped_at_creation: desc.mapped_at_creation,
        });

        let id = self.allocate_id();
        self.buffers.insert(id, buffer);
        Ok(BufferHandle(id))
    }

    fn create_buffer_init(
        &mut self,
        desc: &BufferDescriptor,
        data: &[u8],
    ) -> BackendResult<BufferHandle> {
        let buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: desc.label.as_deref(),
            contents: data,
            usage: Self::convert_buffer_usage(desc.usage),
        });

        let id = self.allocate_id();
        self.buffers.insert(id, buffer);
        Ok(BufferHandle(id))
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) {
        if let Some(buf) = self.buffers.get(&buffer.0) {
            self.queue.write_buffer(buf, offset, data);
        }
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        if let Some(buf) = self.buffers.remove(&buffer.0) {
            buf.destroy();
        }
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        if desc.width > self.limits.max_texture_dimension_2d
            || desc.height > self.limits.max_texture_dimension_2d
        {
            return Err(BackendError::TextureCreationFailed(format!(
                "{:?}: {}x{} exceeds the device limit",
                desc.label, desc.width, desc.height
            )));
        }

        let format = Self::convert_texture_format(desc.format);
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: desc.label.as_deref(),
            size: wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: desc.array_layers,
            },
            mip_level_count: desc.mip_levels,
            sample_count: desc.sample_count,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: Self::convert_texture_usage(desc.usage),
            view_formats: &[],
        });

        let id = self.allocate_id();
        self.textures.insert(id, TextureEntry { texture, format });
        Ok(TextureHandle(id))
    }

    fn create_texture_view(
        &mut self,
        texture: TextureHandle,
        desc: &TextureViewDescriptor,
    ) -> BackendResult<TextureViewHandle> {
        let entry = self
            .textures
            .get(&texture.0)
            .ok_or_else(|| BackendError::InvalidHandle(format!("{:?}", texture)))?;

        let view = entry.texture.create_view(&wgpu::TextureViewDescriptor {
            label: desc.label.as_deref(),
            format: None,
            dimension: Some(Self::convert_view_dimension(desc.dimension)),
            aspect: wgpu::TextureAspect::All,
            base_mip_level: desc.base_mip_level,
            mip_level_count: Some(desc.mip_level_count),
            base_array_layer: desc.base_array_layer,
            array_layer_count: Some(desc.array_layer_count),
        });
        let format = entry.format;

        let id = self.allocate_id();
        self.texture_views.insert(
            id,
            ViewEntry {
                view,
                owner: texture.0,
                format,
            },
        );
        Ok(TextureViewHandle(id))
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        if let Some(entry) = self.textures.remove(&texture.0) {
            self.texture_views.retain(|_, view| view.owner != texture.0);
            entry.texture.destroy();
        }
    }

    fn create_sampler(&mut self, desc: &SamplerDescriptor) -> BackendResult<SamplerHandle> {
        let sampler = self.device.create_sampler(&wgpu::SamplerDescriptor {
            label: desc.label.as_deref(),
            address_mode_u: Self::convert_address_mode(desc.address_mode_u),
            address_mode_v: Self::convert_address_mode(desc.address_mode_v),
            address_mode_w: Self::convert_address_mode(desc.address_mode_w),
            mag_filter: Self::convert_filter_mode(desc.mag_filter),
            min_filter: Self::convert_filter_mode(desc.min_filter),
            mipmap_filter: Self::convert_filter_mode(desc.mipmap_filter),
            lod_min_clamp: 0.0,
            lod_max_clamp: f32::MAX,
            compare: desc.compare.map(Self::convert_compare_function),
            anisotropy_clamp: 1,
            border_color: None,
        });

        let id = self.allocate_id();
        self.samplers.insert(id, sampler);
        Ok(SamplerHandle(id))
    }

    fn create_bind_group_layout(
        &mut self,
        entries: &[BindGroupLayoutEntry],
    ) -> BackendResult<BindGroupLayoutHandle> {
        let wgpu_entries: Vec<wgpu::BindGroupLayoutEntry> = entries
            .iter()
            .map(|e| {
                let ty = match &e.ty {
                    BindingType::UniformBuffer => wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    BindingType::Texture {
                        sample_type,
                        view_dimension,
                        multisampled,
                    } => wgpu::BindingType::Texture {
                        sample_type: match sample_type {
                            TextureSampleType::Float { filterable } => {
                                wgpu::TextureSampleType::Float { filterable: *filterable }
                            }
                            TextureSampleType::Depth => wgpu::TextureSampleType::Depth,
                            TextureSampleType::Uint => wgpu::TextureSampleType::Uint,
                        },
                        view_dimension: Self::convert_view_dimension(*view_dimension),
                        multisampled: *multisampled,
                    },
                    BindingType::Sampler { comparison } => {
                        wgpu::BindingType::Sampler(if *comparison {
                            wgpu::SamplerBindingType::Comparison
                        } else {
                            wgpu::SamplerBindingType::Filtering
                        })
                    }
                };

                wgpu::BindGroupLayoutEntry {
                    binding: e.binding,
                    visibility: Self::convert_shader_stages(e.visibility),
                    ty,
                    count: None,
                }
            })
            .collect();

        let layout = self
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: None,
                entries: &wgpu_entries,
            });

        let id = self.allocate_id();
        self.bind_group_layouts.insert(id, layout);
        Ok(BindGroupLayoutHandle(id))
    }

    fn create_bind_group(
        &mut self,
        layout: BindGroupLayoutHandle,
        entries: &[(u32, BindGroupEntry)],
    ) -> BackendResult<BindGroupHandle> {
        let layout_ref = self
            .bind_group_layouts
            .get(&layout.0)
            .ok_or_else(|| BackendError::InvalidHandle(format!("{:?}", layout)))?;

        let mut wgpu_entries = Vec::with_capacity(entries.len());
        for (binding, entry) in entries {
            let resource = match entry {
                BindGroupEntry::Buffer { buffer, offset, size } => {
                    let buf = self
                        .buffers
                        .get(&buffer.0)
                        .ok_or_else(|| BackendError::InvalidHandle(format!("{:?}", buffer)))?;
                    wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer: buf,
                        offset: *offset,
                        size: size.and_then(std::num::NonZeroU64::new),
                    })
                }
                BindGroupEntry::Texture(view) => wgpu::BindingResource::TextureView(
                    self.resolve_view(*view)
                        .ok_or_else(|| BackendError::InvalidHandle(format!("{:?}", view)))?,
                ),
                BindGroupEntry::Sampler(sampler) => wgpu::BindingResource::Sampler(
                    self.samplers
                        .get(&sampler.0)
                        .ok_or_else(|| BackendError::InvalidHandle(format!("{:?}", sampler)))?,
                ),
            };
            wgpu_entries.push(wgpu::BindGroupEntry {
                binding: *binding,
                resource,
            });
        }

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: None,
            layout: layout_ref,
            entries: &wgpu_entries,
        });

        let id = self.allocate_id();
        self.bind_groups.insert(id, bind_group);
        Ok(BindGroupHandle(id))
    }

    fn destroy_sampler(&mut self, sampler: SamplerHandle) {
        self.samplers.remove(&sampler.0);
    }

    fn destroy_bind_group_layout(&mut self, layout: BindGroupLayoutHandle) {
        self.bind_group_layouts.remove(&layout.0);
    }

    fn destroy_bind_group(&mut self, bind_group: BindGroupHandle) {
        self.bind_groups.remove(&bind_group.0);
    }

    fn create_render_pipeline(
        &mut self,
        desc: &RenderPipelineDescriptor,
    ) -> BackendResult<RenderPipelineHandle> {
        let (handle, validation) = self.create_render_pipeline_scoped(desc);
        match pollster::block_on(validation) {
            None => Ok(handle),
            Some(error) => {
                self.render_pipelines.remove(&handle.0);
                Err(BackendError::PipelineCreationFailed(error.to_string()))
            }
        }
    }

    fn create_render_pipeline_async(&mut self, desc: &RenderPipelineDescriptor) -> PipelineFuture {
        let (handle, validation) = self.create_render_pipeline_scoped(desc);
        // A rejected pipeline stays in the map until the backend is dropped;
        // the cache never receives its handle.
        Box::pin(async move {
            match validation.await {
                None => Ok(handle),
                Some(error) => Err(BackendError::PipelineCreationFailed(error.to_string())),
            }
        })
    }

    fn destroy_render_pipeline(&mut self, pipeline: RenderPipelineHandle) {
        self.render_pipelines.remove(&pipeline.0);
    }

    fn begin_command_encoder(&mut self, label: Option<&str>) {
        if self.encoder.is_some() {
            log::warn!("Command encoder already open, previous commands are discarded");
        }
        self.encoder = Some(
            self.device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor { label }),
        );
    }

    fn begin_render_pass(&mut self, desc: &RenderPassDescriptor) {
        self.pending_render_pass = Some(PendingRenderPass {
            descriptor: desc.clone(),
            commands: Vec::new(),
        });
    }

    fn end_render_pass(&mut self) {
        let Some(pending) = self.pending_render_pass.take() else {
            return;
        };
        let Some(mut encoder) = self.encoder.take() else {
            log::warn!("Render pass ended without an open encoder");
            return;
        };

        {
            let color_attachments: Vec<Option<wgpu::RenderPassColorAttachment>> = pending
                .descriptor
                .color_attachments
                .iter()
                .map(|att| {
                    let view = self.resolve_view(att.view)?;
                    let [r, g, b, a] = att.clear_value.map(f64::from);
                    Some(wgpu::RenderPassColorAttachment {
                        view,
                        resolve_target: att.resolve_target.and_then(|t| self.resolve_view(t)),
                        ops: wgpu::Operations {
                            load: Self::convert_load(att.load_op, wgpu::Color { r, g, b, a }),
                            store: Self::convert_store(att.store_op),
                        },
                    })
                })
                .collect();

            let depth_attachment =
                pending
                    .descriptor
                    .depth_stencil_attachment
                    .as_ref()
                    .and_then(|att| {
                        Some(wgpu::RenderPassDepthStencilAttachment {
                            view: self.resolve_view(att.view)?,
                            depth_ops: Some(wgpu::Operations {
                                load: Self::convert_load(att.depth_load_op, att.depth_clear_value),
                                store: Self::convert_store(att.depth_store_op),
                            }),
                            stencil_ops: None,
                        })
                    });

            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: pending.descriptor.label.as_deref(),
                color_attachments: &color_attachments,
                depth_stencil_attachment: depth_attachment,
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            for cmd in &pending.commands {
                match cmd {
                    RenderCommand::SetPipeline(handle) => {
                        if let Some(pipeline) = self.render_pipelines.get(&handle.0) {
                            render_pass.set_pipeline(pipeline);
                        }
                    }
                    RenderCommand::SetBindGroup { index, bind_group } => {
                        if let Some(bg) = self.bind_groups.get(&bind_group.0) {
                            render_pass.set_bind_group(*index, bg, &[]);
                        }
                    }
                    RenderCommand::SetVertexBuffer { slot, buffer, offset } => {
                        if let Some(buf) = self.buffers.get(&buffer.0) {
                            render_pass.set_vertex_buffer(*slot, buf.slice(*offset..));
                        }
                    }
                    RenderCommand::SetIndexBuffer { buffer, offset, format } => {
                        if let Some(buf) = self.buffers.get(&buffer.0) {
                            let wgpu_format = match format {
                                IndexFormat::Uint16 => wgpu::IndexFormat::Uint16,
                                IndexFormat::Uint32 => wgpu::IndexFormat::Uint32,
                            };
                            render_pass.set_index_buffer(buf.slice(*offset..), wgpu_format);
                        }
                    }
                    RenderCommand::SetViewport { x, y, width, height, min_depth, max_depth } => {
                        render_pass.set_viewport(*x, *y, *width, *height, *min_depth, *max_depth);
                    }
                    RenderCommand::Draw { vertices, instances } => {
                        render_pass.draw(vertices.clone(), instances.clone());
                    }
                    RenderCommand::DrawIndexed { indices, base_vertex, instances } => {
                        render_pass.draw_indexed(indices.clone(), *base_vertex, instances.clone());
                    }
                }
            }
        }

        self.encoder = Some(encoder);
    }

    fn set_render_pipeline(&mut self, pipeline: RenderPipelineHandle) {
        if let Some(ref mut pending) = self.pending_render_pass {
            pending.commands.push(RenderCommand::SetPipeline(pipeline));
        }
    }

    fn set_bind_group(&mut self, index: u32, bind_group: BindGroupHandle) {
        if let Some(ref mut pending) = self.pending_render_pass {
            pending.commands.push(RenderCommand::SetBindGroup { index, bind_group });
        }
    }

    fn set_vertex_buffer(&mut self, slot: u32, buffer: BufferHandle, offset: u64) {
        if let Some(ref mut pending) = self.pending_render_pass {
            pending.commands.push(RenderCommand::SetVertexBuffer { slot, buffer, offset });
        }
    }

    fn set_index_buffer(&mut self, buffer: BufferHandle, offset: u64, format: IndexFormat) {
        if let Some(ref mut pending) = self.pending_render_pass {
            pending.commands.push(RenderCommand::SetIndexBuffer { buffer, offset, format });
        }
    }

    fn set_viewport(&mut self, x: f32, y: f32, width: f32, height: f32, min_depth: f32, max_depth: f32) {
        if let Some(ref mut pending) = self.pending_render_pass {
            pending.commands.push(RenderCommand::SetViewport { x, y, width, height, min_depth, max_depth });
        }
    }

    fn draw(&mut self, vertices: Range<u32>, instances: Range<u32>) {
        if let Some(ref mut pending) = self.pending_render_pass {
            pending.commands.push(RenderCommand::Draw { vertices, instances });
        }
    }

    fn draw_indexed(&mut self, indices: Range<u32>, base_vertex: i32, instances: Range<u32>) {
        if let Some(ref mut pending) = self.pending_render_pass {
            pending.commands.push(RenderCommand::DrawIndexed { indices, base_vertex, instances });
        }
    }

    fn resolve_depth(&mut self, source: TextureViewHandle, target: TextureViewHandle) {
        let Some(encoder) = self.encoder.as_mut() else {
            log::warn!("Depth resolve recorded without an open encoder");
            return;
        };
        let (Some(source), Some(target)) = (
            self.texture_views.get(&source.0),
            self.texture_views.get(&target.0),
        ) else {
            log::warn!("Depth resolve with a destroyed view");
            return;
        };
        self.depth_resolver
            .resolve(&self.device, encoder, &source.view, &target.view, target.format);
    }

    fn submit(&mut self) -> BackendResult<()> {
        if self.pending_render_pass.is_some() {
            log::warn!("Submitting with an unfinished render pass");
            self.end_render_pass();
        }
        let encoder = self.encoder.take().ok_or(BackendError::NoEncoder)?;
        self.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }
}
