//! Attachments: named image resources owned by a render node

use crate::backend::*;

/// Load/store behaviour and clear value of an attachment
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AttachmentOps {
    Color {
        load_op: LoadOp,
        store_op: StoreOp,
        clear_value: [f32; 4],
    },
    Depth {
        depth_load_op: LoadOp,
        depth_store_op: StoreOp,
        depth_clear_value: f32,
    },
}

/// A GPU texture plus the views the graph needs on it
#[derive(Debug, Clone, PartialEq)]
pub struct AllocatedTexture {
    pub handle: TextureHandle,
    /// View over every layer and mip, for sampling by downstream nodes
    pub sampled_view: TextureViewHandle,
    /// One single-layer, mip-0 view per array layer, for rendering
    pub layer_views: Vec<TextureViewHandle>,
}

impl AllocatedTexture {
    fn create(
        backend: &mut dyn GraphicsBackend,
        desc: &TextureDescriptor,
        sampled_dimension: TextureViewDimension,
    ) -> BackendResult<Self> {
        let handle = backend.create_texture(desc)?;
        let views = (|| -> BackendResult<(TextureViewHandle, Vec<TextureViewHandle>)> {
            let sampled_view = backend.create_texture_view(
                handle,
                &TextureViewDescriptor::whole(
                    sampled_dimension,
                    desc.array_layers,
                    desc.mip_levels,
                ),
            )?;
            let layer_views = (0..desc.array_layers)
                .map(|layer| backend.create_texture_view(handle, &TextureViewDescriptor::layer(layer)))
                .collect::<BackendResult<Vec<_>>>()?;
            Ok((sampled_view, layer_views))
        })();

        match views {
            Ok((sampled_view, layer_views)) => Ok(Self {
                handle,
                sampled_view,
                layer_views,
            }),
            Err(err) => {
                backend.destroy_texture(handle);
                Err(err)
            }
        }
    }

    /// Render view for `layer`.
    pub fn layer_view(&self, layer: u32) -> Option<TextureViewHandle> {
        self.layer_views.get(layer as usize).copied()
    }
}

/// One logical color or depth image of a node
///
/// Owns zero or two textures: the single-sample `texture` that downstream
/// nodes sample, and, when multisampled, the `unresolved` render target that
/// is resolved into it. Textures are never resized in place; every
/// [`init`](Self::init) destroys and recreates them, so handles change
/// identity on every allocation.
#[derive(Debug, Clone)]
pub struct Attachment {
    name: String,
    pub enabled: bool,
    format: TextureFormat,
    mip_level_count: u32,
    ops: AttachmentOps,
    texture: Option<AllocatedTexture>,
    unresolved: Option<AllocatedTexture>,
    size: (u32, u32),
    sample_count: u32,
    layers: u32,
    cubemap: bool,
    /// Sample as a 2D array even with a single layer
    array_view: bool,
}

impl Attachment {
    /// A color attachment cleared to transparent black.
    pub fn color(name: impl Into<String>, format: TextureFormat) -> Self {
        Self::new(
            name,
            format,
            AttachmentOps::Color {
                load_op: LoadOp::Clear,
                store_op: StoreOp::Store,
                clear_value: [0.0, 0.0, 0.0, 0.0],
            },
        )
    }

    /// A depth attachment cleared to the far plane.
    pub fn depth(name: impl Into<String>, format: TextureFormat) -> Self {
        Self::new(
            name,
            format,
            AttachmentOps::Depth {
                depth_load_op: LoadOp::Clear,
                depth_store_op: StoreOp::Store,
                depth_clear_value: 1.0,
            },
        )
    }

    fn new(name: impl Into<String>, format: TextureFormat, ops: AttachmentOps) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            format,
            mip_level_count: 1,
            ops,
            texture: None,
            unresolved: None,
            size: (0, 0),
            sample_count: 1,
            layers: 1,
            cubemap: false,
            array_view: false,
        }
    }

    pub fn with_clear_color(mut self, color: [f32; 4]) -> Self {
        if let AttachmentOps::Color { clear_value, .. } = &mut self.ops {
            *clear_value = color;
        }
        self
    }

    pub fn with_clear_depth(mut self, depth: f32) -> Self {
        if let AttachmentOps::Depth {
            depth_clear_value, ..
        } = &mut self.ops
        {
            *depth_clear_value = depth;
        }
        self
    }

    pub fn with_load_op(mut self, op: LoadOp) -> Self {
        match &mut self.ops {
            AttachmentOps::Color { load_op, .. } => *load_op = op,
            AttachmentOps::Depth { depth_load_op, .. } => *depth_load_op = op,
        }
        self
    }

    pub fn with_store_op(mut self, op: StoreOp) -> Self {
        match &mut self.ops {
            AttachmentOps::Color { store_op, .. } => *store_op = op,
            AttachmentOps::Depth { depth_store_op, .. } => *depth_store_op = op,
        }
        self
    }

    pub fn with_mip_levels(mut self, mip_level_count: u32) -> Self {
        self.mip_level_count = mip_level_count.max(1);
        self
    }

    /// Expose the sampled view as a 2D array regardless of the layer count.
    pub fn with_array_view(mut self) -> Self {
        self.array_view = true;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn format(&self) -> TextureFormat {
        self.format
    }

    pub fn is_depth(&self) -> bool {
        matches!(self.ops, AttachmentOps::Depth { .. })
    }

    pub fn ops(&self) -> &AttachmentOps {
        &self.ops
    }

    pub fn set_clear_color(&mut self, color: [f32; 4]) {
        if let AttachmentOps::Color { clear_value, .. } = &mut self.ops {
            *clear_value = color;
        }
    }

    pub fn mip_level_count(&self) -> u32 {
        self.mip_level_count
    }

    /// Single-sample (resolved) texture, if allocated
    pub fn texture(&self) -> Option<&AllocatedTexture> {
        self.texture.as_ref()
    }

    /// Multisampled render target, present only when `sample_count > 1`
    pub fn unresolved(&self) -> Option<&AllocatedTexture> {
        self.unresolved.as_ref()
    }

    /// Whole-texture view for sampling, if allocated
    pub fn sampled_view(&self) -> Option<TextureViewHandle> {
        self.texture.as_ref().map(|t| t.sampled_view)
    }

    pub fn size(&self) -> (u32, u32) {
        self.size
    }

    pub fn sample_count(&self) -> u32 {
        self.sample_count
    }

    pub fn layers(&self) -> u32 {
        self.layers
    }

    pub fn is_cubemap(&self) -> bool {
        self.cubemap
    }

    /// Allocate the backing textures.
    ///
    /// Any previous allocation is released first. Backend rejections are
    /// returned unchanged and leave the attachment unallocated.
    pub fn init(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        size: (u32, u32),
        sample_count: u32,
        layers: u32,
        cubemap: bool,
    ) -> BackendResult<()> {
        self.destroy(backend);

        let layers = layers.max(1);
        let sample_count = sample_count.max(1);
        let sampled_dimension = if cubemap {
            TextureViewDimension::Cube
        } else if layers > 1 || self.array_view {
            TextureViewDimension::D2Array
        } else {
            TextureViewDimension::D2
        };

        log::debug!(
            "Allocating attachment '{}' {}x{} ({:?}, {} layers, {} samples{})",
            self.name,
            size.0,
            size.1,
            self.format,
            layers,
            sample_count,
            if cubemap { ", cube" } else { "" }
        );

        let desc = TextureDescriptor {
            label: Some(self.name.clone()),
            width: size.0,
            height: size.1,
            array_layers: layers,
            mip_levels: self.mip_level_count,
            sample_count: 1,
            format: self.format,
            usage: TextureUsage::RENDER_ATTACHMENT
                | TextureUsage::TEXTURE_BINDING
                | TextureUsage::COPY_SRC,
            cube_compatible: cubemap,
        };
        let texture = AllocatedTexture::create(backend, &desc, sampled_dimension)?;

        let unresolved = if sample_count > 1 {
            let desc = TextureDescriptor {
                label: Some(format!("{} (unresolved)", self.name)),
                mip_levels: 1,
                sample_count,
                // Multisampled depth is read back by the explicit resolve step.
                usage: if self.is_depth() {
                    TextureUsage::RENDER_ATTACHMENT | TextureUsage::TEXTURE_BINDING
                } else {
                    TextureUsage::RENDER_ATTACHMENT
                },
                cube_compatible: false,
                ..desc
            };
            let dimension = if layers > 1 {
                TextureViewDimension::D2Array
            } else {
                TextureViewDimension::D2
            };
            match AllocatedTexture::create(backend, &desc, dimension) {
                Ok(unresolved) => Some(unresolved),
                Err(err) => {
                    backend.destroy_texture(texture.handle);
                    return Err(err);
                }
            }
        } else {
            None
        };

        self.texture = Some(texture);
        self.unresolved = unresolved;
        self.size = size;
        self.sample_count = sample_count;
        self.layers = layers;
        self.cubemap = cubemap;
        Ok(())
    }

    /// Release both textures. Safe to call repeatedly or before `init`.
    pub fn destroy(&mut self, backend: &mut dyn GraphicsBackend) {
        if let Some(texture) = self.texture.take() {
            backend.destroy_texture(texture.handle);
        }
        if let Some(texture) = self.unresolved.take() {
            backend.destroy_texture(texture.handle);
        }
        self.size = (0, 0);
    }

    /// Whether textures are currently allocated.
    pub fn is_allocated(&self) -> bool {
        self.texture.is_some()
    }

    /// Color attachment entry for a pass targeting `layer`.
    pub(crate) fn color_target(&self, layer: u32) -> Option<ColorAttachment> {
        let AttachmentOps::Color {
            load_op,
            store_op,
            clear_value,
        } = self.ops
        else {
            return None;
        };
        let resolved = self.texture.as_ref()?.layer_view(layer)?;
        let (view, resolve_target) = match &self.unresolved {
            Some(msaa) => (msaa.layer_view(layer)?, Some(resolved)),
            None => (resolved, None),
        };
        Some(ColorAttachment {
            view,
            resolve_target,
            load_op,
            store_op,
            clear_value,
        })
    }

    /// Depth attachment entry for a pass targeting `layer`.
    pub(crate) fn depth_target(&self, layer: u32) -> Option<DepthStencilAttachment> {
        let AttachmentOps::Depth {
            depth_load_op,
            depth_store_op,
            depth_clear_value,
        } = self.ops
        else {
            return None;
        };
        let view = match &self.unresolved {
            Some(msaa) => msaa.layer_view(layer)?,
            None => self.texture.as_ref()?.layer_view(layer)?,
        };
        Some(DepthStencilAttachment {
            view,
            depth_load_op,
            depth_store_op,
            depth_clear_value,
        })
    }

    /// Source and target views of the depth resolve for `layer`, if one is needed.
    pub(crate) fn depth_resolve(&self, layer: u32) -> Option<(TextureViewHandle, TextureViewHandle)> {
        if !self.is_depth() {
            return None;
        }
        let source = self.unresolved.as_ref()?.layer_view(layer)?;
        let target = self.texture.as_ref()?.layer_view(layer)?;
        Some((source, target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_single_sample() {
        let mut backend = RecordingBackend::new();
        let mut color = Attachment::color("color", TextureFormat::Rgba16Float);
        color.init(&mut backend, (64, 32), 1, 1, false).unwrap();

        assert!(color.texture().is_some());
        assert!(color.unresolved().is_none());
        assert_eq!(backend.live_texture_count(), 1);

        let target = color.color_target(0).unwrap();
        assert!(target.resolve_target.is_none());
    }

    #[test]
    fn test_init_multisampled_creates_resolve_pair() {
        let mut backend = RecordingBackend::new();
        let mut color = Attachment::color("color", TextureFormat::Rgba16Float);
        color.init(&mut backend, (64, 32), 4, 1, false).unwrap();

        assert_eq!(backend.live_texture_count(), 2);
        let msaa = color.unresolved().unwrap();
        assert_eq!(backend.texture_descriptor(msaa.handle).unwrap().sample_count, 4);

        let target = color.color_target(0).unwrap();
        assert_eq!(target.view, msaa.layer_views[0]);
        assert_eq!(target.resolve_target, color.texture().unwrap().layer_view(0));
    }

    #[test]
    fn test_failed_multisample_leaves_nothing_allocated() {
        let mut backend = RecordingBackend::new();
        let mut color = Attachment::color("color", TextureFormat::Rgba16Float);
        color.init(&mut backend, (64, 32), 1, 1, false).unwrap();

        // The resolve texture is created, then the 8-sample target is rejected
        let err = color.init(&mut backend, (64, 32), 8, 1, false).unwrap_err();
        assert!(matches!(err, BackendError::TextureCreationFailed(_)));
        assert!(!color.is_allocated());
        assert!(color.unresolved().is_none());
        assert_eq!(color.size(), (0, 0));
        assert_eq!(backend.live_texture_count(), 0);
    }

    #[test]
    fn test_reinit_changes_identity() {
        let mut backend = RecordingBackend::new();
        let mut depth = Attachment::depth("depth", TextureFormat::Depth32Float);
        depth.init(&mut backend, (16, 16), 1, 1, false).unwrap();
        let first = depth.texture().unwrap().handle;

        depth.init(&mut backend, (32, 32), 1, 1, false).unwrap();
        let second = depth.texture().unwrap().handle;

        assert_ne!(first, second);
        assert!(!backend.is_texture_alive(first));
        assert_eq!(backend.live_texture_count(), 1);
    }

    #[test]
    fn test_destroy_is_idempotent() {
        let mut backend = RecordingBackend::new();
        let mut color = Attachment::color("color", TextureFormat::Rgba8Unorm);
        color.destroy(&mut backend);
        color.init(&mut backend, (8, 8), 1, 1, false).unwrap();
        color.destroy(&mut backend);
        color.destroy(&mut backend);
        assert!(!color.is_allocated());
        assert_eq!(backend.live_texture_count(), 0);
    }

    #[test]
    fn test_cube_layers_and_views() {
        let mut backend = RecordingBackend::new();
        let mut env = Attachment::color("env", TextureFormat::Rgba16Float);
        env.init(&mut backend, (32, 32), 1, 6, true).unwrap();

        let texture = env.texture().unwrap();
        let desc = backend.texture_descriptor(texture.handle).unwrap();
        assert!(desc.cube_compatible);
        assert_eq!(desc.array_layers, 6);
        assert_eq!(texture.layer_views.len(), 6);

        let (_, sampled) = backend.view_info(texture.sampled_view).unwrap();
        assert_eq!(sampled.dimension, TextureViewDimension::Cube);
    }

    #[test]
    fn test_backend_rejection_propagates() {
        let mut backend = RecordingBackend::new();
        backend.fail_next_texture(BackendError::OutOfMemory);
        let mut color = Attachment::color("color", TextureFormat::Rgba8Unorm);
        let result = color.init(&mut backend, (8, 8), 1, 1, false);
        assert_eq!(result, Err(BackendError::OutOfMemory));
        assert!(!color.is_allocated());
    }

    #[test]
    fn test_multisampled_depth_needs_resolve() {
        let mut backend = RecordingBackend::new();
        let mut depth = Attachment::depth("depth", TextureFormat::Depth32Float);
        depth.init(&mut backend, (8, 8), 4, 1, false).unwrap();
        assert!(depth.depth_resolve(0).is_some());

        depth.init(&mut backend, (8, 8), 1, 1, false).unwrap();
        assert!(depth.depth_resolve(0).is_none());
    }
}
