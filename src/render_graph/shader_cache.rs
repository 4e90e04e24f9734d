//! Shader variant cache
//!
//! Each node keeps its own cache of compiled pipelines, keyed by the shader it
//! draws with and the per-draw geometry, material and winding. The compiled
//! layout also bakes in the node's attachment formats, sample count and
//! feature flags, so the whole cache must be cleared whenever those change.

use std::collections::HashMap;

use crate::backend::*;
use crate::scene::{GeometryId, MaterialId};

/// Identifies the shader program a node draws with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShaderClass(pub &'static str);

/// Geometry part of a variant key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PrimitiveKey {
    pub geometry: GeometryId,
    pub topology: PrimitiveTopology,
}

impl PrimitiveKey {
    /// Key for passes that draw a single fullscreen triangle.
    pub const FULLSCREEN: PrimitiveKey = PrimitiveKey {
        geometry: GeometryId(u64::MAX),
        topology: PrimitiveTopology::TriangleList,
    };
}

/// Full variant key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShaderKey {
    pub shader: ShaderClass,
    pub primitive: PrimitiveKey,
    pub material: MaterialId,
    pub front_face: FrontFace,
}

impl ShaderKey {
    /// Key of a fullscreen pass pipeline.
    pub fn fullscreen(shader: ShaderClass) -> Self {
        Self {
            shader,
            primitive: PrimitiveKey::FULLSCREEN,
            material: MaterialId::NONE,
            front_face: FrontFace::Ccw,
        }
    }
}

/// A pipeline compilation started by [`ShaderCache::compile_async`]
pub struct PendingShader {
    pub key: ShaderKey,
    future: PipelineFuture,
}

impl PendingShader {
    /// Wait for the compilation to finish.
    pub async fn resolve(self) -> (ShaderKey, BackendResult<RenderPipelineHandle>) {
        let result = self.future.await;
        (self.key, result)
    }
}

impl std::fmt::Debug for PendingShader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingShader").field("key", &self.key).finish()
    }
}

/// Memoized pipelines of one node
#[derive(Debug, Default)]
pub struct ShaderCache {
    entries: HashMap<ShaderKey, RenderPipelineHandle>,
    compiled: usize,
    invalidations: usize,
}

impl ShaderCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached pipeline for `key`, without compiling.
    pub fn get(&self, key: &ShaderKey) -> Option<RenderPipelineHandle> {
        self.entries.get(key).copied()
    }

    /// Cached pipeline for `key`, compiling it now on a miss.
    ///
    /// Used when the draw has to happen this frame.
    pub fn get_or_compile(
        &mut self,
        key: ShaderKey,
        backend: &mut dyn GraphicsBackend,
        build: impl FnOnce(&ShaderKey) -> RenderPipelineDescriptor,
    ) -> BackendResult<RenderPipelineHandle> {
        if let Some(handle) = self.entries.get(&key) {
            return Ok(*handle);
        }
        let desc = build(&key);
        let handle = backend.create_render_pipeline(&desc)?;
        log::trace!("Compiled shader variant {:?}", key);
        self.compiled += 1;
        self.entries.insert(key, handle);
        Ok(handle)
    }

    /// Start compiling `key` unless it is already cached.
    ///
    /// The result is stored with [`insert`](Self::insert) once awaited.
    pub fn compile_async(
        &self,
        key: ShaderKey,
        backend: &mut dyn GraphicsBackend,
        build: impl FnOnce(&ShaderKey) -> RenderPipelineDescriptor,
    ) -> Option<PendingShader> {
        if self.entries.contains_key(&key) {
            return None;
        }
        let desc = build(&key);
        Some(PendingShader {
            key,
            future: backend.create_render_pipeline_async(&desc),
        })
    }

    /// Store a finished compilation. A duplicate of an existing entry is released.
    pub fn insert(
        &mut self,
        key: ShaderKey,
        handle: RenderPipelineHandle,
        backend: &mut dyn GraphicsBackend,
    ) {
        match self.entries.get(&key) {
            Some(existing) if *existing != handle => backend.destroy_render_pipeline(handle),
            Some(_) => {}
            None => {
                self.compiled += 1;
                self.entries.insert(key, handle);
            }
        }
    }

    /// Drop every cached pipeline.
    pub fn clear(&mut self, backend: &mut dyn GraphicsBackend) {
        if self.entries.is_empty() {
            return;
        }
        log::debug!("Clearing {} cached shader variants", self.entries.len());
        for (_, handle) in self.entries.drain() {
            backend.destroy_render_pipeline(handle);
        }
        self.invalidations += 1;
    }

    /// Drop the variants compiled for a geometry that no longer exists.
    pub fn evict_geometry(&mut self, geometry: GeometryId, backend: &mut dyn GraphicsBackend) {
        self.evict(|key| key.primitive.geometry == geometry, backend);
    }

    /// Drop the variants compiled for a material that no longer exists.
    pub fn evict_material(&mut self, material: MaterialId, backend: &mut dyn GraphicsBackend) {
        self.evict(|key| key.material == material, backend);
    }

    fn evict(&mut self, matches: impl Fn(&ShaderKey) -> bool, backend: &mut dyn GraphicsBackend) {
        self.entries.retain(|key, handle| {
            if matches(key) {
                backend.destroy_render_pipeline(*handle);
                false
            } else {
                true
            }
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Pipelines compiled over the cache's lifetime
    pub fn compiled_count(&self) -> usize {
        self.compiled
    }

    /// Number of times the cache was cleared
    pub fn invalidation_count(&self) -> usize {
        self.invalidations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(geometry: u64, material: u64) -> ShaderKey {
        ShaderKey {
            shader: ShaderClass("test"),
            primitive: PrimitiveKey {
                geometry: GeometryId(geometry),
                topology: PrimitiveTopology::TriangleList,
            },
            material: MaterialId(material),
            front_face: FrontFace::Ccw,
        }
    }

    fn descriptor(_key: &ShaderKey) -> RenderPipelineDescriptor {
        RenderPipelineDescriptor {
            label: Some("test".into()),
            shader: String::new(),
            has_fragment: true,
            vertex_layouts: Vec::new(),
            bind_group_layouts: Vec::new(),
            primitive_topology: PrimitiveTopology::TriangleList,
            front_face: FrontFace::Ccw,
            cull_mode: CullMode::Back,
            depth_stencil: None,
            color_targets: Vec::new(),
            sample_count: 1,
        }
    }

    #[test]
    fn test_memoizes_per_key() {
        let mut backend = RecordingBackend::new();
        let mut cache = ShaderCache::new();

        let a = cache.get_or_compile(key(1, 1), &mut backend, descriptor).unwrap();
        let b = cache.get_or_compile(key(1, 1), &mut backend, descriptor).unwrap();
        let c = cache.get_or_compile(key(1, 2), &mut backend, descriptor).unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(backend.pipelines_created(), 2);
    }

    #[test]
    fn test_winding_is_part_of_key() {
        let mut backend = RecordingBackend::new();
        let mut cache = ShaderCache::new();
        let ccw = key(1, 1);
        let cw = ShaderKey {
            front_face: FrontFace::Cw,
            ..ccw
        };
        let a = cache.get_or_compile(ccw, &mut backend, descriptor).unwrap();
        let b = cache.get_or_compile(cw, &mut backend, descriptor).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_clear_releases_pipelines() {
        let mut backend = RecordingBackend::new();
        let mut cache = ShaderCache::new();
        let before = cache.get_or_compile(key(1, 1), &mut backend, descriptor).unwrap();

        cache.clear(&mut backend);
        assert!(cache.is_empty());
        assert_eq!(backend.live_pipeline_count(), 0);
        assert_eq!(cache.invalidation_count(), 1);

        let after = cache.get_or_compile(key(1, 1), &mut backend, descriptor).unwrap();
        assert_ne!(before, after);
    }

    #[test]
    fn test_evict_by_source_id() {
        let mut backend = RecordingBackend::new();
        let mut cache = ShaderCache::new();
        cache.get_or_compile(key(1, 1), &mut backend, descriptor).unwrap();
        cache.get_or_compile(key(2, 1), &mut backend, descriptor).unwrap();
        cache.get_or_compile(key(2, 3), &mut backend, descriptor).unwrap();

        cache.evict_geometry(GeometryId(2), &mut backend);
        assert_eq!(cache.len(), 1);

        cache.evict_material(MaterialId(1), &mut backend);
        assert!(cache.is_empty());
        assert_eq!(backend.live_pipeline_count(), 0);
    }

    #[test]
    fn test_async_compile_then_insert() {
        let mut backend = RecordingBackend::new();
        let mut cache = ShaderCache::new();

        let pending = cache.compile_async(key(1, 1), &mut backend, descriptor).unwrap();
        let (k, result) = pollster::block_on(pending.resolve());
        cache.insert(k, result.unwrap(), &mut backend);

        assert!(cache.get(&key(1, 1)).is_some());
        assert!(cache.compile_async(key(1, 1), &mut backend, descriptor).is_none());
    }
}
