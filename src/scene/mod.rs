//! Per-frame scene data consumed by the render graph
//!
//! The scene evaluator (transforms, skinning, culling, sorting) lives outside
//! this crate. It hands the render path a [`FrameInputs`] snapshot each frame,
//! and the passes only iterate the batches in the order given.

mod camera;
mod light;

pub use camera::*;
pub use light::*;

use std::ops::Range;

use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3, Vec4};

use crate::backend::{
    BufferHandle, FrontFace, IndexFormat, PrimitiveTopology, VertexAttribute, VertexBufferLayout,
    VertexFormat, VertexStepMode,
};

/// Stable id the scene assigns to a geometry when it is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GeometryId(pub u64);

/// Stable id the scene assigns to a material when it is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MaterialId(pub u64);

impl MaterialId {
    /// Used by fullscreen passes that draw without a material.
    pub const NONE: MaterialId = MaterialId(u64::MAX);
}

/// Index buffer of a geometry
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexBuffer {
    pub buffer: BufferHandle,
    pub format: IndexFormat,
    pub count: u32,
}

/// GPU-resident geometry referenced by a draw
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeometryRef {
    pub id: GeometryId,
    pub topology: PrimitiveTopology,
    pub vertex_buffer: BufferHandle,
    pub vertex_count: u32,
    pub index_buffer: Option<IndexBuffer>,
}

/// Material flags that change the compiled pipeline
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaterialRef {
    pub id: MaterialId,
    pub double_sided: bool,
    pub base_color: Vec4,
}

impl MaterialRef {
    pub fn new(id: MaterialId) -> Self {
        Self {
            id,
            double_sided: false,
            base_color: Vec4::ONE,
        }
    }
}

/// One batched draw: a geometry, its material and an instance range
#[derive(Debug, Clone, PartialEq)]
pub struct DrawInstance {
    pub geometry: GeometryRef,
    pub material: MaterialRef,
    pub front_face: FrontFace,
    pub instances: Range<u32>,
}

/// Everything the scene evaluator provides for one frame
#[derive(Debug, Clone, Default)]
pub struct FrameInputs {
    pub camera: CameraFrustum,
    pub lights: Vec<Light>,
    pub opaque: Vec<DrawInstance>,
    pub transmissive: Vec<DrawInstance>,
    pub alpha: Vec<DrawInstance>,
}

impl FrameInputs {
    pub fn new(camera: CameraFrustum) -> Self {
        Self {
            camera,
            ..Self::default()
        }
    }

    /// First directional light that casts shadows.
    pub fn shadow_light(&self) -> Option<&Light> {
        self.lights
            .iter()
            .find(|l| l.casts_shadow && l.direction().is_some())
    }

    /// Every draw in submission order: opaque, transmissive, then alpha.
    pub fn all_draws(&self) -> impl Iterator<Item = &DrawInstance> {
        self.opaque
            .iter()
            .chain(self.transmissive.iter())
            .chain(self.alpha.iter())
    }
}

/// Standard vertex with position, normal, UV, and tangent
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct Vertex {
    pub position: Vec3,
    pub normal: Vec3,
    pub uv: Vec2,
    pub tangent: Vec4,
}

impl Vertex {
    pub fn layout() -> VertexBufferLayout {
        VertexBufferLayout {
            array_stride: std::mem::size_of::<Self>() as u64,
            step_mode: VertexStepMode::Vertex,
            attributes: vec![
                VertexAttribute {
                    location: 0,
                    format: VertexFormat::Float32x3,
                    offset: 0,
                },
                VertexAttribute {
                    location: 1,
                    format: VertexFormat::Float32x3,
                    offset: 12,
                },
                VertexAttribute {
                    location: 2,
                    format: VertexFormat::Float32x2,
                    offset: 24,
                },
                VertexAttribute {
                    location: 3,
                    format: VertexFormat::Float32x4,
                    offset: 32,
                },
            ],
        }
    }
}
