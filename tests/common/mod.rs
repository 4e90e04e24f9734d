//! Shared fixtures for the render path integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use glam::Vec3;
use prism_graph::backend::{BufferHandle, FrontFace, PrimitiveTopology, RecordedCommand};
use prism_graph::pipeline::BuiltinShaders;
use prism_graph::scene::{DrawInstance, GeometryId, GeometryRef, Light, MaterialId, MaterialRef};
use prism_graph::{build_standard_path, FrameInputs, RecordingBackend, RenderPath, RenderSettings};

pub const WIDTH: u32 = 320;
pub const HEIGHT: u32 = 240;

/// A non-indexed triangle draw. The buffer handle is never dereferenced by
/// the recording backend.
pub fn draw(geometry: u64, material: u64) -> DrawInstance {
    DrawInstance {
        geometry: GeometryRef {
            id: GeometryId(geometry),
            topology: PrimitiveTopology::TriangleList,
            vertex_buffer: BufferHandle::from_raw(10_000 + geometry),
            vertex_count: 36,
            index_buffer: None,
        },
        material: MaterialRef::new(MaterialId(material)),
        front_face: FrontFace::Ccw,
        instances: 0..1,
    }
}

/// One opaque cube lit by a shadow-casting sun.
pub fn lit_frame() -> FrameInputs {
    let mut frame = FrameInputs::default();
    frame
        .lights
        .push(Light::directional(Vec3::new(-0.3, -1.0, -0.2)));
    frame.opaque.push(draw(1, 1));
    frame
}

pub fn standard_path(backend: &mut RecordingBackend, settings: &RenderSettings) -> RenderPath {
    let mut path = build_standard_path("view", Arc::new(BuiltinShaders));
    path.set_size(WIDTH, HEIGHT);
    path.reconfigure(backend, settings)
        .expect("standard path should configure");
    path
}

pub fn layered(name: &str, layers: u32) -> Vec<String> {
    (0..layers).map(|i| format!("{}[{}]", name, i)).collect()
}

pub fn count_commands(backend: &RecordingBackend, pred: impl Fn(&RecordedCommand) -> bool) -> usize {
    backend.commands().iter().filter(|c| pred(c)).count()
}
