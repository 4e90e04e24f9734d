//! Render a few frames of a lit cube on a headless wgpu device.
//!
//! ```sh
//! cargo run --example headless -- --frames 3 --msaa 4 --ssao
//! ```

use std::sync::Arc;

use clap::Parser;
use glam::{Mat4, Vec2, Vec3, Vec4};
use prism_graph::backend::{BufferDescriptor, BufferUsage, FrontFace, IndexFormat, PrimitiveTopology};
use prism_graph::pipeline::{BuiltinShaders, MAIN_NODE};
use prism_graph::scene::{
    CameraFrustum, DrawInstance, GeometryId, GeometryRef, IndexBuffer, Light, MaterialId,
    MaterialRef, Vertex,
};
use prism_graph::{
    build_standard_path, FrameInputs, GraphicsBackend, RenderNode, RenderSettings, WgpuBackend,
};

#[derive(Parser, Debug)]
#[command(name = "headless", about = "Render the standard path without a window")]
struct Args {
    /// Render target width in pixels.
    #[arg(long, default_value = "1280")]
    width: u32,

    /// Render target height in pixels.
    #[arg(long, default_value = "720")]
    height: u32,

    /// Number of frames to render.
    #[arg(long, default_value = "3")]
    frames: u32,

    /// MSAA sample count of the main pass.
    #[arg(long, default_value = "1")]
    msaa: u32,

    /// Enable screen-space ambient occlusion.
    #[arg(long)]
    ssao: bool,
}

fn cube_mesh() -> (Vec<Vertex>, Vec<u32>) {
    let faces = [
        (Vec3::X, Vec3::Y),
        (Vec3::NEG_X, Vec3::Y),
        (Vec3::Y, Vec3::NEG_Z),
        (Vec3::NEG_Y, Vec3::Z),
        (Vec3::Z, Vec3::Y),
        (Vec3::NEG_Z, Vec3::Y),
    ];

    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);
    for (normal, up) in faces {
        let right = up.cross(normal);
        let base = vertices.len() as u32;
        for (u, v) in [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)] {
            vertices.push(Vertex {
                position: (normal + right * u + up * v) * 0.5,
                normal,
                uv: Vec2::new((u + 1.0) * 0.5, (1.0 - v) * 0.5),
                tangent: right.extend(1.0),
            });
        }
        indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }
    (vertices, indices)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut backend = WgpuBackend::new_headless()?;

    let (vertices, indices) = cube_mesh();
    let vertex_buffer = backend.create_buffer_init(
        &BufferDescriptor {
            label: Some("cube vertices".into()),
            size: std::mem::size_of_val(vertices.as_slice()) as u64,
            usage: BufferUsage::VERTEX,
            mapped_at_creation: false,
        },
        bytemuck::cast_slice(&vertices),
    )?;
    let index_buffer = backend.create_buffer_init(
        &BufferDescriptor {
            label: Some("cube indices".into()),
            size: std::mem::size_of_val(indices.as_slice()) as u64,
            usage: BufferUsage::INDEX,
            mapped_at_creation: false,
        },
        bytemuck::cast_slice(&indices),
    )?;

    let cube = GeometryRef {
        id: GeometryId(1),
        topology: PrimitiveTopology::TriangleList,
        vertex_buffer,
        vertex_count: vertices.len() as u32,
        index_buffer: Some(IndexBuffer {
            buffer: index_buffer,
            format: IndexFormat::Uint32,
            count: indices.len() as u32,
        }),
    };
    let mut material = MaterialRef::new(MaterialId(1));
    material.base_color = Vec4::new(0.8, 0.3, 0.2, 1.0);

    let settings = RenderSettings {
        msaa_samples: args.msaa,
        ssao: prism_graph::settings::SsaoSettings {
            enabled: args.ssao,
            ..Default::default()
        },
        ..RenderSettings::default()
    };

    let mut path = build_standard_path("headless", Arc::new(BuiltinShaders));
    path.set_size(args.width, args.height);
    path.reconfigure(&mut backend, &settings)?;
    log::info!(
        "Pre-path {:?}, path {:?}",
        path.pre_path_names(),
        path.path_names()
    );

    let aspect = args.width as f32 / args.height.max(1) as f32;
    let frame_for = |angle: f32| {
        let eye = Mat4::from_rotation_y(angle).transform_point3(Vec3::new(0.0, 2.0, 4.0));
        let mut frame = FrameInputs::new(CameraFrustum::perspective(
            eye,
            Vec3::ZERO,
            45.0,
            aspect,
            0.1,
            50.0,
        ));
        frame
            .lights
            .push(Light::directional(Vec3::new(-0.4, -1.0, -0.3)).with_color(Vec3::ONE, 3.0));
        frame.opaque.push(DrawInstance {
            geometry: cube,
            material,
            front_face: FrontFace::Ccw,
            instances: 0..1,
        });
        frame
    };

    path.precompile_blocking(&mut backend, &frame_for(0.0))?;

    for index in 0..args.frames {
        let angle = index as f32 * 0.25;
        path.run(&mut backend, frame_for(angle))?;
        log::info!("Frame {} submitted", index);
    }
    backend.wait_idle();

    if let Some(main) = path.node(MAIN_NODE) {
        log::info!(
            "Main pass holds {} compiled pipelines",
            main.state().shader_cache().len()
        );
    }

    path.destroy(&mut backend);
    backend.destroy_buffer(vertex_buffer);
    backend.destroy_buffer(index_buffer);
    Ok(())
}
