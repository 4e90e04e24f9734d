//! Prism Graph - render graph orchestration over a pluggable GPU backend
//!
//! A [`RenderPath`] owns a set of [`RenderNode`]s, each one GPU render pass
//! with its own attachments. Nodes are wired by named ports; the path derives
//! the execution order from that wiring, reallocates attachments only when
//! the size or a structural setting changes, and caches compiled pipelines
//! per node.
//!
//! # Features
//! - Backward dependency scheduling with pre-pass nodes (shadows, probes)
//! - Lazy attachment reallocation with MSAA resolve and layered targets
//! - Six-face cubemap rendering through [`CubeRenderNode`]
//! - Per-node shader variant cache with async precompilation
//! - A standard forward path: cascaded shadows, environment, SSAO, output
//!
//! Two backends ship: the headless [`RecordingBackend`] used by the tests,
//! and a wgpu backend behind the `wgpu-backend` feature.

pub mod backend;
pub mod error;
pub mod pipeline;
pub mod render_graph;
pub mod scene;
pub mod settings;

pub use backend::{BackendError, BackendResult, GraphicsBackend, RecordingBackend};
pub use error::{RenderGraphError, RenderResult};
pub use pipeline::{build_standard_path, StandardLayout};
pub use render_graph::{
    Attachment, CubeRenderNode, NodeContext, NodeState, PathLayout, RenderNode, RenderPath,
    ShaderCache, OUTPUT_NODE,
};
pub use scene::FrameInputs;
pub use settings::RenderSettings;

#[cfg(feature = "wgpu-backend")]
pub use backend::wgpu_backend::WgpuBackend;
