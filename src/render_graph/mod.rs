//! Render Graph System
//!
//! Render nodes own their attachments and declare named input ports bound to
//! other nodes' outputs. A [`RenderPath`] derives the execution order from
//! that wiring, reallocates attachments lazily when settings or size change,
//! and records one frame per [`RenderPath::run`].

pub mod attachment;
pub mod cube;
pub mod node;
pub mod path;
pub mod shader_cache;

pub use attachment::*;
pub use cube::*;
pub use node::*;
pub use path::*;
pub use shader_cache::*;
