//! Backend abstraction layer
//!
//! Provides the traits and types every GPU backend implements, plus the
//! headless [`RecordingBackend`] and (behind `wgpu-backend`) a wgpu backend.

pub mod recording;
pub mod traits;
pub mod types;

#[cfg(feature = "wgpu-backend")]
pub mod wgpu_backend;

pub use recording::*;
pub use traits::*;
pub use types::*;
