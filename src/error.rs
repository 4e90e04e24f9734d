//! Render graph error types.

use thiserror::Error;

use crate::backend::BackendError;

/// Errors raised while configuring or executing a render path.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderGraphError {
    /// A layer index past the node's layer count was selected.
    #[error("node '{node}': render layer {layer} out of range (layers = {layers})")]
    LayerOutOfRange { node: String, layer: u32, layers: u32 },

    /// A node required an input port that is not wired.
    #[error("node '{node}': required input '{port}' is not connected")]
    MissingInput { node: String, port: String },

    /// Per-frame data was read outside of a `run` call.
    #[error("node '{node}': frame inputs are only available while the path runs")]
    MissingFrameInputs { node: String },

    /// The wiring contains a cycle through the named node.
    #[error("render graph contains a cyclic dependency through '{node}'")]
    CyclicDependency { node: String },

    /// Resource or pipeline creation rejected by the backend.
    #[error(transparent)]
    Backend(#[from] BackendError),
}

pub type RenderResult<T> = Result<T, RenderGraphError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RenderGraphError::LayerOutOfRange {
            node: "shadow".into(),
            layer: 4,
            layers: 4,
        };
        assert_eq!(
            err.to_string(),
            "node 'shadow': render layer 4 out of range (layers = 4)"
        );

        let err: RenderGraphError = BackendError::OutOfMemory.into();
        assert_eq!(err.to_string(), "Out of memory");
    }
}
