use crate::device::StorageDevice;
use thiserror::Error;

/// Custom error type for the netgraph engine.
///
/// Structural errors and capability violations are raised while registering
/// or initializing a graph; once `initialize` has failed the graph must not be
/// used for any numeric pass.
#[derive(Error, Debug, PartialEq, Clone)] // PartialEq for easier testing
pub enum NetGraphError {
    #[error("A node named '{name}' is already registered")]
    DuplicateNodeName { name: String },

    #[error("Node '{name}' is flagged as both input and output")]
    InputAndOutput { name: String },

    #[error("Node '{name}' has a connection to node index {target} which is not part of the graph")]
    DanglingConnection { name: String, target: usize },

    #[error("Node '{name}' connects to output slot {slot} of '{source_name}', which only has {available} slots")]
    InvalidOutputSlot {
        name: String,
        source_name: String,
        slot: usize,
        available: usize,
    },

    #[error("Node index {index} is not part of the graph")]
    UnknownNode { index: usize },

    #[error("Graph is incomplete: {reason}")]
    IncompleteGraph { reason: String },

    #[error("Graph has not been initialized")]
    NotInitialized,

    #[error("Graph is already initialized, nodes can no longer be added")]
    AlreadyInitialized,

    #[error("Layer '{layer}' will not create outputs: {reason}")]
    LayerRejectedOutputs { layer: String, reason: String },

    #[error("Layer '{layer}' will not connect: {reason}")]
    LayerRejectedConnection { layer: String, reason: String },

    #[error("Node '{name}' created {actual} output buffers but declared {expected}")]
    OutputCountMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("Layer '{layer}' received a dynamic tensor but is not dynamic tensor aware")]
    DynamicTensorNotSupported { layer: String },

    #[error("Node '{name}' is classified as {capability} but its layer does not expose it")]
    MissingCapability { name: String, capability: String },

    #[error("Shape mismatch: expected {expected:?}, got {actual:?} during operation {operation}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
        operation: String,
    },

    #[error("Data is not available on the expected device: expected {expected:?}, actual {actual:?}")]
    DataNotAvailableError {
        expected: StorageDevice,
        actual: StorageDevice,
    },

    #[error("Unknown parameter format magic {magic:#018x}")]
    UnknownParameterFormat { magic: u64 },

    #[error("Malformed parameter stream: {0}")]
    MalformedParameterStream(String),

    #[error("Configuration field '{field}' is missing or not of type {expected}")]
    InvalidConfiguration { field: String, expected: String },

    #[error("I/O error ({kind:?}): {message}")]
    Io {
        kind: std::io::ErrorKind,
        message: String,
    },
}

impl From<std::io::Error> for NetGraphError {
    fn from(err: std::io::Error) -> Self {
        NetGraphError::Io {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}
