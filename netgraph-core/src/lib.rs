// Core modules of the crate
pub mod buffer;
pub mod config;
pub mod device;
pub mod error;
pub mod graph;
pub mod init;
pub mod layer;
pub mod layers;
pub mod status;
pub mod tensor;

// Re-export the types needed to build and run a graph via `netgraph_core::...`
pub use buffer::{Buffer, Metadata, SharedBuffer};
pub use config::{ConfigValue, LayerConfig};
pub use device::StorageDevice;
pub use error::NetGraphError;
pub use graph::{
    Connection, GraphEvent, NetGraph, NetGraphNode, NodeId, ParameterFormat, ParameterLoadReport, ToDot,
};
pub use layers::{GradientAccumulationLayer, InputFeeder, InputLayer};
pub use layer::{Layer, LayerCapabilities, LossFunction, StatisticsLayer, TrainingLayer};
pub use status::NetStatus;
pub use tensor::{Datum, Tensor};
