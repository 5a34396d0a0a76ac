// src/graph/mod.rs
// The graph container and everything that walks it.

mod net_graph;
pub mod dot;
pub mod node;
mod normalize;
mod passes;
pub mod serialize;

pub use net_graph::{GraphEvent, GraphEventHandler, NetGraph};
pub use dot::ToDot;
pub use node::{BackpropConnection, Connection, NetGraphNode, NodeId, OutputSlot};
pub use serialize::{
    ParameterFormat, ParameterLoadReport, EXTENDED_PARAMETER_MAGIC, LEGACY_PARAMETER_MAGIC,
    RESERVED_NAME_PREFIX,
};
