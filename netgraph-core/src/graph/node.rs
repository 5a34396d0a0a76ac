use std::fmt;

use crate::buffer::SharedBuffer;
use crate::layer::{Layer, LayerCapabilities};

/// Stable index of a node inside its `NetGraph`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Forward edge: output slot `buffer` of `node` feeds the owning node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connection {
    pub node: NodeId,
    pub buffer: usize,
    /// Whether gradients flow back through this edge.
    pub backprop: bool,
}

impl Connection {
    /// Slot 0 of `node`, with gradient flow.
    pub fn new(node: NodeId) -> Self {
        Connection {
            node,
            buffer: 0,
            backprop: true,
        }
    }

    pub fn with_buffer(node: NodeId, buffer: usize) -> Self {
        Connection {
            node,
            buffer,
            backprop: true,
        }
    }

    pub fn without_backprop(mut self) -> Self {
        self.backprop = false;
        self
    }
}

/// Derived edge: `node` writes gradients into output slot `buffer` of the
/// owning node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackpropConnection {
    pub node: NodeId,
    pub buffer: usize,
}

/// A declared output slot. The buffer is filled in during initialization.
#[derive(Debug, Clone)]
pub struct OutputSlot {
    pub description: String,
    pub buffer: Option<SharedBuffer>,
}

/// Wraps one layer with its connections and output slots.
///
/// Backward connections are never supplied by the caller; `NetGraph` derives
/// them on registration and rewrites them during fan-out normalization.
pub struct NetGraphNode {
    pub(crate) layer: Box<dyn Layer>,
    pub(crate) capabilities: LayerCapabilities,
    pub(crate) input_connections: Vec<Connection>,
    pub(crate) backprop_connections: Vec<BackpropConnection>,
    pub(crate) output_buffers: Vec<OutputSlot>,
    pub(crate) unique_name: String,
    pub(crate) is_input: bool,
    pub(crate) is_output: bool,
    pub(crate) initialized: bool,
}

impl NetGraphNode {
    pub fn new<L: Layer + 'static>(layer: L) -> Self {
        Self::from_boxed(Box::new(layer))
    }

    /// Declares the output slots and caches the capability flags right away.
    pub fn from_boxed(layer: Box<dyn Layer>) -> Self {
        let output_buffers = layer
            .output_descriptors()
            .into_iter()
            .map(|description| OutputSlot {
                description,
                buffer: None,
            })
            .collect();
        let capabilities = layer.capabilities();
        NetGraphNode {
            layer,
            capabilities,
            input_connections: Vec::new(),
            backprop_connections: Vec::new(),
            output_buffers,
            unique_name: String::new(),
            is_input: false,
            is_output: false,
            initialized: false,
        }
    }

    pub fn with_connection(mut self, connection: Connection) -> Self {
        self.input_connections.push(connection);
        self
    }

    /// Sets the identity used as serialization key. Left empty, the graph
    /// assigns `node<N>` on registration.
    pub fn named(mut self, name: &str) -> Self {
        self.unique_name = name.to_string();
        self
    }

    pub fn as_input(mut self) -> Self {
        self.is_input = true;
        self
    }

    pub fn as_output(mut self) -> Self {
        self.is_output = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.unique_name
    }

    pub fn layer(&self) -> &dyn Layer {
        self.layer.as_ref()
    }

    pub fn layer_mut(&mut self) -> &mut dyn Layer {
        self.layer.as_mut()
    }

    pub fn capabilities(&self) -> LayerCapabilities {
        self.capabilities
    }

    pub fn input_connections(&self) -> &[Connection] {
        &self.input_connections
    }

    pub fn backprop_connections(&self) -> &[BackpropConnection] {
        &self.backprop_connections
    }

    pub fn output_slots(&self) -> &[OutputSlot] {
        &self.output_buffers
    }

    /// The buffer behind output slot `index`, once initialized.
    pub fn output_buffer(&self, index: usize) -> Option<SharedBuffer> {
        self.output_buffers.get(index).and_then(|slot| slot.buffer.clone())
    }

    pub fn is_input(&self) -> bool {
        self.is_input
    }

    pub fn is_output(&self) -> bool {
        self.is_output
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }
}

impl fmt::Debug for NetGraphNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetGraphNode")
            .field("name", &self.unique_name)
            .field("layer", &self.layer.description())
            .field("input_connections", &self.input_connections)
            .field("backprop_connections", &self.backprop_connections)
            .field("outputs", &self.output_buffers.len())
            .field("is_input", &self.is_input)
            .field("is_output", &self.is_output)
            .field("initialized", &self.initialized)
            .finish()
    }
}
