use std::fmt;

use log::{debug, warn};

use super::node::{BackpropConnection, NetGraphNode, NodeId};
use crate::buffer::SharedBuffer;
use crate::error::NetGraphError;
use crate::status::NetStatus;

/// Points in a training step at which registered handlers are called.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GraphEvent {
    BeforeFeedForward,
    AfterFeedForward,
    BeforeBackPropagate,
    AfterBackPropagate,
}

pub type GraphEventHandler = Box<dyn FnMut(GraphEvent, &NetStatus)>;

/// A network represented as a directed acyclic graph of layer nodes.
///
/// Nodes live in an arena and are addressed by `NodeId`. Registration order
/// is preserved and drives the outer loop of every pass; dependency order is
/// established by memoized depth-first walks over the connections.
pub struct NetGraph {
    pub(crate) nodes: Vec<NetGraphNode>,
    pub(crate) input_nodes: Vec<NodeId>,
    pub(crate) output_nodes: Vec<NodeId>,
    pub(crate) stat_nodes: Vec<NodeId>,
    pub(crate) loss_nodes: Vec<NodeId>,
    pub(crate) training_nodes: Vec<NodeId>,
    pub(crate) status: NetStatus,
    pub(crate) initialized: bool,
    next_uid: usize,
    event_handlers: Vec<(GraphEvent, GraphEventHandler)>,
}

impl Default for NetGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl NetGraph {
    pub fn new() -> Self {
        NetGraph {
            nodes: Vec::new(),
            input_nodes: Vec::new(),
            output_nodes: Vec::new(),
            stat_nodes: Vec::new(),
            loss_nodes: Vec::new(),
            training_nodes: Vec::new(),
            status: NetStatus::new(),
            initialized: false,
            next_uid: 0,
            event_handlers: Vec::new(),
        }
    }

    /// Registers a node and returns its id.
    ///
    /// Assigns `node<N>` when the node has no name, classifies it from its
    /// capability flags and derives backward connections on its sources.
    /// Connections may only refer to nodes registered earlier, so the forward
    /// graph is acyclic by construction.
    ///
    /// # Arguments
    /// * `node`: The node to register, with its forward connections.
    ///
    /// # Returns
    /// The `NodeId` other nodes use to connect to this one.
    ///
    /// # Errors
    /// Duplicate names, input+output nodes, dangling connections, invalid slot
    /// indices, and registration after `initialize`.
    pub fn add_node(&mut self, mut node: NetGraphNode) -> Result<NodeId, NetGraphError> {
        if self.initialized {
            return Err(NetGraphError::AlreadyInitialized);
        }

        let mut next_uid = self.next_uid;
        if node.unique_name.is_empty() {
            loop {
                let candidate = format!("node{}", next_uid);
                next_uid += 1;
                if !self.contains_node(&candidate) {
                    node.unique_name = candidate;
                    break;
                }
            }
        } else if self.contains_node(&node.unique_name) {
            return Err(NetGraphError::DuplicateNodeName {
                name: node.unique_name,
            });
        }

        if node.is_input && node.is_output {
            return Err(NetGraphError::InputAndOutput {
                name: node.unique_name,
            });
        }

        for connection in &node.input_connections {
            let source = self.nodes.get(connection.node.0).ok_or_else(|| {
                NetGraphError::DanglingConnection {
                    name: node.unique_name.clone(),
                    target: connection.node.0,
                }
            })?;
            if connection.buffer >= source.output_buffers.len() {
                return Err(NetGraphError::InvalidOutputSlot {
                    name: node.unique_name.clone(),
                    source_name: source.unique_name.clone(),
                    slot: connection.buffer,
                    available: source.output_buffers.len(),
                });
            }
        }

        // Validation passed, commit.
        self.next_uid = next_uid;
        let id = NodeId(self.nodes.len());

        if node.is_input {
            self.input_nodes.push(id);
        }
        if node.is_output {
            self.output_nodes.push(id);
        }
        if node.capabilities.statistics {
            self.stat_nodes.push(id);
        }
        if node.capabilities.loss {
            self.loss_nodes.push(id);
        }
        if node.capabilities.training_supply {
            self.training_nodes.push(id);
        }

        for connection in node.input_connections.iter_mut() {
            if !connection.backprop {
                continue;
            }
            let source = &mut self.nodes[connection.node.0];
            if source.is_input {
                connection.backprop = false;
            } else {
                source.backprop_connections.push(BackpropConnection {
                    node: id,
                    buffer: connection.buffer,
                });
            }
        }

        debug!(
            "Registered node {} ({}) as {}",
            node.unique_name,
            node.layer.description(),
            id
        );
        self.nodes.push(node);
        Ok(id)
    }

    /// Logs every structural problem and reports whether the graph can be
    /// initialized.
    pub fn is_complete(&self) -> bool {
        self.completeness_problems().is_empty()
    }

    pub(crate) fn completeness_problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        for node in &self.nodes {
            let mut node_okay = true;
            for connection in &node.input_connections {
                match self.nodes.get(connection.node.0) {
                    None => {
                        problems.push(format!("node {} has an out-of-network connection", node.unique_name));
                        node_okay = false;
                    }
                    Some(source) if connection.buffer >= source.output_buffers.len() => {
                        problems.push(format!("node {} connects to an invalid buffer", node.unique_name));
                        node_okay = false;
                    }
                    Some(_) => {}
                }
            }
            if node.unique_name.is_empty() {
                problems.push("a node has no unique name".to_string());
                node_okay = false;
            }
            if node.is_input && node.is_output {
                problems.push(format!("node {} is both input and output", node.unique_name));
                node_okay = false;
            }
            if node_okay {
                debug!("Node is okay: {}", node.layer.description());
            } else {
                warn!("Node is not okay: {}", node.layer.description());
            }
        }
        if self.input_nodes.is_empty() {
            warn!("Net has no inputs!");
            problems.push("net has no inputs".to_string());
        }
        if self.output_nodes.is_empty() {
            warn!("Net has no outputs!");
            problems.push("net has no outputs".to_string());
        }
        debug!("Graph check complete.");
        problems
    }

    pub fn nodes(&self) -> &[NetGraphNode] {
        &self.nodes
    }

    pub fn node(&self, id: NodeId) -> Option<&NetGraphNode> {
        self.nodes.get(id.0)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut NetGraphNode> {
        self.nodes.get_mut(id.0)
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.nodes.len()).map(NodeId)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains_node(&self, unique_name: &str) -> bool {
        self.node_by_name(unique_name).is_some()
    }

    pub fn node_by_name(&self, unique_name: &str) -> Option<NodeId> {
        self.nodes
            .iter()
            .position(|node| node.unique_name == unique_name)
            .map(NodeId)
    }

    pub fn input_nodes(&self) -> &[NodeId] {
        &self.input_nodes
    }

    pub fn output_nodes(&self) -> &[NodeId] {
        &self.output_nodes
    }

    /// The first registered output node.
    pub fn default_output_node(&self) -> Option<NodeId> {
        self.output_nodes.first().copied()
    }

    pub fn stat_nodes(&self) -> &[NodeId] {
        &self.stat_nodes
    }

    pub fn loss_nodes(&self) -> &[NodeId] {
        &self.loss_nodes
    }

    pub fn training_nodes(&self) -> &[NodeId] {
        &self.training_nodes
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// All parameter buffers, in node registration order, for an optimizer.
    pub fn parameters(&self) -> Vec<SharedBuffer> {
        self.nodes
            .iter()
            .flat_map(|node| node.layer.parameters().iter().cloned())
            .collect()
    }

    pub fn status(&self) -> &NetStatus {
        &self.status
    }

    /// Switches testing mode and forwards it to every training-supply node.
    pub fn set_is_testing(&mut self, is_testing: bool) -> Result<(), NetGraphError> {
        self.status.set_is_testing(is_testing);
        for id in self.training_nodes.clone() {
            let node = &mut self.nodes[id.0];
            match node.layer.as_training_mut() {
                Some(training) => training.set_testing_mode(is_testing),
                None => return Err(missing_capability(node, "training supply")),
            }
        }
        Ok(())
    }

    pub fn set_is_gradient_testing(&mut self, is_gradient_testing: bool) {
        self.status.set_is_gradient_testing(is_gradient_testing);
    }

    pub fn set_stat_layers_enabled(&mut self, enabled: bool) -> Result<(), NetGraphError> {
        for id in self.stat_nodes.clone() {
            let node = &mut self.nodes[id.0];
            match node.layer.as_statistics_mut() {
                Some(stat) => stat.set_disabled(!enabled),
                None => return Err(missing_capability(node, "statistics")),
            }
        }
        Ok(())
    }

    /// Adds a handler called around full `feed_forward` / `back_propagate`
    /// passes.
    ///
    /// # Arguments
    /// * `event`: The point in the pass at which `handler` runs.
    /// * `handler`: Receives the event and the current run status.
    pub fn register_event_handler<F>(&mut self, event: GraphEvent, handler: F)
    where
        F: FnMut(GraphEvent, &NetStatus) + 'static,
    {
        self.event_handlers.push((event, Box::new(handler)));
    }

    pub fn on_before_feed_forward(&mut self) {
        self.dispatch_event(GraphEvent::BeforeFeedForward);
    }

    pub fn on_after_feed_forward(&mut self) {
        self.dispatch_event(GraphEvent::AfterFeedForward);
    }

    pub fn on_before_back_propagate(&mut self) {
        self.dispatch_event(GraphEvent::BeforeBackPropagate);
    }

    pub fn on_after_back_propagate(&mut self) {
        self.dispatch_event(GraphEvent::AfterBackPropagate);
    }

    fn dispatch_event(&mut self, event: GraphEvent) {
        let status = self.status;
        for (registered, handler) in self.event_handlers.iter_mut() {
            if *registered == event {
                handler(event, &status);
            }
        }
    }
}

pub(crate) fn missing_capability(node: &NetGraphNode, capability: &str) -> NetGraphError {
    NetGraphError::MissingCapability {
        name: node.unique_name.clone(),
        capability: capability.to_string(),
    }
}

impl fmt::Debug for NetGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetGraph")
            .field("nodes", &self.nodes)
            .field("input_nodes", &self.input_nodes)
            .field("output_nodes", &self.output_nodes)
            .field("loss_nodes", &self.loss_nodes)
            .field("initialized", &self.initialized)
            .field("event_handlers", &self.event_handlers.len())
            .finish()
    }
}
