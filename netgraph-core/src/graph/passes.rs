use log::{debug, info, trace};

use super::net_graph::{missing_capability, NetGraph};
use super::node::NodeId;
use crate::buffer::SharedBuffer;
use crate::error::NetGraphError;
use crate::tensor::Datum;

impl NetGraph {
    /// Binds every layer to its buffers.
    ///
    /// Checks completeness, inserts gradient accumulation nodes where an
    /// output slot has several gradient writers, then initializes each node
    /// after all of its sources. Calling it again on an initialized graph does
    /// nothing.
    ///
    /// # Returns
    /// `Ok(())` once every node owns its output buffers and is connected.
    ///
    /// # Errors
    /// `IncompleteGraph`, a layer refusing to create outputs or to connect,
    /// an output count that differs from the declared slots, or a dynamic
    /// input reaching a layer that cannot handle one.
    pub fn initialize(&mut self) -> Result<(), NetGraphError> {
        if self.initialized {
            return Ok(());
        }
        let problems = self.completeness_problems();
        if !problems.is_empty() {
            return Err(NetGraphError::IncompleteGraph {
                reason: problems.join("; "),
            });
        }

        self.normalize_fan_out()?;

        for index in 0..self.nodes.len() {
            self.initialize_node(NodeId(index))?;
        }
        self.initialized = true;
        info!("Graph initialized with {} nodes", self.nodes.len());
        Ok(())
    }

    fn initialize_node(&mut self, id: NodeId) -> Result<(), NetGraphError> {
        if self.nodes[id.0].initialized {
            return Ok(());
        }

        let connections = self.nodes[id.0].input_connections.clone();
        let mut inputs = Vec::with_capacity(connections.len());
        for connection in &connections {
            self.initialize_node(connection.node)?;
            let source = &self.nodes[connection.node.0];
            let buffer = source
                .output_buffer(connection.buffer)
                .ok_or_else(|| NetGraphError::InvalidOutputSlot {
                    name: self.nodes[id.0].unique_name.clone(),
                    source_name: source.unique_name.clone(),
                    slot: connection.buffer,
                    available: source.output_buffers.len(),
                })?;
            inputs.push(buffer);
        }

        let status = self.status;
        let node = &mut self.nodes[id.0];
        let description = node.layer.description();

        if !node.capabilities.dynamic_tensor_aware
            && inputs.iter().any(|input| input.borrow().is_dynamic())
        {
            return Err(NetGraphError::DynamicTensorNotSupported { layer: description });
        }

        let outputs = node.layer.create_outputs(&inputs).map_err(|err| match err {
            err @ NetGraphError::LayerRejectedOutputs { .. } => err,
            other => NetGraphError::LayerRejectedOutputs {
                layer: description.clone(),
                reason: other.to_string(),
            },
        })?;

        if outputs.len() != node.output_buffers.len() {
            return Err(NetGraphError::OutputCountMismatch {
                name: node.unique_name.clone(),
                expected: node.output_buffers.len(),
                actual: outputs.len(),
            });
        }
        for (slot, output) in node.output_buffers.iter_mut().zip(&outputs) {
            slot.buffer = Some(output.clone());
        }

        node.layer
            .connect(&inputs, &outputs, &status)
            .map_err(|err| match err {
                err @ NetGraphError::LayerRejectedConnection { .. } => err,
                other => NetGraphError::LayerRejectedConnection {
                    layer: description.clone(),
                    reason: other.to_string(),
                },
            })?;

        node.initialized = true;
        debug!(
            "Initialized node {} ({}): {} inputs, outputs {}",
            node.unique_name,
            description,
            inputs.len(),
            describe_buffers(&outputs)
        );
        Ok(())
    }

    fn ensure_initialized(&self) -> Result<(), NetGraphError> {
        if self.initialized {
            Ok(())
        } else {
            Err(NetGraphError::NotInitialized)
        }
    }

    fn check_node_ids(&self, ids: &[NodeId]) -> Result<(), NetGraphError> {
        match ids.iter().find(|id| id.0 >= self.nodes.len()) {
            Some(id) => Err(NetGraphError::UnknownNode { index: id.0 }),
            None => Ok(()),
        }
    }

    /// Runs every layer's forward step once, each after all of its sources.
    pub fn feed_forward(&mut self) -> Result<(), NetGraphError> {
        self.ensure_initialized()?;
        self.on_before_feed_forward();
        let mut visited = vec![false; self.nodes.len()];
        for index in 0..self.nodes.len() {
            self.feed_forward_node(NodeId(index), &mut visited)?;
        }
        self.on_after_feed_forward();
        Ok(())
    }

    /// Forward pass restricted to `ids` and whatever they depend on.
    /// No events are dispatched.
    ///
    /// # Arguments
    /// * `ids`: The nodes whose outputs are needed.
    ///
    /// # Errors
    /// `NotInitialized`, `UnknownNode` for an id from another graph, or the
    /// first error returned by a layer.
    pub fn feed_forward_nodes(&mut self, ids: &[NodeId]) -> Result<(), NetGraphError> {
        self.ensure_initialized()?;
        self.check_node_ids(ids)?;
        let mut visited = vec![false; self.nodes.len()];
        for &id in ids {
            self.feed_forward_node(id, &mut visited)?;
        }
        Ok(())
    }

    fn feed_forward_node(&mut self, id: NodeId, visited: &mut [bool]) -> Result<(), NetGraphError> {
        if visited[id.0] {
            return Ok(());
        }
        visited[id.0] = true;

        for position in 0..self.nodes[id.0].input_connections.len() {
            let source = self.nodes[id.0].input_connections[position].node;
            self.feed_forward_node(source, visited)?;
        }

        self.prepare_node(id);
        let status = self.status;
        let node = &mut self.nodes[id.0];
        trace!("Feed forward: {}", node.unique_name);
        node.layer.feed_forward(&status)
    }

    /// Runs every layer's backward step once, each after all of its gradient
    /// writers.
    ///
    /// A node is skipped when none of its input connections wants a gradient
    /// and it has no trainable parameters (none, or a local learning rate of
    /// zero).
    pub fn back_propagate(&mut self) -> Result<(), NetGraphError> {
        self.ensure_initialized()?;
        self.on_before_back_propagate();
        let mut visited = vec![false; self.nodes.len()];
        for index in 0..self.nodes.len() {
            self.back_propagate_node(NodeId(index), &mut visited)?;
        }
        self.on_after_back_propagate();
        Ok(())
    }

    /// Backward pass restricted to `ids` and the nodes writing their
    /// gradients. No events are dispatched.
    pub fn back_propagate_nodes(&mut self, ids: &[NodeId]) -> Result<(), NetGraphError> {
        self.ensure_initialized()?;
        self.check_node_ids(ids)?;
        let mut visited = vec![false; self.nodes.len()];
        for &id in ids {
            self.back_propagate_node(id, &mut visited)?;
        }
        Ok(())
    }

    fn back_propagate_node(&mut self, id: NodeId, visited: &mut [bool]) -> Result<(), NetGraphError> {
        if visited[id.0] {
            return Ok(());
        }
        visited[id.0] = true;

        for position in 0..self.nodes[id.0].backprop_connections.len() {
            let writer = self.nodes[id.0].backprop_connections[position].node;
            self.back_propagate_node(writer, visited)?;
        }

        let node = &self.nodes[id.0];
        let do_backprop = node.input_connections.iter().any(|c| c.backprop);
        let trainable =
            !node.layer.parameters().is_empty() && node.layer.local_learning_rate() != 0.0;
        if !do_backprop && !trainable {
            trace!("Back propagate: skipping {}", node.unique_name);
            return Ok(());
        }

        self.prepare_node(id);
        let status = self.status;
        let node = &mut self.nodes[id.0];
        trace!("Back propagate: {}", node.unique_name);
        node.layer.set_backprop_enabled(do_backprop);
        node.layer.back_propagate(&status)
    }

    /// Stages every buffer the node touches to host memory unless its layer
    /// works on accelerator-resident buffers.
    fn prepare_node(&mut self, id: NodeId) {
        let node = &self.nodes[id.0];
        if node.capabilities.accelerator_aware {
            return;
        }
        for connection in &node.input_connections {
            if let Some(buffer) = self.nodes[connection.node.0].output_buffer(connection.buffer) {
                buffer.borrow_mut().move_to_cpu();
            }
        }
        for slot in &node.output_buffers {
            if let Some(buffer) = &slot.buffer {
                buffer.borrow_mut().move_to_cpu();
            }
        }
    }

    /// Sum of the losses reported by all loss nodes.
    ///
    /// # Returns
    /// The total loss of the last forward pass.
    ///
    /// # Errors
    /// `MissingCapability` if a node classified as loss does not expose its
    /// loss function.
    pub fn aggregate_loss(&mut self) -> Result<Datum, NetGraphError> {
        self.ensure_initialized()?;
        let mut loss = 0.0;
        for index in 0..self.loss_nodes.len() {
            let node = &mut self.nodes[self.loss_nodes[index].0];
            match node.layer.as_loss_function_mut() {
                Some(loss_function) => loss += loss_function.calculate_loss_function()?,
                None => return Err(missing_capability(node, "loss")),
            }
        }
        Ok(loss)
    }

    /// Lets every layer initialize its weights knowing who consumes its
    /// outputs. Layers are visited after all of their gradient writers and
    /// receive the writers' gains.
    ///
    /// # Arguments
    /// * `no_init`: When true, layers only record the gains and keep their
    ///   current weights, e.g. before loading a parameter file.
    pub fn initialize_weights(&mut self, no_init: bool) -> Result<(), NetGraphError> {
        self.ensure_initialized()?;
        let mut visited = vec![false; self.nodes.len()];
        for index in 0..self.nodes.len() {
            self.initialize_weights_node(NodeId(index), no_init, &mut visited);
        }
        Ok(())
    }

    fn initialize_weights_node(&mut self, id: NodeId, no_init: bool, visited: &mut [bool]) {
        if visited[id.0] {
            return;
        }
        visited[id.0] = true;

        let mut gains = Vec::with_capacity(self.nodes[id.0].backprop_connections.len());
        for position in 0..self.nodes[id.0].backprop_connections.len() {
            let writer = self.nodes[id.0].backprop_connections[position].node;
            self.initialize_weights_node(writer, no_init, visited);
            gains.push(self.nodes[writer.0].layer.gain());
        }
        self.nodes[id.0].layer.on_layer_connect(&gains, no_init);
    }
}

fn describe_buffers(buffers: &[SharedBuffer]) -> String {
    buffers
        .iter()
        .map(|buffer| buffer.borrow().data().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
