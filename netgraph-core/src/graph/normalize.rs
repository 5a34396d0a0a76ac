use std::collections::VecDeque;

use log::info;

use super::net_graph::NetGraph;
use super::node::{BackpropConnection, Connection, NetGraphNode, NodeId};
use crate::error::NetGraphError;
use crate::layers::GradientAccumulationLayer;

impl NetGraph {
    /// Rewrites the graph so that no output slot has more than one gradient
    /// writer, unless its layer sums gradients by itself.
    ///
    /// Every violating `(node, slot)` gets a `GradientAccumulationLayer` node
    /// in between: it reads the slot, publishes one copy per former consumer
    /// and sums their gradients back into the slot.
    ///
    /// The single-writer invariant holds per output slot: a multi-output node
    /// keeps one backward record per consumed slot.
    pub(crate) fn normalize_fan_out(&mut self) -> Result<(), NetGraphError> {
        let mut worklist: VecDeque<(NodeId, usize)> = VecDeque::new();
        for id in self.node_ids() {
            for slot in 0..self.nodes[id.0].output_buffers.len() {
                if self.needs_accumulation(id, slot) {
                    worklist.push_back((id, slot));
                }
            }
        }

        while let Some((source, slot)) = worklist.pop_front() {
            if !self.needs_accumulation(source, slot) {
                continue;
            }
            let accumulation = self.insert_accumulation(source, slot)?;
            for accumulation_slot in 0..self.nodes[accumulation.0].output_buffers.len() {
                if self.needs_accumulation(accumulation, accumulation_slot) {
                    worklist.push_back((accumulation, accumulation_slot));
                }
            }
        }
        Ok(())
    }

    fn gradient_writers(&self, source: NodeId, slot: usize) -> Vec<BackpropConnection> {
        self.nodes[source.0]
            .backprop_connections
            .iter()
            .filter(|record| record.buffer == slot)
            .copied()
            .collect()
    }

    fn needs_accumulation(&self, source: NodeId, slot: usize) -> bool {
        !self.nodes[source.0].capabilities.accumulates_gradients
            && self.gradient_writers(source, slot).len() > 1
    }

    fn insert_accumulation(&mut self, source: NodeId, slot: usize) -> Result<NodeId, NetGraphError> {
        let writers = self.gradient_writers(source, slot);
        let node = NetGraphNode::new(GradientAccumulationLayer::new(writers.len()))
            .with_connection(Connection::with_buffer(source, slot));
        let accumulation = self.add_node(node)?;

        let source_name = self.nodes[source.0].unique_name.clone();
        for (output, writer) in writers.iter().enumerate() {
            let consumer = &mut self.nodes[writer.node.0];
            let consumer_name = consumer.unique_name.clone();
            let connection = consumer
                .input_connections
                .iter_mut()
                .find(|c| c.node == source && c.buffer == slot && c.backprop)
                .ok_or_else(|| NetGraphError::IncompleteGraph {
                    reason: format!(
                        "node {} has a backward record on {} without a matching connection",
                        consumer_name, source_name
                    ),
                })?;
            connection.node = accumulation;
            connection.buffer = output;
            self.nodes[accumulation.0]
                .backprop_connections
                .push(BackpropConnection {
                    node: writer.node,
                    buffer: output,
                });
        }

        self.nodes[source.0]
            .backprop_connections
            .retain(|record| record.buffer != slot || record.node == accumulation);

        info!(
            "Inserted gradient accumulation node {} for output {} of {} ({} writers)",
            self.nodes[accumulation.0].unique_name,
            slot,
            source_name,
            writers.len()
        );
        Ok(accumulation)
    }
}
