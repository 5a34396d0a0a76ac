use std::fmt::Debug;
use std::io::{Read, Write};

use crate::buffer::SharedBuffer;
use crate::error::NetGraphError;
use crate::status::NetStatus;
use crate::tensor::Datum;

/// Capability flags a layer reports about itself.
///
/// They are queried once when a node is constructed and cached there; the
/// graph never inspects concrete layer types.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LayerCapabilities {
    /// The layer works on accelerator-resident buffers. When false, the graph
    /// stages every input and output buffer to the CPU before each call.
    pub accelerator_aware: bool,
    /// The layer copes with inputs whose shape changes between passes.
    pub dynamic_tensor_aware: bool,
    /// Parameter state is written and read by the layer itself.
    pub serialization_aware: bool,
    /// Numeric gradient checks should skip this layer.
    pub gradient_check_exempt: bool,
    /// The layer sums any number of gradient writers per output on its own.
    pub accumulates_gradients: bool,
    /// `as_loss_function_mut` returns `Some`.
    pub loss: bool,
    /// `as_statistics_mut` returns `Some`.
    pub statistics: bool,
    /// `as_training_mut` returns `Some`.
    pub training_supply: bool,
}

/// Layers that compute a scalar loss after a forward pass.
pub trait LossFunction {
    fn calculate_loss_function(&mut self) -> Result<Datum, NetGraphError>;
}

/// Layers that collect statistics over passes.
pub trait StatisticsLayer {
    fn update_all(&mut self);
    /// Human-readable summary, prefixed with `prefix`.
    fn report(&self, prefix: &str, training: bool) -> String;
    fn reset(&mut self);
    fn set_disabled(&mut self, disabled: bool);
}

/// Layers that supply training data to the graph.
pub trait TrainingLayer {
    /// `true` switches to testing samples, `false` back to training samples.
    fn set_testing_mode(&mut self, testing: bool);
    fn samples_in_training_set(&self) -> usize;
    fn samples_in_testing_set(&self) -> usize;
    fn batch_size(&self) -> usize;
    /// Loads the next batch into the layer's output buffers.
    fn select_and_load_samples(&mut self) -> Result<(), NetGraphError>;
}

/// The contract every computational unit of a graph implements.
///
/// A layer is bound once to concrete buffers (`create_outputs`, then
/// `connect`) and afterwards only receives `feed_forward` / `back_propagate`
/// calls. Gradients are supplied by the layer itself; the graph only decides
/// when each call happens.
pub trait Layer: Debug {
    /// Short label used in logs and in the DOT export.
    fn description(&self) -> String {
        "Layer".to_string()
    }

    /// Descriptions of the output slots, queried once when the node is built.
    fn output_descriptors(&self) -> Vec<String> {
        vec!["Output".to_string()]
    }

    /// Allocates the output buffers for the given inputs, inferring shapes.
    ///
    /// Must not mutate the inputs. An error means the inputs are not
    /// compatible with this layer.
    fn create_outputs(&mut self, inputs: &[SharedBuffer]) -> Result<Vec<SharedBuffer>, NetGraphError>;

    /// Binds the layer to the buffers it will operate on in every later pass
    /// and allocates its parameter buffers.
    fn connect(
        &mut self,
        inputs: &[SharedBuffer],
        outputs: &[SharedBuffer],
        status: &NetStatus,
    ) -> Result<(), NetGraphError>;

    /// Reads input data, writes output data. Must not read gradients.
    fn feed_forward(&mut self, status: &NetStatus) -> Result<(), NetGraphError>;

    /// Reads output gradients and input data; writes parameter gradients and,
    /// when backpropagation is enabled, input gradients.
    fn back_propagate(&mut self, status: &NetStatus) -> Result<(), NetGraphError>;

    /// Learnable parameter buffers, in a stable order.
    fn parameters(&self) -> &[SharedBuffer] {
        &[]
    }

    /// Scales the optimizer's step for this layer. Zero freezes it.
    fn local_learning_rate(&self) -> Datum {
        1.0
    }

    /// Set by the graph right before `back_propagate`. When `false` no input
    /// connection wants a gradient, so input gradients may be skipped.
    fn set_backprop_enabled(&mut self, _enabled: bool) {}

    fn capabilities(&self) -> LayerCapabilities {
        LayerCapabilities::default()
    }

    /// Fan-in reported to upstream layers for weight initialization.
    fn gain(&self) -> usize {
        0
    }

    /// Called during `NetGraph::initialize_weights` with the gains of every
    /// layer consuming this one's outputs.
    fn on_layer_connect(&mut self, _next_layer_gains: &[usize], _no_init: bool) {}

    /// Metadata stored in front of the parameter payload (extended format).
    /// Only consulted for serialization-aware layers.
    fn parameter_metadata(&self) -> Vec<u8> {
        Vec::new()
    }

    /// Writes the parameter payload: exactly `parameters().len()` tensor
    /// dumps, so readers that do not know this layer can still skip it.
    fn serialize_parameters(&mut self, output: &mut dyn Write) -> Result<(), NetGraphError> {
        for parameter in self.parameters() {
            parameter.borrow_mut().data_mut().serialize(output)?;
        }
        Ok(())
    }

    /// Reads a payload written by `serialize_parameters`. Only called for
    /// serialization-aware layers, which must consume exactly
    /// `parameter_count` tensor dumps.
    fn deserialize_parameters(
        &mut self,
        _metadata: &[u8],
        _parameter_count: usize,
        _input: &mut dyn Read,
    ) -> Result<(), NetGraphError> {
        Err(NetGraphError::MalformedParameterStream(format!(
            "layer '{}' does not implement self-deserialization",
            self.description()
        )))
    }

    fn as_loss_function_mut(&mut self) -> Option<&mut dyn LossFunction> {
        None
    }

    fn as_statistics_mut(&mut self) -> Option<&mut dyn StatisticsLayer> {
        None
    }

    fn as_training_mut(&mut self) -> Option<&mut dyn TrainingLayer> {
        None
    }
}
