use std::cell::RefCell;
use std::rc::Rc;

use log::debug;

use crate::buffer::{Buffer, SharedBuffer};
use crate::error::NetGraphError;
use crate::layer::Layer;
use crate::status::NetStatus;
use crate::tensor::Tensor;

type Sources = Rc<RefCell<Vec<(String, Tensor)>>>;

/// Handle for replacing the tensors an `InputLayer` publishes, usable after
/// the layer has been moved into a graph.
#[derive(Debug, Clone)]
pub struct InputFeeder {
    sources: Sources,
}

impl InputFeeder {
    /// Replaces the values of output `index`. The shape must not change.
    pub fn set_source(&self, index: usize, tensor: Tensor) -> Result<(), NetGraphError> {
        let mut sources = self.sources.borrow_mut();
        let slot_count = sources.len();
        let (_, source) = sources.get_mut(index).ok_or_else(|| {
            NetGraphError::InvalidConfiguration {
                field: format!("source {}", index),
                expected: format!("index below {}", slot_count),
            }
        })?;
        if source.shape() != tensor.shape() {
            return Err(NetGraphError::ShapeMismatch {
                expected: source.shape().to_vec(),
                actual: tensor.shape().to_vec(),
                operation: "InputFeeder::set_source".to_string(),
            });
        }
        *source = tensor;
        Ok(())
    }
}

/// Exposes user-provided tensors as output buffers of an input node.
///
/// Each source tensor becomes one output slot. Every forward pass copies the
/// current sources into the outputs.
#[derive(Debug)]
pub struct InputLayer {
    sources: Sources,
    outputs: Vec<SharedBuffer>,
}

impl InputLayer {
    /// A single `"Data"` output.
    pub fn new(data: Tensor) -> Self {
        Self::with_outputs(vec![("Data".to_string(), data)])
    }

    /// One output per `(description, tensor)` pair.
    pub fn with_outputs(sources: Vec<(String, Tensor)>) -> Self {
        debug!("InputLayer: instance created with {} outputs", sources.len());
        InputLayer {
            sources: Rc::new(RefCell::new(sources)),
            outputs: Vec::new(),
        }
    }

    pub fn feeder(&self) -> InputFeeder {
        InputFeeder {
            sources: Rc::clone(&self.sources),
        }
    }

    pub fn set_source(&mut self, index: usize, tensor: Tensor) -> Result<(), NetGraphError> {
        self.feeder().set_source(index, tensor)
    }
}

impl Layer for InputLayer {
    fn description(&self) -> String {
        "Input Layer".to_string()
    }

    fn output_descriptors(&self) -> Vec<String> {
        self.sources.borrow().iter().map(|(name, _)| name.clone()).collect()
    }

    fn create_outputs(&mut self, inputs: &[SharedBuffer]) -> Result<Vec<SharedBuffer>, NetGraphError> {
        if !inputs.is_empty() {
            return Err(NetGraphError::LayerRejectedOutputs {
                layer: self.description(),
                reason: "input layer cannot have inputs".to_string(),
            });
        }
        self.sources
            .borrow()
            .iter()
            .map(|(_, tensor)| Buffer::from_tensor(tensor).map(Buffer::into_shared))
            .collect()
    }

    fn connect(
        &mut self,
        inputs: &[SharedBuffer],
        outputs: &[SharedBuffer],
        _status: &NetStatus,
    ) -> Result<(), NetGraphError> {
        let source_count = self.sources.borrow().len();
        if !inputs.is_empty() || outputs.len() != source_count {
            return Err(NetGraphError::LayerRejectedConnection {
                layer: self.description(),
                reason: format!(
                    "expected 0 inputs and {} outputs, got {} and {}",
                    source_count,
                    inputs.len(),
                    outputs.len()
                ),
            });
        }
        self.outputs = outputs.to_vec();
        Ok(())
    }

    fn feed_forward(&mut self, _status: &NetStatus) -> Result<(), NetGraphError> {
        let sources = self.sources.borrow();
        for ((_, source), output) in sources.iter().zip(&self.outputs) {
            output.borrow_mut().data_mut().copy_from(source)?;
        }
        Ok(())
    }

    fn back_propagate(&mut self, _status: &NetStatus) -> Result<(), NetGraphError> {
        Ok(())
    }
}
