use std::rc::Rc;

use log::debug;

use crate::buffer::{Buffer, SharedBuffer};
use crate::config::LayerConfig;
use crate::error::NetGraphError;
use crate::layer::{Layer, LayerCapabilities};
use crate::status::NetStatus;

/// Fans one buffer out to `output_count` consumers and sums their gradients.
///
/// Inserted by `NetGraph::initialize` in front of every output slot that has
/// more than one gradient writer. Each output carries a copy of the input's
/// data; the input's gradient is the element-wise sum of all output gradients.
#[derive(Debug)]
pub struct GradientAccumulationLayer {
    output_count: usize,
    input: Option<SharedBuffer>,
    outputs: Vec<SharedBuffer>,
}

impl GradientAccumulationLayer {
    pub fn new(output_count: usize) -> Self {
        debug!("GradientAccumulationLayer: instance created with {} outputs", output_count);
        GradientAccumulationLayer {
            output_count,
            input: None,
            outputs: Vec::new(),
        }
    }

    /// Builds the layer from a configuration with an `outputs` field.
    pub fn from_config(config: &LayerConfig) -> Result<Self, NetGraphError> {
        let output_count = config.require_unsigned("outputs")?;
        Ok(Self::new(output_count))
    }

    pub fn output_count(&self) -> usize {
        self.output_count
    }

    fn reject(&self, reason: &str) -> NetGraphError {
        NetGraphError::LayerRejectedConnection {
            layer: self.description(),
            reason: reason.to_string(),
        }
    }
}

impl Layer for GradientAccumulationLayer {
    fn description(&self) -> String {
        format!("Gradient Accumulation ({} outputs)", self.output_count)
    }

    fn output_descriptors(&self) -> Vec<String> {
        (0..self.output_count).map(|i| format!("Output{}", i)).collect()
    }

    fn create_outputs(&mut self, inputs: &[SharedBuffer]) -> Result<Vec<SharedBuffer>, NetGraphError> {
        if inputs.len() != 1 {
            return Err(NetGraphError::LayerRejectedOutputs {
                layer: self.description(),
                reason: format!("needs exactly one input, got {}", inputs.len()),
            });
        }
        let input = inputs[0].borrow();
        let [samples, width, height, maps] = input.shape();
        let mut outputs = Vec::with_capacity(self.output_count);
        for _ in 0..self.output_count {
            let mut output = Buffer::new(samples, width, height, maps);
            output.set_dynamic(input.is_dynamic());
            if let Some(metadata) = input.metadata() {
                output = output.with_metadata(Rc::clone(metadata));
            }
            outputs.push(output.into_shared());
        }
        Ok(outputs)
    }

    fn connect(
        &mut self,
        inputs: &[SharedBuffer],
        outputs: &[SharedBuffer],
        _status: &NetStatus,
    ) -> Result<(), NetGraphError> {
        if inputs.len() != 1 {
            return Err(self.reject("needs exactly one input"));
        }
        if outputs.len() != self.output_count {
            return Err(self.reject("wrong number of outputs"));
        }
        let input_shape = inputs[0].borrow().shape();
        for output in outputs {
            let output_shape = output.borrow().shape();
            if output_shape[0] != input_shape[0] {
                return Err(self.reject("sample count doesn't match"));
            }
            if output_shape != input_shape {
                return Err(NetGraphError::ShapeMismatch {
                    expected: input_shape.to_vec(),
                    actual: output_shape.to_vec(),
                    operation: "GradientAccumulationLayer::connect".to_string(),
                });
            }
        }
        self.input = Some(Rc::clone(&inputs[0]));
        self.outputs = outputs.to_vec();
        Ok(())
    }

    fn feed_forward(&mut self, _status: &NetStatus) -> Result<(), NetGraphError> {
        let input = match &self.input {
            Some(input) => input.borrow(),
            None => return Err(self.reject("feed_forward before connect")),
        };
        let [samples, width, height, maps] = input.shape();
        for output in &self.outputs {
            let mut output = output.borrow_mut();
            if output.shape() != input.shape() {
                output.resize(samples, width, height, maps);
            }
            output.data_mut().copy_from(input.data())?;
        }
        Ok(())
    }

    fn back_propagate(&mut self, _status: &NetStatus) -> Result<(), NetGraphError> {
        let input = match &self.input {
            Some(input) => input,
            None => return Err(self.reject("back_propagate before connect")),
        };
        let mut input = input.borrow_mut();
        let sum = input.delta_mut().values_mut()?;
        sum.iter_mut().for_each(|v| *v = 0.0);
        for output in &self.outputs {
            let output = output.borrow();
            let delta = output.delta().values()?;
            if delta.len() != sum.len() {
                return Err(NetGraphError::ShapeMismatch {
                    expected: vec![sum.len()],
                    actual: vec![delta.len()],
                    operation: "GradientAccumulationLayer::back_propagate".to_string(),
                });
            }
            for (acc, d) in sum.iter_mut().zip(delta) {
                *acc += *d;
            }
        }
        Ok(())
    }

    fn capabilities(&self) -> LayerCapabilities {
        LayerCapabilities {
            dynamic_tensor_aware: true,
            gradient_check_exempt: true,
            accumulates_gradients: true,
            ..LayerCapabilities::default()
        }
    }
}
