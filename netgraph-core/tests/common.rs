// Shared helpers for integration tests. Not every test crate uses all of them.
#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::io::{Read, Write};
use std::rc::Rc;

use rand::rngs::StdRng;
use rand::SeedableRng;

use netgraph_core::init::{normal_, xavier_uniform_};
use netgraph_core::{
    Buffer, Datum, Layer, LayerCapabilities, LossFunction, NetGraphError, NetStatus, SharedBuffer,
    StatisticsLayer, Tensor, TrainingLayer,
};

/// Shared log of layer calls, e.g. `"ff:A"`, `"bp:A"`, `"connect:A:[5]:false"`.
pub type Trace = Rc<RefCell<Vec<String>>>;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn new_trace() -> Trace {
    Rc::new(RefCell::new(Vec::new()))
}

pub fn count(trace: &Trace, entry: &str) -> usize {
    trace.borrow().iter().filter(|e| e.as_str() == entry).count()
}

pub fn position(trace: &Trace, entry: &str) -> Option<usize> {
    trace.borrow().iter().position(|e| e == entry)
}

/// Instrumented layer: sums its inputs, multiplies by an optional scalar
/// weight and copies the result to every output.
#[derive(Debug)]
pub struct MockLayer {
    label: String,
    trace: Trace,
    weight: Option<Datum>,
    learning_rate: Datum,
    gain: usize,
    capabilities: LayerCapabilities,
    declared_outputs: usize,
    created_outputs: Option<usize>,
    dynamic_outputs: bool,
    outputs_to_gpu: bool,
    backprop_enabled: bool,
    init_seed: Option<u64>,
    init_std: Option<Datum>,
    inputs: Vec<SharedBuffer>,
    outputs: Vec<SharedBuffer>,
    parameters: Vec<SharedBuffer>,
}

impl MockLayer {
    pub fn new(label: &str, trace: &Trace) -> Self {
        MockLayer {
            label: label.to_string(),
            trace: Rc::clone(trace),
            weight: None,
            learning_rate: 1.0,
            gain: 1,
            capabilities: LayerCapabilities::default(),
            declared_outputs: 1,
            created_outputs: None,
            dynamic_outputs: false,
            outputs_to_gpu: false,
            backprop_enabled: false,
            init_seed: None,
            init_std: None,
            inputs: Vec::new(),
            outputs: Vec::new(),
            parameters: Vec::new(),
        }
    }

    /// Re-draws the weight with Xavier initialization when weights are initialized.
    pub fn with_xavier_init(mut self, seed: u64) -> Self {
        self.init_seed = Some(seed);
        self
    }

    /// Re-draws the weight from `N(0, std^2)` instead.
    pub fn with_normal_init(mut self, seed: u64, std: Datum) -> Self {
        self.init_seed = Some(seed);
        self.init_std = Some(std);
        self
    }

    pub fn with_weight(mut self, weight: Datum) -> Self {
        self.weight = Some(weight);
        self
    }

    pub fn with_learning_rate(mut self, learning_rate: Datum) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    pub fn with_gain(mut self, gain: usize) -> Self {
        self.gain = gain;
        self
    }

    pub fn with_capabilities(mut self, capabilities: LayerCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_outputs(mut self, count: usize) -> Self {
        self.declared_outputs = count;
        self
    }

    /// Declares the usual slots but hands back `count` buffers.
    pub fn creating_outputs(mut self, count: usize) -> Self {
        self.created_outputs = Some(count);
        self
    }

    pub fn with_dynamic_outputs(mut self) -> Self {
        self.dynamic_outputs = true;
        self
    }

    /// Leaves its output data on the accelerator after each forward pass.
    pub fn moving_outputs_to_gpu(mut self) -> Self {
        self.outputs_to_gpu = true;
        self
    }

    fn weight_value(&self) -> Result<Datum, NetGraphError> {
        match self.parameters.first() {
            Some(weight) => Ok(weight.borrow().data().values()?[0]),
            None => Ok(1.0),
        }
    }

    fn summed_inputs(&self) -> Result<Vec<Datum>, NetGraphError> {
        let mut sum: Vec<Datum> = Vec::new();
        for input in &self.inputs {
            let input = input.borrow();
            let values = input.data().values()?;
            if sum.is_empty() {
                sum = values.to_vec();
            } else {
                sum.iter_mut().zip(values).for_each(|(s, v)| *s += *v);
            }
        }
        Ok(sum)
    }
}

impl Layer for MockLayer {
    fn description(&self) -> String {
        format!("Mock {}", self.label)
    }

    fn output_descriptors(&self) -> Vec<String> {
        if self.declared_outputs == 1 {
            vec!["Output".to_string()]
        } else {
            (0..self.declared_outputs).map(|i| format!("Output{}", i)).collect()
        }
    }

    fn create_outputs(&mut self, inputs: &[SharedBuffer]) -> Result<Vec<SharedBuffer>, NetGraphError> {
        let [samples, width, height, maps] = match inputs.first() {
            Some(input) => input.borrow().shape(),
            None => [1, 2, 1, 1],
        };
        let count = self.created_outputs.unwrap_or(self.declared_outputs);
        Ok((0..count)
            .map(|_| {
                let buffer = Buffer::new(samples, width, height, maps);
                let buffer = if self.dynamic_outputs { buffer.dynamic() } else { buffer };
                buffer.into_shared()
            })
            .collect())
    }

    fn connect(
        &mut self,
        inputs: &[SharedBuffer],
        outputs: &[SharedBuffer],
        _status: &NetStatus,
    ) -> Result<(), NetGraphError> {
        self.inputs = inputs.to_vec();
        self.outputs = outputs.to_vec();
        if let Some(weight) = self.weight {
            let tensor = Tensor::from_vec(vec![weight], 1, 1, 1, 1)?;
            self.parameters = vec![Buffer::from_tensor(&tensor)?.into_shared()];
        }
        Ok(())
    }

    fn feed_forward(&mut self, _status: &NetStatus) -> Result<(), NetGraphError> {
        self.trace.borrow_mut().push(format!("ff:{}", self.label));
        let weight = self.weight_value()?;
        let sum = self.summed_inputs()?;
        if !sum.is_empty() {
            for output in &self.outputs {
                let mut output = output.borrow_mut();
                for (o, s) in output.data_mut().values_mut()?.iter_mut().zip(&sum) {
                    *o = *s * weight;
                }
            }
        }
        if self.outputs_to_gpu {
            for output in &self.outputs {
                output.borrow_mut().data_mut().move_to_gpu();
            }
        }
        Ok(())
    }

    fn back_propagate(&mut self, _status: &NetStatus) -> Result<(), NetGraphError> {
        self.trace.borrow_mut().push(format!("bp:{}", self.label));
        let mut output_delta: Vec<Datum> = Vec::new();
        for output in &self.outputs {
            let output = output.borrow();
            let delta = output.delta().values()?;
            if output_delta.is_empty() {
                output_delta = delta.to_vec();
            } else {
                output_delta.iter_mut().zip(delta).for_each(|(s, d)| *s += *d);
            }
        }

        let weight = self.weight_value()?;
        if let Some(parameter) = self.parameters.first() {
            let sum = self.summed_inputs()?;
            let gradient: Datum = sum.iter().zip(&output_delta).map(|(x, d)| x * d).sum();
            parameter.borrow_mut().delta_mut().values_mut()?[0] += gradient;
        }
        if self.backprop_enabled {
            for input in &self.inputs {
                let mut input = input.borrow_mut();
                for (d, g) in input.delta_mut().values_mut()?.iter_mut().zip(&output_delta) {
                    *d = *g * weight;
                }
            }
        }
        Ok(())
    }

    fn parameters(&self) -> &[SharedBuffer] {
        &self.parameters
    }

    fn local_learning_rate(&self) -> Datum {
        self.learning_rate
    }

    fn set_backprop_enabled(&mut self, enabled: bool) {
        self.backprop_enabled = enabled;
    }

    fn capabilities(&self) -> LayerCapabilities {
        self.capabilities
    }

    fn gain(&self) -> usize {
        self.gain
    }

    fn on_layer_connect(&mut self, next_layer_gains: &[usize], no_init: bool) {
        self.trace
            .borrow_mut()
            .push(format!("connect:{}:{:?}:{}", self.label, next_layer_gains, no_init));
        if no_init {
            return;
        }
        if let (Some(seed), Some(parameter)) = (self.init_seed, self.parameters.first()) {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut parameter = parameter.borrow_mut();
            let weight = parameter.data_mut();
            let drawn = match self.init_std {
                Some(std) => normal_(weight, 0.0, std, &mut rng),
                None => xavier_uniform_(weight, self.gain, next_layer_gains.iter().sum(), &mut rng),
            };
            drawn.expect("weight lives on the CPU");
        }
    }
}

/// `0.5 * sum(x^2)` over its single input; the gradient is `x`.
#[derive(Debug, Default)]
pub struct SquaredLossLayer {
    input: Option<SharedBuffer>,
    backprop_enabled: bool,
}

impl Layer for SquaredLossLayer {
    fn description(&self) -> String {
        "Squared Loss".to_string()
    }

    fn output_descriptors(&self) -> Vec<String> {
        Vec::new()
    }

    fn create_outputs(&mut self, inputs: &[SharedBuffer]) -> Result<Vec<SharedBuffer>, NetGraphError> {
        if inputs.len() != 1 {
            return Err(NetGraphError::LayerRejectedOutputs {
                layer: self.description(),
                reason: "needs exactly one input".to_string(),
            });
        }
        Ok(Vec::new())
    }

    fn connect(
        &mut self,
        inputs: &[SharedBuffer],
        _outputs: &[SharedBuffer],
        _status: &NetStatus,
    ) -> Result<(), NetGraphError> {
        self.input = inputs.first().cloned();
        Ok(())
    }

    fn feed_forward(&mut self, _status: &NetStatus) -> Result<(), NetGraphError> {
        Ok(())
    }

    fn back_propagate(&mut self, _status: &NetStatus) -> Result<(), NetGraphError> {
        if !self.backprop_enabled {
            return Ok(());
        }
        if let Some(input) = &self.input {
            let mut input = input.borrow_mut();
            let (data, delta) = input.data_and_delta_mut();
            delta.values_mut()?.copy_from_slice(data.values()?);
        }
        Ok(())
    }

    fn set_backprop_enabled(&mut self, enabled: bool) {
        self.backprop_enabled = enabled;
    }

    fn capabilities(&self) -> LayerCapabilities {
        LayerCapabilities {
            loss: true,
            ..LayerCapabilities::default()
        }
    }

    fn as_loss_function_mut(&mut self) -> Option<&mut dyn LossFunction> {
        Some(self)
    }
}

impl LossFunction for SquaredLossLayer {
    fn calculate_loss_function(&mut self) -> Result<Datum, NetGraphError> {
        match &self.input {
            Some(input) => Ok(input.borrow().data().values()?.iter().map(|x| 0.5 * x * x).sum()),
            None => Ok(0.0),
        }
    }
}

/// Statistics sink whose switch is observable from the test.
#[derive(Debug)]
pub struct CountingStatLayer {
    pub disabled: Rc<Cell<bool>>,
    pub updates: Rc<Cell<usize>>,
}

impl CountingStatLayer {
    pub fn new() -> Self {
        CountingStatLayer {
            disabled: Rc::new(Cell::new(false)),
            updates: Rc::new(Cell::new(0)),
        }
    }
}

impl Layer for CountingStatLayer {
    fn description(&self) -> String {
        "Counting Statistics".to_string()
    }

    fn output_descriptors(&self) -> Vec<String> {
        Vec::new()
    }

    fn create_outputs(&mut self, _inputs: &[SharedBuffer]) -> Result<Vec<SharedBuffer>, NetGraphError> {
        Ok(Vec::new())
    }

    fn connect(
        &mut self,
        _inputs: &[SharedBuffer],
        _outputs: &[SharedBuffer],
        _status: &NetStatus,
    ) -> Result<(), NetGraphError> {
        Ok(())
    }

    fn feed_forward(&mut self, _status: &NetStatus) -> Result<(), NetGraphError> {
        self.update_all();
        Ok(())
    }

    fn back_propagate(&mut self, _status: &NetStatus) -> Result<(), NetGraphError> {
        Ok(())
    }

    fn capabilities(&self) -> LayerCapabilities {
        LayerCapabilities {
            statistics: true,
            ..LayerCapabilities::default()
        }
    }

    fn as_statistics_mut(&mut self) -> Option<&mut dyn StatisticsLayer> {
        Some(self)
    }
}

impl StatisticsLayer for CountingStatLayer {
    fn update_all(&mut self) {
        if !self.disabled.get() {
            self.updates.set(self.updates.get() + 1);
        }
    }

    fn report(&self, prefix: &str, _training: bool) -> String {
        format!("{} updates: {}", prefix, self.updates.get())
    }

    fn reset(&mut self) {
        self.updates.set(0);
    }

    fn set_disabled(&mut self, disabled: bool) {
        self.disabled.set(disabled);
    }
}

/// Input node supplying fixed training and testing batches.
#[derive(Debug)]
pub struct BatchSupplyLayer {
    pub testing: Rc<Cell<bool>>,
    training_batch: Tensor,
    testing_batch: Tensor,
    output: Option<SharedBuffer>,
}

impl BatchSupplyLayer {
    pub fn new(training_batch: Tensor, testing_batch: Tensor) -> Self {
        BatchSupplyLayer {
            testing: Rc::new(Cell::new(false)),
            training_batch,
            testing_batch,
            output: None,
        }
    }
}

impl Layer for BatchSupplyLayer {
    fn description(&self) -> String {
        "Batch Supply".to_string()
    }

    fn create_outputs(&mut self, _inputs: &[SharedBuffer]) -> Result<Vec<SharedBuffer>, NetGraphError> {
        Ok(vec![Buffer::from_tensor(&self.training_batch)?.into_shared()])
    }

    fn connect(
        &mut self,
        _inputs: &[SharedBuffer],
        outputs: &[SharedBuffer],
        _status: &NetStatus,
    ) -> Result<(), NetGraphError> {
        self.output = outputs.first().cloned();
        Ok(())
    }

    fn feed_forward(&mut self, _status: &NetStatus) -> Result<(), NetGraphError> {
        self.select_and_load_samples()
    }

    fn back_propagate(&mut self, _status: &NetStatus) -> Result<(), NetGraphError> {
        Ok(())
    }

    fn capabilities(&self) -> LayerCapabilities {
        LayerCapabilities {
            training_supply: true,
            ..LayerCapabilities::default()
        }
    }

    fn as_training_mut(&mut self) -> Option<&mut dyn TrainingLayer> {
        Some(self)
    }
}

impl TrainingLayer for BatchSupplyLayer {
    fn set_testing_mode(&mut self, testing: bool) {
        self.testing.set(testing);
    }

    fn samples_in_training_set(&self) -> usize {
        self.training_batch.samples()
    }

    fn samples_in_testing_set(&self) -> usize {
        self.testing_batch.samples()
    }

    fn batch_size(&self) -> usize {
        self.training_batch.samples()
    }

    fn select_and_load_samples(&mut self) -> Result<(), NetGraphError> {
        let batch = if self.testing.get() {
            &self.testing_batch
        } else {
            &self.training_batch
        };
        if let Some(output) = &self.output {
            output.borrow_mut().data_mut().copy_from(batch)?;
        }
        Ok(())
    }
}

/// Owns one weight vector whose length is data dependent; the length travels
/// in the record metadata.
#[derive(Debug)]
pub struct ClassWeightsLayer {
    classes: usize,
    initial: Vec<Datum>,
    parameters: Vec<SharedBuffer>,
    pub received_metadata: Rc<RefCell<Vec<u8>>>,
}

impl ClassWeightsLayer {
    pub fn new(initial: Vec<Datum>) -> Self {
        ClassWeightsLayer {
            classes: initial.len(),
            initial,
            parameters: Vec::new(),
            received_metadata: Rc::new(RefCell::new(Vec::new())),
        }
    }
}

impl Layer for ClassWeightsLayer {
    fn description(&self) -> String {
        format!("Class Weights ({} classes)", self.classes)
    }

    fn create_outputs(&mut self, inputs: &[SharedBuffer]) -> Result<Vec<SharedBuffer>, NetGraphError> {
        let [samples, width, height, maps] = match inputs.first() {
            Some(input) => input.borrow().shape(),
            None => [1, 1, 1, 1],
        };
        Ok(vec![Buffer::new(samples, width, height, maps).into_shared()])
    }

    fn connect(
        &mut self,
        _inputs: &[SharedBuffer],
        _outputs: &[SharedBuffer],
        _status: &NetStatus,
    ) -> Result<(), NetGraphError> {
        let tensor = Tensor::from_vec(self.initial.clone(), 1, self.classes, 1, 1)?;
        self.parameters = vec![Buffer::from_tensor(&tensor)?.into_shared()];
        Ok(())
    }

    fn feed_forward(&mut self, _status: &NetStatus) -> Result<(), NetGraphError> {
        Ok(())
    }

    fn back_propagate(&mut self, _status: &NetStatus) -> Result<(), NetGraphError> {
        Ok(())
    }

    fn parameters(&self) -> &[SharedBuffer] {
        &self.parameters
    }

    fn capabilities(&self) -> LayerCapabilities {
        LayerCapabilities {
            serialization_aware: true,
            ..LayerCapabilities::default()
        }
    }

    fn parameter_metadata(&self) -> Vec<u8> {
        (self.classes as u32).to_le_bytes().to_vec()
    }

    fn serialize_parameters(&mut self, output: &mut dyn Write) -> Result<(), NetGraphError> {
        for parameter in &self.parameters {
            parameter.borrow_mut().data_mut().serialize(output)?;
        }
        Ok(())
    }

    fn deserialize_parameters(
        &mut self,
        metadata: &[u8],
        parameter_count: usize,
        input: &mut dyn Read,
    ) -> Result<(), NetGraphError> {
        *self.received_metadata.borrow_mut() = metadata.to_vec();
        if metadata.len() != 4 || parameter_count != 1 {
            return Err(NetGraphError::MalformedParameterStream(
                "class weights record needs a class count and one buffer".to_string(),
            ));
        }
        let mut raw = [0u8; 4];
        raw.copy_from_slice(metadata);
        self.classes = u32::from_le_bytes(raw) as usize;
        self.parameters[0].borrow_mut().deserialize_data(input)
    }
}
