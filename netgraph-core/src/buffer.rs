use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::io::Read;
use std::rc::Rc;

use crate::error::NetGraphError;
use crate::tensor::Tensor;

/// Per-sample side-channel records (e.g. variable-length label structures).
///
/// The producing node holds the owning handle; consumers receive clones of the
/// `Rc` and never drop the records themselves.
pub type Metadata = Rc<RefCell<Vec<Option<Box<dyn Any>>>>>;

/// A buffer shared between its producing node and every consumer.
pub type SharedBuffer = Rc<RefCell<Buffer>>;

/// Paired data/gradient container flowing along graph edges.
///
/// `data` and `delta` always have the same shape. The only ways to change a
/// shape are `resize` and `deserialize_data`, both of which move the two
/// tensors in lockstep.
pub struct Buffer {
    data: Tensor,
    delta: Tensor,
    metadata: Option<Metadata>,
    is_dynamic: bool,
}

impl Buffer {
    /// Creates a zeroed buffer. Unused spatial dimensions should be 1.
    pub fn new(samples: usize, width: usize, height: usize, maps: usize) -> Self {
        Buffer {
            data: Tensor::new(samples, width, height, maps),
            delta: Tensor::new(samples, width, height, maps),
            metadata: None,
            is_dynamic: false,
        }
    }

    /// Creates a buffer with the same shape as `tensor`, holding a copy of its
    /// values as data.
    pub fn from_tensor(tensor: &Tensor) -> Result<Self, NetGraphError> {
        let mut buffer = Buffer::new(tensor.samples(), tensor.width(), tensor.height(), tensor.maps());
        buffer.data.copy_from(tensor)?;
        Ok(buffer)
    }

    /// Attaches side-channel records produced by the owning node.
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Flags the buffer's shape as changing between passes.
    pub fn dynamic(mut self) -> Self {
        self.is_dynamic = true;
        self
    }

    pub fn into_shared(self) -> SharedBuffer {
        Rc::new(RefCell::new(self))
    }

    pub fn data(&self) -> &Tensor {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut Tensor {
        &mut self.data
    }

    pub fn delta(&self) -> &Tensor {
        &self.delta
    }

    pub fn delta_mut(&mut self) -> &mut Tensor {
        &mut self.delta
    }

    /// Splits the borrow so a layer can read data while writing the gradient.
    pub fn data_and_delta_mut(&mut self) -> (&Tensor, &mut Tensor) {
        (&self.data, &mut self.delta)
    }

    pub fn metadata(&self) -> Option<&Metadata> {
        self.metadata.as_ref()
    }

    pub fn is_dynamic(&self) -> bool {
        self.is_dynamic
    }

    pub fn set_dynamic(&mut self, is_dynamic: bool) {
        self.is_dynamic = is_dynamic;
    }

    /// `[samples, width, height, maps]` of both tensors.
    pub fn shape(&self) -> [usize; 4] {
        self.data.shape()
    }

    /// Resizes data and gradient together.
    pub fn resize(&mut self, samples: usize, width: usize, height: usize, maps: usize) {
        self.data.resize(samples, width, height, maps);
        self.delta.resize(samples, width, height, maps);
    }

    /// Stages both tensors to host memory.
    pub fn move_to_cpu(&mut self) {
        self.data.move_to_cpu();
        self.delta.move_to_cpu();
    }

    /// Reads a tensor dump into `data`; the gradient follows the new shape.
    pub fn deserialize_data(&mut self, input: &mut dyn Read) -> Result<(), NetGraphError> {
        self.data.deserialize(input)?;
        let [samples, width, height, maps] = self.data.shape();
        self.delta.move_to_cpu();
        self.delta.resize(samples, width, height, maps);
        Ok(())
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("shape", &self.data.to_string())
            .field("data_device", &self.data.device())
            .field("delta_device", &self.delta.device())
            .field("has_metadata", &self.metadata.is_some())
            .field("is_dynamic", &self.is_dynamic)
            .finish()
    }
}
