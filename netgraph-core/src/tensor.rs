// src/tensor.rs
use std::fmt;
use std::io::{self, Read, Write};

use crate::device::StorageDevice;
use crate::error::NetGraphError;

/// Numeric element type of every tensor in the engine.
pub type Datum = f32;

const DATUM_BYTES: usize = std::mem::size_of::<Datum>();
const READ_CHUNK: usize = 8 * 1024;

/// Reads exactly `length` bytes. The buffer grows with the data actually
/// received, so a corrupted length fails with `UnexpectedEof` instead of
/// allocating up front.
pub(crate) fn read_payload(input: &mut dyn Read, length: usize) -> Result<Vec<u8>, NetGraphError> {
    let mut bytes = Vec::with_capacity(length.min(READ_CHUNK));
    let mut chunk = [0u8; READ_CHUNK];
    while bytes.len() < length {
        let wanted = (length - bytes.len()).min(READ_CHUNK);
        match input.read(&mut chunk[..wanted]) {
            Ok(0) => {
                return Err(NetGraphError::Io {
                    kind: io::ErrorKind::UnexpectedEof,
                    message: format!("expected {} bytes, found {}", length, bytes.len()),
                })
            }
            Ok(read) => bytes.extend_from_slice(&chunk[..read]),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        }
    }
    Ok(bytes)
}

/// Dimensions of a serialized tensor dump, read ahead of its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TensorHeader {
    pub samples: usize,
    pub width: usize,
    pub height: usize,
    pub maps: usize,
}

impl TensorHeader {
    pub fn elements(&self) -> usize {
        self.samples * self.width * self.height * self.maps
    }

    /// Reads the four little-endian `u64` dimension fields of a dump.
    pub fn read_from(input: &mut dyn Read) -> Result<Self, NetGraphError> {
        let mut dims = [0usize; 4];
        for dim in dims.iter_mut() {
            let mut raw = [0u8; 8];
            input.read_exact(&mut raw)?;
            *dim = usize::try_from(u64::from_le_bytes(raw)).map_err(|_| {
                NetGraphError::MalformedParameterStream(
                    "tensor dimension does not fit into usize".to_string(),
                )
            })?;
        }
        let header = TensorHeader {
            samples: dims[0],
            width: dims[1],
            height: dims[2],
            maps: dims[3],
        };
        header
            .samples
            .checked_mul(header.width)
            .and_then(|n| n.checked_mul(header.height))
            .and_then(|n| n.checked_mul(header.maps))
            .and_then(|n| n.checked_mul(DATUM_BYTES))
            .filter(|&bytes| bytes <= isize::MAX as usize)
            .ok_or_else(|| {
                NetGraphError::MalformedParameterStream(format!(
                    "tensor dimensions overflow: {:?}",
                    dims
                ))
            })?;
        Ok(header)
    }

    pub fn write_to(&self, output: &mut dyn Write) -> Result<(), NetGraphError> {
        for dim in [self.samples, self.width, self.height, self.maps] {
            output.write_all(&(dim as u64).to_le_bytes())?;
        }
        Ok(())
    }
}

/// A dense 4-D tensor laid out as `samples x maps x height x width`.
///
/// The residency marker records where the authoritative copy of the values
/// lives. Host-side accessors fail with `DataNotAvailableError` while the
/// tensor is marked as accelerator-resident.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    samples: usize,
    width: usize,
    height: usize,
    maps: usize,
    values: Vec<Datum>,
    device: StorageDevice,
}

impl Tensor {
    /// Creates a zero-filled tensor on the CPU.
    pub fn new(samples: usize, width: usize, height: usize, maps: usize) -> Self {
        Tensor {
            samples,
            width,
            height,
            maps,
            values: vec![0.0; samples * width * height * maps],
            device: StorageDevice::CPU,
        }
    }

    /// Creates a tensor from flattened values.
    ///
    /// # Errors
    /// Returns `ShapeMismatch` if `values.len()` does not match the dimensions.
    pub fn from_vec(
        values: Vec<Datum>,
        samples: usize,
        width: usize,
        height: usize,
        maps: usize,
    ) -> Result<Self, NetGraphError> {
        let expected = samples * width * height * maps;
        if values.len() != expected {
            return Err(NetGraphError::ShapeMismatch {
                expected: vec![samples, width, height, maps],
                actual: vec![values.len()],
                operation: "Tensor::from_vec".to_string(),
            });
        }
        Ok(Tensor {
            samples,
            width,
            height,
            maps,
            values,
            device: StorageDevice::CPU,
        })
    }

    pub fn samples(&self) -> usize {
        self.samples
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn maps(&self) -> usize {
        self.maps
    }

    /// `[samples, width, height, maps]`
    pub fn shape(&self) -> [usize; 4] {
        [self.samples, self.width, self.height, self.maps]
    }

    pub fn elements(&self) -> usize {
        self.values.len()
    }

    pub fn elements_per_sample(&self) -> usize {
        self.width * self.height * self.maps
    }

    pub fn device(&self) -> StorageDevice {
        self.device
    }

    /// Makes the CPU copy authoritative. A no-op when already CPU-resident.
    pub fn move_to_cpu(&mut self) {
        if self.device != StorageDevice::CPU {
            log::trace!("Moving tensor {} to CPU", self);
            self.device = StorageDevice::CPU;
        }
    }

    /// Marks the tensor as accelerator-resident.
    pub fn move_to_gpu(&mut self) {
        if self.device != StorageDevice::GPU {
            log::trace!("Moving tensor {} to GPU", self);
            self.device = StorageDevice::GPU;
        }
    }

    fn ensure_cpu(&self) -> Result<(), NetGraphError> {
        if self.device != StorageDevice::CPU {
            return Err(NetGraphError::DataNotAvailableError {
                expected: StorageDevice::CPU,
                actual: self.device,
            });
        }
        Ok(())
    }

    /// Host view of the values.
    pub fn values(&self) -> Result<&[Datum], NetGraphError> {
        self.ensure_cpu()?;
        Ok(&self.values)
    }

    /// Mutable host view of the values.
    pub fn values_mut(&mut self) -> Result<&mut [Datum], NetGraphError> {
        self.ensure_cpu()?;
        Ok(&mut self.values)
    }

    /// Sets every element to zero.
    pub fn clear(&mut self) -> Result<(), NetGraphError> {
        self.values_mut()?.iter_mut().for_each(|v| *v = 0.0);
        Ok(())
    }

    /// Copies the values of a same-shaped `source` into `self`.
    pub fn copy_from(&mut self, source: &Tensor) -> Result<(), NetGraphError> {
        if source.shape() != self.shape() {
            return Err(NetGraphError::ShapeMismatch {
                expected: self.shape().to_vec(),
                actual: source.shape().to_vec(),
                operation: "Tensor::copy_from".to_string(),
            });
        }
        let values = source.values()?;
        self.values_mut()?.copy_from_slice(values);
        Ok(())
    }

    /// Changes the dimensions. Values are kept when the element count is
    /// unchanged and zero-filled otherwise.
    ///
    /// Only reachable through `Buffer`, which keeps data and gradient in
    /// lockstep.
    pub(crate) fn resize(&mut self, samples: usize, width: usize, height: usize, maps: usize) {
        let elements = samples * width * height * maps;
        if elements != self.values.len() {
            self.values = vec![0.0; elements];
        }
        self.samples = samples;
        self.width = width;
        self.height = height;
        self.maps = maps;
    }

    /// Writes the dimension header followed by the raw little-endian values.
    /// The tensor is staged to the CPU first.
    pub fn serialize(&mut self, output: &mut dyn Write) -> Result<(), NetGraphError> {
        self.move_to_cpu();
        TensorHeader {
            samples: self.samples,
            width: self.width,
            height: self.height,
            maps: self.maps,
        }
        .write_to(output)?;
        let mut bytes = Vec::with_capacity(self.values.len() * DATUM_BYTES);
        for value in &self.values {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        output.write_all(&bytes)?;
        Ok(())
    }

    /// Reads a dump written by `serialize`, resizing to the stored shape.
    pub(crate) fn deserialize(&mut self, input: &mut dyn Read) -> Result<(), NetGraphError> {
        self.move_to_cpu();
        let header = TensorHeader::read_from(input)?;
        let bytes = read_payload(input, header.elements() * DATUM_BYTES)?;
        self.resize(header.samples, header.width, header.height, header.maps);
        for (value, chunk) in self.values.iter_mut().zip(bytes.chunks_exact(DATUM_BYTES)) {
            let mut raw = [0u8; DATUM_BYTES];
            raw.copy_from_slice(chunk);
            *value = Datum::from_le_bytes(raw);
        }
        Ok(())
    }

    /// Consumes one tensor dump from `input` without keeping its values.
    pub fn skip_serialized(input: &mut dyn Read) -> Result<TensorHeader, NetGraphError> {
        let header = TensorHeader::read_from(input)?;
        let payload = (header.elements() * DATUM_BYTES) as u64;
        let skipped = io::copy(&mut Read::take(&mut *input, payload), &mut io::sink())?;
        if skipped != payload {
            return Err(NetGraphError::Io {
                kind: io::ErrorKind::UnexpectedEof,
                message: format!("expected {} payload bytes, found {}", payload, skipped),
            });
        }
        Ok(header)
    }
}

impl fmt::Display for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}s@{}x{}x{}m)",
            self.samples, self.width, self.height, self.maps
        )
    }
}

#[cfg(test)]
#[path = "tensor_test.rs"]
mod tests;
