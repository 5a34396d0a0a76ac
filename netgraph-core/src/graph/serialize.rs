// src/graph/serialize.rs
//! Binary parameter files.
//!
//! A file starts with an 8-byte little-endian magic selecting the record
//! layout, followed by one record per node that owns parameters:
//!
//! ```text
//! u32 name length | name bytes | [u32 metadata length | metadata bytes] |
//! u32 parameter count | parameter count * tensor dump
//! ```
//!
//! The metadata field only exists in the extended layout. Records are keyed by
//! node name, so files stay loadable after nodes are added, removed or renamed.

use std::io::{self, Read, Write};

use log::{debug, info, warn};

use super::net_graph::NetGraph;
use crate::error::NetGraphError;
use crate::tensor::{read_payload, Tensor};

/// Magic of the layout without per-record metadata.
pub const LEGACY_PARAMETER_MAGIC: u64 = 0xC240_C240_C240_C240;
/// Magic of the layout with per-record metadata.
pub const EXTENDED_PARAMETER_MAGIC: u64 = 0xC241_C241_C241_C241;
/// Records whose name starts with this prefix carry no node parameters and
/// are skipped without a warning.
pub const RESERVED_NAME_PREFIX: &str = "__";

/// Record layout of a parameter file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ParameterFormat {
    Legacy,
    #[default]
    Extended,
}

impl ParameterFormat {
    pub fn magic(&self) -> u64 {
        match self {
            ParameterFormat::Legacy => LEGACY_PARAMETER_MAGIC,
            ParameterFormat::Extended => EXTENDED_PARAMETER_MAGIC,
        }
    }

    pub fn from_magic(magic: u64) -> Result<Self, NetGraphError> {
        CODECS
            .iter()
            .map(|codec| codec.format())
            .find(|format| format.magic() == magic)
            .ok_or(NetGraphError::UnknownParameterFormat { magic })
    }
}

/// Outcome of `NetGraph::deserialize_parameters`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParameterLoadReport {
    /// Nodes whose parameters were read.
    pub loaded: Vec<String>,
    /// Records without a matching node, or with a different parameter count.
    pub skipped: Vec<String>,
    /// Records with a reserved name.
    pub reserved: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct RecordHeader {
    name: String,
    metadata: Vec<u8>,
    parameter_count: usize,
}

trait RecordCodec {
    fn format(&self) -> ParameterFormat;

    fn write_header(&self, header: &RecordHeader, output: &mut dyn Write) -> Result<(), NetGraphError>;

    /// `None` on a clean end of stream.
    fn read_header(&self, input: &mut dyn Read) -> Result<Option<RecordHeader>, NetGraphError>;
}

struct LegacyCodec;

impl RecordCodec for LegacyCodec {
    fn format(&self) -> ParameterFormat {
        ParameterFormat::Legacy
    }

    fn write_header(&self, header: &RecordHeader, output: &mut dyn Write) -> Result<(), NetGraphError> {
        write_bytes(output, header.name.as_bytes())?;
        write_u32(output, header.parameter_count)
    }

    fn read_header(&self, input: &mut dyn Read) -> Result<Option<RecordHeader>, NetGraphError> {
        let name = match read_name(input)? {
            Some(name) => name,
            None => return Ok(None),
        };
        let parameter_count = read_u32(input)? as usize;
        Ok(Some(RecordHeader {
            name,
            metadata: Vec::new(),
            parameter_count,
        }))
    }
}

struct ExtendedCodec;

impl RecordCodec for ExtendedCodec {
    fn format(&self) -> ParameterFormat {
        ParameterFormat::Extended
    }

    fn write_header(&self, header: &RecordHeader, output: &mut dyn Write) -> Result<(), NetGraphError> {
        write_bytes(output, header.name.as_bytes())?;
        write_bytes(output, &header.metadata)?;
        write_u32(output, header.parameter_count)
    }

    fn read_header(&self, input: &mut dyn Read) -> Result<Option<RecordHeader>, NetGraphError> {
        let name = match read_name(input)? {
            Some(name) => name,
            None => return Ok(None),
        };
        let metadata_length = read_u32(input)? as usize;
        let metadata = read_payload(input, metadata_length)?;
        let parameter_count = read_u32(input)? as usize;
        Ok(Some(RecordHeader {
            name,
            metadata,
            parameter_count,
        }))
    }
}

const CODECS: &[&dyn RecordCodec] = &[&LegacyCodec, &ExtendedCodec];

fn codec_for(format: ParameterFormat) -> Result<&'static dyn RecordCodec, NetGraphError> {
    CODECS
        .iter()
        .copied()
        .find(|codec| codec.format() == format)
        .ok_or(NetGraphError::UnknownParameterFormat {
            magic: format.magic(),
        })
}

fn write_u32(output: &mut dyn Write, value: usize) -> Result<(), NetGraphError> {
    let value = u32::try_from(value).map_err(|_| {
        NetGraphError::MalformedParameterStream(format!("length {} does not fit in 32 bits", value))
    })?;
    output.write_all(&value.to_le_bytes())?;
    Ok(())
}

fn write_bytes(output: &mut dyn Write, bytes: &[u8]) -> Result<(), NetGraphError> {
    write_u32(output, bytes.len())?;
    output.write_all(bytes)?;
    Ok(())
}

fn read_u32(input: &mut dyn Read) -> Result<u32, NetGraphError> {
    let mut bytes = [0u8; 4];
    input.read_exact(&mut bytes)?;
    Ok(u32::from_le_bytes(bytes))
}

/// Like `read_u32`, but an empty stream yields `None`.
fn read_u32_or_eof(input: &mut dyn Read) -> Result<Option<u32>, NetGraphError> {
    let mut bytes = [0u8; 4];
    let mut filled = 0;
    while filled < bytes.len() {
        match input.read(&mut bytes[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => {
                return Err(NetGraphError::MalformedParameterStream(
                    "stream ends inside a record header".to_string(),
                ))
            }
            Ok(read) => filled += read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        }
    }
    Ok(Some(u32::from_le_bytes(bytes)))
}

fn read_name(input: &mut dyn Read) -> Result<Option<String>, NetGraphError> {
    let length = match read_u32_or_eof(input)? {
        Some(length) => length as usize,
        None => return Ok(None),
    };
    let bytes = read_payload(input, length)?;
    String::from_utf8(bytes)
        .map(Some)
        .map_err(|err| NetGraphError::MalformedParameterStream(format!("record name is not UTF-8: {}", err)))
}

fn skip_record_payload(input: &mut dyn Read, parameter_count: usize) -> Result<(), NetGraphError> {
    for _ in 0..parameter_count {
        Tensor::skip_serialized(input)?;
    }
    Ok(())
}

impl NetGraph {
    /// Writes the magic of `format` and one record per node that owns
    /// parameters, in registration order.
    ///
    /// Serialization-aware layers write their own metadata and payload.
    ///
    /// # Arguments
    /// * `output`: Destination of the parameter file.
    /// * `format`: Record layout; `ParameterFormat::Extended` unless an older
    ///   reader has to load the file.
    ///
    /// # Errors
    /// `NotInitialized` before `initialize`, or any write failure.
    pub fn serialize_parameters(
        &mut self,
        output: &mut dyn Write,
        format: ParameterFormat,
    ) -> Result<(), NetGraphError> {
        if !self.initialized {
            return Err(NetGraphError::NotInitialized);
        }
        let codec = codec_for(format)?;
        output.write_all(&format.magic().to_le_bytes())?;

        for node in self.nodes.iter_mut() {
            let parameters = node.layer.parameters().to_vec();
            if parameters.is_empty() {
                continue;
            }
            let serialization_aware = node.capabilities.serialization_aware;
            let metadata = if serialization_aware {
                node.layer.parameter_metadata()
            } else {
                Vec::new()
            };
            let header = RecordHeader {
                name: node.unique_name.clone(),
                metadata,
                parameter_count: parameters.len(),
            };
            codec.write_header(&header, output)?;

            if serialization_aware {
                node.layer.serialize_parameters(output)?;
            } else {
                for parameter in &parameters {
                    parameter.borrow_mut().data_mut().serialize(output)?;
                }
            }
            debug!(
                "Serialized {} parameter buffers of node {}",
                parameters.len(),
                node.unique_name
            );
        }
        Ok(())
    }

    /// Reads a stream written by `serialize_parameters` of this or an earlier
    /// version of the graph.
    ///
    /// Records are matched by node name. Records for unknown nodes, or with a
    /// parameter count that differs from the node's, are consumed and
    /// skipped with a warning; reserved records are consumed silently.
    ///
    /// # Arguments
    /// * `input`: A stream positioned at the magic.
    ///
    /// # Returns
    /// A `ParameterLoadReport` naming the loaded, skipped and reserved records.
    ///
    /// # Errors
    /// `NotInitialized`, `UnknownParameterFormat` for an unrecognized magic,
    /// or a truncated or malformed stream.
    pub fn deserialize_parameters(&mut self, input: &mut dyn Read) -> Result<ParameterLoadReport, NetGraphError> {
        if !self.initialized {
            return Err(NetGraphError::NotInitialized);
        }
        let mut magic = [0u8; 8];
        input.read_exact(&mut magic)?;
        let format = ParameterFormat::from_magic(u64::from_le_bytes(magic))?;
        let codec = codec_for(format)?;
        debug!("Reading parameters in {:?} format", format);

        let mut report = ParameterLoadReport::default();
        while let Some(header) = codec.read_header(input)? {
            if header.name.starts_with(RESERVED_NAME_PREFIX) {
                skip_record_payload(input, header.parameter_count)?;
                report.reserved.push(header.name);
                continue;
            }

            let node = match self.node_by_name(&header.name) {
                Some(id) => &mut self.nodes[id.0],
                None => {
                    warn!("Node {} not found in graph, skipping its parameters", header.name);
                    skip_record_payload(input, header.parameter_count)?;
                    report.skipped.push(header.name);
                    continue;
                }
            };

            let parameters = node.layer.parameters().to_vec();
            if parameters.len() != header.parameter_count {
                warn!(
                    "Node {} has {} parameter buffers but the stream has {}, skipping",
                    header.name,
                    parameters.len(),
                    header.parameter_count
                );
                skip_record_payload(input, header.parameter_count)?;
                report.skipped.push(header.name);
                continue;
            }

            if node.capabilities.serialization_aware {
                node.layer
                    .deserialize_parameters(&header.metadata, header.parameter_count, input)?;
            } else {
                for (index, parameter) in parameters.iter().enumerate() {
                    let mut parameter = parameter.borrow_mut();
                    let elements_before = parameter.data().elements();
                    parameter.deserialize_data(input)?;
                    if parameter.data().elements() != elements_before {
                        warn!(
                            "Loading changed the size of parameter {} of node {}: {}",
                            index,
                            header.name,
                            parameter.data()
                        );
                    }
                }
            }
            info!("Loaded {} parameter buffers for node {}", header.parameter_count, header.name);
            report.loaded.push(header.name);
        }
        Ok(report)
    }
}
