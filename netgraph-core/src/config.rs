use std::collections::BTreeMap;
use std::fmt;

use crate::error::NetGraphError;

/// A single typed configuration value.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    Unsigned(usize),
    Float(f64),
    Bool(bool),
    Text(String),
}

impl ConfigValue {
    fn type_name(&self) -> &'static str {
        match self {
            ConfigValue::Unsigned(_) => "unsigned",
            ConfigValue::Float(_) => "float",
            ConfigValue::Bool(_) => "bool",
            ConfigValue::Text(_) => "text",
        }
    }
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigValue::Unsigned(v) => write!(f, "{}", v),
            ConfigValue::Float(v) => write!(f, "{}", v),
            ConfigValue::Bool(v) => write!(f, "{}", v),
            ConfigValue::Text(v) => write!(f, "\"{}\"", v),
        }
    }
}

/// Opaque layer construction configuration: named, type-checked optional
/// fields. The graph never reads it; only layer constructors do.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LayerConfig {
    fields: BTreeMap<String, ConfigValue>,
}

impl LayerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style setter.
    pub fn with(mut self, name: &str, value: ConfigValue) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: &str, value: ConfigValue) {
        self.fields.insert(name.to_string(), value);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&ConfigValue> {
        self.fields.get(name)
    }

    fn mismatch(name: &str, expected: &str) -> NetGraphError {
        NetGraphError::InvalidConfiguration {
            field: name.to_string(),
            expected: expected.to_string(),
        }
    }

    /// Returns `Ok(None)` when the field is absent and an error when it is
    /// present with another type.
    pub fn get_unsigned(&self, name: &str) -> Result<Option<usize>, NetGraphError> {
        match self.fields.get(name) {
            None => Ok(None),
            Some(ConfigValue::Unsigned(v)) => Ok(Some(*v)),
            Some(other) => {
                log::debug!("Field '{}' has type {}", name, other.type_name());
                Err(Self::mismatch(name, "unsigned"))
            }
        }
    }

    /// Integers are accepted where a float is expected.
    pub fn get_float(&self, name: &str) -> Result<Option<f64>, NetGraphError> {
        match self.fields.get(name) {
            None => Ok(None),
            Some(ConfigValue::Float(v)) => Ok(Some(*v)),
            Some(ConfigValue::Unsigned(v)) => Ok(Some(*v as f64)),
            Some(_) => Err(Self::mismatch(name, "float")),
        }
    }

    pub fn get_bool(&self, name: &str) -> Result<Option<bool>, NetGraphError> {
        match self.fields.get(name) {
            None => Ok(None),
            Some(ConfigValue::Bool(v)) => Ok(Some(*v)),
            Some(_) => Err(Self::mismatch(name, "bool")),
        }
    }

    pub fn get_text(&self, name: &str) -> Result<Option<&str>, NetGraphError> {
        match self.fields.get(name) {
            None => Ok(None),
            Some(ConfigValue::Text(v)) => Ok(Some(v.as_str())),
            Some(_) => Err(Self::mismatch(name, "text")),
        }
    }

    /// Like `get_unsigned`, but a missing field is an error too.
    pub fn require_unsigned(&self, name: &str) -> Result<usize, NetGraphError> {
        self.get_unsigned(name)?
            .ok_or_else(|| Self::mismatch(name, "unsigned"))
    }
}

impl fmt::Display for LayerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (name, value)) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "\"{}\": {}", name, value)?;
        }
        write!(f, "}}")
    }
}
