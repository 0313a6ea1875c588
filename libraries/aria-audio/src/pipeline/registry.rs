//! Stage descriptor registry
//!
//! The static catalog of stage types the pipeline can instantiate. The
//! table is compile-time-known, read-only, and safe to consult from any
//! number of pipelines; lookup is an exact, case-sensitive name match.
//!
//! Each descriptor carries the stage's option schema: the typed key list a
//! configuration layer's opaque `key=value` string arguments are validated
//! against. Unknown keys and malformed values are rejected before a stage
//! is ever constructed, leaving the chain untouched.

use crate::effects;
use crate::pipeline::stage::Stage;
use crate::{PipelineError, Result};
use std::collections::HashMap;

/// Value type of a stage option
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionKind {
    /// Floating point number
    Float,
    /// Integer
    Int,
    /// Boolean (`yes`/`no`/`true`/`false`/`1`/`0`)
    Bool,
    /// Free-form text
    Text,
}

/// One entry of a stage's option schema
#[derive(Debug, Clone, Copy)]
pub struct OptionSpec {
    /// Option key
    pub key: &'static str,
    /// Value type the key expects
    pub kind: OptionKind,
    /// Short help text
    pub help: &'static str,
}

#[derive(Debug, Clone)]
enum OptionValue {
    Float(f64),
    Int(i64),
    Bool(bool),
    Text(String),
}

/// Parsed, schema-checked option values handed to a stage constructor.
///
/// Absent keys fall back to the stage's defaults; the typed getters return
/// `None` for keys that were not supplied.
#[derive(Debug, Default)]
pub struct OptionValues {
    values: HashMap<&'static str, OptionValue>,
}

impl OptionValues {
    /// Get a float option
    pub fn float(&self, key: &str) -> Option<f64> {
        match self.values.get(key) {
            Some(OptionValue::Float(v)) => Some(*v),
            _ => None,
        }
    }

    /// Get an integer option
    pub fn int(&self, key: &str) -> Option<i64> {
        match self.values.get(key) {
            Some(OptionValue::Int(v)) => Some(*v),
            _ => None,
        }
    }

    /// Get a boolean option
    pub fn bool(&self, key: &str) -> Option<bool> {
        match self.values.get(key) {
            Some(OptionValue::Bool(v)) => Some(*v),
            _ => None,
        }
    }

    /// Get a text option
    pub fn text(&self, key: &str) -> Option<&str> {
        match self.values.get(key) {
            Some(OptionValue::Text(v)) => Some(v.as_str()),
            _ => None,
        }
    }
}

/// Immutable description of one stage type: its name, what it does, its
/// option schema, and how to construct it.
pub struct StageDescriptor {
    /// Stage type name, the registry lookup key
    pub name: &'static str,
    /// Human-readable description
    pub description: &'static str,
    /// Option schema user arguments are validated against
    pub options: &'static [OptionSpec],
    pub(crate) create: fn(&OptionValues) -> Result<Box<dyn Stage>>,
}

impl StageDescriptor {
    /// Parse `args` against the option schema and construct the stage.
    pub(crate) fn instantiate(&self, args: &[(&str, &str)]) -> Result<Box<dyn Stage>> {
        let options = self.parse_options(args)?;
        (self.create)(&options)
    }

    fn parse_options(&self, args: &[(&str, &str)]) -> Result<OptionValues> {
        let mut values = OptionValues::default();
        for (key, raw) in args {
            let spec = self
                .options
                .iter()
                .find(|spec| spec.key == *key)
                .ok_or_else(|| PipelineError::BadOption {
                    stage: self.name.to_string(),
                    option: (*key).to_string(),
                    message: "unrecognized option".to_string(),
                })?;
            let value = parse_value(spec.kind, raw).map_err(|message| {
                PipelineError::BadOption {
                    stage: self.name.to_string(),
                    option: (*key).to_string(),
                    message,
                }
            })?;
            values.values.insert(spec.key, value);
        }
        Ok(values)
    }
}

impl std::fmt::Debug for StageDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageDescriptor")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish()
    }
}

fn parse_value(kind: OptionKind, raw: &str) -> std::result::Result<OptionValue, String> {
    match kind {
        OptionKind::Float => raw
            .parse::<f64>()
            .map(OptionValue::Float)
            .map_err(|_| format!("expected a number, got '{raw}'")),
        OptionKind::Int => raw
            .parse::<i64>()
            .map(OptionValue::Int)
            .map_err(|_| format!("expected an integer, got '{raw}'")),
        OptionKind::Bool => match raw {
            "yes" | "true" | "1" => Ok(OptionValue::Bool(true)),
            "no" | "false" | "0" => Ok(OptionValue::Bool(false)),
            _ => Err(format!("expected yes/no, got '{raw}'")),
        },
        OptionKind::Text => Ok(OptionValue::Text(raw.to_string())),
    }
}

static DESCRIPTORS: [&StageDescriptor; 5] = [
    &effects::volume::DESCRIPTOR,
    &effects::pan::DESCRIPTOR,
    &effects::speed::DESCRIPTOR,
    &effects::resample::DESCRIPTOR,
    &effects::convert::DESCRIPTOR,
];

/// Look up a stage type by exact, case-sensitive name
pub fn find(name: &str) -> Option<&'static StageDescriptor> {
    DESCRIPTORS.iter().copied().find(|desc| desc.name == name)
}

/// All registered stage descriptors, in registration order
pub fn descriptors() -> &'static [&'static StageDescriptor] {
    &DESCRIPTORS
}
