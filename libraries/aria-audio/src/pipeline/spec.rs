//! Configuration-layer types
//!
//! The configuration layer describes a chain as an ordered list of
//! `(type name, label, argument list)` tuples. Argument syntax is owned by
//! each stage's option schema; these types just carry the strings.

use aria_core::{AudioFormat, ReplayGain};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// One stage of a configured chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSpec {
    /// Stage type name (registry lookup key)
    pub name: String,
    /// Optional unique label for runtime addressing
    pub label: Option<String>,
    /// Opaque `(key, value)` argument pairs for the stage's option schema
    pub args: Vec<(String, String)>,
}

impl StageSpec {
    /// A spec with no label and no arguments
    pub fn bare(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            label: None,
            args: Vec::new(),
        }
    }
}

/// Parses the compact text form used by command interfaces:
/// `name[=label][:key=value]*`, e.g. `volume=vol1:gain=0.5:softclip=yes`.
impl FromStr for StageSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(':');
        let head = parts.next().unwrap_or_default();
        if head.is_empty() {
            return Err("empty stage spec".to_string());
        }
        let (name, label) = match head.split_once('=') {
            Some((name, label)) if !label.is_empty() => (name, Some(label.to_string())),
            Some((_, _)) => return Err(format!("empty label in '{head}'")),
            None => (head, None),
        };
        let mut args = Vec::new();
        for part in parts {
            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| format!("expected key=value, got '{part}'"))?;
            args.push((key.to_string(), value.to_string()));
        }
        Ok(Self {
            name: name.to_string(),
            label,
            args,
        })
    }
}

/// Full configuration of a pipeline: endpoint formats, stream side data,
/// and the ordered stage list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Format the decoder delivers
    pub input: AudioFormat,
    /// Format the sink requires, if it has a requirement
    pub output: Option<AudioFormat>,
    /// ReplayGain side data attached to the stream, if known
    pub replaygain: Option<ReplayGain>,
    /// Stages in chain order
    pub stages: Vec<StageSpec>,
}

impl PipelineConfig {
    /// A pass-through configuration with no stages and no sink requirement
    pub fn passthrough(input: AudioFormat) -> Self {
        Self {
            input,
            output: None,
            replaygain: None,
            stages: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_bare_name() {
        let spec: StageSpec = "volume".parse().unwrap();
        assert_eq!(spec.name, "volume");
        assert_eq!(spec.label, None);
        assert!(spec.args.is_empty());
    }

    #[test]
    fn parse_label_and_args() {
        let spec: StageSpec = "volume=vol1:gain=0.5:softclip=yes".parse().unwrap();
        assert_eq!(spec.name, "volume");
        assert_eq!(spec.label.as_deref(), Some("vol1"));
        assert_eq!(
            spec.args,
            vec![
                ("gain".to_string(), "0.5".to_string()),
                ("softclip".to_string(), "yes".to_string())
            ]
        );
    }

    #[test]
    fn parse_rejects_malformed() {
        assert!("".parse::<StageSpec>().is_err());
        assert!("volume=".parse::<StageSpec>().is_err());
        assert!("volume:gain".parse::<StageSpec>().is_err());
    }
}
