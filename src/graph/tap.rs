//! Tap and element descriptors for the host graph.
//!
//! Each element declares how many input and output taps it exposes via an
//! `ElementSpec`. The graph uses these counts to validate links.

use crate::value::PropertyValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Whether a tap consumes or produces data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TapDirection {
    /// Consumer end: data enters the owning element here.
    Input,
    /// Producer end: data leaves the owning element here.
    Output,
}

impl TapDirection {
    pub fn opposite(self) -> Self {
        match self {
            TapDirection::Input => TapDirection::Output,
            TapDirection::Output => TapDirection::Input,
        }
    }
}

/// Description of an element to create inside a graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementSpec {
    pub name: String,
    pub factory: String,
    pub inputs: u16,
    pub outputs: u16,
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyValue>,
}

impl ElementSpec {
    pub fn new(name: impl Into<String>, factory: impl Into<String>, inputs: u16, outputs: u16) -> Self {
        Self {
            name: name.into(),
            factory: factory.into(),
            inputs,
            outputs,
            properties: BTreeMap::new(),
        }
    }

    /// One input, one output.
    pub fn filter(name: impl Into<String>, factory: impl Into<String>) -> Self {
        Self::new(name, factory, 1, 1)
    }

    /// Producer with a single output.
    pub fn source(name: impl Into<String>) -> Self {
        Self::new(name, "source", 0, 1)
    }

    /// Consumer with a single input.
    pub fn sink(name: impl Into<String>) -> Self {
        Self::new(name, "sink", 1, 0)
    }

    /// One input fanned out to `branches` outputs.
    pub fn tee(name: impl Into<String>, branches: u16) -> Self {
        Self::new(name, "tee", 1, branches)
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Number of taps on the given side.
    pub fn tap_count(&self, direction: TapDirection) -> u16 {
        match direction {
            TapDirection::Input => self.inputs,
            TapDirection::Output => self.outputs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opposite_direction() {
        assert_eq!(TapDirection::Input.opposite(), TapDirection::Output);
        assert_eq!(TapDirection::Output.opposite(), TapDirection::Input);
    }

    #[test]
    fn test_spec_tap_counts() {
        let tee = ElementSpec::tee("split", 3);
        assert_eq!(tee.tap_count(TapDirection::Input), 1);
        assert_eq!(tee.tap_count(TapDirection::Output), 3);

        let scale = ElementSpec::filter("scale", "videoscale").with_property("width", 640i64);
        assert_eq!(scale.properties.get("width"), Some(&PropertyValue::Int(640)));
    }
}
