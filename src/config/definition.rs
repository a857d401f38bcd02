//! Chain definitions: the serialized form of an ordered stage list.
//!
//! A definition names stage factories rather than stage objects, so the same
//! definition can be built once and shared across every instance a
//! `Coordinator` manages.

use crate::error::{ChainError, Result};
use crate::value::PropertyValue;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// One stage in a chain definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSpec {
    /// Registry factory used to build the stage
    pub factory: String,

    /// Stage name (also used to name the elements it creates)
    pub name: String,

    /// Factory-specific properties
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyValue>,
}

impl StageSpec {
    pub fn new(factory: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            factory: factory.into(),
            name: name.into(),
            properties: BTreeMap::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn property(&self, key: &str) -> Option<&PropertyValue> {
        self.properties.get(key)
    }

    /// String property, or a configuration error naming the stage.
    pub fn require_str(&self, key: &str) -> Result<&str> {
        match self.properties.get(key) {
            Some(PropertyValue::String(value)) => Ok(value),
            Some(other) => Err(ChainError::Config(format!(
                "Stage '{}': property '{}' must be a string, got {}",
                self.name, key, other
            ))),
            None => Err(ChainError::Config(format!(
                "Stage '{}': missing property '{}'",
                self.name, key
            ))),
        }
    }

    /// Comma-separated list property, trimmed, empty items dropped.
    pub fn list(&self, key: &str) -> Vec<String> {
        self.properties
            .get(key)
            .and_then(|v| v.as_str())
            .map(|s| {
                s.split(',')
                    .map(str::trim)
                    .filter(|item| !item.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// A named, ordered list of stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainDefinition {
    pub name: String,

    #[serde(default)]
    pub stages: Vec<StageSpec>,
}

impl Default for ChainDefinition {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            stages: vec![
                StageSpec::new("element", "convert").with_property("factory", "audioconvert"),
                StageSpec::new("element", "volume")
                    .with_property("factory", "volume")
                    .with_property("volume", 1.0)
                    .with_property("claims", "level"),
            ],
        }
    }
}

impl ChainDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
        }
    }

    pub fn with_stage(mut self, stage: StageSpec) -> Self {
        self.stages.push(stage);
        self
    }

    /// Check that every stage has a factory and a unique, non-empty name.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for stage in &self.stages {
            if stage.name.is_empty() {
                return Err(ChainError::Config(format!(
                    "Chain '{}': stage with factory '{}' has no name",
                    self.name, stage.factory
                )));
            }
            if stage.factory.is_empty() {
                return Err(ChainError::Config(format!(
                    "Chain '{}': stage '{}' has no factory",
                    self.name, stage.name
                )));
            }
            if !seen.insert(stage.name.as_str()) {
                return Err(ChainError::Config(format!(
                    "Chain '{}': duplicate stage name '{}'",
                    self.name, stage.name
                )));
            }
        }
        Ok(())
    }
}
