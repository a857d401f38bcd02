//! Out-of-band control messages delivered by the host's message bus.

use crate::value::PropertyValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A control message posted on the graph's bus.
///
/// `source` names the element that emitted it, when known. Stages claim
/// messages by returning `true` from `handle_message`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlMessage {
    pub kind: String,
    pub source: Option<String>,
    #[serde(default)]
    pub fields: BTreeMap<String, PropertyValue>,
}

impl ControlMessage {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            source: None,
            fields: BTreeMap::new(),
        }
    }

    pub fn from_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn field(&self, key: &str) -> Option<&PropertyValue> {
        self.fields.get(key)
    }

    /// Whether the message was emitted by the named element.
    pub fn is_from(&self, name: &str) -> bool {
        self.source.as_deref() == Some(name)
    }
}
