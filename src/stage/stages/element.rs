//! Element stage: splices a single one-in/one-out element.
//!
//! Covers converters, scalers, gain and effect elements: anything the host can
//! build from a factory name plus properties.

use crate::graph::{ElementSpec, Graph, TapId};
use crate::message::ControlMessage;
use crate::stage::splice::{link_element, unlink_element};
use crate::stage::Stage;
use crate::value::PropertyValue;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// A stage made of one element created from `factory`.
pub struct ElementStage {
    name: String,
    factory: String,
    properties: BTreeMap<String, PropertyValue>,
    /// Message kinds this stage consumes when emitted by its own element.
    claims: Vec<String>,
    claimed: AtomicU64,
}

impl ElementStage {
    pub fn new(name: impl Into<String>, factory: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            factory: factory.into(),
            properties: BTreeMap::new(),
            claims: Vec::new(),
            claimed: AtomicU64::new(0),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Consume messages of `kind` emitted by this stage's element.
    pub fn claiming(mut self, kind: impl Into<String>) -> Self {
        self.claims.push(kind.into());
        self
    }

    pub fn factory(&self) -> &str {
        &self.factory
    }

    pub fn properties(&self) -> &BTreeMap<String, PropertyValue> {
        &self.properties
    }

    /// Number of messages this stage has consumed.
    pub fn claimed(&self) -> u64 {
        self.claimed.load(Ordering::Relaxed)
    }
}

impl Stage for ElementStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, graph: &dyn Graph, tap: TapId) -> Option<TapId> {
        let mut spec = ElementSpec::filter(self.name.clone(), self.factory.clone());
        spec.properties = self.properties.clone();

        let element = match graph.add_element(spec) {
            Ok(element) => element,
            Err(e) => {
                tracing::warn!("Stage '{}': cannot create '{}': {}", self.name, self.factory, e);
                return None;
            }
        };

        let free = link_element(graph, tap, element);
        if free.is_none() {
            if let Err(e) = graph.remove_element(element) {
                tracing::warn!(
                    "Stage '{}': cannot remove unlinked '{}': {}",
                    self.name,
                    self.factory,
                    e
                );
            }
        }
        free
    }

    fn revert(&self, graph: &dyn Graph, tap: TapId) -> Option<TapId> {
        let element = graph.tap_owner(tap)?;
        if graph.element_name(element).as_deref() != Some(self.name.as_str()) {
            tracing::warn!(
                "Stage '{}': {:?} does not belong to this stage, not reverting",
                self.name,
                tap
            );
            return None;
        }

        let previous = unlink_element(graph, tap).map(|(_, previous)| previous);
        if let Err(e) = graph.remove_element(element) {
            tracing::warn!("Stage '{}': failed to remove element: {}", self.name, e);
        }
        previous
    }

    fn handle_message(&self, message: &ControlMessage) -> bool {
        if message.is_from(&self.name) && self.claims.iter().any(|kind| *kind == message.kind) {
            self.claimed.fetch_add(1, Ordering::Relaxed);
            return true;
        }
        false
    }
}
