//! Tee stage: fans the stream out to a side branch (preview, recorder, meter)
//! while passing it through unchanged on the main path.

use crate::graph::{ElementSpec, Graph, TapDirection, TapId};
use crate::message::ControlMessage;
use crate::stage::splice::{link_branch, link_element, remove_elements, unlink_element};
use crate::stage::Stage;
use std::sync::atomic::{AtomicU64, Ordering};

/// Tee output carrying the side branch. Output 0 carries the main path.
const SIDE_BRANCH: u16 = 1;

pub struct TeeStage {
    name: String,
    branch_factory: String,
    branch_messages: AtomicU64,
}

impl TeeStage {
    pub fn new(name: impl Into<String>, branch_factory: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            branch_factory: branch_factory.into(),
            branch_messages: AtomicU64::new(0),
        }
    }

    /// Name of the element created for the side branch.
    pub fn branch_name(&self) -> String {
        format!("{}:branch", self.name)
    }

    /// Messages consumed from the side branch.
    pub fn branch_messages(&self) -> u64 {
        self.branch_messages.load(Ordering::Relaxed)
    }
}

impl Stage for TeeStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, graph: &dyn Graph, tap: TapId) -> Option<TapId> {
        let tee = graph.add_element(ElementSpec::tee(self.name.clone(), 2)).ok()?;
        let branch_spec = ElementSpec::new(self.branch_name(), self.branch_factory.clone(), 1, 0);
        let branch = match graph.add_element(branch_spec) {
            Ok(branch) => branch,
            Err(e) => {
                tracing::warn!("Stage '{}': cannot create branch: {}", self.name, e);
                remove_elements(graph, &[tee]);
                return None;
            }
        };

        if !link_branch(graph, tee, SIDE_BRANCH, branch) {
            remove_elements(graph, &[tee, branch]);
            return None;
        }

        // link_element uses tap 0 on each side, which is the main branch.
        let free = link_element(graph, tap, tee);
        if free.is_none() {
            remove_elements(graph, &[tee, branch]);
        }
        free
    }

    fn revert(&self, graph: &dyn Graph, tap: TapId) -> Option<TapId> {
        let tee = graph.tap_owner(tap)?;
        if graph.element_name(tee).as_deref() != Some(self.name.as_str()) {
            tracing::warn!("Stage '{}': {:?} is not this tee", self.name, tap);
            return None;
        }

        let branch = graph
            .element_tap(tee, TapDirection::Output, SIDE_BRANCH)
            .and_then(|out| graph.peer_of(out))
            .and_then(|input| graph.tap_owner(input));

        let previous = unlink_element(graph, tap).map(|(_, previous)| previous);
        if let Some(branch) = branch {
            remove_elements(graph, &[branch]);
        }
        remove_elements(graph, &[tee]);
        previous
    }

    fn handle_message(&self, message: &ControlMessage) -> bool {
        if message.is_from(&self.branch_name()) {
            self.branch_messages.fetch_add(1, Ordering::Relaxed);
            return true;
        }
        false
    }
}
