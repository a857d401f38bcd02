//! Multi-instance coordinator.
//!
//! Keeps one logical stage list and mirrors it onto any number of physical
//! instances. Each instance is a private [`Chain`] attached to its own graph,
//! seeded with the logical list at attach time; later logical edits fan out to
//! every live instance under one lock, so all instances observe edits in the
//! same order.
//!
//! ```text
//!                      ┌─► Chain #1 ──► graph "peer-1"
//! logical list ──fan──►├─► Chain #2 ──► graph "peer-2"
//!                      └─► Chain #3 ──► graph "peer-3"
//! ```
//!
//! The coordinator lock is always taken before any chain lock.

pub mod instance;

pub use instance::{InstanceId, InstanceInfo};

use crate::chain::{Chain, FilterChain, OwnerId, StageHandle};
use crate::config::ChainDefinition;
use crate::error::{ChainError, Result};
use crate::graph::{Graph, TapId};
use crate::message::ControlMessage;
use crate::stage::{Stage, StageRegistry};
use instance::Instance;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// One logical stage and its handle on every instance that has it.
struct LogicalEntry {
    handle: StageHandle,
    stage: Arc<dyn Stage>,
    per_instance: HashMap<InstanceId, StageHandle>,
}

struct CoordinatorState {
    entries: Vec<LogicalEntry>,
    instances: Vec<Instance>,
    next_index: u32,
    next_instance: u64,
}

impl CoordinatorState {
    fn position(&self, handle: StageHandle) -> Option<usize> {
        self.entries.iter().position(|e| e.handle == handle)
    }
}

/// Fans a logical filter chain out to many physical instances.
pub struct Coordinator {
    name: String,
    owner: OwnerId,
    state: Mutex<CoordinatorState>,
}

impl fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Coordinator")
            .field("name", &self.name)
            .field("entries", &state.entries.len())
            .field("instances", &state.instances.len())
            .finish()
    }
}

impl Coordinator {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            owner: OwnerId::next(),
            state: Mutex::new(CoordinatorState {
                entries: Vec::new(),
                instances: Vec::new(),
                next_index: 0,
                next_instance: 1,
            }),
        }
    }

    /// A coordinator whose logical list is built from `definition`.
    pub fn from_definition(registry: &StageRegistry, definition: &ChainDefinition) -> Result<Self> {
        let coordinator = Self::new(definition.name.clone());
        for stage in registry.build_chain(definition)? {
            coordinator.append(stage);
        }
        Ok(coordinator)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn instance_count(&self) -> usize {
        self.state.lock().instances.len()
    }

    pub fn instances(&self) -> Vec<InstanceInfo> {
        self.state.lock().instances.iter().map(InstanceInfo::from).collect()
    }

    /// The private chain of an instance.
    pub fn instance_chain(&self, id: InstanceId) -> Option<Chain> {
        self.state
            .lock()
            .instances
            .iter()
            .find(|i| i.id == id)
            .map(|i| i.chain.clone())
    }

    /// Per-instance handles of a logical stage, ordered by instance id.
    pub fn instance_handles(&self, handle: StageHandle) -> Vec<(InstanceId, StageHandle)> {
        let state = self.state.lock();
        let Some(index) = state.position(handle) else {
            return Vec::new();
        };
        let mut handles: Vec<_> = state.entries[index]
            .per_instance
            .iter()
            .map(|(id, h)| (*id, *h))
            .collect();
        handles.sort_by_key(|(id, _)| *id);
        handles
    }

    /// Create a chain for a new instance, seed it with the logical list and
    /// attach it at `tap`. On failure the instance is dropped again.
    pub fn attach_new_instance(&self, graph: Arc<dyn Graph>, tap: TapId) -> Result<TapId> {
        let (id, chain) = {
            let mut state = self.state.lock();
            let id = InstanceId(state.next_instance);
            state.next_instance += 1;

            let chain = Chain::new(format!("{}#{}", self.name, id));
            for entry in state.entries.iter_mut() {
                let handle = chain.append(entry.stage.clone());
                entry.per_instance.insert(id, handle);
            }
            state.instances.push(Instance {
                id,
                chain: chain.clone(),
                graph_id: graph.id(),
                applied_tap: tap,
            });
            (id, chain)
        };

        match chain.attach(graph.clone(), tap) {
            Ok(out_tap) => {
                tracing::info!(
                    "Coordinator '{}': instance {} attached to '{}'",
                    self.name,
                    id,
                    graph.name()
                );
                Ok(out_tap)
            }
            Err(e) => {
                tracing::warn!(
                    "Coordinator '{}': instance {} failed to attach: {}",
                    self.name,
                    id,
                    e
                );
                self.deregister(id);
                Err(e)
            }
        }
    }

    /// Detach the instance attached to `graph` whose free end is `tap`.
    ///
    /// The instance is unregistered first and its chain detached without the
    /// coordinator lock, so a barrier already running on that chain may call
    /// back into the coordinator. Later logical edits no longer reach it.
    pub fn detach_instance(&self, graph: &dyn Graph, tap: TapId) -> Result<TapId> {
        let (instance, handles) = {
            let mut state = self.state.lock();
            let index = state
                .instances
                .iter()
                .position(|i| i.matches(graph.id(), tap))
                .ok_or(ChainError::UnknownInstance {
                    graph: graph.id(),
                    tap,
                })?;

            let instance = state.instances.remove(index);
            let handles: Vec<(StageHandle, StageHandle)> = state
                .entries
                .iter_mut()
                .filter_map(|entry| {
                    let own = entry.per_instance.remove(&instance.id)?;
                    Some((entry.handle, own))
                })
                .collect();
            (instance, handles)
        };

        match instance.chain.detach(graph, tap) {
            Ok(result) => {
                tracing::info!(
                    "Coordinator '{}': instance {} detached from '{}'",
                    self.name,
                    instance.id,
                    graph.name()
                );
                Ok(result)
            }
            Err(e) => {
                tracing::warn!(
                    "Coordinator '{}': instance {} failed to detach, keeping it: {}",
                    self.name,
                    instance.id,
                    e
                );
                self.reregister(instance, handles);
                Err(e)
            }
        }
    }

    /// Put back an instance taken out by a failed detach. Logical stages removed
    /// in the meantime are not restored.
    fn reregister(&self, instance: Instance, handles: Vec<(StageHandle, StageHandle)>) {
        let mut state = self.state.lock();
        for (logical, own) in handles {
            if let Some(index) = state.position(logical) {
                state.entries[index].per_instance.insert(instance.id, own);
            }
        }
        state.instances.push(instance);
        state.instances.sort_by_key(|i| i.id);
    }

    fn deregister(&self, id: InstanceId) {
        let mut state = self.state.lock();
        state.instances.retain(|i| i.id != id);
        for entry in state.entries.iter_mut() {
            entry.per_instance.remove(&id);
        }
    }

    fn new_entry(&self, state: &mut CoordinatorState, stage: Arc<dyn Stage>) -> LogicalEntry {
        let handle = StageHandle::new(self.owner, state.next_index);
        state.next_index += 1;
        LogicalEntry {
            handle,
            stage,
            per_instance: HashMap::new(),
        }
    }

    /// Insert relative to `reference` on every instance that has it.
    fn insert_relative(&self, stage: Arc<dyn Stage>, reference: StageHandle, after: bool) -> Option<StageHandle> {
        let mut state = self.state.lock();
        let index = state.position(reference)?;
        let mut entry = self.new_entry(&mut state, stage.clone());

        for instance in &state.instances {
            let Some(&target) = state.entries[index].per_instance.get(&instance.id) else {
                tracing::debug!(
                    "Coordinator '{}': instance {} lacks {:?}, edit not mirrored",
                    self.name,
                    instance.id,
                    reference
                );
                continue;
            };
            let inserted = if after {
                instance.chain.insert_after(stage.clone(), target)
            } else {
                instance.chain.insert_before(stage.clone(), target)
            };
            if let Some(handle) = inserted {
                entry.per_instance.insert(instance.id, handle);
            }
        }

        let handle = entry.handle;
        let position = if after { index + 1 } else { index };
        state.entries.insert(position, entry);
        Some(handle)
    }
}

impl FilterChain for Coordinator {
    fn list(&self) -> Vec<StageHandle> {
        self.state.lock().entries.iter().map(|e| e.handle).collect()
    }

    fn insert_at(&self, stage: Arc<dyn Stage>, position: usize) -> StageHandle {
        let mut state = self.state.lock();
        let position = position.min(state.entries.len());
        let mut entry = self.new_entry(&mut state, stage.clone());

        for instance in &state.instances {
            // Slot on this instance: the preceding logical entries it actually has.
            let slot = state.entries[..position]
                .iter()
                .filter(|e| e.per_instance.contains_key(&instance.id))
                .count();
            let handle = instance.chain.insert_at(stage.clone(), slot);
            entry.per_instance.insert(instance.id, handle);
        }

        let handle = entry.handle;
        state.entries.insert(position, entry);
        handle
    }

    fn insert_before(&self, stage: Arc<dyn Stage>, reference: StageHandle) -> Option<StageHandle> {
        self.insert_relative(stage, reference, false)
    }

    fn insert_after(&self, stage: Arc<dyn Stage>, reference: StageHandle) -> Option<StageHandle> {
        self.insert_relative(stage, reference, true)
    }

    fn replace(&self, stage: Arc<dyn Stage>, old: StageHandle) -> Option<StageHandle> {
        let mut state = self.state.lock();
        let index = state.position(old)?;
        let mut entry = self.new_entry(&mut state, stage.clone());

        for instance in &state.instances {
            let Some(&target) = state.entries[index].per_instance.get(&instance.id) else {
                continue;
            };
            if let Some(handle) = instance.chain.replace(stage.clone(), target) {
                entry.per_instance.insert(instance.id, handle);
            }
        }

        let handle = entry.handle;
        state.entries[index] = entry;
        Some(handle)
    }

    fn remove(&self, handle: StageHandle) -> bool {
        let mut state = self.state.lock();
        let Some(index) = state.position(handle) else {
            return false;
        };
        let entry = state.entries.remove(index);

        for instance in &state.instances {
            if let Some(&target) = entry.per_instance.get(&instance.id) {
                instance.chain.remove(target);
            }
        }
        true
    }

    fn get_stage(&self, handle: StageHandle) -> Option<Arc<dyn Stage>> {
        let state = self.state.lock();
        state.position(handle).map(|i| state.entries[i].stage.clone())
    }

    fn attach(&self, graph: Arc<dyn Graph>, tap: TapId) -> Result<TapId> {
        self.attach_new_instance(graph, tap)
    }

    fn detach(&self, graph: &dyn Graph, tap: TapId) -> Result<TapId> {
        self.detach_instance(graph, tap)
    }

    fn handle_message(&self, message: &ControlMessage) -> bool {
        let chains: Vec<Chain> = self
            .state
            .lock()
            .instances
            .iter()
            .map(|i| i.chain.clone())
            .collect();
        chains.iter().any(|chain| chain.handle_message(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{ElementSpec, MemoryGraph};
    use crate::stage::ElementStage;

    fn stage(name: &str) -> Arc<dyn Stage> {
        Arc::new(ElementStage::new(name, "identity"))
    }

    fn peer(name: &str) -> (Arc<MemoryGraph>, TapId) {
        let graph = Arc::new(MemoryGraph::new(name));
        let src = graph.add_element(ElementSpec::source("src")).unwrap();
        (graph, TapId::output(src, 0))
    }

    #[test]
    fn test_logical_edits_without_instances() {
        let coordinator = Coordinator::new("c");
        let a = coordinator.append(stage("a"));
        let b = coordinator.append(stage("b"));
        let c = coordinator.insert_before(stage("c"), b).unwrap();
        assert_eq!(coordinator.list(), vec![a, c, b]);
        assert!(coordinator.remove(c));
        assert!(!coordinator.remove(c));
        assert_eq!(coordinator.get_stage(a).unwrap().name(), "a");
    }

    #[test]
    fn test_instance_is_seeded_with_logical_list() {
        let coordinator = Coordinator::new("c");
        coordinator.append(stage("a"));
        coordinator.append(stage("b"));

        let (graph, tap) = peer("p1");
        coordinator.attach_new_instance(graph.clone(), tap).unwrap();
        assert_eq!(coordinator.instance_count(), 1);
        assert_eq!(graph.path_from(tap), vec!["a", "b"]);
    }

    #[test]
    fn test_failed_attach_deregisters() {
        let coordinator = Coordinator::new("c");
        coordinator.append(stage("a"));
        let graph = Arc::new(MemoryGraph::new("empty"));
        let tap = TapId::output(crate::graph::ElementId(3), 0);

        assert!(coordinator.attach_new_instance(graph, tap).is_err());
        assert_eq!(coordinator.instance_count(), 0);
        let handle = coordinator.list()[0];
        assert!(coordinator.instance_handles(handle).is_empty());
    }

    #[test]
    fn test_detach_unknown_instance() {
        let coordinator = Coordinator::new("c");
        let (graph, tap) = peer("p1");
        let err = coordinator.detach_instance(graph.as_ref(), tap).unwrap_err();
        assert!(matches!(err, ChainError::UnknownInstance { .. }));
    }

    #[test]
    fn test_insert_at_maps_to_instance_slot() {
        let coordinator = Coordinator::new("c");
        let a = coordinator.append(stage("a"));
        let (graph, tap) = peer("p1");
        coordinator.attach_new_instance(graph.clone(), tap).unwrap();
        let b = coordinator.append(stage("b"));
        coordinator.insert_at(stage("mid"), 1);

        assert_eq!(graph.path_from(tap), vec!["a", "mid", "b"]);
        assert_eq!(coordinator.instance_handles(a).len(), 1);
        assert_eq!(coordinator.instance_handles(b).len(), 1);
    }
}
