//! In-process host graph.
//!
//! `MemoryGraph` keeps elements, taps and links in plain vectors and maps behind
//! a single lock. Barriers either fire immediately (an idle pipeline) or are
//! queued until the data-flow thread calls [`MemoryGraph::run_pending_barriers`],
//! which models the streaming thread reaching the blocked tap.
//!
//! Every link and unlink is counted per tap so tests can observe exactly how
//! often the data path was broken.

use crate::graph::error::{GraphError, GraphResult};
use crate::graph::id::{BarrierId, ElementId, GraphId, TapId};
use crate::graph::tap::{ElementSpec, TapDirection};
use crate::graph::{Graph, QuiescentCallback};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Maximum taps per side (limited by the `TapId` encoding).
const MAX_TAPS: u16 = 4096;

/// When barrier callbacks fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BarrierMode {
    /// Fire synchronously inside `request_barrier` (no data ever in flight).
    #[default]
    Immediate,
    /// Queue until `run_pending_barriers` is called by the data-flow thread.
    Deferred,
}

/// Counters describing graph activity.
#[derive(Debug, Clone, Default)]
pub struct GraphStats {
    pub elements_added: u64,
    pub elements_removed: u64,
    pub links: u64,
    pub unlinks: u64,
    pub barriers_requested: u64,
    pub barriers_fired: u64,
    pub barriers_cancelled: u64,
    link_counts: HashMap<TapId, u64>,
    unlink_counts: HashMap<TapId, u64>,
    barrier_taps: Vec<TapId>,
}

impl GraphStats {
    /// How many times `tap` was linked.
    pub fn links_of(&self, tap: TapId) -> u64 {
        self.link_counts.get(&tap).copied().unwrap_or(0)
    }

    /// How many times `tap` was unlinked.
    pub fn unlinks_of(&self, tap: TapId) -> u64 {
        self.unlink_counts.get(&tap).copied().unwrap_or(0)
    }

    /// Taps barriers were requested on, oldest first.
    pub fn barrier_taps(&self) -> &[TapId] {
        &self.barrier_taps
    }
}

/// A slot holding one element's description.
struct ElementSlot {
    spec: ElementSpec,
    /// Whether this element has been removed (slot is empty).
    deleted: bool,
}

struct PendingBarrier {
    id: BarrierId,
    tap: TapId,
    callback: QuiescentCallback,
}

struct GraphState {
    elements: Vec<ElementSlot>,
    /// Links stored in both directions.
    links: HashMap<TapId, TapId>,
    barriers: Vec<PendingBarrier>,
    next_barrier: u64,
    mode: BarrierMode,
    stats: GraphStats,
}

impl GraphState {
    fn slot(&self, element: ElementId) -> Option<&ElementSlot> {
        self.elements
            .get(element.index())
            .filter(|slot| !slot.deleted)
    }

    fn has_tap(&self, tap: TapId) -> bool {
        self.slot(tap.element())
            .map(|slot| tap.index() < slot.spec.tap_count(tap.direction()))
            .unwrap_or(false)
    }

    fn unlink(&mut self, tap: TapId) -> Option<TapId> {
        let peer = self.links.remove(&tap)?;
        self.links.remove(&peer);
        self.stats.unlinks += 1;
        *self.stats.unlink_counts.entry(tap).or_default() += 1;
        *self.stats.unlink_counts.entry(peer).or_default() += 1;
        Some(peer)
    }
}

/// In-memory stream graph.
pub struct MemoryGraph {
    id: GraphId,
    name: String,
    state: Mutex<GraphState>,
}

impl MemoryGraph {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_barrier_mode(name, BarrierMode::Immediate)
    }

    pub fn with_barrier_mode(name: impl Into<String>, mode: BarrierMode) -> Self {
        Self {
            id: GraphId::next(),
            name: name.into(),
            state: Mutex::new(GraphState {
                elements: Vec::new(),
                links: HashMap::new(),
                barriers: Vec::new(),
                next_barrier: 1,
                mode,
                stats: GraphStats::default(),
            }),
        }
    }

    pub fn barrier_mode(&self) -> BarrierMode {
        self.state.lock().mode
    }

    /// Switch barrier mode. Already-queued barriers stay queued.
    pub fn set_barrier_mode(&self, mode: BarrierMode) {
        self.state.lock().mode = mode;
    }

    /// Number of barriers waiting for the data-flow thread.
    pub fn pending_barriers(&self) -> usize {
        self.state.lock().barriers.len()
    }

    /// Fire every queued barrier callback, returning how many fired.
    ///
    /// Barriers requested by the callbacks themselves stay queued for the next call.
    pub fn run_pending_barriers(&self) -> usize {
        let pending = {
            let mut state = self.state.lock();
            let pending = std::mem::take(&mut state.barriers);
            state.stats.barriers_fired += pending.len() as u64;
            pending
        };

        let count = pending.len();
        for barrier in pending {
            tracing::trace!(
                "Graph '{}': barrier {:?} on {:?} quiescent",
                self.name,
                barrier.id,
                barrier.tap
            );
            (barrier.callback)();
        }
        count
    }

    /// Snapshot of activity counters.
    pub fn stats(&self) -> GraphStats {
        self.state.lock().stats.clone()
    }

    /// Number of live elements.
    pub fn element_count(&self) -> usize {
        self.state
            .lock()
            .elements
            .iter()
            .filter(|slot| !slot.deleted)
            .count()
    }

    /// Find a live element by name.
    pub fn find_element(&self, name: &str) -> Option<ElementId> {
        let state = self.state.lock();
        state
            .elements
            .iter()
            .position(|slot| !slot.deleted && slot.spec.name == name)
            .map(|idx| ElementId(idx as u32))
    }

    /// Properties an element was created with.
    pub fn element_spec(&self, element: ElementId) -> Option<ElementSpec> {
        self.state.lock().slot(element).map(|slot| slot.spec.clone())
    }

    /// Names of the elements data visits when leaving `tap`.
    ///
    /// Follows the link at `tap`, then tap 0 on the same side of each element
    /// reached, until an element without such a tap or an unlinked tap.
    /// For an input tap the walk runs against the data flow.
    pub fn path_from(&self, tap: TapId) -> Vec<String> {
        let state = self.state.lock();
        let direction = tap.direction();
        let mut names = Vec::new();
        let mut current = tap;

        // Bounded by the element count so a malformed cycle cannot spin forever.
        for _ in 0..=state.elements.len() {
            let Some(&peer) = state.links.get(&current) else {
                break;
            };
            let element = peer.element();
            let Some(slot) = state.slot(element) else {
                break;
            };
            names.push(slot.spec.name.clone());

            let next = TapId::new(element, direction, 0);
            if !state.has_tap(next) {
                break;
            }
            current = next;
        }
        names
    }
}

impl Graph for MemoryGraph {
    fn id(&self) -> GraphId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn add_element(&self, spec: ElementSpec) -> GraphResult<ElementId> {
        if spec.inputs > MAX_TAPS || spec.outputs > MAX_TAPS {
            return Err(GraphError::TooManyTaps(spec.name));
        }
        let mut state = self.state.lock();
        let id = ElementId(state.elements.len() as u32);
        tracing::trace!("Graph '{}': add element {:?} '{}'", self.name, id, spec.name);
        state.elements.push(ElementSlot {
            spec,
            deleted: false,
        });
        state.stats.elements_added += 1;
        Ok(id)
    }

    fn remove_element(&self, element: ElementId) -> GraphResult<()> {
        let mut state = self.state.lock();
        let (inputs, outputs) = match state.slot(element) {
            Some(slot) => (slot.spec.inputs, slot.spec.outputs),
            None => return Err(GraphError::UnknownElement(element)),
        };

        for index in 0..inputs {
            state.unlink(TapId::input(element, index));
        }
        for index in 0..outputs {
            state.unlink(TapId::output(element, index));
        }

        state.elements[element.index()].deleted = true;
        state.stats.elements_removed += 1;
        tracing::trace!("Graph '{}': removed element {:?}", self.name, element);
        Ok(())
    }

    fn element_name(&self, element: ElementId) -> Option<String> {
        self.state.lock().slot(element).map(|slot| slot.spec.name.clone())
    }

    fn element_tap(&self, element: ElementId, direction: TapDirection, index: u16) -> Option<TapId> {
        let tap = TapId::new(element, direction, index);
        self.state.lock().has_tap(tap).then_some(tap)
    }

    fn contains_tap(&self, tap: TapId) -> bool {
        self.state.lock().has_tap(tap)
    }

    fn peer_of(&self, tap: TapId) -> Option<TapId> {
        self.state.lock().links.get(&tap).copied()
    }

    fn link(&self, a: TapId, b: TapId) -> GraphResult<()> {
        let mut state = self.state.lock();
        if !state.has_tap(a) {
            return Err(GraphError::UnknownTap(a));
        }
        if !state.has_tap(b) {
            return Err(GraphError::UnknownTap(b));
        }
        if a.direction() == b.direction() {
            return Err(GraphError::DirectionMismatch { a, b });
        }
        if a.element() == b.element() {
            return Err(GraphError::SelfLink(a.element()));
        }
        if state.links.contains_key(&a) {
            return Err(GraphError::AlreadyLinked(a));
        }
        if state.links.contains_key(&b) {
            return Err(GraphError::AlreadyLinked(b));
        }

        state.links.insert(a, b);
        state.links.insert(b, a);
        state.stats.links += 1;
        *state.stats.link_counts.entry(a).or_default() += 1;
        *state.stats.link_counts.entry(b).or_default() += 1;
        Ok(())
    }

    fn unlink(&self, tap: TapId) -> Option<TapId> {
        self.state.lock().unlink(tap)
    }

    fn request_barrier(&self, tap: TapId, on_quiescent: QuiescentCallback) -> GraphResult<BarrierId> {
        let (id, immediate) = {
            let mut state = self.state.lock();
            if !state.has_tap(tap) {
                return Err(GraphError::UnknownTap(tap));
            }
            let id = BarrierId(state.next_barrier);
            state.next_barrier += 1;
            state.stats.barriers_requested += 1;
            state.stats.barrier_taps.push(tap);

            match state.mode {
                BarrierMode::Immediate => {
                    state.stats.barriers_fired += 1;
                    (id, Some(on_quiescent))
                }
                BarrierMode::Deferred => {
                    state.barriers.push(PendingBarrier {
                        id,
                        tap,
                        callback: on_quiescent,
                    });
                    (id, None)
                }
            }
        };

        // Lock released: the callback is free to call back into the graph.
        if let Some(callback) = immediate {
            callback();
        }
        Ok(id)
    }

    fn cancel_barrier(&self, barrier: BarrierId) -> bool {
        let mut state = self.state.lock();
        let before = state.barriers.len();
        state.barriers.retain(|pending| pending.id != barrier);
        let cancelled = state.barriers.len() != before;
        if cancelled {
            state.stats.barriers_cancelled += 1;
        }
        cancelled
    }
}
