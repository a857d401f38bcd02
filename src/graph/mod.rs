//! Host graph abstraction.
//!
//! The chain manager never owns the stream graph it mutates. It consumes a small
//! set of primitives from the host pipeline library through the [`Graph`] trait:
//! element creation/removal for stages, tap linking for splicing, and a
//! data-flow barrier for quiescent mutation.
//!
//! # Architecture
//!
//! ```text
//! [source] ──► tap ──► [stage A] ──► [stage B] ──► out_tap ──► [sink]
//!               ▲
//!          barrier here: no data in flight past this point while the
//!          mutation engine rewires the chain
//! ```
//!
//! [`MemoryGraph`] is an in-process implementation used by the demo binary and
//! the test suite.

pub mod error;
pub mod id;
pub mod memory;
pub mod tap;

pub use error::{GraphError, GraphResult};
pub use id::{BarrierId, ElementId, GraphId, TapId};
pub use memory::{BarrierMode, GraphStats, MemoryGraph};
pub use tap::{ElementSpec, TapDirection};

/// Callback invoked by the host once no data is in flight across a barrier tap.
///
/// The host lifts the barrier when the callback returns.
pub type QuiescentCallback = Box<dyn FnOnce() + Send + 'static>;

/// Primitives a host pipeline must provide.
///
/// Implementations must be callable from any thread and must never hold an
/// internal lock while invoking a [`QuiescentCallback`].
pub trait Graph: Send + Sync {
    /// Process-unique identity of this graph.
    fn id(&self) -> GraphId;

    /// Human-readable name of this graph.
    fn name(&self) -> &str;

    /// Create an element with unlinked taps.
    fn add_element(&self, spec: ElementSpec) -> GraphResult<ElementId>;

    /// Destroy an element, unlinking all of its taps first.
    fn remove_element(&self, element: ElementId) -> GraphResult<()>;

    /// Name the element was created with.
    fn element_name(&self, element: ElementId) -> Option<String>;

    /// Look up tap `index` on one side of an element.
    fn element_tap(&self, element: ElementId, direction: TapDirection, index: u16) -> Option<TapId>;

    /// Whether the tap exists (its element is alive and declares it).
    fn contains_tap(&self, tap: TapId) -> bool;

    /// The element owning a live tap.
    fn tap_owner(&self, tap: TapId) -> Option<ElementId> {
        self.contains_tap(tap).then(|| tap.element())
    }

    /// The tap currently linked to `tap`, if any.
    fn peer_of(&self, tap: TapId) -> Option<TapId>;

    /// Link an output tap to an input tap (in either argument order).
    fn link(&self, a: TapId, b: TapId) -> GraphResult<()>;

    /// Break the link at `tap`, returning the former peer.
    fn unlink(&self, tap: TapId) -> Option<TapId>;

    /// Ask the host to call `on_quiescent` once no data is in flight across `tap`.
    fn request_barrier(&self, tap: TapId, on_quiescent: QuiescentCallback) -> GraphResult<BarrierId>;

    /// Drop a barrier that has not fired yet, reopening the data path.
    ///
    /// Returns false when the barrier already fired or never existed.
    fn cancel_barrier(&self, barrier: BarrierId) -> bool;
}

/// The tap linked to `tap`, if any.
pub fn peer_of(graph: &dyn Graph, tap: TapId) -> Option<TapId> {
    graph.peer_of(tap)
}

/// Unlink `tap` from its peer and return the peer.
pub fn unsplice(graph: &dyn Graph, tap: TapId) -> Option<TapId> {
    graph.unlink(tap)
}

/// Insert the `sub_input..sub_output` subgraph between `tap` and its current peer.
///
/// On failure every link is restored to what it was before the call.
pub fn splice(graph: &dyn Graph, tap: TapId, sub_input: TapId, sub_output: TapId) -> bool {
    let peer = graph.unlink(tap);

    if let Err(e) = graph.link(tap, sub_input) {
        tracing::warn!("Splice at {:?} failed to link subgraph input: {}", tap, e);
        restore(graph, tap, peer);
        return false;
    }

    if let Some(peer) = peer {
        if let Err(e) = graph.link(sub_output, peer) {
            tracing::warn!("Splice at {:?} failed to link subgraph output: {}", tap, e);
            graph.unlink(tap);
            restore(graph, tap, Some(peer));
            return false;
        }
    }

    true
}

fn restore(graph: &dyn Graph, tap: TapId, peer: Option<TapId>) {
    if let Some(peer) = peer {
        if let Err(e) = graph.link(tap, peer) {
            tracing::error!("Failed to restore link {:?} -> {:?}: {}", tap, peer, e);
        }
    }
}
