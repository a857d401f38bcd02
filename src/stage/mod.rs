//! Stage contract.
//!
//! A stage is one unit of processing that knows how to splice its own elements
//! into a host graph at a tap and how to take them out again. Stages are shared
//! through `Arc<dyn Stage>` and hold no reference to the chain that uses them,
//! so one stage object can be applied to many graphs (see `Coordinator`).
//!
//! Built-in stages live in [`stages`]; [`registry`] builds them from chain
//! definitions.

pub mod registry;
pub mod splice;
pub mod stages;

pub use registry::{StageFactory, StageRegistry};
pub use stages::{BinStage, ElementStage, TeeStage};

use crate::graph::{Graph, TapId};
use crate::message::ControlMessage;
use std::fmt;

/// Trait for processing stages managed by a chain.
pub trait Stage: Send + Sync {
    /// Human-readable name of this stage.
    fn name(&self) -> &str;

    /// Splice this stage's elements into `graph` at the free end `tap`.
    ///
    /// Returns the new free end, or `None` when the stage could not be applied
    /// (in which case the graph must be left as it was). Called at most once per
    /// (graph, tap).
    fn apply(&self, graph: &dyn Graph, tap: TapId) -> Option<TapId>;

    /// Remove this stage's elements, given the tap `apply` returned.
    ///
    /// Returns the tap that was originally passed to `apply`.
    fn revert(&self, graph: &dyn Graph, tap: TapId) -> Option<TapId>;

    /// Inspect an out-of-band message. Returns true when the message is consumed.
    fn handle_message(&self, _message: &ControlMessage) -> bool {
        false
    }
}

impl fmt::Debug for dyn Stage + '_ {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Stage({})", self.name())
    }
}
