//! Live filter chains.
//!
//! A [`Chain`] is an ordered list of stages attached at one tap of a host
//! graph. Edits made while the chain is attached are queued as modifications
//! and replayed by the mutation engine inside a data-flow barrier, so stages
//! can be inserted, removed and replaced while data is flowing.
//!
//! # Architecture
//!
//! ```text
//! caller ──► insert/remove/replace ──► filters (logical order, updated now)
//!                                   └─► modification queue ──► request_barrier
//!
//! host data-flow thread ──► barrier callback ──► engine drains the queue:
//!                                                unsplice, apply/revert, relink
//! ```
//!
//! # Direction
//!
//! A chain attached at an output tap grows downstream (towards consumers); one
//! attached at an input tap grows upstream. The direction is fixed per
//! attachment and only affects the order stages are walked in: the logical
//! order always matches the order data visits the stages.

mod engine;
pub mod handle;
mod manager;
mod modification;
mod state;

pub use handle::{AppliedTaps, OwnerId, StageHandle};
pub use manager::Chain;

use crate::error::Result;
use crate::graph::{Graph, TapDirection, TapId};
use crate::message::ControlMessage;
use crate::stage::Stage;
use std::sync::Arc;

/// Which way a chain grows from its attach tap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainDirection {
    /// Attached at a producer (output) tap.
    Downstream,
    /// Attached at a consumer (input) tap.
    Upstream,
}

impl ChainDirection {
    pub fn from_tap(tap: TapId) -> Self {
        match tap.direction() {
            TapDirection::Output => ChainDirection::Downstream,
            TapDirection::Input => ChainDirection::Upstream,
        }
    }
}

/// Where a chain is in its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Unattached,
    Attached,
    Detached,
}

/// The list API shared by [`Chain`] and [`crate::Coordinator`].
///
/// List operations never fail: an unknown reference handle yields `None` or
/// `false` and leaves the list untouched. While attached, edits return as soon
/// as the logical list is updated; the live graph catches up at the next
/// barrier.
pub trait FilterChain: Send + Sync {
    /// Snapshot of the logical stage order.
    fn list(&self) -> Vec<StageHandle>;

    /// Insert at `position`, clamped to the list length.
    fn insert_at(&self, stage: Arc<dyn Stage>, position: usize) -> StageHandle;

    fn prepend(&self, stage: Arc<dyn Stage>) -> StageHandle {
        self.insert_at(stage, 0)
    }

    fn append(&self, stage: Arc<dyn Stage>) -> StageHandle {
        self.insert_at(stage, usize::MAX)
    }

    /// Insert directly before `reference`; `None` if it is not in the list.
    fn insert_before(&self, stage: Arc<dyn Stage>, reference: StageHandle) -> Option<StageHandle>;

    /// Insert directly after `reference`; `None` if it is not in the list.
    fn insert_after(&self, stage: Arc<dyn Stage>, reference: StageHandle) -> Option<StageHandle>;

    /// Put `stage` where `old` is, returning the new handle.
    fn replace(&self, stage: Arc<dyn Stage>, old: StageHandle) -> Option<StageHandle>;

    fn remove(&self, handle: StageHandle) -> bool;

    fn get_stage(&self, handle: StageHandle) -> Option<Arc<dyn Stage>>;

    /// Splice every stage in at `tap`, returning the chain's free end.
    fn attach(&self, graph: Arc<dyn Graph>, tap: TapId) -> Result<TapId>;

    /// Take every stage out again. `tap` must be the current free end.
    fn detach(&self, graph: &dyn Graph, tap: TapId) -> Result<TapId>;

    /// Offer a control message to applied stages until one claims it.
    fn handle_message(&self, message: &ControlMessage) -> bool;
}
