//! Lock-protected chain state and the bookkeeping helpers the manager and the
//! engine share.

use crate::chain::handle::{AppliedTaps, HandleEntry, OwnerId, StageHandle};
use crate::chain::modification::Modification;
use crate::chain::{ChainDirection, Lifecycle};
use crate::graph::{BarrierId, Graph, TapId};
use crate::stage::Stage;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

/// The live graph a chain is spliced into.
pub(crate) struct Attachment {
    pub graph: Arc<dyn Graph>,
    /// Tap passed to `attach`.
    pub applied_tap: TapId,
    /// Current free end of the chain.
    pub out_tap: TapId,
    pub direction: ChainDirection,
}

#[derive(Debug, Default)]
pub(crate) struct BarrierState {
    pub pending: bool,
    /// Bumped on every request so a stale callback can be told apart.
    pub epoch: u64,
    pub id: Option<BarrierId>,
}

pub(crate) struct ChainState {
    pub owner: OwnerId,
    pub entries: HashMap<u32, HandleEntry>,
    pub next_index: u32,
    /// Logical order.
    pub filters: Vec<StageHandle>,
    /// What the live graph holds, in logical order, failed applies included.
    pub applied: Vec<StageHandle>,
    /// Applied stages whose revert left elements linked in. They stay in
    /// `applied` with their recorded taps until detach.
    pub stuck: HashSet<StageHandle>,
    pub attachment: Option<Attachment>,
    pub modifications: VecDeque<Modification>,
    pub barrier: BarrierState,
    /// Set while the engine, attach or detach rewires the graph unlocked.
    pub in_surgery: bool,
    pub lifecycle: Lifecycle,
}

impl ChainState {
    pub fn new(owner: OwnerId) -> Self {
        Self {
            owner,
            entries: HashMap::new(),
            next_index: 0,
            filters: Vec::new(),
            applied: Vec::new(),
            stuck: HashSet::new(),
            attachment: None,
            modifications: VecDeque::new(),
            barrier: BarrierState::default(),
            in_surgery: false,
            lifecycle: Lifecycle::Unattached,
        }
    }

    /// Create an entry for `stage` and return its handle.
    pub fn allocate(&mut self, stage: Arc<dyn Stage>) -> StageHandle {
        let index = self.next_index;
        self.next_index += 1;
        self.entries.insert(index, HandleEntry::new(stage));
        StageHandle::new(self.owner, index)
    }

    pub fn entry(&self, handle: StageHandle) -> Option<&HandleEntry> {
        if handle.owner() != self.owner {
            return None;
        }
        self.entries.get(&handle.index())
    }

    pub fn entry_mut(&mut self, handle: StageHandle) -> Option<&mut HandleEntry> {
        if handle.owner() != self.owner {
            return None;
        }
        self.entries.get_mut(&handle.index())
    }

    pub fn stage(&self, handle: StageHandle) -> Option<Arc<dyn Stage>> {
        self.entry(handle).map(|entry| entry.stage.clone())
    }

    pub fn taps(&self, handle: StageHandle) -> Option<AppliedTaps> {
        self.entry(handle).and_then(|entry| entry.taps)
    }

    pub fn set_taps(&mut self, handle: StageHandle, taps: Option<AppliedTaps>) {
        if let Some(entry) = self.entry_mut(handle) {
            entry.taps = taps;
        }
    }

    pub fn position(&self, handle: StageHandle) -> Option<usize> {
        self.filters.iter().position(|h| *h == handle)
    }

    pub fn applied_position(&self, handle: StageHandle) -> Option<usize> {
        self.applied.iter().position(|h| *h == handle)
    }

    /// Applied index of logical slot `position`, skipping stuck stages.
    pub fn applied_slot(&self, position: usize) -> usize {
        self.applied
            .iter()
            .enumerate()
            .filter(|(_, h)| !self.stuck.contains(*h))
            .nth(position)
            .map_or(self.applied.len(), |(index, _)| index)
    }

    pub fn is_attached(&self) -> bool {
        self.attachment.is_some()
    }

    pub fn direction(&self) -> Option<ChainDirection> {
        self.attachment.as_ref().map(|a| a.direction)
    }

    /// Drop `handle`'s entry once nothing refers to it any more.
    pub fn release(&mut self, handle: StageHandle) {
        let referenced = self.filters.contains(&handle)
            || self.applied.contains(&handle)
            || self.modifications.iter().any(|m| m.references(handle));
        if !referenced && self.entries.remove(&handle.index()).is_some() {
            tracing::trace!("Released {:?}", handle);
        }
    }

    /// Drop every entry not in the logical list.
    pub fn release_all_unlisted(&mut self) {
        let listed: HashSet<u32> = self.filters.iter().map(|h| h.index()).collect();
        self.entries.retain(|index, _| listed.contains(index));
    }

    /// The first applied handle, walking away from the attach tap, that would
    /// come after a stage placed at applied slot `boundary`.
    pub fn walk_successor(&self, boundary: usize) -> Option<(StageHandle, AppliedTaps)> {
        let boundary = boundary.min(self.applied.len());
        let with_taps = |h: &StageHandle| self.taps(*h).map(|taps| (*h, taps));
        match self.direction()? {
            ChainDirection::Downstream => self.applied[boundary..].iter().find_map(with_taps),
            ChainDirection::Upstream => self.applied[..boundary].iter().rev().find_map(with_taps),
        }
    }

    /// The walk successor of the handle at applied index `index`.
    pub fn walk_successor_of(&self, index: usize) -> Option<(StageHandle, AppliedTaps)> {
        match self.direction()? {
            ChainDirection::Downstream => self.walk_successor(index + 1),
            ChainDirection::Upstream => self.walk_successor(index),
        }
    }

    /// Record that the tap feeding `successor` (or the chain's free end when
    /// there is no successor) is now `tap`.
    pub fn retarget(&mut self, successor: Option<StageHandle>, tap: TapId) {
        match successor {
            Some(handle) => {
                if let Some(taps) = self.entry_mut(handle).and_then(|e| e.taps.as_mut()) {
                    taps.input = tap;
                }
            }
            None => {
                if let Some(attachment) = self.attachment.as_mut() {
                    attachment.out_tap = tap;
                }
            }
        }
    }

    /// Applied handles in the order stages are walked away from the attach tap.
    pub fn walk_order(&self) -> Vec<StageHandle> {
        match self.direction() {
            Some(ChainDirection::Upstream) => self.applied.iter().rev().copied().collect(),
            _ => self.applied.clone(),
        }
    }
}
