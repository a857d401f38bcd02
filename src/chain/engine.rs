//! Mutation engine.
//!
//! Runs as the body of a barrier callback: while no data is in flight past the
//! chain's attach tap, queued modifications are replayed against the live
//! graph in FIFO order. For each one the engine
//!
//! 1. finds the splice point: the tap feeding the next applied stage in walk
//!    order (or the chain's free end), or the output of the stage being removed
//!    or replaced;
//! 2. unlinks that tap from its peer;
//! 3. reverts and/or applies stages at it;
//! 4. relinks whatever tap is now free to the peer;
//! 5. records the moved tap on the successor (or as the new free end).
//!
//! A failed apply degrades the handle to "not applied". A stage whose revert
//! leaves its elements linked is marked stuck: it keeps its slot in the
//! applied list and its recorded taps, and the path is relinked through it.
//! The data path is relinked in every case.
//!
//! Graph and stage calls run with the chain lock released. `in_surgery` keeps
//! other mutators (attach, detach, a second barrier) out meanwhile; list edits
//! made during surgery are appended to the queue and drained by this loop.

use crate::chain::handle::{AppliedTaps, StageHandle};
use crate::chain::manager::Chain;
use crate::chain::modification::Modification;
use crate::chain::state::ChainState;
use crate::graph::{unsplice, Graph, TapId};
use crate::stage::Stage;
use parking_lot::MutexGuard;

type StateGuard<'a> = MutexGuard<'a, ChainState>;

impl Chain {
    /// Drain the modification queue. Called from the barrier callback.
    pub(crate) fn run_barrier(&self, epoch: u64) {
        let mut state = self.inner.state.lock();
        if state.barrier.epoch == epoch {
            state.barrier.pending = false;
            state.barrier.id = None;
        }
        if state.in_surgery {
            return;
        }
        let Some(graph) = state.attachment.as_ref().map(|a| a.graph.clone()) else {
            return;
        };

        state.in_surgery = true;
        let mut count = 0usize;
        while let Some(modification) = state.modifications.pop_front() {
            tracing::debug!("Chain '{}': applying {:?}", self.inner.name, modification);
            match modification {
                Modification::Insert { handle, position } => {
                    let slot = state.applied_slot(position);
                    self.splice_in(&mut state, graph.as_ref(), handle, slot)
                }
                Modification::Remove { handle } => {
                    self.splice_out(&mut state, graph.as_ref(), handle)
                }
                Modification::Replace { new, old } => {
                    self.swap(&mut state, graph.as_ref(), new, old)
                }
            }
            count += 1;
        }
        self.finish_surgery(&mut state);

        if count > 0 {
            tracing::debug!(
                "Chain '{}': barrier drained {} modification(s)",
                self.inner.name,
                count
            );
        }
    }

    /// Apply the stage behind `handle` at applied slot `position`.
    fn splice_in(&self, state: &mut StateGuard<'_>, graph: &dyn Graph, handle: StageHandle, position: usize) {
        let position = position.min(state.applied.len());
        let Some(stage) = state.stage(handle) else {
            tracing::warn!("Chain '{}': {:?} vanished before insert", self.inner.name, handle);
            return;
        };
        let Some((successor, point)) = splice_point(state, position) else {
            return;
        };

        let (taps, free) = MutexGuard::unlocked(state, || {
            let peer = unsplice(graph, point);
            let output = stage.apply(graph, point);
            if output.is_none() {
                tracing::warn!(
                    "Chain '{}': stage '{}' failed to apply at {:?}",
                    self.inner.name,
                    stage.name(),
                    point
                );
            }
            let free = output.unwrap_or(point);
            self.relink(graph, free, peer);
            (output.map(|output| AppliedTaps { input: point, output }), free)
        });

        state.set_taps(handle, taps);
        if taps.is_some() {
            state.retarget(successor, free);
        }
        state.applied.insert(position, handle);
    }

    /// Take the stage behind `handle` out of the live path.
    fn splice_out(&self, state: &mut StateGuard<'_>, graph: &dyn Graph, handle: StageHandle) {
        let Some(index) = state.applied_position(handle) else {
            state.release(handle);
            return;
        };

        if let (Some(stage), Some(taps)) = (state.stage(handle), state.taps(handle)) {
            let (successor, _) = state.walk_successor_of(index).unzip();
            let removed = MutexGuard::unlocked(state, || {
                let peer = unsplice(graph, taps.output);
                let removed = self.revert_stage(graph, stage.as_ref(), taps);
                let free = if removed { taps.input } else { taps.output };
                self.relink(graph, free, peer);
                removed
            });
            if !removed {
                state.stuck.insert(handle);
                return;
            }
            state.retarget(successor, taps.input);
        }

        state.applied.remove(index);
        state.set_taps(handle, None);
        state.release(handle);
    }

    /// Revert `old` and apply `new` at the same tap, breaking the downstream
    /// link once.
    fn swap(&self, state: &mut StateGuard<'_>, graph: &dyn Graph, new: StageHandle, old: StageHandle) {
        let Some(index) = state.applied_position(old) else {
            tracing::warn!(
                "Chain '{}': replaced {:?} is not applied, inserting {:?} at the end",
                self.inner.name,
                old,
                new
            );
            let end = state.applied.len();
            self.splice_in(state, graph, new, end);
            state.release(old);
            return;
        };

        let (Some(old_stage), Some(old_taps)) = (state.stage(old), state.taps(old)) else {
            // Nothing of `old` is in the graph: a plain insert in its slot.
            state.applied.remove(index);
            state.release(old);
            self.splice_in(state, graph, new, index);
            return;
        };
        let Some(new_stage) = state.stage(new) else {
            return;
        };
        let (successor, _) = state.walk_successor_of(index).unzip();

        let outcome = MutexGuard::unlocked(state, || {
            let peer = unsplice(graph, old_taps.output);
            if !self.revert_stage(graph, old_stage.as_ref(), old_taps) {
                self.relink(graph, old_taps.output, peer);
                return None;
            }

            let output = new_stage.apply(graph, old_taps.input);
            if output.is_none() {
                tracing::warn!(
                    "Chain '{}': replacement '{}' failed to apply at {:?}",
                    self.inner.name,
                    new_stage.name(),
                    old_taps.input
                );
            }
            let free = output.unwrap_or(old_taps.input);
            self.relink(graph, free, peer);
            Some((
                output.map(|output| AppliedTaps {
                    input: old_taps.input,
                    output,
                }),
                free,
            ))
        });

        let Some((taps, free)) = outcome else {
            // `old` still sits in the path; `new` takes the logical slot after it
            // without being applied.
            tracing::warn!(
                "Chain '{}': {:?} left unapplied, '{}' could not be taken out",
                self.inner.name,
                new,
                old_stage.name()
            );
            state.stuck.insert(old);
            state.applied.insert(index + 1, new);
            return;
        };

        state.applied[index] = new;
        state.set_taps(new, taps);
        state.set_taps(old, None);
        state.retarget(successor, free);
        state.release(old);
    }

    /// Revert `stage` and report whether it left the graph. `taps.output` must
    /// already be unlinked; a stage that is still linked at `taps.input`
    /// afterwards is stuck.
    fn revert_stage(&self, graph: &dyn Graph, stage: &dyn Stage, taps: AppliedTaps) -> bool {
        let reverted = stage.revert(graph, taps.output);
        if reverted != Some(taps.input) {
            tracing::warn!(
                "Chain '{}': stage '{}' reverted to {:?}, expected {:?}",
                self.inner.name,
                stage.name(),
                reverted,
                taps.input
            );
        }
        if graph.peer_of(taps.input).is_some() {
            tracing::warn!(
                "Chain '{}': stage '{}' is still linked at {:?}, keeping it in the path",
                self.inner.name,
                stage.name(),
                taps.input
            );
            return false;
        }
        true
    }

    fn relink(&self, graph: &dyn Graph, free: TapId, peer: Option<TapId>) {
        let Some(peer) = peer else {
            return;
        };
        if let Err(e) = graph.link(free, peer) {
            tracing::error!(
                "Chain '{}': failed to relink {:?} -> {:?}: {}",
                self.inner.name,
                free,
                peer,
                e
            );
        }
    }
}

/// The walk successor of applied slot `position` and the tap to splice at.
fn splice_point(state: &ChainState, position: usize) -> Option<(Option<StageHandle>, TapId)> {
    if let Some((handle, taps)) = state.walk_successor(position) {
        return Some((Some(handle), taps.input));
    }
    state.attachment.as_ref().map(|a| (None, a.out_tap))
}
