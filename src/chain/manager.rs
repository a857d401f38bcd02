//! Single-instance chain manager.

use crate::chain::handle::{AppliedTaps, OwnerId, StageHandle};
use crate::chain::modification::Modification;
use crate::chain::state::{Attachment, ChainState};
use crate::chain::{ChainDirection, FilterChain, Lifecycle};
use crate::error::{ChainError, Result};
use crate::graph::{Graph, GraphId, TapId};
use crate::message::ControlMessage;
use crate::stage::Stage;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::fmt;
use std::sync::Arc;

pub(crate) struct ChainInner {
    pub name: String,
    pub owner: OwnerId,
    pub state: Mutex<ChainState>,
    /// Signalled whenever `in_surgery` is cleared.
    pub surgery_done: Condvar,
}

impl Drop for ChainInner {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        let Some(attachment) = state.attachment.as_ref() else {
            return;
        };

        if let Some(id) = state.barrier.id.take() {
            if attachment.graph.cancel_barrier(id) {
                tracing::debug!("Chain '{}': cancelled pending barrier on drop", self.name);
            }
        }
        if !state.modifications.is_empty() {
            tracing::warn!(
                "Chain '{}' dropped with {} pending modification(s)",
                self.name,
                state.modifications.len()
            );
        }
        tracing::warn!(
            "Chain '{}' dropped while attached to '{}'; its stages stay in the graph",
            self.name,
            attachment.graph.name()
        );
    }
}

/// An ordered list of stages, optionally attached to a live graph.
///
/// Cloning a `Chain` yields another reference to the same chain.
#[derive(Clone)]
pub struct Chain {
    pub(crate) inner: Arc<ChainInner>,
}

impl fmt::Debug for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Chain")
            .field("name", &self.inner.name)
            .field("filters", &state.filters.len())
            .field("lifecycle", &state.lifecycle)
            .field("pending", &state.modifications.len())
            .finish()
    }
}

impl Chain {
    pub fn new(name: impl Into<String>) -> Self {
        let owner = OwnerId::next();
        Self {
            inner: Arc::new(ChainInner {
                name: name.into(),
                owner,
                state: Mutex::new(ChainState::new(owner)),
                surgery_done: Condvar::new(),
            }),
        }
    }

    /// A chain pre-filled with `stages` in order.
    pub fn with_stages(name: impl Into<String>, stages: impl IntoIterator<Item = Arc<dyn Stage>>) -> Self {
        let chain = Self::new(name);
        for stage in stages {
            chain.append(stage);
        }
        chain
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn owner(&self) -> OwnerId {
        self.inner.owner
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.inner.state.lock().lifecycle
    }

    pub fn is_attached(&self) -> bool {
        self.inner.state.lock().is_attached()
    }

    pub fn direction(&self) -> Option<ChainDirection> {
        self.inner.state.lock().direction()
    }

    /// Current free end of the chain.
    pub fn out_tap(&self) -> Option<TapId> {
        self.inner.state.lock().attachment.as_ref().map(|a| a.out_tap)
    }

    /// Tap the chain was attached at.
    pub fn applied_tap(&self) -> Option<TapId> {
        self.inner.state.lock().attachment.as_ref().map(|a| a.applied_tap)
    }

    /// Id of the graph the chain is attached to.
    pub fn graph_id(&self) -> Option<GraphId> {
        self.inner.state.lock().attachment.as_ref().map(|a| a.graph.id())
    }

    /// Snapshot of what the live graph currently holds, in logical order.
    pub fn applied_list(&self) -> Vec<StageHandle> {
        self.inner.state.lock().applied.clone()
    }

    /// Taps recorded for `handle`, when it is applied.
    pub fn applied_taps(&self, handle: StageHandle) -> Option<AppliedTaps> {
        self.inner.state.lock().taps(handle)
    }

    /// Number of edits waiting for the next barrier.
    pub fn pending_modifications(&self) -> usize {
        self.inner.state.lock().modifications.len()
    }

    /// Whether a barrier has been requested and not yet fired.
    pub fn barrier_pending(&self) -> bool {
        self.inner.state.lock().barrier.pending
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Queue `modification` if attached and make sure a barrier will drain it.
    fn enqueue(&self, mut state: MutexGuard<'_, ChainState>, modification: Modification) {
        if !state.is_attached() {
            return;
        }
        tracing::debug!("Chain '{}': queued {:?}", self.inner.name, modification);
        state.modifications.push_back(modification);
        self.schedule(state);
    }

    /// Request a barrier unless one is pending or surgery will pick the queue up.
    pub(crate) fn schedule(&self, mut state: MutexGuard<'_, ChainState>) {
        if state.barrier.pending || state.in_surgery || state.modifications.is_empty() {
            return;
        }
        let Some(attachment) = state.attachment.as_ref() else {
            return;
        };
        let graph = attachment.graph.clone();
        let direction = attachment.direction;
        let applied_tap = attachment.applied_tap;
        let out_tap = attachment.out_tap;

        state.barrier.pending = true;
        state.barrier.epoch += 1;
        state.barrier.id = None;
        let epoch = state.barrier.epoch;
        drop(state);

        // Block where data enters the chain: the attach tap downstream, the
        // producer feeding the free end upstream.
        let tap = match direction {
            ChainDirection::Downstream => applied_tap,
            ChainDirection::Upstream => graph.peer_of(out_tap).unwrap_or(applied_tap),
        };
        let weak = Arc::downgrade(&self.inner);
        let result = graph.request_barrier(
            tap,
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    Chain { inner }.run_barrier(epoch);
                }
            }),
        );

        let mut state = self.inner.state.lock();
        let current = state.barrier.pending && state.barrier.epoch == epoch;
        match result {
            Ok(id) if current => state.barrier.id = Some(id),
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(
                    "Chain '{}': barrier request on {:?} failed, edits stay queued: {}",
                    self.inner.name,
                    tap,
                    e
                );
                if current {
                    state.barrier.pending = false;
                }
            }
        }
    }

    fn insert_locked(&self, mut state: MutexGuard<'_, ChainState>, stage: Arc<dyn Stage>, position: usize) -> StageHandle {
        let position = position.min(state.filters.len());
        let handle = state.allocate(stage);
        state.filters.insert(position, handle);
        self.enqueue(state, Modification::Insert { handle, position });
        handle
    }

    /// Clear the surgery flag and wake anyone waiting in `detach`.
    pub(crate) fn finish_surgery(&self, state: &mut MutexGuard<'_, ChainState>) {
        state.in_surgery = false;
        self.inner.surgery_done.notify_all();
    }
}

impl FilterChain for Chain {
    fn list(&self) -> Vec<StageHandle> {
        self.inner.state.lock().filters.clone()
    }

    fn insert_at(&self, stage: Arc<dyn Stage>, position: usize) -> StageHandle {
        let state = self.inner.state.lock();
        self.insert_locked(state, stage, position)
    }

    fn insert_before(&self, stage: Arc<dyn Stage>, reference: StageHandle) -> Option<StageHandle> {
        let state = self.inner.state.lock();
        let position = state.position(reference)?;
        Some(self.insert_locked(state, stage, position))
    }

    fn insert_after(&self, stage: Arc<dyn Stage>, reference: StageHandle) -> Option<StageHandle> {
        let state = self.inner.state.lock();
        let position = state.position(reference)? + 1;
        Some(self.insert_locked(state, stage, position))
    }

    fn replace(&self, stage: Arc<dyn Stage>, old: StageHandle) -> Option<StageHandle> {
        let mut state = self.inner.state.lock();
        let position = state.position(old)?;
        let new = state.allocate(stage);
        state.filters[position] = new;

        if state.is_attached() {
            self.enqueue(state, Modification::Replace { new, old });
        } else {
            state.release(old);
        }
        Some(new)
    }

    fn remove(&self, handle: StageHandle) -> bool {
        let mut state = self.inner.state.lock();
        let Some(position) = state.position(handle) else {
            return false;
        };
        state.filters.remove(position);

        if state.is_attached() {
            self.enqueue(state, Modification::Remove { handle });
        } else {
            state.release(handle);
        }
        true
    }

    fn get_stage(&self, handle: StageHandle) -> Option<Arc<dyn Stage>> {
        let state = self.inner.state.lock();
        state.position(handle)?;
        state.stage(handle)
    }

    fn attach(&self, graph: Arc<dyn Graph>, tap: TapId) -> Result<TapId> {
        if !graph.contains_tap(tap) {
            return Err(ChainError::UnknownTap(tap));
        }

        let mut state = self.inner.state.lock();
        if state.is_attached() {
            return Err(ChainError::AlreadyAttached);
        }

        let direction = ChainDirection::from_tap(tap);
        state.attachment = Some(Attachment {
            graph: graph.clone(),
            applied_tap: tap,
            out_tap: tap,
            direction,
        });
        state.applied = state.filters.clone();
        state.lifecycle = Lifecycle::Attached;
        state.in_surgery = true;

        let walk = state.walk_order();
        let mut current = tap;
        let mut failed = 0usize;
        for handle in walk {
            let Some(stage) = state.stage(handle) else {
                continue;
            };
            let result = MutexGuard::unlocked(&mut state, || stage.apply(graph.as_ref(), current));
            match result {
                Some(output) => {
                    state.set_taps(handle, Some(AppliedTaps { input: current, output }));
                    current = output;
                }
                None => {
                    tracing::warn!(
                        "Chain '{}': stage '{}' failed to apply at {:?}, skipping",
                        self.inner.name,
                        stage.name(),
                        current
                    );
                    state.set_taps(handle, None);
                    failed += 1;
                }
            }
        }

        if let Some(attachment) = state.attachment.as_mut() {
            attachment.out_tap = current;
        }
        self.finish_surgery(&mut state);

        tracing::info!(
            "Chain '{}' attached to '{}' at {:?} ({:?}, {} stage(s), {} failed)",
            self.inner.name,
            graph.name(),
            tap,
            direction,
            state.applied.len(),
            failed
        );

        // Edits made during the walk were queued without a barrier.
        self.schedule(state);
        Ok(current)
    }

    fn detach(&self, graph: &dyn Graph, tap: TapId) -> Result<TapId> {
        let mut state = self.inner.state.lock();
        while state.in_surgery {
            self.inner.surgery_done.wait(&mut state);
        }

        let (attached_graph, applied_tap) = {
            let attachment = state.attachment.as_ref().ok_or(ChainError::NotAttached)?;
            if attachment.graph.id() != graph.id() {
                return Err(ChainError::GraphMismatch {
                    expected: attachment.graph.id(),
                    actual: graph.id(),
                });
            }
            if attachment.out_tap != tap {
                return Err(ChainError::TapMismatch {
                    expected: attachment.out_tap,
                    actual: tap,
                });
            }
            (attachment.graph.clone(), attachment.applied_tap)
        };

        // Their effect already lives in `filters`.
        let discarded = state.modifications.len();
        state.modifications.clear();
        let barrier = if state.barrier.pending {
            state.barrier.pending = false;
            state.barrier.id.take()
        } else {
            None
        };
        state.in_surgery = true;

        if let Some(id) = barrier {
            MutexGuard::unlocked(&mut state, || attached_graph.cancel_barrier(id));
        }
        if discarded > 0 {
            tracing::debug!(
                "Chain '{}': discarded {} pending modification(s) on detach",
                self.inner.name,
                discarded
            );
        }

        let mut walk = state.walk_order();
        walk.reverse();
        let mut current = tap;
        for handle in walk {
            let (Some(stage), Some(taps)) = (state.stage(handle), state.taps(handle)) else {
                continue;
            };
            if taps.output != current {
                tracing::warn!(
                    "Chain '{}': stage '{}' recorded output {:?}, chain is at {:?}",
                    self.inner.name,
                    stage.name(),
                    taps.output,
                    current
                );
            }

            let reverted = MutexGuard::unlocked(&mut state, || stage.revert(graph, current));
            if reverted != Some(taps.input) {
                tracing::warn!(
                    "Chain '{}': stage '{}' reverted to {:?}, expected {:?}",
                    self.inner.name,
                    stage.name(),
                    reverted,
                    taps.input
                );
            }
            state.set_taps(handle, None);
            current = taps.input;
        }

        if current != applied_tap {
            tracing::warn!(
                "Chain '{}': detached at {:?}, attached at {:?}",
                self.inner.name,
                current,
                applied_tap
            );
        }

        state.attachment = None;
        state.applied.clear();
        state.stuck.clear();
        state.modifications.clear();
        state.lifecycle = Lifecycle::Detached;
        state.release_all_unlisted();
        self.finish_surgery(&mut state);

        tracing::info!("Chain '{}' detached from '{}'", self.inner.name, graph.name());
        Ok(current)
    }

    fn handle_message(&self, message: &ControlMessage) -> bool {
        let stages: Vec<Arc<dyn Stage>> = {
            let state = self.inner.state.lock();
            state
                .applied
                .iter()
                .filter_map(|h| state.entry(*h))
                .filter(|entry| entry.taps.is_some())
                .map(|entry| entry.stage.clone())
                .collect()
        };
        stages.iter().any(|stage| stage.handle_message(message))
    }
}
