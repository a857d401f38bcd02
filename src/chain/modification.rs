//! Queued live edits.

use crate::chain::handle::StageHandle;

/// One edit waiting for the next barrier.
///
/// Only created while the chain is attached; the logical list has already been
/// updated, so the engine replays these against the live graph in FIFO order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Modification {
    /// Splice `handle` at applied slot `position`.
    Insert { handle: StageHandle, position: usize },
    /// Take `handle` out of the live path.
    Remove { handle: StageHandle },
    /// Swap `old` for `new` in place.
    Replace { new: StageHandle, old: StageHandle },
}

impl Modification {
    /// Whether this modification still needs `handle`'s entry.
    pub fn references(&self, handle: StageHandle) -> bool {
        match *self {
            Modification::Insert { handle: h, .. } | Modification::Remove { handle: h } => h == handle,
            Modification::Replace { new, old } => new == handle || old == handle,
        }
    }
}
