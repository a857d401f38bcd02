//! Stage handles.
//!
//! A handle identifies one occurrence of a stage inside one chain. The same
//! stage object may appear in many chains (and more than once in a chain); each
//! occurrence gets its own handle. Handles are plain `Copy` values: an arena
//! index tagged with the issuing chain, never reused within that chain.

use crate::graph::TapId;
use crate::stage::Stage;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_OWNER: AtomicU64 = AtomicU64::new(1);

/// Identity of a handle issuer (a chain or a coordinator).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OwnerId(u64);

impl OwnerId {
    pub(crate) fn next() -> Self {
        Self(NEXT_OWNER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Debug for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OwnerId({})", self.0)
    }
}

/// Opaque identity of a stage occurrence.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct StageHandle {
    owner: OwnerId,
    index: u32,
}

impl StageHandle {
    pub(crate) fn new(owner: OwnerId, index: u32) -> Self {
        Self { owner, index }
    }

    /// The chain or coordinator that issued this handle.
    pub fn owner(self) -> OwnerId {
        self.owner
    }

    #[inline]
    pub(crate) fn index(self) -> u32 {
        self.index
    }
}

impl fmt::Debug for StageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StageHandle({}#{})", self.owner.0, self.index)
    }
}

/// Taps recorded for a successfully applied stage.
///
/// `input` is the tap the stage was applied at, `output` the free end it
/// returned. Both exist or neither does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppliedTaps {
    pub input: TapId,
    pub output: TapId,
}

/// Arena entry behind a handle.
pub(crate) struct HandleEntry {
    pub stage: Arc<dyn Stage>,
    /// `None` while unattached or when `apply` failed.
    pub taps: Option<AppliedTaps>,
}

impl HandleEntry {
    pub fn new(stage: Arc<dyn Stage>) -> Self {
        Self { stage, taps: None }
    }
}
