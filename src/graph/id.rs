//! Identity types for the host graph.
//!
//! Element ids are newtypes over `u32` that index directly into the graph's
//! element storage. Tap ids pack the owning element, the tap direction and the
//! tap index into a single `u32`, so a tap can be resolved without a lookup.

use crate::graph::tap::TapDirection;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Index into a graph's element storage.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct ElementId(pub u32);

impl ElementId {
    pub const INVALID: ElementId = ElementId(u32::MAX);

    #[inline]
    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::INVALID {
            write!(f, "ElementId(INVALID)")
        } else {
            write!(f, "ElementId({})", self.0)
        }
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Compact tap identifier.
///
/// High 19 bits = element index, next bit = direction (1 = output),
/// low 12 bits = tap index. Supports ~500k elements with 4096 taps per side.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TapId(pub u32);

impl TapId {
    const INDEX_BITS: u32 = 12;
    const INDEX_MASK: u32 = (1 << Self::INDEX_BITS) - 1;
    const DIRECTION_BIT: u32 = 1 << Self::INDEX_BITS;
    const ELEMENT_SHIFT: u32 = Self::INDEX_BITS + 1;

    pub fn new(element: ElementId, direction: TapDirection, index: u16) -> Self {
        debug_assert!(index < (1 << Self::INDEX_BITS) as u16);
        debug_assert!(element.0 < (1 << (32 - Self::ELEMENT_SHIFT)));
        let dir = match direction {
            TapDirection::Output => Self::DIRECTION_BIT,
            TapDirection::Input => 0,
        };
        Self((element.0 << Self::ELEMENT_SHIFT) | dir | (index as u32 & Self::INDEX_MASK))
    }

    /// Producer-side tap `index` of `element`.
    pub fn output(element: ElementId, index: u16) -> Self {
        Self::new(element, TapDirection::Output, index)
    }

    /// Consumer-side tap `index` of `element`.
    pub fn input(element: ElementId, index: u16) -> Self {
        Self::new(element, TapDirection::Input, index)
    }

    #[inline]
    pub fn element(self) -> ElementId {
        ElementId(self.0 >> Self::ELEMENT_SHIFT)
    }

    #[inline]
    pub fn direction(self) -> TapDirection {
        if self.0 & Self::DIRECTION_BIT != 0 {
            TapDirection::Output
        } else {
            TapDirection::Input
        }
    }

    #[inline]
    pub fn index(self) -> u16 {
        (self.0 & Self::INDEX_MASK) as u16
    }
}

impl fmt::Debug for TapId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let side = match self.direction() {
            TapDirection::Output => "output",
            TapDirection::Input => "input",
        };
        write!(
            f,
            "TapId(element={}, {}={})",
            self.element().0,
            side,
            self.index()
        )
    }
}

static NEXT_GRAPH_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of one host graph instance.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct GraphId(pub u64);

impl GraphId {
    /// Allocate a fresh graph id.
    pub fn next() -> Self {
        GraphId(NEXT_GRAPH_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Identity of one outstanding barrier request within a graph.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct BarrierId(pub u64);
