//! Element splicing helpers for stage implementations.
//!
//! All helpers are direction-agnostic: the side of each element that faces the
//! incoming tap is derived from that tap's direction, so the same stage code
//! works on producer ends (downstream chains) and consumer ends (upstream chains).

use crate::graph::{splice, ElementId, Graph, TapDirection, TapId};

/// Splice `element` in at `tap` and return the element's new free end.
///
/// Uses tap 0 on both sides of the element. When `tap` is linked the element
/// lands between it and its peer; on failure the previous link is kept.
pub fn link_element(graph: &dyn Graph, tap: TapId, element: ElementId) -> Option<TapId> {
    let direction = tap.direction();
    let facing = graph.element_tap(element, direction.opposite(), 0)?;
    let free = graph.element_tap(element, direction, 0)?;

    splice(graph, tap, facing, free).then_some(free)
}

/// Undo [`link_element`]: given an element's free end, unlink the side facing
/// back into the chain and return the element plus the tap it was linked to.
pub fn unlink_element(graph: &dyn Graph, free: TapId) -> Option<(ElementId, TapId)> {
    let element = graph.tap_owner(free)?;
    let facing = graph.element_tap(element, free.direction().opposite(), 0)?;
    let previous = graph.unlink(facing)?;
    Some((element, previous))
}

/// Link `elements` (listed in data-flow order) at `tap`, returning the free end.
///
/// On an input tap the elements are linked last-first, so data still flows in
/// the listed order. Nothing is unlinked on failure; callers remove the
/// elements, which drops their links.
pub fn link_elements(graph: &dyn Graph, tap: TapId, elements: &[ElementId]) -> Option<TapId> {
    let ordered: Box<dyn Iterator<Item = &ElementId>> = match tap.direction() {
        TapDirection::Output => Box::new(elements.iter()),
        TapDirection::Input => Box::new(elements.iter().rev()),
    };

    let mut current = tap;
    for &element in ordered {
        current = link_element(graph, current, element)?;
    }
    Some(current)
}

/// Hang `branch` off output `index` of a fan-out element.
pub fn link_branch(graph: &dyn Graph, tee: ElementId, index: u16, branch: ElementId) -> bool {
    let (Some(out), Some(input)) = (
        graph.element_tap(tee, TapDirection::Output, index),
        graph.element_tap(branch, TapDirection::Input, 0),
    ) else {
        return false;
    };

    match graph.link(out, input) {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!("Failed to link branch {:?} to tee {:?}: {}", branch, tee, e);
            false
        }
    }
}

/// Remove elements, logging failures.
pub fn remove_elements(graph: &dyn Graph, elements: &[ElementId]) {
    for &element in elements {
        if let Err(e) = graph.remove_element(element) {
            tracing::warn!("Failed to remove element {:?}: {}", element, e);
        }
    }
}
