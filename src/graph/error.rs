//! Host graph error types.

use crate::graph::id::{BarrierId, ElementId, TapId};
use thiserror::Error;

/// Errors that can occur when operating on a host graph.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("Unknown element {0:?}")]
    UnknownElement(ElementId),

    #[error("Unknown tap {0:?}")]
    UnknownTap(TapId),

    #[error("Tap {0:?} is already linked")]
    AlreadyLinked(TapId),

    #[error("Cannot link {a:?} to {b:?}: taps must have opposite directions")]
    DirectionMismatch { a: TapId, b: TapId },

    #[error("Cannot link element {0:?} to itself")]
    SelfLink(ElementId),

    #[error("Unknown barrier {0:?}")]
    UnknownBarrier(BarrierId),

    #[error("Element '{0}' declares too many taps")]
    TooManyTaps(String),
}

pub type GraphResult<T> = std::result::Result<T, GraphError>;
