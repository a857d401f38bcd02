//! Physical instances managed by a coordinator.

use crate::chain::Chain;
use crate::graph::{GraphId, TapId};
use std::fmt;

/// Identity of one physical instance (one graph attachment).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(pub u64);

impl fmt::Debug for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InstanceId({})", self.0)
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A private chain plus where it was attached.
pub(crate) struct Instance {
    pub id: InstanceId,
    pub chain: Chain,
    pub graph_id: GraphId,
    pub applied_tap: TapId,
}

impl Instance {
    /// Whether this instance is the one attached to `graph` with free end `tap`.
    pub fn matches(&self, graph: GraphId, tap: TapId) -> bool {
        self.graph_id == graph && self.chain.out_tap() == Some(tap)
    }
}

/// Read-only view of an instance.
#[derive(Debug, Clone)]
pub struct InstanceInfo {
    pub id: InstanceId,
    pub graph: GraphId,
    pub applied_tap: TapId,
    pub out_tap: Option<TapId>,
    pub chain: Chain,
}

impl From<&Instance> for InstanceInfo {
    fn from(instance: &Instance) -> Self {
        Self {
            id: instance.id,
            graph: instance.graph_id,
            applied_tap: instance.applied_tap,
            out_tap: instance.chain.out_tap(),
            chain: instance.chain.clone(),
        }
    }
}
