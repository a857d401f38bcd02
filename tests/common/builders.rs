//! Test graph and chain builders

use filterchain_rs::graph::{BarrierMode, ElementSpec, Graph, MemoryGraph, TapId};
use filterchain_rs::stage::{ElementStage, Stage};
use filterchain_rs::{Chain, FilterChain};
use std::sync::Arc;

/// A source and a sink, ready to have a chain spliced between them.
pub struct LinearGraph {
    pub graph: Arc<MemoryGraph>,
    pub source: TapId,
    pub sink: TapId,
}

impl LinearGraph {
    pub fn new(name: &str) -> Self {
        Self::with_mode(name, BarrierMode::Immediate)
    }

    /// Barriers fire only when `flow()` is called.
    pub fn deferred(name: &str) -> Self {
        Self::with_mode(name, BarrierMode::Deferred)
    }

    pub fn with_mode(name: &str, mode: BarrierMode) -> Self {
        let graph = Arc::new(MemoryGraph::with_barrier_mode(name, mode));
        let src = graph.add_element(ElementSpec::source("src")).unwrap();
        let sink = graph.add_element(ElementSpec::sink("sink")).unwrap();
        Self {
            graph,
            source: TapId::output(src, 0),
            sink: TapId::input(sink, 0),
        }
    }

    pub fn shared(&self) -> Arc<dyn Graph> {
        self.graph.clone()
    }

    /// Attach downstream at the source and link the free end to the sink.
    pub fn attach(&self, chain: &dyn FilterChain) -> TapId {
        let out = chain.attach(self.shared(), self.source).unwrap();
        self.graph.link(out, self.sink).unwrap();
        out
    }

    /// Attach upstream at the sink and link the source to the free end.
    pub fn attach_upstream(&self, chain: &dyn FilterChain) -> TapId {
        let out = chain.attach(self.shared(), self.sink).unwrap();
        self.graph.link(self.source, out).unwrap();
        out
    }

    /// Element names from the source to the end of the path.
    pub fn path(&self) -> Vec<String> {
        self.graph.path_from(self.source)
    }

    /// Let the data-flow thread reach every pending barrier.
    pub fn flow(&self) -> usize {
        self.graph.run_pending_barriers()
    }
}

/// A one-element stage named `name`.
pub fn element(name: &str) -> Arc<dyn Stage> {
    Arc::new(ElementStage::new(name, "identity"))
}

/// Builder for test chains
pub struct ChainBuilder {
    name: String,
    stages: Vec<Arc<dyn Stage>>,
}

impl ChainBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            stages: Vec::new(),
        }
    }

    pub fn element(mut self, name: &str) -> Self {
        self.stages.push(element(name));
        self
    }

    pub fn stage(mut self, stage: Arc<dyn Stage>) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn build(self) -> Chain {
        Chain::with_stages(self.name, self.stages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_builder() {
        let chain = ChainBuilder::new("c").element("a").element("b").build();
        assert_eq!(chain.list().len(), 2);
    }
}
