//! Bin stage: a fixed sequence of one-in/one-out elements applied as one unit.

use crate::graph::{ElementId, ElementSpec, Graph, TapId};
use crate::stage::splice::{link_elements, remove_elements, unlink_element};
use crate::stage::Stage;

/// A stage made of several elements linked in data-flow order.
pub struct BinStage {
    name: String,
    factories: Vec<String>,
}

impl BinStage {
    pub fn new(name: impl Into<String>, factories: Vec<String>) -> Self {
        Self {
            name: name.into(),
            factories,
        }
    }

    pub fn factories(&self) -> &[String] {
        &self.factories
    }

    fn element_prefix(&self) -> String {
        format!("{}:", self.name)
    }
}

impl Stage for BinStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, graph: &dyn Graph, tap: TapId) -> Option<TapId> {
        if self.factories.is_empty() {
            return None;
        }

        let mut elements: Vec<ElementId> = Vec::with_capacity(self.factories.len());
        for (i, factory) in self.factories.iter().enumerate() {
            let spec = ElementSpec::filter(format!("{}{}:{}", self.element_prefix(), i, factory), factory.clone());
            match graph.add_element(spec) {
                Ok(element) => elements.push(element),
                Err(e) => {
                    tracing::warn!("Stage '{}': cannot create '{}': {}", self.name, factory, e);
                    remove_elements(graph, &elements);
                    return None;
                }
            }
        }

        let free = link_elements(graph, tap, &elements);
        if free.is_none() {
            remove_elements(graph, &elements);
        }
        free
    }

    fn revert(&self, graph: &dyn Graph, tap: TapId) -> Option<TapId> {
        let prefix = self.element_prefix();
        let mut current = tap;

        for _ in 0..self.factories.len() {
            let owner = graph.tap_owner(current)?;
            let owned = graph
                .element_name(owner)
                .map(|name| name.starts_with(&prefix))
                .unwrap_or(false);
            if !owned {
                tracing::warn!("Stage '{}': {:?} does not belong to this stage", self.name, current);
                return None;
            }

            let previous = unlink_element(graph, current).map(|(_, previous)| previous);
            remove_elements(graph, &[owner]);
            current = previous?;
        }
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::MemoryGraph;

    fn convert_scale() -> BinStage {
        BinStage::new("fmt", vec!["videoconvert".into(), "videoscale".into()])
    }

    #[test]
    fn test_bin_downstream_round_trip() {
        let graph = MemoryGraph::new("g");
        let src = graph.add_element(ElementSpec::source("src")).unwrap();
        let tap = TapId::output(src, 0);
        let stage = convert_scale();

        let free = stage.apply(&graph, tap).unwrap();
        assert_eq!(
            graph.path_from(tap),
            vec!["fmt:0:videoconvert", "fmt:1:videoscale"]
        );
        assert_eq!(stage.revert(&graph, free), Some(tap));
        assert_eq!(graph.element_count(), 1);
    }

    #[test]
    fn test_bin_upstream_round_trip() {
        let graph = MemoryGraph::new("g");
        let sink = graph.add_element(ElementSpec::sink("sink")).unwrap();
        let tap = TapId::input(sink, 0);
        let stage = convert_scale();

        let free = stage.apply(&graph, tap).unwrap();
        // Walking against the flow from the sink meets the last element first.
        assert_eq!(
            graph.path_from(tap),
            vec!["fmt:1:videoscale", "fmt:0:videoconvert"]
        );
        assert_eq!(stage.revert(&graph, free), Some(tap));
        assert_eq!(graph.element_count(), 1);
    }

    #[test]
    fn test_empty_bin_does_not_apply() {
        let graph = MemoryGraph::new("g");
        let src = graph.add_element(ElementSpec::source("src")).unwrap();
        let stage = BinStage::new("empty", Vec::new());
        assert_eq!(stage.apply(&graph, TapId::output(src, 0)), None);
    }
}
