//! Stage registry: builds stages from chain definitions.
//!
//! The registry maps factory names to constructors and also holds named shared
//! stage instances. A shared stage is one object referenced by every chain
//! built from a definition, which is how a single stage (e.g. a volume control)
//! is kept in step across all coordinator instances.
//!
//! The registry is built once and injected where needed; there is no global.

use crate::config::{ChainDefinition, StageSpec};
use crate::error::{ChainError, Result, ResultExt};
use crate::stage::{BinStage, ElementStage, Stage, TeeStage};
use std::collections::HashMap;
use std::sync::Arc;

/// Factory name that resolves to a registered shared instance.
pub const SHARED_FACTORY: &str = "shared";

/// Constructor for one kind of stage.
pub type StageFactory = Box<dyn Fn(&StageSpec) -> Result<Arc<dyn Stage>> + Send + Sync>;

/// Named stage factories plus shared stage instances.
pub struct StageRegistry {
    factories: HashMap<String, StageFactory>,
    shared: HashMap<String, Arc<dyn Stage>>,
}

impl Default for StageRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl StageRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
            shared: HashMap::new(),
        }
    }

    /// A registry with the `element`, `bin` and `tee` factories.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("element", Box::new(build_element));
        registry.register("bin", Box::new(build_bin));
        registry.register("tee", Box::new(build_tee));
        registry
    }

    /// Register (or replace) a factory.
    pub fn register(&mut self, name: impl Into<String>, factory: StageFactory) {
        let name = name.into();
        if self.factories.insert(name.clone(), factory).is_some() {
            tracing::debug!("Replaced stage factory '{}'", name);
        }
    }

    /// Register a shared instance, referenced from definitions with factory `shared`.
    pub fn register_shared(&mut self, stage: Arc<dyn Stage>) {
        self.shared.insert(stage.name().to_string(), stage);
    }

    pub fn shared(&self, name: &str) -> Option<Arc<dyn Stage>> {
        self.shared.get(name).cloned()
    }

    /// Registered factory names, sorted.
    pub fn factory_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Build one stage.
    pub fn build(&self, spec: &StageSpec) -> Result<Arc<dyn Stage>> {
        if spec.factory == SHARED_FACTORY {
            return self.shared(&spec.name).ok_or_else(|| {
                ChainError::Config(format!("No shared stage named '{}'", spec.name))
            });
        }

        let factory = self
            .factories
            .get(&spec.factory)
            .ok_or_else(|| ChainError::UnknownFactory(spec.factory.clone()))?;
        factory(spec)
    }

    /// Build every stage of a definition, in order.
    pub fn build_chain(&self, definition: &ChainDefinition) -> Result<Vec<Arc<dyn Stage>>> {
        definition.validate()?;
        definition
            .stages
            .iter()
            .map(|spec| {
                self.build(spec)
                    .with_context(|| format!("Chain '{}', stage '{}'", definition.name, spec.name))
            })
            .collect()
    }
}

/// Properties consumed by the registry rather than passed to the element.
const ELEMENT_RESERVED: &[&str] = &["factory", "claims"];

fn build_element(spec: &StageSpec) -> Result<Arc<dyn Stage>> {
    let mut stage = ElementStage::new(spec.name.clone(), spec.require_str("factory")?);
    for (key, value) in &spec.properties {
        if !ELEMENT_RESERVED.contains(&key.as_str()) {
            stage = stage.with_property(key.clone(), value.clone());
        }
    }
    for kind in spec.list("claims") {
        stage = stage.claiming(kind);
    }
    Ok(Arc::new(stage))
}

fn build_bin(spec: &StageSpec) -> Result<Arc<dyn Stage>> {
    let factories = spec.list("elements");
    if factories.is_empty() {
        return Err(ChainError::Config(format!(
            "Stage '{}': bin needs at least one entry in 'elements'",
            spec.name
        )));
    }
    Ok(Arc::new(BinStage::new(spec.name.clone(), factories)))
}

fn build_tee(spec: &StageSpec) -> Result<Arc<dyn Stage>> {
    let branch = spec
        .property("branch")
        .and_then(|v| v.as_str())
        .unwrap_or("fakesink");
    Ok(Arc::new(TeeStage::new(spec.name.clone(), branch)))
}
