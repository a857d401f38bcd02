//! # filterchain-rs: Live Filter Chains
//!
//! Insert, remove and replace processing stages in a *running* stream graph
//! without stopping data flow. Edits are queued and replayed inside a data-flow
//! barrier, so no data is in flight across the chain while it is rewired.
//!
//! ## Architecture
//!
//! - **Graph**: the host pipeline primitives (elements, taps, links, barriers)
//!   behind the [`graph::Graph`] trait, with an in-memory implementation
//! - **Stage**: a unit that splices its own elements in at a tap and takes them
//!   out again ([`stage::Stage`])
//! - **Chain**: an ordered stage list attached at one tap, plus the mutation
//!   engine that applies live edits ([`Chain`])
//! - **Coordinator**: one logical chain mirrored onto many graph instances
//!   ([`Coordinator`])
//! - **Bus**: crossbeam channels carrying control messages to the stages
//!
//! ## Example
//!
//! ```ignore
//! use filterchain_rs::{Chain, FilterChain, graph::{MemoryGraph, ElementSpec, TapId}};
//! use filterchain_rs::stage::ElementStage;
//! use std::sync::Arc;
//!
//! let graph = Arc::new(MemoryGraph::new("player"));
//! let src = graph.add_element(ElementSpec::source("decoder"))?;
//!
//! let chain = Chain::new("video");
//! chain.append(Arc::new(ElementStage::new("convert", "videoconvert")));
//! let out = chain.attach(graph.clone(), TapId::output(src, 0))?;
//!
//! // Live edit: applied at the next barrier.
//! chain.append(Arc::new(ElementStage::new("scale", "videoscale")));
//! ```

pub mod bus;
pub mod chain;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod graph;
pub mod message;
pub mod stage;
pub mod value;

// Re-export commonly used types
pub use bus::{BusDispatcher, MessageBus};
pub use chain::{Chain, ChainDirection, FilterChain, Lifecycle, StageHandle};
pub use config::{ChainDefinition, EngineConfig, StageSpec};
pub use coordinator::{Coordinator, InstanceId};
pub use error::{ChainError, Result};
pub use message::ControlMessage;
pub use stage::{Stage, StageRegistry};
pub use value::PropertyValue;
