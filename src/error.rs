//! Error handling for filterchain-rs
//!
//! This module defines the crate error type and a Result alias used by the
//! chain, coordinator and configuration layers.
//!
//! Stage failures are deliberately absent here: a stage that fails to apply or
//! revert is logged and degraded, never reported as an error to the caller.

use crate::graph::{GraphError, GraphId, TapId};
use thiserror::Error;

/// Main error type for filterchain-rs operations
#[derive(Error, Debug)]
pub enum ChainError {
    /// `attach` was called on a chain that is already attached
    #[error("Chain is already attached")]
    AlreadyAttached,

    /// `detach` was called on a chain that is not attached
    #[error("Chain is not attached")]
    NotAttached,

    /// The tap passed to `detach` is not the chain's current free end
    #[error("Tap mismatch: expected {expected:?}, got {actual:?}")]
    TapMismatch { expected: TapId, actual: TapId },

    /// The graph passed to `detach` is not the graph the chain is attached to
    #[error("Graph mismatch: attached to {expected:?}, got {actual:?}")]
    GraphMismatch { expected: GraphId, actual: GraphId },

    /// The tap does not exist in the graph
    #[error("Unknown tap {0:?}")]
    UnknownTap(TapId),

    /// No coordinator instance is attached at the given graph/tap
    #[error("No instance attached to graph {graph:?} at {tap:?}")]
    UnknownInstance { graph: GraphId, tap: TapId },

    /// Errors reported by the host graph
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    /// A stage definition names a factory the registry does not know
    #[error("Unknown stage factory: {0}")]
    UnknownFactory(String),

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<ChainError>,
    },
}

impl ChainError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        ChainError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

/// Result type alias for filterchain-rs operations
pub type Result<T> = std::result::Result<T, ChainError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}
