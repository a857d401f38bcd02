//! Configuration module for filterchain-rs
//!
//! This module handles engine configuration:
//! - Logging (filter directives, optional log directory)
//! - Host graph behaviour (barrier mode)
//! - Demo binary parameters
//! - The chain definition applied to every instance
//!
//! Files are read as TOML when the extension is `.toml` and as JSON otherwise.
//!
//! # Example
//!
//! ```ignore
//! use filterchain_rs::config::EngineConfig;
//!
//! let config = EngineConfig::load("engine.toml")?;
//! let stages = registry.build_chain(&config.chain)?;
//! ```

pub mod definition;

pub use definition::{ChainDefinition, StageSpec};

use crate::error::{ChainError, Result};
use crate::graph::BarrierMode;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default tracing filter directives
pub const DEFAULT_LOG_FILTER: &str = "info,filterchain_rs=debug";

/// Default number of simulated peers in the demo
pub const DEFAULT_INSTANCES: usize = 2;

/// Default interval between data-flow ticks in the demo
pub const DEFAULT_FLOW_INTERVAL_MS: u64 = 20;

/// Serialization format of a configuration file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Toml,
}

impl ConfigFormat {
    /// Pick the format from a file extension (`.toml` → TOML, anything else → JSON)
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => ConfigFormat::Toml,
            _ => ConfigFormat::Json,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directives, overridden by `RUST_LOG`
    pub filter: String,

    /// Directory for a daily-rotated log file, if any
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_LOG_FILTER.to_string(),
            directory: None,
        }
    }
}

/// Host graph configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// When barrier callbacks fire
    pub barrier_mode: BarrierMode,
}

/// Demo binary parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    /// Number of simulated peers (one graph instance each)
    pub instances: usize,

    /// Interval between data-flow ticks in milliseconds
    pub flow_interval_ms: u64,

    /// Number of live edit rounds to perform
    pub iterations: u32,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            instances: DEFAULT_INSTANCES,
            flow_interval_ms: DEFAULT_FLOW_INTERVAL_MS,
            iterations: 3,
        }
    }
}

/// Complete engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub logging: LoggingConfig,
    pub graph: GraphConfig,
    pub demo: DemoConfig,
    pub chain: ChainDefinition,
}

impl EngineConfig {
    /// Parse configuration text in the given format
    pub fn parse(content: &str, format: ConfigFormat) -> Result<Self> {
        let config: Self = match format {
            ConfigFormat::Json => serde_json::from_str(content)
                .map_err(|e| ChainError::Config(format!("Failed to parse JSON config: {}", e)))?,
            ConfigFormat::Toml => toml::from_str(content)
                .map_err(|e| ChainError::Config(format!("Failed to parse TOML config: {}", e)))?,
        };
        config.chain.validate()?;
        Ok(config)
    }

    /// Load a configuration file from disk
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ChainError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;
        Self::parse(&content, ConfigFormat::from_path(path))
    }

    /// Load a configuration file, returning defaults if any error occurs
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::load(path.as_ref()) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Using default configuration: {}", e);
                Self::default()
            }
        }
    }

    /// Serialize to text in the given format
    pub fn to_string_as(&self, format: ConfigFormat) -> Result<String> {
        match format {
            ConfigFormat::Json => serde_json::to_string_pretty(self)
                .map_err(|e| ChainError::Serialization(format!("Failed to serialize config: {}", e))),
            ConfigFormat::Toml => toml::to_string_pretty(self)
                .map_err(|e| ChainError::Serialization(format!("Failed to serialize config: {}", e))),
        }
    }

    /// Save configuration to disk, format chosen by extension
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    ChainError::Config(format!("Failed to create config directory: {}", e))
                })?;
            }
        }

        let content = self.to_string_as(ConfigFormat::from_path(path))?;
        std::fs::write(path, content).map_err(|e| {
            ChainError::Config(format!("Failed to write config file {:?}: {}", path, e))
        })
    }
}
