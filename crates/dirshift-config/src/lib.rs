//! Configuration management for dirshift
//!
//! Configuration is layered: built-in defaults, then an optional file (YAML, TOML or
//! JSON), then `DIRSHIFT__*` environment variables. The result is validated before use.
//!
//! # Examples
//!
//! ```rust
//! use dirshift_config::ConfigBuilder;
//!
//! let config = ConfigBuilder::new()
//!     .add_defaults()
//!     .add_source_file("dirshift.yaml")
//!     .add_env_prefix("DIRSHIFT")
//!     .build()
//!     .expect("Failed to load configuration");
//!
//! println!("Chunk size: {}", config.engine.chunk_size.get());
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

use dirshift_types::{ChunkSize, MigrationConfig, VerifyMode};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub mod builder;
pub mod error;
pub mod loader;

pub use builder::ConfigBuilder;
pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;

/// Main configuration structure for dirshift
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Per-run migration behaviour
    #[serde(default)]
    pub migration: MigrationConfig,
    /// Engine tuning
    #[serde(default)]
    pub engine: EngineConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Where the CLI keeps its history journal and cancel requests
    #[serde(default)]
    pub state: StateConfig,
}

/// Engine tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Copy and verification quantum
    pub chunk_size: ChunkSize,
    /// Upper bound on concurrently running jobs in parallel mode (0 = unbounded)
    pub max_parallel_jobs: usize,
    /// Verification depth
    pub verify_mode: VerifyMode,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunk_size: ChunkSize::default(),
            max_parallel_jobs: 0,
            verify_mode: VerifyMode::default(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
    /// Enable JSON formatting
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            json_format: false,
        }
    }
}

/// State directory configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateConfig {
    /// Directory for the history journal and cancel requests
    pub state_dir: Option<PathBuf>,
}

impl StateConfig {
    /// Configured state directory, or the platform data directory
    pub fn resolve_state_dir(&self) -> PathBuf {
        self.state_dir.clone().unwrap_or_else(|| {
            loader::dirs::data_dir()
                .map_or_else(|| PathBuf::from(".dirshift"), |dir| dir.join("dirshift"))
        })
    }
}
