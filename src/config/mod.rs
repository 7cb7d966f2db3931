//! Configuration management for imagebox
//!
//! This module provides a layered configuration system that loads settings from:
//! 1. Default values (embedded in structs)
//! 2. TOML configuration file
//! 3. Environment variables (highest priority)
//!
//! # Usage
//!
//! ```no_run
//! use imagebox::config::Config;
//!
//! let config = Config::load().expect("Failed to load configuration");
//! println!("Concurrent loads: {}", config.loader.max_concurrent_loads);
//! ```
//!
//! # Environment Variables
//!
//! Configuration can be overridden using environment variables with the pattern:
//! `IMAGEBOX__<section>__<key>`
//!
//! Examples:
//! - `IMAGEBOX__LOADER__MAX_CONCURRENT_LOADS=8`
//! - `IMAGEBOX__LOADER__LOADING_TIMEOUT=10s`
//! - `IMAGEBOX__CACHE__COST_LIMIT=128MB`
//!
//! # Configuration File
//!
//! By default, the configuration is loaded from `config/imagebox.toml`.
//! This can be overridden using the `IMAGEBOX_CONFIG` environment variable.

mod models;
mod sources;
mod validation;

pub use crate::humanize::{ByteSize, HumanDuration};
pub use models::{
    BundleConfig, CacheConfig, Config, DecodeConfig, HttpClientConfig, LoaderConfig, ServerConfig,
};
pub use validation::ValidationError;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Configuration validation failed: {0}")]
    ValidationError(#[from] ValidationError),
}

impl Config {
    /// Load configuration from all sources (file + environment)
    ///
    /// # Errors
    ///
    /// Returns an error if the file is malformed or validation fails.
    pub fn load() -> Result<Self, ConfigError> {
        let config = sources::load()?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: std::path::PathBuf) -> Result<Self, ConfigError> {
        let config = sources::load_from_sources(path)?;
        validation::validate(&config)?;
        Ok(config)
    }
}
