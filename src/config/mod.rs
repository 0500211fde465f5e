//! Configuration management for mediabox
//!
//! This module provides a layered configuration system that loads settings from:
//! 1. Default values (embedded in structs)
//! 2. Configuration file (INI by default, TOML/YAML/JSON by extension)
//! 3. Environment variables
//! 4. Deployment variables `NB_WORKERS`, `DISABLE_REDIS`, `REDIS_URL`,
//!    `DOWNLOAD_DIR` (highest priority)
//!
//! # Usage
//!
//! ```no_run
//! use mediabox::config::Config;
//!
//! let config = Config::load().expect("Failed to load configuration");
//! println!("Server listening on: {}", config.server.bind_addr);
//! ```
//!
//! # Environment Variables
//!
//! Any setting can be overridden with `MEDIABOX__<section>__<key>`:
//! - `MEDIABOX__SERVER__BIND_ADDR=0.0.0.0:9000`
//! - `MEDIABOX__WORKERS__RETRY_LIMIT=5`
//! - `MEDIABOX__RETENTION__JOB_TTL=2d`
//!
//! # Configuration File
//!
//! By default, the configuration is loaded from `params/params.ini`.
//! This can be overridden using the `MEDIABOX_CONFIG` environment variable.
//!
//! Older `params.ini` files are understood as well: `[app]` may carry
//! `_log_level`, `_listen_ip` and `_listen_port`, and `[preset:NAME]`
//! sections define download presets (see [`presets`]).

mod models;
pub mod presets;
mod sources;
mod validation;

// Re-export public types
pub use crate::humanize::HumanDuration;
pub use models::{
    AppConfig, Config, DownloaderConfig, DownloaderKind, RedisConfig, RetentionConfig,
    ServerConfig, StorageConfig, WorkerConfig,
};
pub use presets::Preset;
pub use sources::apply_deployment_env;
pub use validation::ValidationError;

use crate::job::RetryPolicy;
use std::path::PathBuf;
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
    /// Returns an error if:
    /// - Configuration file is malformed
    /// - A deployment variable cannot be parsed
    /// - Validation fails
    pub fn load() -> Result<Self, ConfigError> {
        let config = sources::load()?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load from an explicit file, still honouring the environment
    pub fn load_file(path: PathBuf) -> Result<Self, ConfigError> {
        let config = sources::load_at(path)?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific path, without deployment variables
    ///
    /// Useful for testing with custom configuration files.
    pub fn load_from_path(path: PathBuf) -> Result<Self, ConfigError> {
        let config = sources::load_from_sources(path)?;
        validation::validate(&config)?;
        Ok(config)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            retry_limit: self.workers.retry_limit,
            base_delay: self.workers.retry_backoff.as_duration(),
            max_delay: self.workers.max_backoff.as_duration(),
        }
    }
}
