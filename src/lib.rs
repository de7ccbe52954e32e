//! Sumi-Harvest: a quota-exact catalog harvester
//!
//! This crate collects game detail and review documents from a storefront
//! catalog API while coping with per-IP rate limits, flaky proxies and
//! process restarts. It stops at an exact number of valid games no matter
//! how many workers are fetching concurrently.

pub mod config;
pub mod harvester;
pub mod output;
pub mod proxy;
pub mod shutdown;
pub mod state;
pub mod storage;

use thiserror::Error;

/// Main error type for Sumi-Harvest operations
///
/// Only run-fatal conditions are represented here. Item-level problems
/// (a failed fetch, a rejected payload) are values, not errors.
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Catalog listing unavailable: {0}")]
    Listing(String),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] storage::CheckpointError),

    #[error("Output error: {0}")]
    Output(#[from] output::OutputError),

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// Result type alias for Sumi-Harvest operations
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use harvester::{HarvestReport, HarvestScheduler};
pub use state::{CursorState, ItemState, RunPhase};
