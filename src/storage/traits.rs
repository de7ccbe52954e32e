//! Storage traits and error types
//!
//! This module defines the trait interface for checkpoint backends and
//! associated error types.

use crate::state::CursorState;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during checkpoint operations
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Checkpoint file {path} is {size} bytes, larger than the {limit} byte limit")]
    TooLarge { path: PathBuf, size: u64, limit: u64 },

    #[error("Checkpoint schema version {found} is not supported (expected {expected})")]
    SchemaMismatch { expected: u32, found: u32 },

    #[error("Failed to replace checkpoint file: {0}")]
    Persist(String),
}

/// Result type for checkpoint operations
pub type CheckpointResult<T> = Result<T, CheckpointError>;

/// Trait for checkpoint backends
///
/// Implementations must make `save` atomic: after a crash at any point, a
/// later `load` returns either the previous state or the new one, never a
/// mix of both.
pub trait CheckpointStore: Send + Sync {
    /// Loads the last saved state, or a fresh one if nothing was saved
    fn load(&self) -> CheckpointResult<CursorState>;

    /// Durably replaces the saved state
    fn save(&self, state: &CursorState) -> CheckpointResult<()>;

    /// Sets previous state aside and returns a fresh one
    fn reset(&self) -> CheckpointResult<CursorState>;
}
