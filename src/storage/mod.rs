//! Storage module for persisting harvest progress
//!
//! This module handles the files that let a run resume after a crash:
//! - The checkpoint, holding the [`CursorState`](crate::state::CursorState)
//! - The listing snapshot, holding the enumerated candidate sequence
//!
//! Both are replaced atomically (temp file, fsync, rename), so a crash at
//! any point leaves either the old or the new version on disk.

mod checkpoint;
mod snapshot;
mod traits;

pub use checkpoint::{FileCheckpointStore, StagedCheckpoint, MAX_CHECKPOINT_SIZE};
pub use snapshot::{ListingSnapshot, SnapshotStore};
pub use traits::{CheckpointError, CheckpointResult, CheckpointStore};

pub(crate) use checkpoint::archive;
