//! JSON checkpoint file with atomic replacement

use crate::state::{CursorState, CURSOR_SCHEMA_VERSION};
use crate::storage::traits::{CheckpointError, CheckpointResult, CheckpointStore};
use serde::Deserialize;
use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Maximum allowed checkpoint size (64 MiB) to bound memory on load
pub const MAX_CHECKPOINT_SIZE: u64 = 64 * 1024 * 1024;

/// Checkpoint store backed by a JSON file
///
/// Layout next to `path`:
/// - `path`: the current state, always complete
/// - `path.bak`: the state before the last save
/// - `path.<unix-ts>.reset`: states set aside by [`reset`](CheckpointStore::reset)
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    path: PathBuf,
}

/// A serialized state written to a temp file but not yet in place
///
/// Dropping it without [`FileCheckpointStore::commit`] deletes the temp
/// file and leaves the saved state untouched.
#[derive(Debug)]
pub struct StagedCheckpoint {
    temp: NamedTempFile,
}

impl FileCheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn backup_path(&self) -> PathBuf {
        with_suffix(&self.path, ".bak")
    }

    /// Writes `state` to a synced temp file in the checkpoint directory
    pub fn stage(&self, state: &CursorState) -> CheckpointResult<StagedCheckpoint> {
        let json = serde_json::to_vec_pretty(state)
            .map_err(|e| CheckpointError::Serialization(e.to_string()))?;
        let temp = stage_bytes(&self.path, &json)?;
        Ok(StagedCheckpoint { temp })
    }

    /// Backs up the current file and moves the staged one into place
    pub fn commit(&self, staged: StagedCheckpoint) -> CheckpointResult<()> {
        if self.path.exists() {
            std::fs::copy(&self.path, self.backup_path())?;
        }
        persist(staged.temp, &self.path)
    }

    /// Reads one checkpoint file; `Ok(None)` if it doesn't exist
    fn read_file(path: &Path) -> CheckpointResult<Option<CursorState>> {
        let metadata = match std::fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if metadata.len() > MAX_CHECKPOINT_SIZE {
            return Err(CheckpointError::TooLarge {
                path: path.to_path_buf(),
                size: metadata.len(),
                limit: MAX_CHECKPOINT_SIZE,
            });
        }

        let bytes = std::fs::read(path)?;

        // Check the version before the full parse so a newer layout reports
        // a version mismatch instead of a field error
        #[derive(Deserialize)]
        struct Versioned {
            schema_version: u32,
        }
        let versioned: Versioned = serde_json::from_slice(&bytes)
            .map_err(|e| CheckpointError::Serialization(e.to_string()))?;
        if versioned.schema_version != CURSOR_SCHEMA_VERSION {
            return Err(CheckpointError::SchemaMismatch {
                expected: CURSOR_SCHEMA_VERSION,
                found: versioned.schema_version,
            });
        }

        let state = serde_json::from_slice(&bytes)
            .map_err(|e| CheckpointError::Serialization(e.to_string()))?;
        Ok(Some(state))
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn load(&self) -> CheckpointResult<CursorState> {
        match Self::read_file(&self.path) {
            Ok(Some(state)) => {
                tracing::info!(
                    path = %self.path.display(),
                    valid = state.valid_count,
                    processed = state.processed_ids.len(),
                    index = state.last_enumerator_index,
                    "Loaded checkpoint"
                );
                return Ok(state);
            }
            Ok(None) => {}
            Err(e @ CheckpointError::SchemaMismatch { .. }) => return Err(e),
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Checkpoint unreadable, trying backup"
                );
            }
        }

        let backup = self.backup_path();
        match Self::read_file(&backup) {
            Ok(Some(state)) => {
                tracing::warn!(path = %backup.display(), "Loaded checkpoint from backup");
                Ok(state)
            }
            Ok(None) => {
                tracing::info!("No checkpoint found, starting fresh");
                Ok(CursorState::new())
            }
            Err(e @ CheckpointError::SchemaMismatch { .. }) => Err(e),
            Err(e) => {
                tracing::warn!(
                    path = %backup.display(),
                    error = %e,
                    "Backup checkpoint unreadable, starting fresh"
                );
                Ok(CursorState::new())
            }
        }
    }

    fn save(&self, state: &CursorState) -> CheckpointResult<()> {
        let staged = self.stage(state)?;
        self.commit(staged)?;

        tracing::debug!(
            path = %self.path.display(),
            valid = state.valid_count,
            index = state.last_enumerator_index,
            "Checkpoint saved"
        );
        Ok(())
    }

    fn reset(&self) -> CheckpointResult<CursorState> {
        let stamp = chrono::Utc::now().timestamp();
        for path in [self.path.clone(), self.backup_path()] {
            if let Some(archived) = archive(&path, stamp)? {
                tracing::info!(
                    from = %path.display(),
                    to = %archived.display(),
                    "Archived previous checkpoint"
                );
            }
        }

        let state = CursorState::new();
        self.save(&state)?;
        Ok(state)
    }
}

/// Writes `bytes` to a synced temp file in the same directory as `target`
pub(crate) fn stage_bytes(target: &Path, bytes: &[u8]) -> CheckpointResult<NamedTempFile> {
    let dir = parent_dir(target);
    std::fs::create_dir_all(&dir)?;

    let mut temp = NamedTempFile::new_in(&dir)?;
    temp.write_all(bytes)?;
    temp.flush()?;
    temp.as_file().sync_all()?;
    Ok(temp)
}

/// Atomically moves a staged temp file over `target` and syncs the directory
pub(crate) fn persist(temp: NamedTempFile, target: &Path) -> CheckpointResult<()> {
    temp.persist(target)
        .map_err(|e| CheckpointError::Persist(e.to_string()))?;

    // Make the rename itself durable
    if let Ok(dir) = std::fs::File::open(parent_dir(target)) {
        let _ = dir.sync_all();
    }
    Ok(())
}

/// Renames `path` to `path.<stamp>.reset` if it exists
pub(crate) fn archive(path: &Path, stamp: i64) -> std::io::Result<Option<PathBuf>> {
    if !path.exists() {
        return Ok(None);
    }
    let archived = with_suffix(path, &format!(".{}.reset", stamp));
    std::fs::rename(path, &archived)?;
    Ok(Some(archived))
}

/// `path` with `suffix` appended to its file name
pub(crate) fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}
