use crate::state::ItemState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Current cursor schema version
pub const CURSOR_SCHEMA_VERSION: u32 = 1;

/// Durable record of harvest progress
///
/// This is what the checkpoint file holds. It answers two questions on
/// resume: where to restart enumeration, and which identifiers need no
/// further work.
///
/// `last_enumerator_index` is a low watermark: every listing position below
/// it reached a terminal decision. Positions finished out of order above the
/// watermark are remembered in memory until the gap closes, and their
/// identifiers are already in `processed_ids`, so a resumed run skips them
/// without fetching.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CursorState {
    pub schema_version: u32,

    /// Every listing position below this index is decided
    pub last_enumerator_index: u64,

    /// Valid games durably written so far, across runs
    pub valid_count: u64,

    /// Identifiers with a terminal decision
    pub processed_ids: BTreeSet<u64>,

    /// Identifiers that failed after every retry; subset of `processed_ids`
    #[serde(default)]
    pub failed_ids: BTreeSet<u64>,

    /// SHA-256 of the configuration file the run was started with
    #[serde(default)]
    pub config_hash: Option<String>,

    pub updated_at: DateTime<Utc>,

    /// Positions finished above the watermark
    #[serde(skip)]
    completed_above: BTreeSet<u64>,
}

impl Default for CursorState {
    fn default() -> Self {
        Self::new()
    }
}

impl CursorState {
    /// Creates an empty cursor
    pub fn new() -> Self {
        Self {
            schema_version: CURSOR_SCHEMA_VERSION,
            last_enumerator_index: 0,
            valid_count: 0,
            processed_ids: BTreeSet::new(),
            failed_ids: BTreeSet::new(),
            config_hash: None,
            updated_at: Utc::now(),
            completed_above: BTreeSet::new(),
        }
    }

    pub fn is_processed(&self, id: u64) -> bool {
        self.processed_ids.contains(&id)
    }

    /// Records a terminal decision for the item at listing position `index`
    ///
    /// Non-terminal states are ignored.
    pub fn record(&mut self, index: u64, id: u64, state: ItemState) {
        if !state.is_terminal() {
            return;
        }

        let newly_processed = self.processed_ids.insert(id);
        match state {
            ItemState::Valid if newly_processed => self.valid_count += 1,
            ItemState::Failed => {
                self.failed_ids.insert(id);
            }
            _ => {}
        }

        self.complete_index(index);
    }

    /// Marks a position whose identifier was already processed in an earlier run
    pub fn record_skip(&mut self, index: u64) {
        self.complete_index(index);
    }

    /// Merges identifiers found in the games stream
    ///
    /// The games stream is authoritative: a game written just before a crash
    /// is processed even if the checkpoint never heard of it, and the valid
    /// count is the number of distinct games on disk.
    pub fn reconcile(&mut self, written: &BTreeSet<u64>) {
        let recovered = written.difference(&self.processed_ids).count();
        if recovered > 0 {
            tracing::info!(
                recovered,
                "Recovered games written after the last checkpoint"
            );
        }

        let written_count = written.len() as u64;
        if written_count != self.valid_count {
            tracing::info!(
                checkpoint = self.valid_count,
                on_disk = written_count,
                "Valid count taken from the games stream"
            );
        }

        self.processed_ids.extend(written.iter().copied());
        for id in written {
            self.failed_ids.remove(id);
        }
        self.valid_count = written_count;
    }

    /// Refreshes `updated_at`
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    fn complete_index(&mut self, index: u64) {
        if index < self.last_enumerator_index {
            return;
        }

        self.completed_above.insert(index);
        while self.completed_above.remove(&self.last_enumerator_index) {
            self.last_enumerator_index += 1;
        }
    }
}
