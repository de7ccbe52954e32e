//! Statistics generation from the checkpoint and output streams
//!
//! This module provides functionality for extracting and displaying
//! harvest statistics without starting a run.

use crate::config::Config;
use crate::output::jsonl::count_records;
use crate::state::CursorState;
use crate::storage::{CheckpointStore, FileCheckpointStore};
use crate::HarvestError;
use chrono::{DateTime, Utc};

/// Harvest statistics summary
#[derive(Debug, Clone)]
pub struct HarvestStatistics {
    /// Target number of valid games
    pub max_games: u64,

    /// Valid games recorded in the checkpoint
    pub valid_count: u64,

    /// Candidates with a terminal decision
    pub processed: u64,

    /// Candidates that failed after every retry
    pub failed: u64,

    /// Candidates classified as not a game
    pub rejected: u64,

    /// Listing position every earlier candidate has been decided up to
    pub enumerator_index: u64,

    /// Lines in the games stream
    pub games_on_disk: u64,

    /// Lines in the reviews stream
    pub reviews_on_disk: u64,

    pub config_hash: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl HarvestStatistics {
    /// Builds statistics from a cursor and stream line counts
    pub fn from_cursor(
        cursor: &CursorState,
        max_games: u64,
        games_on_disk: u64,
        reviews_on_disk: u64,
    ) -> Self {
        let processed = cursor.processed_ids.len() as u64;
        let failed = cursor.failed_ids.len() as u64;
        Self {
            max_games,
            valid_count: cursor.valid_count,
            processed,
            failed,
            rejected: processed.saturating_sub(cursor.valid_count + failed),
            enumerator_index: cursor.last_enumerator_index,
            games_on_disk,
            reviews_on_disk,
            config_hash: cursor.config_hash.clone(),
            updated_at: cursor.updated_at,
        }
    }

    /// Valid games as a percentage of the quota
    pub fn quota_progress(&self) -> f64 {
        if self.max_games == 0 {
            return 0.0;
        }
        (self.valid_count as f64 / self.max_games as f64) * 100.0
    }

    /// Valid games as a percentage of processed candidates
    pub fn hit_rate(&self) -> f64 {
        if self.processed == 0 {
            return 0.0;
        }
        (self.valid_count as f64 / self.processed as f64) * 100.0
    }
}

/// Loads statistics for the run described by `config`
///
/// # Arguments
///
/// * `config` - The configuration naming the checkpoint and output files
///
/// # Returns
///
/// * `Ok(HarvestStatistics)` - Successfully loaded statistics
/// * `Err(HarvestError)` - The checkpoint or an output file could not be read
pub fn load_statistics(config: &Config) -> Result<HarvestStatistics, HarvestError> {
    let store = FileCheckpointStore::new(&config.output.checkpoint_path);
    let cursor = store.load()?;

    let games_on_disk = count_records(&config.output.games_path)?;
    let reviews_on_disk = count_records(&config.output.reviews_path)?;

    Ok(HarvestStatistics::from_cursor(
        &cursor,
        config.harvest.max_games,
        games_on_disk,
        reviews_on_disk,
    ))
}

/// Prints statistics to stdout in a formatted manner
///
/// # Arguments
///
/// * `stats` - The statistics to display
pub fn print_statistics(stats: &HarvestStatistics) {
    println!("=== Harvest Statistics ===\n");

    println!("Quota:");
    println!(
        "  Valid games: {} / {} ({:.1}%)",
        stats.valid_count,
        stats.max_games,
        stats.quota_progress()
    );
    println!();

    println!("Candidates:");
    println!("  Processed: {}", stats.processed);
    println!("  Rejected: {}", stats.rejected);
    println!("  Failed: {}", stats.failed);
    println!("  Listing position: {}", stats.enumerator_index);
    println!();

    println!("Output:");
    println!("  Game records: {}", stats.games_on_disk);
    println!("  Review records: {}", stats.reviews_on_disk);
    if stats.games_on_disk != stats.valid_count {
        println!("  (game records differ from the checkpoint; the next run reconciles them)");
    }
    println!();

    println!("Last checkpoint: {}", stats.updated_at.to_rfc3339());
    if let Some(hash) = &stats.config_hash {
        println!("Config hash: {}", hash);
    }

    println!(
        "\nHit Rate: {:.1}% ({} / {} candidates were valid games)",
        stats.hit_rate(),
        stats.valid_count,
        stats.processed
    );
}
