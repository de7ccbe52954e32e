//! Output module for harvested records and run reports
//!
//! This module handles:
//! - Appending game and review records to JSON Lines streams
//! - Recovering the set of already-written games after a crash
//! - Reporting harvest statistics

mod jsonl;
pub mod stats;
mod traits;

pub use jsonl::{count_records, scan_ids, JsonlRecordWriter};
pub use stats::{load_statistics, print_statistics, HarvestStatistics};
pub use traits::{OutputError, OutputResult, RecordSink, Stream};
