//! Harvester module for catalog fetching and quota-exact collection
//!
//! This module contains the core harvesting logic, including:
//! - HTTP fetching with retry, backoff and proxy rotation
//! - Candidate enumeration from the catalog listing
//! - Classification of detail documents
//! - The exact quota gate
//! - Worker scheduling and overall run coordination

mod backoff;
mod catalog;
mod enumerator;
mod fetcher;
mod quota;
mod scheduler;
mod validator;
mod worker;

pub use backoff::BackoffPolicy;
pub use catalog::{
    open_detail_envelope, CatalogEndpoints, DetailEnvelope, ReviewPage, FIRST_REVIEW_CURSOR,
    MAX_REVIEWS_PER_PAGE,
};
pub use enumerator::{parse_listing, Enumerator};
pub use fetcher::{FailureKind, FetchResult, RateLimitedFetcher};
pub use quota::{QuotaGate, Slot};
pub use scheduler::{HarvestReport, HarvestScheduler};
pub use validator::{GameRecord, Rejection, Validator, Verdict};
pub use worker::ItemOutcome;

use crate::config::Config;
use crate::shutdown::SharedShutdown;
use crate::HarvestError;

/// Runs a complete harvest
///
/// This is the main entry point. It will:
/// 1. Open the checkpoint and output streams (archiving them on reset)
/// 2. Reconcile the checkpoint with games already on disk
/// 3. Obtain the candidate listing (snapshot or fresh fetch)
/// 4. Run the workers until the quota is met or the listing runs out
/// 5. Write the final checkpoint
///
/// # Arguments
///
/// * `config` - The harvest configuration
/// * `reset` - Start over instead of resuming
/// * `config_hash` - Hash of the configuration file, stored in the checkpoint
/// * `shutdown` - Interruption flag shared with the signal handler
pub async fn harvest(
    config: Config,
    reset: bool,
    config_hash: Option<String>,
    shutdown: SharedShutdown,
) -> Result<HarvestReport, HarvestError> {
    let mut scheduler = HarvestScheduler::new(config, reset, shutdown)?;
    if let Some(hash) = config_hash {
        scheduler = scheduler.with_config_hash(hash);
    }
    scheduler.run().await
}
