//! Candidate enumeration
//!
//! The catalog listing is fetched once per harvest and saved as a snapshot.
//! Resumed runs read the snapshot so listing positions keep their meaning
//! even if the catalog changed in between.

use crate::harvester::fetcher::{FetchResult, RateLimitedFetcher};
use crate::storage::{ListingSnapshot, SnapshotStore};
use crate::HarvestError;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use std::time::Duration;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ListingPayload {
    AppList { applist: AppList },
    Response { response: AppList },
    Bare(Vec<ListingEntry>),
}

#[derive(Debug, Deserialize)]
struct AppList {
    apps: Vec<ListingEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ListingEntry {
    Id(u64),
    App { appid: u64 },
}

impl ListingEntry {
    fn id(&self) -> u64 {
        match self {
            Self::Id(id) | Self::App { appid: id } => *id,
        }
    }
}

/// Parses a listing payload into an ordered, duplicate-free id sequence
///
/// Accepted shapes:
/// - `{"applist": {"apps": [{"appid": 10}, ...]}}`
/// - `{"response": {"apps": [{"appid": 10}, ...]}}`
/// - `[10, 20]` or `[{"appid": 10}, ...]`
///
/// The first occurrence of a repeated id keeps its position.
pub fn parse_listing(payload: &Value) -> Result<Vec<u64>, String> {
    let parsed = ListingPayload::deserialize(payload)
        .map_err(|_| "unrecognized listing shape".to_string())?;

    let entries = match parsed {
        ListingPayload::AppList { applist } => applist.apps,
        ListingPayload::Response { response } => response.apps,
        ListingPayload::Bare(entries) => entries,
    };

    let mut seen = HashSet::with_capacity(entries.len());
    Ok(entries
        .iter()
        .map(ListingEntry::id)
        .filter(|id| seen.insert(*id))
        .collect())
}

/// Produces the ordered universe of candidates
pub struct Enumerator {
    list_url: String,
    snapshot: SnapshotStore,
    listing_timeout: Duration,
}

impl Enumerator {
    pub fn new(list_url: impl Into<String>, snapshot: SnapshotStore, listing_timeout: Duration) -> Self {
        Self {
            list_url: list_url.into(),
            snapshot,
            listing_timeout,
        }
    }

    /// Returns the candidate sequence
    ///
    /// With `reuse_snapshot`, a saved snapshot is returned without touching
    /// the network. Otherwise, or when the snapshot is missing or unreadable,
    /// the listing is fetched over the direct transport and saved.
    ///
    /// # Errors
    ///
    /// `HarvestError::Listing` when the listing cannot be fetched, parsed,
    /// or is empty. This is fatal for the run.
    pub async fn list(
        &self,
        fetcher: &RateLimitedFetcher,
        reuse_snapshot: bool,
    ) -> Result<Vec<u64>, HarvestError> {
        if reuse_snapshot {
            match self.snapshot.load() {
                Ok(Some(snapshot)) => {
                    tracing::info!(
                        candidates = snapshot.ids.len(),
                        fetched_at = %snapshot.fetched_at,
                        "Using saved listing snapshot"
                    );
                    return Ok(snapshot.ids);
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(
                    path = %self.snapshot.path().display(),
                    error = %e,
                    "Listing snapshot unreadable, fetching a fresh listing"
                ),
            }
        }

        let ids = self.fetch(fetcher).await?;
        self.snapshot
            .save(&ListingSnapshot::new(self.list_url.clone(), ids.clone()))?;
        Ok(ids)
    }

    async fn fetch(&self, fetcher: &RateLimitedFetcher) -> Result<Vec<u64>, HarvestError> {
        tracing::info!("Fetching catalog listing from {}", self.list_url);

        let transport = fetcher.pool().direct();
        let payload = match fetcher
            .fetch_with_timeout(&transport, &self.list_url, self.listing_timeout)
            .await
        {
            FetchResult::Success { payload, .. } => payload,
            FetchResult::Failure { kind, .. } => {
                return Err(HarvestError::Listing(kind.to_string()));
            }
        };

        let ids = parse_listing(&payload).map_err(HarvestError::Listing)?;
        if ids.is_empty() {
            return Err(HarvestError::Listing("listing is empty".to_string()));
        }

        tracing::info!(candidates = ids.len(), "Catalog listing fetched");
        Ok(ids)
    }
}
