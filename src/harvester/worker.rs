//! Harvest workers
//!
//! Each worker repeatedly claims the next listing position, takes the
//! candidate through fetch, classification and (if valid) the review fetch
//! and writes, then records the outcome. All shared state lives in one
//! [`HarvestContext`] behind an `Arc`.

use crate::config::HarvestQuota;
use crate::harvester::catalog::{CatalogEndpoints, ReviewPage, FIRST_REVIEW_CURSOR, MAX_REVIEWS_PER_PAGE};
use crate::harvester::fetcher::{FailureKind, FetchResult, RateLimitedFetcher};
use crate::harvester::quota::{QuotaGate, Slot};
use crate::harvester::validator::{Rejection, Validator, Verdict};
use crate::output::{RecordSink, Stream};
use crate::shutdown::SharedShutdown;
use crate::state::{CursorState, DrainReason, ItemState, PhaseCell};
use crate::storage::{CheckpointError, CheckpointStore};
use crate::HarvestError;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Upper bound on review pages fetched for one game
const MAX_REVIEW_PAGES: usize = 50;

/// What happened to one claimed candidate
#[derive(Debug)]
pub enum ItemOutcome {
    /// Already processed in an earlier run; nothing fetched
    Skipped,

    /// Valid and written; the game record is durable
    Written { slot: Slot, reviews: usize },

    /// Valid, but the quota filled before it could be written
    Discarded,

    Rejected(Rejection),

    Failed(FailureKind),

    /// A write failed; the run must stop
    Fatal(HarvestError),
}

impl ItemOutcome {
    /// The terminal state recorded in the cursor, if any
    pub fn item_state(&self) -> Option<ItemState> {
        match self {
            Self::Written { .. } => Some(ItemState::Valid),
            Self::Rejected(_) => Some(ItemState::Rejected),
            Self::Failed(_) => Some(ItemState::Failed),
            Self::Skipped | Self::Discarded | Self::Fatal(_) => None,
        }
    }
}

/// Per-run counters
#[derive(Debug, Default)]
pub struct RunCounters {
    pub examined: AtomicU64,
    pub written: AtomicU64,
    pub rejected: AtomicU64,
    pub failed: AtomicU64,
    pub skipped: AtomicU64,
    pub discarded: AtomicU64,
    pub reviews: AtomicU64,
}

impl RunCounters {
    fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }

    pub fn examined(&self) -> u64 {
        Self::get(&self.examined)
    }

    pub fn written(&self) -> u64 {
        Self::get(&self.written)
    }
}

/// Settings workers need on every item
#[derive(Debug, Clone, Copy)]
pub struct WorkerSettings {
    pub quota: HarvestQuota,
    pub transport_rotations: u32,
    pub review_page_delay: Duration,
}

/// State shared by every worker in a run
pub struct HarvestContext {
    pub(crate) settings: WorkerSettings,
    pub(crate) ids: Vec<u64>,
    pub(crate) next_index: AtomicU64,
    pub(crate) gate: QuotaGate,
    pub(crate) phase: PhaseCell,
    pub(crate) shutdown: SharedShutdown,
    pub(crate) fetcher: RateLimitedFetcher,
    pub(crate) endpoints: CatalogEndpoints,
    pub(crate) validator: Validator,
    pub(crate) sink: Arc<dyn RecordSink>,
    pub(crate) checkpoints: Arc<dyn CheckpointStore>,
    pub(crate) cursor: Mutex<CursorState>,
    pub(crate) counters: RunCounters,
    save_lock: Mutex<()>,
    fatal: Mutex<Option<HarvestError>>,
}

impl HarvestContext {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        settings: WorkerSettings,
        ids: Vec<u64>,
        cursor: CursorState,
        shutdown: SharedShutdown,
        fetcher: RateLimitedFetcher,
        endpoints: CatalogEndpoints,
        validator: Validator,
        sink: Arc<dyn RecordSink>,
        checkpoints: Arc<dyn CheckpointStore>,
    ) -> Self {
        let start = cursor.last_enumerator_index.min(ids.len() as u64);
        Self {
            gate: QuotaGate::new(settings.quota.max_games, cursor.valid_count),
            settings,
            ids,
            next_index: AtomicU64::new(start),
            phase: PhaseCell::new(),
            shutdown,
            fetcher,
            endpoints,
            validator,
            sink,
            checkpoints,
            cursor: Mutex::new(cursor),
            counters: RunCounters::default(),
            save_lock: Mutex::new(()),
            fatal: Mutex::new(None),
        }
    }

    pub(crate) fn lock_cursor(&self) -> MutexGuard<'_, CursorState> {
        self.cursor.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Writes the current cursor through the checkpoint store
    ///
    /// Saves are serialized and the snapshot is taken under the save lock,
    /// so a later save always carries a newer state.
    pub(crate) fn checkpoint(&self) -> Result<(), CheckpointError> {
        let _guard = self.save_lock.lock().unwrap_or_else(|e| e.into_inner());
        let snapshot = {
            let mut cursor = self.lock_cursor();
            cursor.touch();
            cursor.clone()
        };
        self.checkpoints.save(&snapshot)
    }

    /// Records a run-fatal error and starts draining
    pub(crate) fn fail(&self, error: HarvestError) {
        tracing::error!(error = %error, "Storage failure, stopping the harvest");
        {
            let mut fatal = self.fatal.lock().unwrap_or_else(|e| e.into_inner());
            if fatal.is_none() {
                *fatal = Some(error);
            }
        }
        self.phase.begin_drain(DrainReason::Fatal);
    }

    pub(crate) fn take_fatal(&self) -> Option<HarvestError> {
        self.fatal.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    /// Claims the next listing position, or `None` if this worker should stop
    fn claim(&self) -> Option<(u64, u64)> {
        if !self.phase.is_running() {
            return None;
        }
        if self.shutdown.is_shutdown_requested() {
            self.phase.begin_drain(DrainReason::Interrupted);
            return None;
        }
        if self.gate.is_full() {
            self.phase.begin_drain(DrainReason::QuotaReached);
            return None;
        }

        let index = self.next_index.fetch_add(1, Ordering::SeqCst);
        match self.ids.get(index as usize) {
            Some(id) => Some((index, *id)),
            None => {
                self.phase.begin_drain(DrainReason::Exhausted);
                None
            }
        }
    }

    /// Applies an item outcome to the cursor and counters
    fn complete(&self, index: u64, id: u64, outcome: ItemOutcome) {
        {
            let mut cursor = self.lock_cursor();
            match outcome.item_state() {
                Some(state) => cursor.record(index, id, state),
                None if matches!(outcome, ItemOutcome::Skipped) => cursor.record_skip(index),
                None => {}
            }
        }

        let counters = &self.counters;
        match outcome {
            ItemOutcome::Skipped => {
                counters.skipped.fetch_add(1, Ordering::Relaxed);
                return;
            }
            ItemOutcome::Written { slot, reviews } => {
                counters.written.fetch_add(1, Ordering::Relaxed);
                counters.reviews.fetch_add(reviews as u64, Ordering::Relaxed);
                tracing::info!(
                    appid = id,
                    reviews,
                    "Game {}/{} written",
                    slot.number,
                    self.gate.max()
                );
            }
            ItemOutcome::Discarded => {
                counters.discarded.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(appid = id, "Quota already met, discarding valid game");
            }
            ItemOutcome::Rejected(reason) => {
                counters.rejected.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(appid = id, %reason, "Rejected");
            }
            ItemOutcome::Failed(kind) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(appid = id, %kind, "Fetch failed");
            }
            ItemOutcome::Fatal(error) => {
                self.fail(error);
                return;
            }
        }

        let examined = counters.examined.fetch_add(1, Ordering::Relaxed) + 1;
        if examined % self.settings.quota.checkpoint_interval == 0 {
            if let Err(e) = self.checkpoint() {
                self.fail(e.into());
            }
        }
        if examined % self.settings.quota.batch_size == 0 {
            self.log_batch(examined);
        }
    }

    fn log_batch(&self, examined: u64) {
        let counters = &self.counters;
        tracing::info!(
            examined,
            written = counters.written(),
            rejected = RunCounters::get(&counters.rejected),
            failed = RunCounters::get(&counters.failed),
            valid = self.gate.count(),
            quota = self.gate.max(),
            "Batch complete"
        );
    }

    fn is_processed(&self, id: u64) -> bool {
        self.lock_cursor().is_processed(id)
    }
}

/// Runs one worker until the run stops handing out work
pub async fn run_worker(ctx: Arc<HarvestContext>) {
    while let Some((index, id)) = ctx.claim() {
        let outcome = process_item(&ctx, id).await;
        ctx.complete(index, id, outcome);
    }
}

/// Takes one candidate from fetch to durable write
async fn process_item(ctx: &HarvestContext, id: u64) -> ItemOutcome {
    if ctx.is_processed(id) {
        return ItemOutcome::Skipped;
    }

    let url = ctx.endpoints.detail_url(id);
    let payload = match ctx
        .fetcher
        .fetch_rotating(&url, ctx.settings.transport_rotations)
        .await
    {
        FetchResult::Success { payload, .. } => payload,
        FetchResult::Failure { kind, .. } => return ItemOutcome::Failed(kind),
    };

    let record = match ctx.validator.classify(id, &payload) {
        Verdict::Valid(record) => record,
        Verdict::Rejected(reason) => return ItemOutcome::Rejected(reason),
    };

    // Cheap early exit; the binding check is the reservation below
    if ctx.gate.is_full() {
        return ItemOutcome::Discarded;
    }

    let reviews = fetch_reviews(ctx, id).await;

    let Some(slot) = ctx.gate.try_reserve() else {
        return ItemOutcome::Discarded;
    };
    if slot.is_last && ctx.phase.begin_drain(DrainReason::QuotaReached) {
        tracing::info!("Quota of {} games reached, draining", ctx.gate.max());
    }

    // Reviews first: the game record marks the item as complete on disk
    if let Err(e) = ctx.sink.append_all(Stream::Reviews, &reviews) {
        ctx.gate.release(slot);
        return ItemOutcome::Fatal(e.into());
    }
    if let Err(e) = ctx.sink.append(Stream::Games, &record.document) {
        ctx.gate.release(slot);
        return ItemOutcome::Fatal(e.into());
    }

    ItemOutcome::Written {
        slot,
        reviews: reviews.len(),
    }
}

/// Fetches up to the per-game cap of reviews, tagged with `id`
///
/// Review failures are not item failures: whatever was collected before
/// the failure is kept.
async fn fetch_reviews(ctx: &HarvestContext, id: u64) -> Vec<Value> {
    let cap = ctx.settings.quota.max_reviews_per_game;
    let mut reviews: Vec<Value> = Vec::new();
    if cap == 0 {
        return reviews;
    }

    let mut cursor = FIRST_REVIEW_CURSOR.to_string();
    let mut seen_cursors = HashSet::from([cursor.clone()]);

    for page_no in 0..MAX_REVIEW_PAGES {
        if page_no > 0 && !ctx.settings.review_page_delay.is_zero() {
            tokio::time::sleep(ctx.settings.review_page_delay).await;
        }

        let per_page = (cap - reviews.len()).min(MAX_REVIEWS_PER_PAGE);
        let url = ctx.endpoints.review_page_url(id, &cursor, per_page);
        let payload = match ctx
            .fetcher
            .fetch_rotating(&url, ctx.settings.transport_rotations)
            .await
        {
            FetchResult::Success { payload, .. } => payload,
            FetchResult::Failure { kind, .. } => {
                tracing::warn!(appid = id, %kind, kept = reviews.len(), "Review page failed");
                break;
            }
        };

        let Some(page) = ReviewPage::parse(&payload) else {
            break;
        };
        if page.reviews.is_empty() {
            break;
        }

        reviews.extend(page.reviews);
        if reviews.len() >= cap {
            break;
        }

        match page.cursor {
            Some(next) if seen_cursors.insert(next.clone()) => cursor = next,
            _ => break,
        }
    }

    reviews.truncate(cap);
    reviews.into_iter().map(|review| tag_review(review, id)).collect()
}

/// Adds the owning game's identifier to a review
fn tag_review(review: Value, id: u64) -> Value {
    match review {
        Value::Object(mut fields) => {
            fields.insert("appid".to_string(), Value::from(id));
            Value::Object(fields)
        }
        other => {
            let mut fields = Map::new();
            fields.insert("appid".to_string(), Value::from(id));
            fields.insert("review".to_string(), other);
            Value::Object(fields)
        }
    }
}
