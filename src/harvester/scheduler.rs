//! Harvest scheduler - main run orchestration logic
//!
//! This module coordinates a whole run:
//! - Loading or resetting the checkpoint and reconciling it with the output
//! - Obtaining the candidate listing
//! - Running the worker pool until the quota is met, the listing runs out,
//!   shutdown is requested or storage fails
//! - Periodic progress reporting, the checkpoint taken on interrupt and
//!   the final checkpoint

use crate::config::Config;
use crate::harvester::catalog::CatalogEndpoints;
use crate::harvester::enumerator::Enumerator;
use crate::harvester::fetcher::RateLimitedFetcher;
use crate::harvester::validator::Validator;
use crate::harvester::worker::{run_worker, HarvestContext, WorkerSettings};
use crate::output::{JsonlRecordWriter, RecordSink, Stream};
use crate::proxy::ProxyPool;
use crate::shutdown::SharedShutdown;
use crate::state::{CursorState, DrainReason};
use crate::storage::{CheckpointStore, FileCheckpointStore, SnapshotStore};
use crate::HarvestError;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::Instrument;

/// Summary of one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarvestReport {
    /// Games written by this run
    pub games_written: u64,

    /// Valid games on disk, across runs
    pub valid_total: u64,

    pub max_games: u64,

    /// Candidates fetched and decided by this run
    pub examined: u64,
    pub rejected: u64,
    pub failed: u64,

    /// Candidates skipped because an earlier run processed them
    pub skipped: u64,

    /// Valid candidates dropped because the quota filled first
    pub discarded: u64,

    pub reviews_written: u64,
    pub drain_reason: DrainReason,
    pub elapsed: Duration,
}

impl HarvestReport {
    pub fn quota_met(&self) -> bool {
        self.valid_total >= self.max_games
    }
}

/// Drives a harvest run
pub struct HarvestScheduler {
    config: Config,
    config_hash: Option<String>,
    reset: bool,
    pool: Arc<ProxyPool>,
    checkpoints: Arc<dyn CheckpointStore>,
    sink: Arc<dyn RecordSink>,
    snapshot: SnapshotStore,
    shutdown: SharedShutdown,
}

impl HarvestScheduler {
    /// Creates a scheduler with file-backed storage and the configured proxies
    ///
    /// # Arguments
    ///
    /// * `config` - The validated run configuration
    /// * `reset` - Archive previous progress and output, then start over
    /// * `shutdown` - Flag the workers watch between items
    ///
    /// # Returns
    ///
    /// * `Ok(HarvestScheduler)` - Ready to run
    /// * `Err(HarvestError)` - Output files or HTTP clients could not be set up
    pub fn new(config: Config, reset: bool, shutdown: SharedShutdown) -> Result<Self, HarvestError> {
        let pool = if config.harvest.parallel {
            ProxyPool::from_config(&config.proxy, &config.network)?
        } else {
            tracing::info!("Sequential mode, proxies disabled");
            ProxyPool::direct_only(&config.network)?
        };

        let sink = JsonlRecordWriter::from_config(&config.output, reset)?;
        let checkpoints = FileCheckpointStore::new(&config.output.checkpoint_path);

        Ok(Self::with_components(
            config,
            reset,
            Arc::new(pool),
            Arc::new(checkpoints),
            Arc::new(sink),
            shutdown,
        ))
    }

    /// Creates a scheduler from already-built components
    pub fn with_components(
        config: Config,
        reset: bool,
        pool: Arc<ProxyPool>,
        checkpoints: Arc<dyn CheckpointStore>,
        sink: Arc<dyn RecordSink>,
        shutdown: SharedShutdown,
    ) -> Self {
        let snapshot = SnapshotStore::new(config.output.listing_snapshot_path());
        Self {
            config,
            config_hash: None,
            reset,
            pool,
            checkpoints,
            sink,
            snapshot,
            shutdown,
        }
    }

    /// Records the configuration hash in the checkpoint
    pub fn with_config_hash(mut self, hash: impl Into<String>) -> Self {
        self.config_hash = Some(hash.into());
        self
    }

    /// Runs the harvest to completion
    ///
    /// Returns an error only for listing-fatal and storage-fatal conditions;
    /// everything item-level is counted in the report.
    pub async fn run(self) -> Result<HarvestReport, HarvestError> {
        let started = Instant::now();
        let quota = self.config.harvest.quota();

        let mut cursor = self.load_cursor()?;

        let written = self.sink.written_ids(Stream::Games)?;
        cursor.reconcile(&written);

        if cursor.valid_count >= quota.max_games {
            tracing::info!(
                valid = cursor.valid_count,
                quota = quota.max_games,
                "Quota already met, nothing to do"
            );
            self.checkpoints.save(&cursor)?;
            return Ok(self.idle_report(&cursor, DrainReason::QuotaReached, started));
        }

        let fetcher = RateLimitedFetcher::new(Arc::clone(&self.pool), &self.config.network);
        let enumerator = Enumerator::new(
            self.config.catalog.list_url.clone(),
            self.snapshot.clone(),
            self.config.network.listing_timeout(),
        );
        let ids = enumerator.list(&fetcher, !self.reset).await?;

        let workers = self.config.harvest.effective_workers();
        tracing::info!(
            candidates = ids.len(),
            resume_index = cursor.last_enumerator_index,
            valid = cursor.valid_count,
            quota = quota.max_games,
            workers,
            proxies = self.pool.len(),
            "Starting harvest"
        );

        let settings = WorkerSettings {
            quota,
            transport_rotations: self.config.network.transport_rotations,
            review_page_delay: self.config.network.review_page_delay(),
        };
        let ctx = Arc::new(HarvestContext::new(
            settings,
            ids,
            cursor,
            Arc::clone(&self.shutdown),
            fetcher,
            CatalogEndpoints::from_config(&self.config.catalog),
            Validator::from_config(&self.config.catalog),
            Arc::clone(&self.sink),
            Arc::clone(&self.checkpoints),
        ));

        let progress = tokio::spawn(report_progress(
            Arc::clone(&ctx),
            Duration::from_secs(self.config.harvest.progress_interval_secs),
            started,
        ));

        let interrupt_guard = tokio::spawn(checkpoint_on_interrupt(Arc::clone(&ctx)));

        let mut set = JoinSet::new();
        for worker_id in 0..workers {
            let span = tracing::info_span!("worker", id = worker_id);
            set.spawn(run_worker(Arc::clone(&ctx)).instrument(span));
        }
        while let Some(joined) = set.join_next().await {
            if let Err(e) = joined {
                tracing::error!("Worker task ended abnormally: {}", e);
            }
        }

        progress.abort();
        interrupt_guard.abort();
        ctx.phase.stop(DrainReason::Exhausted);

        let save_result = ctx.checkpoint();
        if let Some(fatal) = ctx.take_fatal() {
            if let Err(e) = save_result {
                tracing::error!("Final checkpoint also failed: {}", e);
            }
            return Err(fatal);
        }
        save_result?;

        let report = build_report(&ctx, started);
        log_report(&report);
        Ok(report)
    }

    fn load_cursor(&self) -> Result<CursorState, HarvestError> {
        let mut cursor = if self.reset {
            tracing::info!("Resetting harvest progress");
            self.snapshot.reset()?;
            self.checkpoints.reset()?
        } else {
            self.checkpoints.load()?
        };

        if let Some(hash) = &self.config_hash {
            match &cursor.config_hash {
                Some(previous) if previous != hash => tracing::warn!(
                    "Configuration changed since the checkpoint was written; resuming anyway"
                ),
                _ => {}
            }
            cursor.config_hash = Some(hash.clone());
        }

        Ok(cursor)
    }

    fn idle_report(&self, cursor: &CursorState, reason: DrainReason, started: Instant) -> HarvestReport {
        HarvestReport {
            games_written: 0,
            valid_total: cursor.valid_count,
            max_games: self.config.harvest.max_games,
            examined: 0,
            rejected: 0,
            failed: 0,
            skipped: 0,
            discarded: 0,
            reviews_written: 0,
            drain_reason: reason,
            elapsed: started.elapsed(),
        }
    }
}

fn build_report(ctx: &HarvestContext, started: Instant) -> HarvestReport {
    let counters = &ctx.counters;
    HarvestReport {
        games_written: counters.written(),
        valid_total: ctx.lock_cursor().valid_count,
        max_games: ctx.gate.max(),
        examined: counters.examined(),
        rejected: counters.rejected.load(Ordering::Relaxed),
        failed: counters.failed.load(Ordering::Relaxed),
        skipped: counters.skipped.load(Ordering::Relaxed),
        discarded: counters.discarded.load(Ordering::Relaxed),
        reviews_written: counters.reviews.load(Ordering::Relaxed),
        drain_reason: ctx.phase.drain_reason().unwrap_or(DrainReason::Exhausted),
        elapsed: started.elapsed(),
    }
}

fn log_report(report: &HarvestReport) {
    tracing::info!(
        written = report.games_written,
        valid = report.valid_total,
        quota = report.max_games,
        examined = report.examined,
        rejected = report.rejected,
        failed = report.failed,
        skipped = report.skipped,
        reviews = report.reviews_written,
        "Harvest stopped ({}) after {:.1}s",
        report.drain_reason,
        report.elapsed.as_secs_f64()
    );
}

/// Saves the cursor as soon as shutdown is requested
///
/// In-flight items can take a while to finish; this keeps every decision
/// made so far on disk even if the process is killed during the drain.
/// The final checkpoint after the workers join still runs.
async fn checkpoint_on_interrupt(ctx: Arc<HarvestContext>) {
    ctx.shutdown.wait_for_shutdown().await;
    ctx.phase.begin_drain(DrainReason::Interrupted);

    match ctx.checkpoint() {
        Ok(()) => tracing::info!(
            valid = ctx.gate.count(),
            "Checkpoint saved on interrupt, waiting for in-flight items"
        ),
        Err(e) => ctx.fail(e.into()),
    }
}

/// Logs progress every `interval` until aborted
async fn report_progress(ctx: Arc<HarvestContext>, interval: Duration, started: Instant) {
    let mut ticker = tokio::time::interval(interval);
    // The first tick completes immediately
    ticker.tick().await;

    loop {
        ticker.tick().await;

        let elapsed = started.elapsed().as_secs_f64().max(f64::EPSILON);
        let written = ctx.counters.written();
        let rate = written as f64 / elapsed;
        let remaining = ctx.gate.remaining();
        let eta = if rate > 0.0 {
            format!("{:.0}s", remaining as f64 / rate)
        } else {
            "unknown".to_string()
        };
        let health = ctx.fetcher.pool().health_summary();

        tracing::info!(
            valid = ctx.gate.count(),
            quota = ctx.gate.max(),
            examined = ctx.counters.examined(),
            rate = %format!("{:.2}/s", rate),
            eta = %eta,
            proxies_enabled = health.enabled,
            proxies_disabled = health.disabled,
            "Progress"
        );
    }
}
