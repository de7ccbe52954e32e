//! Sumi-Harvest main entry point
//!
//! This is the command-line interface for the Sumi-Harvest catalog harvester.

use anyhow::Context;
use clap::Parser;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use sumi_harvest::config::{load_config_with_hash, validate, Config};
use sumi_harvest::harvester::{harvest, HarvestReport};
use sumi_harvest::proxy::load_proxy_file;
use sumi_harvest::shutdown::{ShutdownCoordinator, SharedShutdown};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Sumi-Harvest: a quota-exact catalog harvester
///
/// Sumi-Harvest collects game details and reviews from a storefront catalog
/// through a pool of proxies, stops at an exact number of valid games, and
/// resumes from its checkpoint after a crash or interruption.
#[derive(Parser, Debug)]
#[command(name = "sumi-harvest")]
#[command(version)]
#[command(about = "A quota-exact catalog harvester", long_about = None)]
struct Cli {
    /// Path to TOML configuration file (defaults apply when omitted)
    #[arg(value_name = "CONFIG")]
    config: Option<PathBuf>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Resume from the checkpoint (default behavior)
    #[arg(long, conflicts_with = "reset")]
    resume: bool,

    /// Archive previous progress and output, then start over
    #[arg(long, conflicts_with = "resume")]
    reset: bool,

    /// Validate config and show what would be harvested without fetching
    #[arg(long, conflicts_with = "stats")]
    dry_run: bool,

    /// Show statistics from the checkpoint and output files and exit
    #[arg(long, conflicts_with = "dry_run")]
    stats: bool,

    /// Proxy list file (overrides the config)
    #[arg(long, value_name = "FILE")]
    proxies: Option<PathBuf>,

    /// Number of valid games to collect (overrides the config)
    #[arg(long, value_name = "N")]
    max_games: Option<u64>,

    /// Reviews to collect per game (overrides the config)
    #[arg(long, value_name = "N")]
    max_reviews: Option<usize>,

    /// Concurrent workers (overrides the config)
    #[arg(long, value_name = "N")]
    workers: Option<usize>,

    /// One worker, no proxies
    #[arg(long)]
    sequential: bool,

    /// Also write logs to this file
    #[arg(long, value_name = "FILE")]
    log_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet, cli.log_file.as_deref())?;

    // Load and validate configuration
    let (config, config_hash) = load(&cli)?;

    // Handle different modes
    if cli.dry_run {
        handle_dry_run(&config);
    } else if cli.stats {
        handle_stats(&config)?;
    } else {
        handle_harvest(config, cli.reset, config_hash).await?;
    }

    Ok(())
}

/// Loads the config file (if any) and applies command-line overrides
fn load(cli: &Cli) -> anyhow::Result<(Config, Option<String>)> {
    let (mut config, hash) = match &cli.config {
        Some(path) => {
            tracing::info!("Loading configuration from: {}", path.display());
            let (config, hash) = load_config_with_hash(path)
                .with_context(|| format!("Failed to load configuration {}", path.display()))?;
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            (config, Some(hash))
        }
        None => {
            tracing::info!("No configuration file given, using defaults");
            (Config::default(), None)
        }
    };

    if let Some(path) = &cli.proxies {
        config.proxy.list_path = Some(path.clone());
    }
    if let Some(max_games) = cli.max_games {
        config.harvest.max_games = max_games;
    }
    if let Some(max_reviews) = cli.max_reviews {
        config.harvest.max_reviews_per_game = max_reviews;
    }
    if let Some(workers) = cli.workers {
        config.harvest.workers = workers;
    }
    if cli.sequential {
        config.harvest.parallel = false;
    }

    validate(&config).context("Invalid configuration after command-line overrides")?;
    Ok((config, hash))
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool, log_file: Option<&Path>) -> anyhow::Result<()> {
    let directives = if quiet {
        // Only show errors
        "error"
    } else {
        match verbose {
            0 => "sumi_harvest=info,warn",
            1 => "sumi_harvest=debug,info",
            2 => "sumi_harvest=trace,debug",
            _ => "trace",
        }
    };

    let console = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false);

    let file = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(EnvFilter::new(directives))
        .with(console)
        .with(file)
        .init();

    Ok(())
}

/// Handles the --dry-run mode: validates config and shows what would be harvested
fn handle_dry_run(config: &Config) {
    println!("=== Sumi-Harvest Dry Run ===\n");

    println!("Quota:");
    println!("  Max games: {}", config.harvest.max_games);
    println!(
        "  Max reviews per game: {}",
        config.harvest.max_reviews_per_game
    );
    println!(
        "  Checkpoint every: {} items",
        config.harvest.checkpoint_interval
    );
    println!("  Batch size: {}", config.harvest.batch_size);

    println!("\nWorkers:");
    println!(
        "  Mode: {}",
        if config.harvest.parallel {
            "parallel"
        } else {
            "sequential"
        }
    );
    println!("  Workers: {}", config.harvest.effective_workers());

    println!("\nNetwork:");
    println!("  User agent: {}", config.network.user_agent);
    println!(
        "  Attempts per transport: {}",
        config.network.max_attempts
    );
    println!(
        "  Transport rotations: {}",
        config.network.transport_rotations
    );
    println!(
        "  Backoff: {}ms .. {}ms (jitter {})",
        config.network.backoff_base_ms, config.network.backoff_max_ms, config.network.jitter_fraction
    );

    println!("\nProxies:");
    match (&config.proxy.list_path, config.harvest.parallel) {
        (_, false) => println!("  Disabled in sequential mode"),
        (None, true) => println!("  None configured (direct transport)"),
        (Some(path), true) => {
            let entries = load_proxy_file(path, &config.proxy.default_scheme);
            println!("  {} usable entries in {}", entries.len(), path.display());
        }
    }

    println!("\nCatalog:");
    println!("  Listing: {}", config.catalog.list_url);
    println!("  Details: {}", config.catalog.details_url);
    println!("  Reviews: {}", config.catalog.reviews_url);
    println!("  Accepted types: {}", config.catalog.accepted_types.join(", "));

    println!("\nOutput:");
    println!("  Games: {}", config.output.games_path.display());
    println!("  Reviews: {}", config.output.reviews_path.display());
    println!("  Checkpoint: {}", config.output.checkpoint_path.display());
    println!(
        "  Listing snapshot: {}",
        config.output.listing_snapshot_path().display()
    );

    println!("\n✓ Configuration is valid");
}

/// Handles the --stats mode: shows statistics from the checkpoint
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    use sumi_harvest::output::{load_statistics, print_statistics};

    println!(
        "Checkpoint: {}\n",
        config.output.checkpoint_path.display()
    );

    let stats = load_statistics(config).context("Failed to load statistics")?;
    print_statistics(&stats);

    Ok(())
}

/// Handles the main harvest operation
async fn handle_harvest(
    config: Config,
    reset: bool,
    config_hash: Option<String>,
) -> anyhow::Result<()> {
    if reset {
        tracing::info!("Starting fresh harvest (previous progress is archived)");
    } else {
        tracing::info!("Starting harvest (will resume from checkpoint if present)");
    }

    let shutdown = ShutdownCoordinator::shared();
    tokio::spawn(watch_signals(shutdown.clone()));

    let report = harvest(config, reset, config_hash, shutdown)
        .await
        .context("Harvest failed")?;

    print_report(&report);
    Ok(())
}

/// Requests a graceful shutdown on the first signal, exits on the second
async fn watch_signals(shutdown: SharedShutdown) {
    wait_for_signal().await;
    tracing::warn!("Interrupt received; finishing in-flight items (press Ctrl+C again to abort)");
    shutdown.request_shutdown();

    wait_for_signal().await;
    tracing::error!("Second interrupt, aborting; the checkpoint taken on the first one is kept");
    std::process::exit(130);
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(e) => {
            tracing::warn!("Cannot listen for SIGTERM: {}", e);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn print_report(report: &HarvestReport) {
    println!("\n=== Harvest Report ===\n");
    println!("Stopped: {}", report.drain_reason);
    println!(
        "Valid games: {} / {}{}",
        report.valid_total,
        report.max_games,
        if report.quota_met() { " ✓" } else { "" }
    );
    println!("Written this run: {}", report.games_written);
    println!("Reviews written: {}", report.reviews_written);
    println!("Examined: {}", report.examined);
    println!("  Rejected: {}", report.rejected);
    println!("  Failed: {}", report.failed);
    println!("  Discarded over quota: {}", report.discarded);
    println!("Skipped (already processed): {}", report.skipped);
    println!("Elapsed: {:.1}s", report.elapsed.as_secs_f64());
}
