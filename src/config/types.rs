use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure for Sumi-Harvest
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub harvest: HarvestConfig,
    pub network: NetworkConfig,
    pub proxy: ProxyConfig,
    pub catalog: CatalogConfig,
    pub output: OutputConfig,
}

/// Quota and worker-pool configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct HarvestConfig {
    /// Exact number of valid games to collect
    pub max_games: u64,

    /// Reviews to collect per valid game (0 disables review fetching)
    pub max_reviews_per_game: usize,

    /// Examined items between batch summaries
    pub batch_size: u64,

    /// Examined items between checkpoint snapshots
    pub checkpoint_interval: u64,

    /// Concurrent workers in parallel mode
    pub workers: usize,

    /// Run the worker pool (false = one worker, direct transport only)
    pub parallel: bool,

    /// Seconds between progress reports
    pub progress_interval_secs: u64,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            max_games: 10,
            max_reviews_per_game: 10,
            batch_size: 100,
            checkpoint_interval: 25,
            workers: 8,
            parallel: true,
            progress_interval_secs: 20,
        }
    }
}

impl HarvestConfig {
    /// Number of workers that will actually run
    pub fn effective_workers(&self) -> usize {
        if self.parallel {
            self.workers
        } else {
            1
        }
    }

    /// The immutable quota parameters handed to the scheduler
    pub fn quota(&self) -> HarvestQuota {
        HarvestQuota {
            max_games: self.max_games,
            max_reviews_per_game: self.max_reviews_per_game,
            batch_size: self.batch_size,
            checkpoint_interval: self.checkpoint_interval,
        }
    }
}

/// Immutable run parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HarvestQuota {
    pub max_games: u64,
    pub max_reviews_per_game: usize,
    pub batch_size: u64,
    pub checkpoint_interval: u64,
}

/// HTTP behavior configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct NetworkConfig {
    pub user_agent: String,

    /// Per-request timeout for detail and review fetches (seconds)
    pub request_timeout_secs: u64,

    /// TCP/TLS connect timeout (seconds)
    pub connect_timeout_secs: u64,

    /// Timeout for the single bulk listing request (seconds)
    pub listing_timeout_secs: u64,

    /// Attempts per fetch, including the first one
    pub max_attempts: u32,

    /// Delay before the second attempt (milliseconds)
    pub backoff_base_ms: u64,

    /// Upper bound for any single backoff delay (milliseconds)
    pub backoff_max_ms: u64,

    /// Extra random delay as a fraction of the exponential delay, in [0, 1]
    pub jitter_fraction: f64,

    /// Transports tried per fetch before an item is marked failed
    pub transport_rotations: u32,

    /// Pause between review pages (milliseconds)
    pub review_page_delay_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("sumi-harvest/{}", env!("CARGO_PKG_VERSION")),
            request_timeout_secs: 15,
            connect_timeout_secs: 10,
            listing_timeout_secs: 60,
            max_attempts: 3,
            backoff_base_ms: 1000,
            backoff_max_ms: 10_000,
            jitter_fraction: 0.5,
            transport_rotations: 4,
            review_page_delay_ms: 200,
        }
    }
}

impl NetworkConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn listing_timeout(&self) -> Duration {
        Duration::from_secs(self.listing_timeout_secs)
    }

    pub fn review_page_delay(&self) -> Duration {
        Duration::from_millis(self.review_page_delay_ms)
    }
}

/// Proxy list configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ProxyConfig {
    /// Text file of proxies, one per line or comma separated
    pub list_path: Option<PathBuf>,

    /// Scheme assumed for entries written as `host:port`
    pub default_scheme: String,

    /// Consecutive failures before a proxy is disabled for the run
    pub failure_threshold: u32,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            list_path: None,
            default_scheme: "http".to_string(),
            failure_threshold: 3,
        }
    }
}

/// Catalog endpoint configuration
///
/// `details-url` and `reviews-url` are templates; `{appid}` is replaced
/// with the candidate identifier.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct CatalogConfig {
    pub list_url: String,
    pub details_url: String,
    pub reviews_url: String,

    /// Review ordering requested from the reviews endpoint
    pub review_filter: String,

    /// `type` values that count as a game
    pub accepted_types: Vec<String>,

    /// Category ids that disqualify an entry (21 = downloadable content)
    pub excluded_category_ids: Vec<i64>,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            list_url: "https://api.steampowered.com/ISteamApps/GetAppList/v2".to_string(),
            details_url:
                "https://store.steampowered.com/api/appdetails?appids={appid}&cc=us&l=english"
                    .to_string(),
            reviews_url: "https://store.steampowered.com/appreviews/{appid}".to_string(),
            review_filter: "recent".to_string(),
            accepted_types: vec!["game".to_string()],
            excluded_category_ids: vec![21],
        }
    }
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct OutputConfig {
    /// Append-only JSONL stream of game records
    pub games_path: PathBuf,

    /// Append-only JSONL stream of review records
    pub reviews_path: PathBuf,

    /// Cursor checkpoint file
    pub checkpoint_path: PathBuf,

    /// Durable copy of the enumerator sequence
    pub listing_snapshot_path: Option<PathBuf>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            games_path: PathBuf::from("game_details.jsonl"),
            reviews_path: PathBuf::from("game_reviews.jsonl"),
            checkpoint_path: PathBuf::from("scraper_cursor.json"),
            listing_snapshot_path: None,
        }
    }
}

impl OutputConfig {
    /// Snapshot path, defaulting to `<checkpoint>.listing.json`
    pub fn listing_snapshot_path(&self) -> PathBuf {
        match &self.listing_snapshot_path {
            Some(path) => path.clone(),
            None => {
                let mut name = self.checkpoint_path.as_os_str().to_owned();
                name.push(".listing.json");
                PathBuf::from(name)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequential_mode_uses_one_worker() {
        let mut harvest = HarvestConfig::default();
        assert_eq!(harvest.effective_workers(), 8);

        harvest.parallel = false;
        assert_eq!(harvest.effective_workers(), 1);
    }

    #[test]
    fn test_listing_snapshot_path_derived_from_checkpoint() {
        let output = OutputConfig {
            checkpoint_path: PathBuf::from("/tmp/run/cursor.json"),
            ..OutputConfig::default()
        };
        assert_eq!(
            output.listing_snapshot_path(),
            PathBuf::from("/tmp/run/cursor.json.listing.json")
        );
    }
}
