//! Round-robin proxy pool with per-proxy health tracking

use crate::config::{NetworkConfig, ProxyConfig};
use crate::proxy::entry::{parse_proxy_list, ProxyEntry, ProxyScheme};
use crate::HarvestError;
use reqwest::{Client, Proxy};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

/// Network path used for one fetch attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// No proxy, the host's own address
    Direct,

    /// Through the proxy in pool slot `slot`
    Proxy { slot: usize, label: String },
}

impl Route {
    pub fn is_direct(&self) -> bool {
        matches!(self, Self::Direct)
    }

    /// Human-readable route for logs
    pub fn label(&self) -> &str {
        match self {
            Self::Direct => "direct",
            Self::Proxy { label, .. } => label,
        }
    }
}

/// A route plus the client configured for it
#[derive(Debug, Clone)]
pub struct Transport {
    route: Route,
    client: Client,
}

impl Transport {
    pub fn route(&self) -> &Route {
        &self.route
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

/// Outcome reported back to the pool after a fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyOutcome {
    Success,
    Failure,
}

/// Snapshot of pool health for progress reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolHealthSummary {
    pub total: usize,
    pub enabled: usize,
    pub disabled: usize,
}

/// Hands out transports and tracks proxy health
///
/// Selection is round-robin over enabled proxies. When the pool is empty
/// or every proxy has been disabled, `acquire` returns the direct transport
/// instead of waiting. All clients are built up front, so `acquire` and
/// `report` only touch in-memory state.
pub struct ProxyPool {
    /// Health-tracked entries; the only place `ProxyEntry` lives
    entries: Mutex<Vec<ProxyEntry>>,

    /// One client per entry, same indexing as `entries`
    clients: Vec<Client>,

    /// Labels per entry, same indexing as `entries`
    labels: Vec<String>,

    direct: Client,
    next: AtomicUsize,
    failure_threshold: u32,
}

impl ProxyPool {
    /// Builds a pool from parsed entries
    ///
    /// Entries whose client cannot be built (e.g. a scheme the HTTP stack
    /// rejects) are dropped with a warning.
    pub fn new(
        entries: Vec<ProxyEntry>,
        network: &NetworkConfig,
        failure_threshold: u32,
    ) -> Result<Self, HarvestError> {
        let direct = build_client(network, None)?;

        let mut kept = Vec::with_capacity(entries.len());
        let mut clients = Vec::with_capacity(entries.len());
        for entry in entries {
            let proxy = match Proxy::all(entry.proxy_url()) {
                Ok(proxy) => proxy,
                Err(e) => {
                    tracing::warn!("Dropping proxy {}: {}", entry.label(), e);
                    continue;
                }
            };
            match build_client(network, Some(proxy)) {
                Ok(client) => {
                    clients.push(client);
                    kept.push(entry);
                }
                Err(e) => tracing::warn!("Dropping proxy {}: {}", entry.label(), e),
            }
        }

        let labels = kept.iter().map(ProxyEntry::label).collect();

        Ok(Self {
            entries: Mutex::new(kept),
            clients,
            labels,
            direct,
            next: AtomicUsize::new(0),
            failure_threshold: failure_threshold.max(1),
        })
    }

    /// A pool with no proxies: every acquire returns the direct transport
    pub fn direct_only(network: &NetworkConfig) -> Result<Self, HarvestError> {
        Self::new(Vec::new(), network, 1)
    }

    /// Builds the pool described by the configuration
    ///
    /// A missing or unreadable proxy file is not fatal; the pool degrades
    /// to direct mode.
    pub fn from_config(proxy: &ProxyConfig, network: &NetworkConfig) -> Result<Self, HarvestError> {
        let entries = match &proxy.list_path {
            Some(path) => load_proxy_file(path, &proxy.default_scheme),
            None => Vec::new(),
        };

        if entries.is_empty() {
            tracing::info!("No proxies configured, using direct transport");
        } else {
            tracing::info!("Loaded {} proxies", entries.len());
        }

        Self::new(entries, network, proxy.failure_threshold)
    }

    /// Returns the next enabled proxy, or the direct transport
    pub fn acquire(&self) -> Transport {
        let enabled: Vec<usize> = {
            let entries = self.lock_entries();
            (0..entries.len()).filter(|&i| !entries[i].disabled).collect()
        };
        if enabled.is_empty() {
            return self.direct();
        }

        // Counting over the enabled subset keeps the load even after a disable
        let turn = self.next.fetch_add(1, Ordering::Relaxed);
        let slot = enabled[turn % enabled.len()];
        Transport {
            route: Route::Proxy {
                slot,
                label: self.labels[slot].clone(),
            },
            client: self.clients[slot].clone(),
        }
    }

    /// The direct (no proxy) transport
    pub fn direct(&self) -> Transport {
        Transport {
            route: Route::Direct,
            client: self.direct.clone(),
        }
    }

    /// Records the outcome of a fetch made through `transport`
    pub fn report(&self, transport: &Transport, outcome: ProxyOutcome) {
        let Route::Proxy { slot, label } = &transport.route else {
            return;
        };

        let mut entries = self.lock_entries();
        let Some(entry) = entries.get_mut(*slot) else {
            return;
        };

        match outcome {
            ProxyOutcome::Success => entry.consecutive_failures = 0,
            ProxyOutcome::Failure => {
                entry.consecutive_failures += 1;
                if !entry.disabled && entry.consecutive_failures >= self.failure_threshold {
                    entry.disabled = true;
                    tracing::warn!(
                        proxy = %label,
                        failures = entry.consecutive_failures,
                        "Proxy disabled for the rest of the run"
                    );
                }
            }
        }
    }

    pub fn health_summary(&self) -> PoolHealthSummary {
        let entries = self.lock_entries();
        let disabled = entries.iter().filter(|e| e.disabled).count();
        PoolHealthSummary {
            total: entries.len(),
            enabled: entries.len() - disabled,
            disabled,
        }
    }

    /// Number of proxies in the pool (enabled or not)
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    // Critical sections never panic, but don't let a poisoned lock stop the run
    fn lock_entries(&self) -> MutexGuard<'_, Vec<ProxyEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Reads and parses a proxy list file
pub fn load_proxy_file(path: &Path, default_scheme: &str) -> Vec<ProxyEntry> {
    let scheme = ProxyScheme::parse(default_scheme).unwrap_or(ProxyScheme::Http);
    match std::fs::read_to_string(path) {
        Ok(content) => parse_proxy_list(&content, scheme),
        Err(e) => {
            tracing::warn!(
                "Could not read proxy list {}: {}; continuing without proxies",
                path.display(),
                e
            );
            Vec::new()
        }
    }
}

/// Builds an HTTP client for one route
///
/// The direct client ignores proxy environment variables so "direct"
/// really means the host's own address.
fn build_client(network: &NetworkConfig, proxy: Option<Proxy>) -> Result<Client, reqwest::Error> {
    let builder = Client::builder()
        .user_agent(network.user_agent.clone())
        .connect_timeout(network.connect_timeout())
        .gzip(true)
        .brotli(true);

    let builder = match proxy {
        Some(proxy) => builder.proxy(proxy),
        None => builder.no_proxy(),
    };

    builder.build()
}
