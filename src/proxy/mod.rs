//! Proxy module
//!
//! This module contains:
//! - Parsing of proxy list files into [`ProxyEntry`] values
//! - The [`ProxyPool`], which rotates over healthy proxies and falls back
//!   to the direct transport when none are left

mod entry;
mod pool;

pub use entry::{parse_proxy_list, ProxyCredentials, ProxyEntry, ProxyParseError, ProxyScheme};
pub use pool::{load_proxy_file, PoolHealthSummary, ProxyOutcome, ProxyPool, Route, Transport};
