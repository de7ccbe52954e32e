//! Proxy endpoint parsing
//!
//! Proxy lists are plain text: one entry per line or comma separated,
//! each entry `[scheme://][user:pass@]host:port`. Blank entries and
//! `#` comments are ignored.

use std::fmt;
use thiserror::Error;
use url::Url;

/// Errors produced while parsing a single proxy entry
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProxyParseError {
    #[error("Unsupported proxy scheme '{0}'")]
    UnsupportedScheme(String),

    #[error("Malformed proxy entry '{entry}': {reason}")]
    Malformed { entry: String, reason: String },

    #[error("Proxy entry '{0}' has no port")]
    MissingPort(String),
}

/// Transport protocol spoken to the proxy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProxyScheme {
    Http,
    Https,
    Socks5,
    Socks5h,
}

impl ProxyScheme {
    /// Parses a scheme name, case-insensitively
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "http" => Some(Self::Http),
            "https" => Some(Self::Https),
            "socks5" => Some(Self::Socks5),
            "socks5h" => Some(Self::Socks5h),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
            Self::Socks5 => "socks5",
            Self::Socks5h => "socks5h",
        }
    }
}

impl fmt::Display for ProxyScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Credentials embedded in a proxy entry
#[derive(Clone, PartialEq, Eq)]
pub struct ProxyCredentials {
    pub username: String,
    pub password: String,
}

// Never print the password
impl fmt::Debug for ProxyCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyCredentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// A proxy endpoint plus its health bookkeeping
///
/// Entries are owned by the [`ProxyPool`](super::ProxyPool); workers only
/// ever see a [`Transport`](super::Transport) and a redacted label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyEntry {
    /// `host:port`
    pub address: String,
    pub scheme: ProxyScheme,
    pub credentials: Option<ProxyCredentials>,

    /// Failures since the last success
    pub consecutive_failures: u32,

    /// Disabled for the remainder of the run
    pub disabled: bool,
}

impl ProxyEntry {
    /// Parses one entry, applying `default_scheme` when none is given
    pub fn parse(raw: &str, default_scheme: ProxyScheme) -> Result<Self, ProxyParseError> {
        let raw = raw.trim();
        let with_scheme = if raw.contains("://") {
            raw.to_string()
        } else {
            format!("{}://{}", default_scheme, raw)
        };

        let url = Url::parse(&with_scheme).map_err(|e| ProxyParseError::Malformed {
            entry: raw.to_string(),
            reason: e.to_string(),
        })?;

        let scheme = ProxyScheme::parse(url.scheme())
            .ok_or_else(|| ProxyParseError::UnsupportedScheme(url.scheme().to_string()))?;

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| ProxyParseError::Malformed {
                entry: raw.to_string(),
                reason: "missing host".to_string(),
            })?;

        // Url drops the port when it equals the scheme default, so fall back to it
        let port = url
            .port_or_known_default()
            .ok_or_else(|| ProxyParseError::MissingPort(raw.to_string()))?;

        let credentials = if url.username().is_empty() {
            None
        } else {
            Some(ProxyCredentials {
                username: decode(url.username()),
                password: decode(url.password().unwrap_or("")),
            })
        };

        Ok(Self {
            address: format!("{}:{}", host, port),
            scheme,
            credentials,
            consecutive_failures: 0,
            disabled: false,
        })
    }

    /// `scheme://host:port`, safe for logs
    pub fn label(&self) -> String {
        format!("{}://{}", self.scheme, self.address)
    }

    /// Full proxy URL including credentials, for building a client
    pub fn proxy_url(&self) -> String {
        match &self.credentials {
            Some(creds) => format!(
                "{}://{}:{}@{}",
                self.scheme,
                encode(&creds.username),
                encode(&creds.password),
                self.address
            ),
            None => self.label(),
        }
    }
}

/// Parses a proxy list, skipping (and logging) entries that don't parse
pub fn parse_proxy_list(content: &str, default_scheme: ProxyScheme) -> Vec<ProxyEntry> {
    content
        .lines()
        .map(|line| line.split('#').next().unwrap_or(""))
        .flat_map(|line| line.split(','))
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .filter_map(|entry| match ProxyEntry::parse(entry, default_scheme) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                tracing::warn!("Skipping proxy entry: {}", e);
                None
            }
        })
        .collect()
}

fn decode(s: &str) -> String {
    // form decoding treats '+' as a space; userinfo does not
    let s = s.replace('+', "%2B");
    url::form_urlencoded::parse(format!("v={}", s).as_bytes())
        .next()
        .map(|(_, v)| v.into_owned())
        .unwrap_or(s)
}

fn encode(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}
