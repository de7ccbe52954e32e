//! HTTP fetcher implementation
//!
//! This module handles every catalog request, including:
//! - Bounded retries with exponential backoff for transient failures
//! - Error classification (transient vs permanent)
//! - Reporting route health back to the proxy pool
//! - Rotating to another transport when one is exhausted

use crate::config::NetworkConfig;
use crate::harvester::backoff::BackoffPolicy;
use crate::proxy::{ProxyOutcome, ProxyPool, Route, Transport};
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Why a fetch produced no payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    /// Non-retryable HTTP status (e.g. 403, 404)
    HttpStatus(u16),

    /// The body arrived but is not valid JSON
    Malformed(String),

    /// Every attempt hit a transient failure
    Exhausted { attempts: u32, last_error: String },
}

impl FailureKind {
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HttpStatus(code) => write!(f, "HTTP {}", code),
            Self::Malformed(reason) => write!(f, "malformed payload: {}", reason),
            Self::Exhausted {
                attempts,
                last_error,
            } => write!(f, "gave up after {} attempts: {}", attempts, last_error),
        }
    }
}

/// Result of a fetch operation
#[derive(Debug, Clone)]
pub enum FetchResult {
    /// A parsed JSON payload
    Success {
        payload: Value,
        route: Route,
        /// Requests issued, including retries
        attempts: u32,
    },

    /// No payload; see `kind`
    Failure {
        kind: FailureKind,
        route: Route,
        attempts: u32,
    },
}

impl FetchResult {
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Success { attempts, .. } | Self::Failure { attempts, .. } => *attempts,
        }
    }

    pub fn route(&self) -> &Route {
        match self {
            Self::Success { route, .. } | Self::Failure { route, .. } => route,
        }
    }

    fn with_attempts(mut self, total: u32) -> Self {
        match &mut self {
            Self::Success { attempts, .. } | Self::Failure { attempts, .. } => *attempts = total,
        }
        self
    }
}

/// Outcome of a single request
enum Attempt {
    Payload(Value),
    Permanent(FailureKind),
    Transient {
        error: String,
        retry_after: Option<Duration>,
    },
}

/// Fetches JSON documents through the proxy pool
///
/// # Retry Logic
///
/// | Condition | Action |
/// |-----------|--------|
/// | 2xx with JSON body | Success |
/// | 2xx with invalid JSON | Immediate → Malformed |
/// | HTTP 429 | Retry with backoff (honoring `Retry-After`) |
/// | HTTP 5xx | Retry with backoff |
/// | Timeout / connect / body error | Retry with backoff |
/// | Any other status | Immediate → HttpStatus |
///
/// After `max_attempts` transient failures the result is `Exhausted`.
/// In-flight retries are not interrupted by shutdown; the scheduler stops
/// handing out new work instead.
pub struct RateLimitedFetcher {
    pool: Arc<ProxyPool>,
    backoff: BackoffPolicy,
    max_attempts: u32,
    request_timeout: Duration,
}

impl RateLimitedFetcher {
    pub fn new(pool: Arc<ProxyPool>, network: &NetworkConfig) -> Self {
        Self {
            pool,
            backoff: BackoffPolicy::from_config(network),
            max_attempts: network.max_attempts.max(1),
            request_timeout: network.request_timeout(),
        }
    }

    pub fn pool(&self) -> &Arc<ProxyPool> {
        &self.pool
    }

    /// Fetches `url` through `transport` with the default request timeout
    pub async fn fetch(&self, transport: &Transport, url: &str) -> FetchResult {
        self.fetch_with_timeout(transport, url, self.request_timeout)
            .await
    }

    /// Fetches `url` through `transport`, retrying transient failures
    pub async fn fetch_with_timeout(
        &self,
        transport: &Transport,
        url: &str,
        timeout: Duration,
    ) -> FetchResult {
        let route = transport.route().clone();
        let mut last_error = String::new();
        let mut previous_delay = Duration::ZERO;

        for attempt in 1..=self.max_attempts {
            match request_once(transport.client(), url, timeout).await {
                Attempt::Payload(payload) => {
                    self.pool.report(transport, ProxyOutcome::Success);
                    return FetchResult::Success {
                        payload,
                        route,
                        attempts: attempt,
                    };
                }
                Attempt::Permanent(kind) => {
                    // The route delivered a response; the failure belongs to the item
                    let outcome = match kind {
                        FailureKind::HttpStatus(_) => ProxyOutcome::Success,
                        _ => ProxyOutcome::Failure,
                    };
                    self.pool.report(transport, outcome);
                    tracing::debug!(url, route = route.label(), %kind, "Permanent fetch failure");
                    return FetchResult::Failure {
                        kind,
                        route,
                        attempts: attempt,
                    };
                }
                Attempt::Transient { error, retry_after } => {
                    tracing::debug!(
                        url,
                        route = route.label(),
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %error,
                        "Transient fetch failure"
                    );
                    last_error = error;

                    if attempt < self.max_attempts {
                        let delay = retry_delay(
                            self.backoff.jittered_delay(attempt),
                            retry_after,
                            previous_delay,
                            self.backoff.max,
                        );
                        previous_delay = delay;
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        self.pool.report(transport, ProxyOutcome::Failure);
        FetchResult::Failure {
            kind: FailureKind::Exhausted {
                attempts: self.max_attempts,
                last_error,
            },
            route,
            attempts: self.max_attempts,
        }
    }

    /// Fetches `url`, moving to a fresh transport each time one is exhausted
    ///
    /// Up to `rotations` transports are tried. Permanent failures are
    /// returned as-is since another route would get the same answer.
    pub async fn fetch_rotating(&self, url: &str, rotations: u32) -> FetchResult {
        let rotations = rotations.max(1);
        let mut total_attempts = 0;
        let mut rotation = 1;

        loop {
            let transport = self.pool.acquire();
            let result = self.fetch(&transport, url).await;
            total_attempts += result.attempts();

            let exhausted =
                matches!(&result, FetchResult::Failure { kind, .. } if kind.is_exhausted());
            if !exhausted || rotation >= rotations {
                return result.with_attempts(total_attempts);
            }

            tracing::debug!(
                url,
                route = result.route().label(),
                rotation,
                "Transport exhausted, rotating"
            );
            rotation += 1;
        }
    }
}

/// Delay before the next attempt
///
/// A `Retry-After` hint (capped at `cap`) can raise the delay, and no delay
/// is shorter than the one before it.
fn retry_delay(
    backoff: Duration,
    retry_after: Option<Duration>,
    previous: Duration,
    cap: Duration,
) -> Duration {
    let delay = backoff.max(previous);
    match retry_after {
        Some(hint) => delay.max(hint.min(cap)),
        None => delay,
    }
}

async fn request_once(client: &Client, url: &str, timeout: Duration) -> Attempt {
    let response = match client.get(url).timeout(timeout).send().await {
        Ok(response) => response,
        Err(e) => {
            return Attempt::Transient {
                error: describe_error(&e),
                retry_after: None,
            }
        }
    };

    let status = response.status();
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        return Attempt::Transient {
            error: format!("HTTP {}", status.as_u16()),
            retry_after,
        };
    }

    if !status.is_success() {
        return Attempt::Permanent(FailureKind::HttpStatus(status.as_u16()));
    }

    let body = match response.bytes().await {
        Ok(body) => body,
        Err(e) => {
            return Attempt::Transient {
                error: describe_error(&e),
                retry_after: None,
            }
        }
    };

    match serde_json::from_slice(&body) {
        Ok(payload) => Attempt::Payload(payload),
        Err(e) => Attempt::Permanent(FailureKind::Malformed(e.to_string())),
    }
}

fn describe_error(error: &reqwest::Error) -> String {
    if error.is_timeout() {
        format!("timeout: {}", error)
    } else if error.is_connect() {
        format!("connection failed: {}", error)
    } else {
        error.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::{ProxyEntry, ProxyScheme};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_network(max_attempts: u32) -> NetworkConfig {
        NetworkConfig {
            max_attempts,
            backoff_base_ms: 1,
            backoff_max_ms: 5,
            request_timeout_secs: 2,
            connect_timeout_secs: 1,
            ..NetworkConfig::default()
        }
    }

    fn fetcher(network: &NetworkConfig) -> RateLimitedFetcher {
        let pool = Arc::new(ProxyPool::direct_only(network).unwrap());
        RateLimitedFetcher::new(pool, network)
    }

    #[test]
    fn test_retry_delay_never_drops_after_retry_after_hint() {
        let cap = Duration::from_secs(10);
        let ms = Duration::from_millis;

        // A long hint on the first 429 raises that wait
        let first = retry_delay(ms(100), Some(Duration::from_secs(4)), Duration::ZERO, cap);
        assert_eq!(first, Duration::from_secs(4));

        // The next 429 carries no hint; its backoff is shorter but the wait is not
        let second = retry_delay(ms(200), None, first, cap);
        assert_eq!(second, Duration::from_secs(4));

        // Hints are capped
        let third = retry_delay(ms(400), Some(Duration::from_secs(60)), second, cap);
        assert_eq!(third, cap);

        let delays = [first, second, third];
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test]
    async fn test_success_returns_payload() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/doc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": 1})))
            .mount(&server)
            .await;

        let network = fast_network(3);
        let result = fetcher(&network)
            .fetch_rotating(&format!("{}/doc", server.uri()), 1)
            .await;

        match result {
            FetchResult::Success {
                payload,
                route,
                attempts,
            } => {
                assert_eq!(payload["ok"], 1);
                assert!(route.is_direct());
                assert_eq!(attempts, 1);
            }
            other => panic!("expected success, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_rate_limit_exhausts_after_max_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .expect(3)
            .mount(&server)
            .await;

        let network = fast_network(3);
        let result = fetcher(&network)
            .fetch_rotating(&format!("{}/limited", server.uri()), 1)
            .await;

        match result {
            FetchResult::Failure {
                kind: FailureKind::Exhausted { attempts, last_error },
                ..
            } => {
                assert_eq!(attempts, 3);
                assert!(last_error.contains("429"));
            }
            other => panic!("expected exhaustion, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_server_error_then_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([1])))
            .mount(&server)
            .await;

        let network = fast_network(3);
        let result = fetcher(&network).fetch_rotating(&server.uri(), 1).await;
        assert!(matches!(result, FetchResult::Success { attempts: 2, .. }));
    }

    #[tokio::test]
    async fn test_not_found_is_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let network = fast_network(3);
        let result = fetcher(&network).fetch_rotating(&server.uri(), 4).await;
        assert!(matches!(
            result,
            FetchResult::Failure {
                kind: FailureKind::HttpStatus(404),
                attempts: 1,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_invalid_json_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let network = fast_network(3);
        let result = fetcher(&network).fetch_rotating(&server.uri(), 1).await;
        assert!(matches!(
            result,
            FetchResult::Failure {
                kind: FailureKind::Malformed(_),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_dead_proxy_rotates_to_direct() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .mount(&server)
            .await;

        let network = fast_network(2);
        // Nothing listens on port 1
        let dead = ProxyEntry::parse("127.0.0.1:1", ProxyScheme::Http).unwrap();
        let pool = Arc::new(ProxyPool::new(vec![dead], &network, 1).unwrap());
        let fetcher = RateLimitedFetcher::new(Arc::clone(&pool), &network);

        let result = fetcher.fetch_rotating(&server.uri(), 4).await;

        assert!(matches!(
            &result,
            FetchResult::Success { route: Route::Direct, .. }
        ));
        assert_eq!(result.attempts(), 3);
        assert_eq!(pool.health_summary().disabled, 1);
    }
}
