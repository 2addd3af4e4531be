//! Per-domain request spacing that also honors server `Retry-After` hints.
//!
//! As an [`Adapter`], [`RateLimiter`] delays each outgoing request so that two
//! requests to the same host are at least `min_interval` apart. Requests to
//! different hosts never wait for each other.
//!
//! As a [`Retrier`], it answers HTTP 429 responses carrying `Retry-After`: the
//! host is blocked for the advertised duration and the request is retried
//! after it. Anything else is deferred to the next retrier in the chain.
//!
//! ```no_run
//! use std::time::Duration;
//! use transfer_core::{Interceptor, RateLimiter};
//!
//! let interceptor = Interceptor::new().with_policy(RateLimiter::new(Duration::from_millis(500)));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use super::{AdaptState, Adapter, Retrier, RetryResult};
use crate::error::{BoxError, SessionError};
use crate::request::{Request, TransportRequest};
use crate::task::TransportError;

const CUMULATIVE_DELAY_WARNING_THRESHOLD: Duration = Duration::from_secs(30);
const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);
const DEFAULT_MAX_RATE_LIMIT_RETRIES: u32 = 3;

#[derive(Debug)]
struct DomainState {
    /// Earliest instant the next request may start. `None` until first use.
    next_allowed: Mutex<Option<Instant>>,
    cumulative_delay_ms: AtomicU64,
}

impl DomainState {
    fn new() -> Self {
        Self {
            next_allowed: Mutex::new(None),
            cumulative_delay_ms: AtomicU64::new(0),
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn add_cumulative_delay(&self, delay: Duration) -> Duration {
        let delay_ms = delay.as_millis() as u64;
        let total = self
            .cumulative_delay_ms
            .fetch_add(delay_ms, Ordering::SeqCst)
            + delay_ms;
        Duration::from_millis(total)
    }
}

/// Per-domain rate limiter; share it with `Arc` or add it with
/// [`Interceptor::with_policy`](super::Interceptor::with_policy).
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    max_retries: u32,
    domains: DashMap<String, Arc<DomainState>>,
}

impl RateLimiter {
    /// Creates a limiter spacing same-host requests by `min_interval`.
    #[must_use]
    #[instrument(skip_all, fields(interval_ms = min_interval.as_millis()))]
    pub fn new(min_interval: Duration) -> Self {
        debug!("creating rate limiter");
        Self {
            min_interval,
            max_retries: DEFAULT_MAX_RATE_LIMIT_RETRIES,
            domains: DashMap::new(),
        }
    }

    /// Sets how many 429 retries a single request may get.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Returns the configured spacing.
    #[must_use]
    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    fn domain(&self, domain: &str) -> Arc<DomainState> {
        // Clone the Arc so the shard lock is released before any await.
        self.domains
            .entry(domain.to_string())
            .or_insert_with(|| Arc::new(DomainState::new()))
            .clone()
    }

    /// Waits until a request to `url`'s host may start, then reserves the slot.
    #[instrument(skip(self), fields(domain))]
    pub async fn acquire(&self, url: &str) {
        let domain = extract_domain(url);
        tracing::Span::current().record("domain", domain.as_str());
        let state = self.domain(&domain);

        let mut next_allowed = state.next_allowed.lock().await;
        if let Some(at) = *next_allowed {
            let delay = at.saturating_duration_since(Instant::now());
            if !delay.is_zero() {
                let cumulative = state.add_cumulative_delay(delay);
                debug!(
                    delay_ms = delay.as_millis(),
                    cumulative_ms = cumulative.as_millis(),
                    "applying rate limit delay"
                );
                if cumulative >= CUMULATIVE_DELAY_WARNING_THRESHOLD {
                    warn!(
                        domain = %domain,
                        cumulative_delay_secs = cumulative.as_secs(),
                        "excessive rate limiting for domain"
                    );
                }
                tokio::time::sleep_until(at).await;
            }
        }
        *next_allowed = Some(Instant::now() + self.min_interval);
    }

    /// Blocks `url`'s host for `delay`, as requested by the server.
    #[instrument(skip(self), fields(domain))]
    pub async fn record_rate_limit(&self, url: &str, delay: Duration) {
        let domain = extract_domain(url);
        tracing::Span::current().record("domain", domain.as_str());
        let state = self.domain(&domain);

        let until = Instant::now() + delay;
        let mut next_allowed = state.next_allowed.lock().await;
        *next_allowed = Some(next_allowed.map_or(until, |at| at.max(until)));
        let cumulative = state.add_cumulative_delay(delay);
        debug!(
            delay_ms = delay.as_millis(),
            cumulative_ms = cumulative.as_millis(),
            "recorded server rate limit"
        );
        if cumulative >= CUMULATIVE_DELAY_WARNING_THRESHOLD {
            warn!(
                domain = %domain,
                cumulative_delay_secs = cumulative.as_secs(),
                "excessive server rate limiting"
            );
        }
    }
}

#[async_trait]
impl Adapter for RateLimiter {
    async fn adapt(
        &self,
        request: TransportRequest,
        _state: &AdaptState,
    ) -> Result<TransportRequest, BoxError> {
        self.acquire(request.url.as_str()).await;
        Ok(request)
    }
}

#[async_trait]
impl Retrier for RateLimiter {
    async fn retry(
        &self,
        request: &Request,
        error: &SessionError,
    ) -> Result<RetryResult, BoxError> {
        let Some(TransportError::HttpStatus {
            url,
            status: 429,
            retry_after,
        }) = error.transport_error()
        else {
            return Ok(RetryResult::DoNotRetry);
        };
        if request.retry_count() >= self.max_retries {
            debug!(request_id = %request.id(), "rate limit retries exhausted");
            return Ok(RetryResult::DoNotRetry);
        }
        let Some(delay) = retry_after.as_deref().and_then(parse_retry_after) else {
            return Ok(RetryResult::DoNotRetry);
        };
        self.record_rate_limit(url, delay).await;
        Ok(RetryResult::RetryWithDelay(delay))
    }
}

/// Returns the lowercase host of `url`, or `"unknown"` if it has none.
///
/// ```
/// use transfer_core::extract_domain;
///
/// assert_eq!(extract_domain("http://Example.COM:8080/Path"), "example.com");
/// assert_eq!(extract_domain("not a url"), "unknown");
/// ```
#[must_use]
pub fn extract_domain(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_lowercase))
        .unwrap_or_else(|| "unknown".to_string())
}

/// Parses a `Retry-After` value (integer seconds or HTTP-date), capped at one hour.
///
/// Dates in the past yield zero; unparseable or negative values yield `None`.
///
/// ```
/// use std::time::Duration;
/// use transfer_core::parse_retry_after;
///
/// assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
/// assert_eq!(parse_retry_after("soon"), None);
/// ```
#[must_use]
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    let duration = if let Ok(seconds) = value.parse::<i64>() {
        let Ok(seconds) = u64::try_from(seconds) else {
            debug!(seconds, "negative Retry-After value, ignoring");
            return None;
        };
        Duration::from_secs(seconds)
    } else if let Ok(at) = httpdate::parse_http_date(value) {
        at.duration_since(std::time::SystemTime::now())
            .unwrap_or(Duration::ZERO)
    } else {
        debug!(value, "unparseable Retry-After value");
        return None;
    };
    if duration > MAX_RETRY_AFTER {
        warn!(
            delay_secs = duration.as_secs(),
            "Retry-After exceeds maximum, capping at 1 hour"
        );
        return Some(MAX_RETRY_AFTER);
    }
    Some(duration)
}
