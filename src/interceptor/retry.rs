//! Exponential backoff retrier for transient failures.
//!
//! A failed attempt's error is classified into a [`FailureType`]:
//! - [`FailureType::Transient`] - temporary failures that may succeed on retry
//! - [`FailureType::Permanent`] - failures no retry will fix
//! - [`FailureType::NeedsAuth`] - the server wants credentials
//! - [`FailureType::RateLimited`] - HTTP 429, retried with backoff
//!
//! [`BackoffRetrier`] retries the retryable kinds until the attempt budget is
//! spent, waiting `min(base * multiplier^(attempt-1), max) + jitter` between
//! attempts. When it declines it answers `DoNotRetry`, so a later retrier in
//! the chain still gets a say.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::{debug, info, instrument};

use super::{Retrier, RetryResult};
use crate::error::{BoxError, SessionError};
use crate::request::Request;
use crate::task::TransportError;

/// Default maximum attempts, including the first.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(32);
const DEFAULT_BACKOFF_MULTIPLIER: f32 = 2.0;
const MAX_JITTER: Duration = Duration::from_millis(500);

/// Classification of a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Timeouts, 5xx, connection resets.
    Transient,
    /// 4xx (except 401/403/408/429), invalid requests, local IO.
    Permanent,
    /// 401 or 403.
    NeedsAuth,
    /// 429.
    RateLimited,
}

impl FailureType {
    fn is_retryable(self) -> bool {
        matches!(self, Self::Transient | Self::RateLimited)
    }
}

/// Retrier with exponential backoff and jitter.
#[derive(Debug, Clone)]
pub struct BackoffRetrier {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    backoff_multiplier: f32,
    jitter: bool,
}

impl Default for BackoffRetrier {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            jitter: true,
        }
    }
}

impl BackoffRetrier {
    /// Creates a retrier with custom settings. `max_attempts` is at least 1.
    #[must_use]
    pub fn new(
        max_attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f32,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            backoff_multiplier,
            jitter: true,
        }
    }

    /// Creates a retrier with a custom attempt budget and default delays.
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Disables jitter, making delays deterministic.
    #[must_use]
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Returns the attempt budget.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Returns the delay before the next attempt, or `None` to give up.
    ///
    /// `attempt` is the 1-indexed attempt that just failed.
    #[instrument(skip(self), fields(max_attempts = self.max_attempts))]
    pub fn next_delay(&self, failure_type: FailureType, attempt: u32) -> Option<Duration> {
        if !failure_type.is_retryable() {
            debug!("failure is not retryable");
            return None;
        }
        if attempt >= self.max_attempts {
            debug!(attempt, "max attempts reached");
            return None;
        }
        let delay = self.calculate_delay(attempt);
        debug!(
            attempt,
            next_attempt = attempt + 1,
            delay_ms = delay.as_millis(),
            "will retry"
        );
        Some(delay)
    }

    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_precision_loss,
        clippy::cast_sign_loss
    )]
    fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as f64;
        let exponent = f64::from(attempt.saturating_sub(1));
        let delay_ms = base_ms * f64::from(self.backoff_multiplier).powf(exponent);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped_ms as u64) + self.calculate_jitter()
    }

    #[allow(clippy::cast_possible_truncation)]
    fn calculate_jitter(&self) -> Duration {
        if !self.jitter {
            return Duration::ZERO;
        }
        let jitter_ms = rand::thread_rng().gen_range(0..=MAX_JITTER.as_millis() as u64);
        Duration::from_millis(jitter_ms)
    }
}

#[async_trait]
impl Retrier for BackoffRetrier {
    async fn retry(
        &self,
        request: &Request,
        error: &SessionError,
    ) -> Result<RetryResult, BoxError> {
        let failure_type = classify_error(error);
        let attempt = request.retry_count() + 1;
        Ok(match self.next_delay(failure_type, attempt) {
            Some(delay) => {
                info!(
                    request_id = %request.id(),
                    attempt,
                    delay_ms = delay.as_millis(),
                    ?failure_type,
                    "scheduling retry"
                );
                RetryResult::RetryWithDelay(delay)
            }
            None => RetryResult::DoNotRetry,
        })
    }
}

/// Classifies a request error for retry decisions.
///
/// | Error | Type |
/// |-------|------|
/// | HTTP 401, 403 | NeedsAuth |
/// | HTTP 408, 5xx | Transient |
/// | HTTP 429 | RateLimited |
/// | other HTTP 4xx | Permanent |
/// | Timeout | Transient |
/// | Network (TLS) | Permanent |
/// | Network (other) | Transient |
/// | IO, cancellation, invalid request, adapter/session failures | Permanent |
#[must_use]
pub fn classify_error(error: &SessionError) -> FailureType {
    match error.transport_error() {
        Some(TransportError::HttpStatus { status, .. }) => classify_http_status(*status),
        Some(TransportError::Timeout { .. }) => FailureType::Transient,
        Some(TransportError::Network { source, .. }) => {
            if is_tls_error(source) {
                FailureType::Permanent
            } else {
                FailureType::Transient
            }
        }
        Some(TransportError::Io { .. } | TransportError::Cancelled) | None => {
            FailureType::Permanent
        }
    }
}

#[allow(clippy::match_same_arms)]
fn classify_http_status(status: u16) -> FailureType {
    match status {
        400 => FailureType::Permanent,
        401 => FailureType::NeedsAuth,
        403 => FailureType::NeedsAuth,
        404 => FailureType::Permanent,
        408 => FailureType::Transient,
        410 => FailureType::Permanent,
        429 => FailureType::RateLimited,
        451 => FailureType::Permanent,
        status if (400..500).contains(&status) => FailureType::Permanent,
        status if (500..600).contains(&status) => FailureType::Transient,
        _ => FailureType::Permanent,
    }
}

fn is_tls_error(error: &reqwest::Error) -> bool {
    let message = error.to_string().to_lowercase();
    message.contains("certificate")
        || message.contains("tls")
        || message.contains("ssl")
        || message.contains("handshake")
}
