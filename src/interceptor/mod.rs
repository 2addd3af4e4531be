//! Request adaptation and retry policy.
//!
//! An [`Interceptor`] holds two ordered chains:
//!
//! - adapters transform the outgoing [`TransportRequest`]; the first failure
//!   stops the chain
//! - retriers decide what happens after a failed attempt; `DoNotRetry` from a
//!   member defers to the next one, any other decision wins
//!
//! `Interceptor` itself implements both [`Adapter`] and [`Retrier`], which is
//! how a request-level interceptor is chained in front of the session's.

mod headers;
mod rate_limiter;
mod retry;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, instrument};

use crate::error::{BoxError, SessionError};
use crate::request::{Request, RequestId, TransportRequest};

pub use headers::DefaultHeaders;
pub use rate_limiter::{RateLimiter, extract_domain, parse_retry_after};
pub use retry::{BackoffRetrier, DEFAULT_MAX_RETRIES, FailureType, classify_error};

/// Per-attempt context passed to adapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdaptState {
    /// The request being adapted.
    pub request_id: RequestId,
    /// Retries performed before this attempt.
    pub retry_count: u32,
}

/// Transforms an outgoing request before its task is created.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Returns the adapted request, or an error that fails the attempt.
    async fn adapt(
        &self,
        request: TransportRequest,
        state: &AdaptState,
    ) -> Result<TransportRequest, BoxError>;
}

/// Decides whether a failed attempt is retried.
#[async_trait]
pub trait Retrier: Send + Sync {
    /// Returns the decision for `request`, which failed with `error`.
    ///
    /// An `Err` is treated like [`RetryResult::DoNotRetryWithError`].
    async fn retry(
        &self,
        request: &Request,
        error: &SessionError,
    ) -> Result<RetryResult, BoxError>;
}

/// Outcome of a retry decision.
#[derive(Debug)]
pub enum RetryResult {
    /// Retry immediately.
    Retry,
    /// Retry after the given delay.
    RetryWithDelay(Duration),
    /// Do not retry; the original error stands.
    DoNotRetry,
    /// Do not retry; finish with this error alongside the original.
    DoNotRetryWithError(BoxError),
}

impl RetryResult {
    /// Returns true for [`RetryResult::Retry`] and [`RetryResult::RetryWithDelay`].
    #[must_use]
    pub fn is_retry(&self) -> bool {
        matches!(self, Self::Retry | Self::RetryWithDelay(_))
    }

    /// Returns the delay of [`RetryResult::RetryWithDelay`].
    #[must_use]
    pub fn delay(&self) -> Option<Duration> {
        match self {
            Self::RetryWithDelay(delay) => Some(*delay),
            _ => None,
        }
    }
}

/// Ordered adapter and retrier chains.
#[derive(Clone, Default)]
pub struct Interceptor {
    adapters: Vec<Arc<dyn Adapter>>,
    retriers: Vec<Arc<dyn Retrier>>,
}

impl Interceptor {
    /// Creates an interceptor with empty chains.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an adapter.
    #[must_use]
    pub fn with_adapter(mut self, adapter: impl Adapter + 'static) -> Self {
        self.adapters.push(Arc::new(adapter));
        self
    }

    /// Appends a retrier.
    #[must_use]
    pub fn with_retrier(mut self, retrier: impl Retrier + 'static) -> Self {
        self.retriers.push(Arc::new(retrier));
        self
    }

    /// Appends one value to both chains.
    #[must_use]
    pub fn with_policy<T>(mut self, policy: T) -> Self
    where
        T: Adapter + Retrier + 'static,
    {
        let policy = Arc::new(policy);
        self.adapters.push(Arc::clone(&policy) as Arc<dyn Adapter>);
        self.retriers.push(policy);
        self
    }

    /// Appends an already shared policy to both chains.
    #[must_use]
    pub fn with_shared_policy<T>(mut self, policy: &Arc<T>) -> Self
    where
        T: Adapter + Retrier + 'static,
    {
        self.adapters.push(Arc::clone(policy) as Arc<dyn Adapter>);
        self.retriers.push(Arc::clone(policy) as Arc<dyn Retrier>);
        self
    }

    /// Number of adapters.
    #[must_use]
    pub fn adapter_count(&self) -> usize {
        self.adapters.len()
    }

    /// Number of retriers.
    #[must_use]
    pub fn retrier_count(&self) -> usize {
        self.retriers.len()
    }

    /// Returns true if both chains are empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty() && self.retriers.is_empty()
    }

    /// Chains a request-level interceptor in front of a session-level one.
    ///
    /// Returns `None` when neither is present. A side only joins the chains
    /// it has members for, so empty chains stay empty.
    #[must_use]
    pub fn combine(request: Option<&Self>, session: Option<&Self>) -> Option<Self> {
        match (request, session) {
            (None, None) => None,
            (Some(only), None) | (None, Some(only)) => Some(only.clone()),
            (Some(request), Some(session)) => {
                let mut combined = Self::new();
                for side in [request, session] {
                    if !side.adapters.is_empty() {
                        combined.adapters.push(Arc::new(side.clone()));
                    }
                    if !side.retriers.is_empty() {
                        combined.retriers.push(Arc::new(side.clone()));
                    }
                }
                Some(combined)
            }
        }
    }
}

impl fmt::Debug for Interceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interceptor")
            .field("adapters", &self.adapters.len())
            .field("retriers", &self.retriers.len())
            .finish()
    }
}

#[async_trait]
impl Adapter for Interceptor {
    #[instrument(level = "debug", skip_all, fields(request_id = %state.request_id))]
    async fn adapt(
        &self,
        mut request: TransportRequest,
        state: &AdaptState,
    ) -> Result<TransportRequest, BoxError> {
        for (index, adapter) in self.adapters.iter().enumerate() {
            request = adapter.adapt(request, state).await.inspect_err(|error| {
                debug!(index, %error, "adapter failed");
            })?;
        }
        Ok(request)
    }
}

#[async_trait]
impl Retrier for Interceptor {
    #[instrument(level = "debug", skip_all, fields(request_id = %request.id()))]
    async fn retry(
        &self,
        request: &Request,
        error: &SessionError,
    ) -> Result<RetryResult, BoxError> {
        for (index, retrier) in self.retriers.iter().enumerate() {
            match retrier.retry(request, error).await? {
                RetryResult::DoNotRetry => continue,
                decision => {
                    debug!(index, ?decision, "retrier decided");
                    return Ok(decision);
                }
            }
        }
        Ok(RetryResult::DoNotRetry)
    }
}

/// Adapter backed by a synchronous closure. See [`adapter_fn`].
pub struct AdapterFn<F>(F);

/// Wraps a closure as an [`Adapter`].
pub fn adapter_fn<F>(f: F) -> AdapterFn<F>
where
    F: Fn(TransportRequest, &AdaptState) -> Result<TransportRequest, BoxError> + Send + Sync,
{
    AdapterFn(f)
}

#[async_trait]
impl<F> Adapter for AdapterFn<F>
where
    F: Fn(TransportRequest, &AdaptState) -> Result<TransportRequest, BoxError> + Send + Sync,
{
    async fn adapt(
        &self,
        request: TransportRequest,
        state: &AdaptState,
    ) -> Result<TransportRequest, BoxError> {
        (self.0)(request, state)
    }
}

/// Retrier backed by a synchronous closure. See [`retrier_fn`].
pub struct RetrierFn<F>(F);

/// Wraps a closure as a [`Retrier`].
pub fn retrier_fn<F>(f: F) -> RetrierFn<F>
where
    F: Fn(&Request, &SessionError) -> RetryResult + Send + Sync,
{
    RetrierFn(f)
}

#[async_trait]
impl<F> Retrier for RetrierFn<F>
where
    F: Fn(&Request, &SessionError) -> RetryResult + Send + Sync,
{
    async fn retry(
        &self,
        request: &Request,
        error: &SessionError,
    ) -> Result<RetryResult, BoxError> {
        Ok((self.0)(request, error))
    }
}
