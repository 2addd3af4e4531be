//! Error types delivered to request completion handlers.
//!
//! [`SessionError`] is the single error type a caller observes for a request.
//! It is `Clone` so that one outcome can be handed to the completion callback,
//! to every `Request::response()` waiter, and to event monitors.

use std::error::Error as StdError;
use std::sync::Arc;

use thiserror::Error;

use crate::task::TransportError;

/// Boxed error returned by adapters and retriers.
pub type BoxError = Box<dyn StdError + Send + Sync>;

/// Shared form of [`BoxError`] stored inside [`SessionError`].
pub type SharedError = Arc<dyn StdError + Send + Sync>;

/// Errors a request can finish with.
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    /// The request description could not be turned into a valid transport request.
    #[error("invalid request description: {reason}")]
    RequestDescriptionInvalid {
        /// Why validation failed.
        reason: String,
    },

    /// An adapter in the interceptor chain rejected the outgoing request.
    #[error("request adaptation failed: {0}")]
    AdaptationFailed(#[source] SharedError),

    /// The transport task could not be registered for the request.
    #[error("transport task creation failed: {0}")]
    TaskCreationFailed(#[source] SharedError),

    /// The retrier chain failed while deciding, or refused with its own error.
    #[error("retry decision failed: {retry_error} (original error: {original})")]
    RetryDecisionFailed {
        /// Error produced by the retrier.
        #[source]
        retry_error: SharedError,
        /// The error that triggered the retry decision.
        original: Box<SessionError>,
    },

    /// The session was invalidated while the request was in flight.
    #[error("session invalidated: {}", .reason.as_deref().unwrap_or("no reason given"))]
    SessionInvalidated {
        /// Optional caller-supplied reason.
        reason: Option<String>,
    },

    /// The session was dropped while the request was in flight.
    #[error("session deinitialized before the request finished")]
    SessionDeinitialized,

    /// The request was explicitly cancelled.
    #[error("request cancelled")]
    Cancelled,

    /// The transport task finished with an error.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl SessionError {
    /// Creates a [`Self::RequestDescriptionInvalid`] error.
    pub fn invalid_description(reason: impl Into<String>) -> Self {
        Self::RequestDescriptionInvalid {
            reason: reason.into(),
        }
    }

    /// Wraps an adapter failure.
    #[must_use]
    pub fn adaptation_failed(cause: BoxError) -> Self {
        Self::AdaptationFailed(Arc::from(cause))
    }

    /// Wraps a task registration failure.
    #[must_use]
    pub fn task_creation_failed(cause: BoxError) -> Self {
        Self::TaskCreationFailed(Arc::from(cause))
    }

    /// Wraps a retrier failure together with the error that prompted the retry.
    #[must_use]
    pub fn retry_decision_failed(retry_error: BoxError, original: SessionError) -> Self {
        Self::RetryDecisionFailed {
            retry_error: Arc::from(retry_error),
            original: Box::new(original),
        }
    }

    /// Returns true for [`Self::Cancelled`].
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Returns the transport error behind this error, if any.
    #[must_use]
    pub fn transport_error(&self) -> Option<&TransportError> {
        match self {
            Self::Transport(error) => Some(error),
            Self::RetryDecisionFailed { original, .. } => original.transport_error(),
            _ => None,
        }
    }
}
