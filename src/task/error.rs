//! Error types reported by transport tasks.
//!
//! These are the failures a transport surfaces through
//! [`TaskEvents::completed`](super::TaskEvents::completed). The session wraps
//! them in [`SessionError::Transport`](crate::SessionError::Transport) before
//! handing them to retriers and completion handlers.

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

/// Errors that can end a transport task.
///
/// Sources are held behind `Arc` so the error can be cloned into every
/// observer of a request's outcome.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// Network-level error (DNS resolution, connection refused, TLS errors, etc.)
    #[error("network error requesting {url}: {source}")]
    Network {
        /// The URL that failed.
        url: String,
        /// The underlying network error.
        #[source]
        source: Arc<reqwest::Error>,
    },

    /// Request timed out before completion.
    #[error("timeout requesting {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// HTTP error response (4xx client errors, 5xx server errors).
    #[error("HTTP {status} requesting {url}")]
    HttpStatus {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
        /// The Retry-After header value, if present.
        retry_after: Option<String>,
    },

    /// File system error while reading an upload body or writing a download.
    #[error("IO error on {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: Arc<std::io::Error>,
    },

    /// The task was cancelled before it produced a result.
    #[error("transport task cancelled")]
    Cancelled,
}

impl TransportError {
    /// Creates an error from a reqwest error, mapping timeouts to [`Self::Timeout`].
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        let url = url.into();
        if source.is_timeout() {
            Self::Timeout { url }
        } else {
            Self::Network {
                url,
                source: Arc::new(source),
            }
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after: None,
        }
    }

    /// Creates an HTTP status error with a Retry-After header value.
    pub fn http_status_with_retry_after(
        url: impl Into<String>,
        status: u16,
        retry_after: Option<String>,
    ) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after,
        }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source: Arc::new(source),
        }
    }

    /// Returns the HTTP status code for [`Self::HttpStatus`] errors.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}
