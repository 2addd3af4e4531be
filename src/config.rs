//! Session and transport configuration.
//!
//! Both structs deserialize from JSON with every field optional, and both
//! validate their ranges before a session or transport is built from them.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

/// Default connect timeout of the HTTP transport in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default read timeout of the HTTP transport in seconds.
pub const DEFAULT_READ_TIMEOUT_SECS: u64 = 300;

const MAX_TIMEOUT_SECS: u64 = 3600;
const MAX_REQUEST_QUEUE_LIMIT: usize = 1024;

/// Errors raised while loading or applying configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A value is outside its allowed range.
    #[error("invalid config value for `{field}`: {value}. Expected {expected}")]
    Invalid {
        /// Field name as it appears in the config file.
        field: &'static str,
        /// Offending value.
        value: String,
        /// Allowed range or format.
        expected: &'static str,
    },

    /// The config file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Read {
        /// Path that was read.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid JSON for this struct.
    #[error("failed to parse config: {source}")]
    Parse {
        /// Underlying parse error.
        #[from]
        source: serde_json::Error,
    },

    /// A session was built outside a Tokio runtime.
    #[error("sessions must be built inside a Tokio runtime")]
    NoRuntime,

    /// A session was built without a transport.
    #[error("no transport configured for session")]
    MissingTransport,

    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

impl ConfigError {
    fn invalid(field: &'static str, value: impl ToString, expected: &'static str) -> Self {
        Self::Invalid {
            field,
            value: value.to_string(),
            expected,
        }
    }
}

/// How a request with a live task is cancelled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancellationPolicy {
    /// Resume the task, then cancel it. Some transports only deliver the
    /// completion of a suspended task after it has been resumed.
    #[default]
    ResumeThenCancel,
    /// Cancel the task without resuming it first.
    CancelOnly,
}

/// Session-wide settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// Name attached to the session's log span.
    pub label: String,
    /// Resume requests as soon as their task exists.
    pub start_requests_immediately: bool,
    /// How live tasks are cancelled.
    pub cancellation: CancellationPolicy,
    /// Maximum number of requests built concurrently on the request queue.
    pub request_queue_limit: Option<usize>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            label: "session".to_string(),
            start_requests_immediately: true,
            cancellation: CancellationPolicy::default(),
            request_queue_limit: None,
        }
    }
}

impl SessionConfig {
    /// Validates value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for an empty label or a queue limit
    /// outside `1..=1024`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.label.trim().is_empty() {
            return Err(ConfigError::invalid("label", "\"\"", "a non-empty string"));
        }
        if let Some(limit) = self.request_queue_limit
            && !(1..=MAX_REQUEST_QUEUE_LIMIT).contains(&limit)
        {
            return Err(ConfigError::invalid(
                "request_queue_limit",
                limit,
                "range 1..=1024",
            ));
        }
        Ok(())
    }

    /// Parses and validates a JSON document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] or [`ConfigError::Invalid`].
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON config file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] if the file cannot be read, otherwise as
    /// [`SessionConfig::from_json_str`].
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_json_str(&raw)?;
        debug!(path = %path.display(), label = %config.label, "loaded session config");
        Ok(config)
    }
}

/// Settings of the reqwest-backed transport.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HttpTransportConfig {
    /// TCP/TLS connect timeout in seconds.
    pub connect_timeout_secs: u64,
    /// Whole-request timeout in seconds, unless overridden per request.
    pub read_timeout_secs: u64,
    /// Map non-2xx responses to [`TransportError::HttpStatus`](crate::TransportError::HttpStatus).
    pub error_for_status: bool,
    /// `User-Agent` sent when the request has none.
    pub user_agent: String,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            read_timeout_secs: DEFAULT_READ_TIMEOUT_SECS,
            error_for_status: true,
            user_agent: default_user_agent(),
        }
    }
}

impl HttpTransportConfig {
    /// Validates timeout ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for timeouts outside `1..=3600`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_timeout_secs("connect_timeout_secs", self.connect_timeout_secs)?;
        validate_timeout_secs("read_timeout_secs", self.read_timeout_secs)?;
        Ok(())
    }

    /// Parses and validates a JSON document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] or [`ConfigError::Invalid`].
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Connect timeout as a [`Duration`].
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Read timeout as a [`Duration`].
    #[must_use]
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}

/// `User-Agent` identifying this crate.
#[must_use]
pub fn default_user_agent() -> String {
    format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
}

fn validate_timeout_secs(field: &'static str, value: u64) -> Result<(), ConfigError> {
    if !(1..=MAX_TIMEOUT_SECS).contains(&value) {
        return Err(ConfigError::invalid(field, value, "range 1..=3600"));
    }
    Ok(())
}
