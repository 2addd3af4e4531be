//! Reference [`Transport`] built on `reqwest`.
//!
//! Each task is a Tokio task that waits, suspended, until the session resumes
//! it. Response bodies are streamed either into memory or, for downloads,
//! into the destination file. Suspending a running task pauses the body
//! stream between chunks.
//!
//! # Example
//!
//! ```no_run
//! use transfer_core::{HttpTransport, HttpTransportConfig, Session};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = HttpTransportConfig {
//!     read_timeout_secs: 60,
//!     ..HttpTransportConfig::default()
//! };
//! let session = Session::new(HttpTransport::with_config(config)?)?;
//! # Ok(())
//! # }
//! ```

mod task;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use reqwest::Client;
use tracing::{debug, instrument};

use crate::config::{ConfigError, HttpTransportConfig};
use crate::request::TransportRequest;
use crate::task::{TaskEvents, TaskHandle, TaskId, Transport};

pub use task::HttpTask;
use task::TaskRunner;

/// HTTP transport backed by a shared `reqwest` client.
#[derive(Debug)]
pub struct HttpTransport {
    client: Client,
    config: HttpTransportConfig,
    next_task_id: AtomicU64,
}

impl HttpTransport {
    /// Creates a transport with default timeouts.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::HttpClient`] if the client cannot be built.
    pub fn new() -> Result<Self, ConfigError> {
        Self::with_config(HttpTransportConfig::default())
    }

    /// Creates a transport from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for out-of-range timeouts and
    /// [`ConfigError::HttpClient`] if the client cannot be built.
    #[instrument(level = "debug", skip_all, fields(
        connect_timeout_secs = config.connect_timeout_secs,
        read_timeout_secs = config.read_timeout_secs,
    ))]
    pub fn with_config(config: HttpTransportConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let client = build_client(&config)?;
        debug!("built HTTP transport");
        Ok(Self::with_client(client, config))
    }

    /// Uses an existing client. Timeouts in `config` only apply if the client
    /// was built with them.
    #[must_use]
    pub fn with_client(client: Client, config: HttpTransportConfig) -> Self {
        Self {
            client,
            config,
            next_task_id: AtomicU64::new(0),
        }
    }

    /// Returns the transport configuration.
    #[must_use]
    pub fn config(&self) -> &HttpTransportConfig {
        &self.config
    }
}

impl Transport for HttpTransport {
    fn create_task(&self, request: &TransportRequest, events: TaskEvents) -> TaskHandle {
        let id = TaskId::new(self.next_task_id.fetch_add(1, Ordering::Relaxed) + 1);
        let task = Arc::new(HttpTask::new(id));
        let runner = TaskRunner::new(
            self.client.clone(),
            request.clone(),
            events,
            Arc::clone(&task),
            self.config.error_for_status,
        );
        tokio::spawn(runner.run());
        debug!(task_id = %id, method = %request.method, url = %request.url, "created HTTP task");
        TaskHandle::new(task)
    }
}

fn build_client(config: &HttpTransportConfig) -> Result<Client, ConfigError> {
    let client = Client::builder()
        .connect_timeout(config.connect_timeout())
        .timeout(config.read_timeout())
        .gzip(true)
        .cookie_store(true)
        .user_agent(config.user_agent.clone())
        .build()?;
    Ok(client)
}
