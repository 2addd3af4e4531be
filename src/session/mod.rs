//! The session: entry point for submitting requests.
//!
//! A [`Session`] owns a root queue task that drives every
//! request through building, adaptation, task creation, state transitions,
//! completion and retry. `Session` itself is a cheap, cloneable handle; the
//! root queue shuts down when the last clone is dropped, finishing every
//! pending request with [`SessionError::SessionDeinitialized`].
//!
//! ```no_run
//! use transfer_core::{HttpTransport, RequestDescriptor, Session};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let session = Session::builder()
//!     .transport(HttpTransport::new()?)
//!     .build()?;
//! let request = session.request(RequestDescriptor::get("https://example.com/"));
//! let response = request.response().await?;
//! println!("status {}", response.output.status);
//! # Ok(())
//! # }
//! ```

mod queues;
mod root;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tracing::{Instrument, debug, info_span, instrument};

use crate::config::{CancellationPolicy, ConfigError, SessionConfig};
use crate::error::SessionError;
use crate::interceptor::Interceptor;
use crate::monitor::{CompositeMonitor, EventMonitor, TracingMonitor};
use crate::request::{
    DownloadSource, Request, RequestDescriptor, RequestId, RequestKind, ResumeData,
    SubmitOptions, UploadSource,
};
use crate::task::{Credential, RequestTaskMap, TaskEvents, Transport};

pub(crate) use root::{Lifecycle, RootCommand, RootSender};
use root::RootQueue;

struct SessionInner {
    root: RootSender,
    config: SessionConfig,
    next_request_id: AtomicU64,
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        let _ = self.root.send(RootCommand::Shutdown);
    }
}

/// Orchestrates requests over a [`Transport`].
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Returns a builder with default configuration.
    #[must_use]
    pub fn builder() -> SessionBuilder {
        SessionBuilder::default()
    }

    /// Builds a session with default configuration over `transport`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NoRuntime`] outside a Tokio runtime.
    pub fn new(transport: impl Transport + 'static) -> Result<Self, ConfigError> {
        Self::builder().transport(transport).build()
    }

    /// Returns the session configuration.
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Submits a request with default options.
    pub fn submit(&self, kind: impl Into<RequestKind>) -> Request {
        self.submit_with(kind, SubmitOptions::default())
    }

    /// Submits a request.
    ///
    /// Nothing observable happens until the root queue picks the request up;
    /// the returned handle may be resumed, suspended or cancelled right away.
    #[instrument(skip_all, fields(request_id))]
    pub fn submit_with(&self, kind: impl Into<RequestKind>, options: SubmitOptions) -> Request {
        let id = RequestId::new(self.inner.next_request_id.fetch_add(1, Ordering::Relaxed) + 1);
        tracing::Span::current().record("request_id", tracing::field::display(id));
        let request = Request::new(
            id,
            kind.into(),
            options,
            self.inner.root.clone(),
            self.inner.config.cancellation,
        );
        if self
            .inner
            .root
            .send(RootCommand::Perform(request.clone()))
            .is_err()
        {
            debug!("root queue closed; resolving request locally");
            if let Some((outcome, Some(handler))) =
                request.finish(Some(SessionError::SessionDeinitialized))
            {
                handler(outcome);
            }
        }
        request
    }

    /// Submits a data request.
    pub fn request(&self, descriptor: RequestDescriptor) -> Request {
        self.submit(RequestKind::Data(descriptor))
    }

    /// Submits an upload.
    pub fn upload(&self, descriptor: RequestDescriptor, source: UploadSource) -> Request {
        self.submit(RequestKind::Upload { descriptor, source })
    }

    /// Submits a download streamed to `destination`.
    pub fn download(
        &self,
        descriptor: RequestDescriptor,
        destination: impl Into<PathBuf>,
    ) -> Request {
        self.submit(RequestKind::Download {
            source: DownloadSource::Request(descriptor),
            destination: destination.into(),
        })
    }

    /// Continues an interrupted download into `destination`.
    pub fn download_resuming(
        &self,
        resume: ResumeData,
        destination: impl Into<PathBuf>,
    ) -> Request {
        self.submit(RequestKind::Download {
            source: DownloadSource::Resume(resume),
            destination: destination.into(),
        })
    }

    /// Finishes every tracked request with [`SessionError::SessionInvalidated`]
    /// and refuses new work. Calling it again has no further effect.
    pub fn cancel_all(&self, reason: Option<String>) {
        let _ = self.inner.root.send(RootCommand::CancelAll { reason });
    }

    /// Returns the number of requests currently in flight.
    pub async fn active_requests(&self) -> usize {
        let (reply, count) = oneshot::channel();
        if self.inner.root.send(RootCommand::ActiveCount(reply)).is_err() {
            return 0;
        }
        count.await.unwrap_or(0)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("label", &self.inner.config.label)
            .finish_non_exhaustive()
    }
}

/// Configures and builds a [`Session`].
#[derive(Default)]
pub struct SessionBuilder {
    config: SessionConfig,
    transport: Option<Arc<dyn Transport>>,
    interceptor: Option<Interceptor>,
    monitors: Vec<Arc<dyn EventMonitor>>,
    credential: Option<Credential>,
}

impl SessionBuilder {
    /// Replaces the whole configuration.
    #[must_use]
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the transport.
    #[must_use]
    pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Sets an already shared transport.
    #[must_use]
    pub fn shared_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Sets the session-level interceptor.
    #[must_use]
    pub fn interceptor(mut self, interceptor: Interceptor) -> Self {
        self.interceptor = Some(interceptor);
        self
    }

    /// Adds an event monitor.
    #[must_use]
    pub fn monitor(mut self, monitor: Arc<dyn EventMonitor>) -> Self {
        self.monitors.push(monitor);
        self
    }

    /// Sets the credential used when a request has none of its own.
    #[must_use]
    pub fn credential(mut self, credential: Credential) -> Self {
        self.credential = Some(credential);
        self
    }

    /// Sets whether requests resume as soon as their task exists.
    #[must_use]
    pub fn start_requests_immediately(mut self, start: bool) -> Self {
        self.config.start_requests_immediately = start;
        self
    }

    /// Sets how live tasks are cancelled.
    #[must_use]
    pub fn cancellation_policy(mut self, policy: CancellationPolicy) -> Self {
        self.config.cancellation = policy;
        self
    }

    /// Builds the session and spawns its root queue on the current runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for an invalid configuration,
    /// [`ConfigError::MissingTransport`] without a transport, and
    /// [`ConfigError::NoRuntime`] outside a Tokio runtime.
    pub fn build(self) -> Result<Session, ConfigError> {
        self.config.validate()?;
        let transport = self.transport.ok_or(ConfigError::MissingTransport)?;
        let runtime = Handle::try_current().map_err(|_| ConfigError::NoRuntime)?;
        let _guard = runtime.enter();

        let (root, commands) = mpsc::unbounded_channel();
        let map = Arc::new(RequestTaskMap::new());
        let events = TaskEvents::new(root.clone(), Arc::clone(&map), self.credential);

        let mut monitor = CompositeMonitor::new(vec![Arc::new(TracingMonitor)]);
        for extra in self.monitors {
            monitor.push(extra);
        }

        let span = info_span!("session", label = %self.config.label);
        let queue = RootQueue::new(
            self.config.clone(),
            transport,
            self.interceptor,
            Arc::new(monitor),
            map,
            events,
            root.clone(),
        );
        runtime.spawn(queue.run(commands).instrument(span));

        Ok(Session {
            inner: Arc::new(SessionInner {
                root,
                config: self.config,
                next_request_id: AtomicU64::new(0),
            }),
        })
    }
}

impl fmt::Debug for SessionBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionBuilder")
            .field("config", &self.config)
            .field("has_transport", &self.transport.is_some())
            .field("interceptor", &self.interceptor)
            .field("monitors", &self.monitors.len())
            .finish()
    }
}
