//! Transport-layer task handles and the outbound transport interface.
//!
//! The core never performs network I/O itself. A [`Transport`] allocates a
//! [`TaskHandle`] for each outgoing [`TransportRequest`], and reports back
//! through [`TaskEvents`]:
//!
//! - [`TaskEvents::metrics_gathered`] and [`TaskEvents::completed`] arrive as
//!   two independent, order-unspecified notifications for the same task
//! - [`TaskEvents::progress`] may arrive any number of times before completion
//! - [`TaskEvents::credential_challenge`] is answered synchronously
//!
//! Tasks must start suspended; the session resumes them once the handle is
//! registered in the [`RequestTaskMap`].

mod error;
mod events;
pub mod map;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::HeaderMap;

use crate::request::TransportRequest;

pub use error::TransportError;
pub use events::TaskEvents;
pub use map::{Eviction, MapError, RequestTaskMap};

/// Transport-assigned identifier of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    /// Wraps a raw transport identifier.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw identifier.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Status of a transport task as reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    /// The task is transferring data.
    Running,
    /// The task is paused (initial status of every new task).
    Suspended,
    /// Cancellation was requested and the task has not reported completion yet.
    Canceling,
    /// The task has reported completion.
    Completed,
}

/// A running transport-layer operation.
///
/// Implementations must be cheap to call from any thread: the session invokes
/// `resume`, `suspend` and `cancel` while holding a request's state lock, so
/// they must never call back into the request synchronously.
pub trait TransportTask: Send + Sync + fmt::Debug {
    /// Returns the transport-assigned identifier.
    fn id(&self) -> TaskId;

    /// Returns the current status.
    fn status(&self) -> TaskStatus;

    /// Whether this task will deliver a `metrics_gathered` notification.
    fn reports_metrics(&self) -> bool {
        true
    }

    /// Starts or continues the transfer.
    fn resume(&self);

    /// Pauses the transfer.
    fn suspend(&self);

    /// Cancels the transfer. The task still reports completion.
    fn cancel(&self);
}

/// Shared, non-owning reference to a transport task.
#[derive(Debug, Clone)]
pub struct TaskHandle(Arc<dyn TransportTask>);

impl TaskHandle {
    /// Wraps an already shared task.
    #[must_use]
    pub fn new(task: Arc<dyn TransportTask>) -> Self {
        Self(task)
    }

    /// Wraps a task value.
    #[must_use]
    pub fn from_task<T: TransportTask + 'static>(task: T) -> Self {
        Self(Arc::new(task))
    }

    /// Returns the task identifier.
    #[must_use]
    pub fn id(&self) -> TaskId {
        self.0.id()
    }

    /// Returns the current task status.
    #[must_use]
    pub fn status(&self) -> TaskStatus {
        self.0.status()
    }

    /// Whether this task will deliver metrics.
    #[must_use]
    pub fn reports_metrics(&self) -> bool {
        self.0.reports_metrics()
    }

    pub(crate) fn resume(&self) {
        self.0.resume();
    }

    pub(crate) fn suspend(&self) {
        self.0.suspend();
    }

    pub(crate) fn cancel(&self) {
        self.0.cancel();
    }
}

impl PartialEq for TaskHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for TaskHandle {}

/// Outbound interface to the transport subsystem.
pub trait Transport: Send + Sync {
    /// Allocates a suspended task for `request`.
    ///
    /// Allocation cannot fail; transfer errors are reported later through
    /// `events.completed`.
    fn create_task(&self, request: &TransportRequest, events: TaskEvents) -> TaskHandle;
}

/// Timing and volume statistics for a finished task.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskMetrics {
    /// Wall-clock time from resume to completion.
    pub duration: Duration,
    /// Request body bytes sent.
    pub bytes_sent: u64,
    /// Response body bytes received.
    pub bytes_received: u64,
    /// Number of authentication round-trips performed.
    pub auth_attempts: u32,
}

/// Transfer progress for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// Bytes transferred so far (including any resumed offset).
    pub completed: u64,
    /// Expected total bytes, when known.
    pub total: Option<u64>,
}

impl Progress {
    /// Returns completion as a fraction in `0.0..=1.0`, when the total is known.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn fraction(&self) -> Option<f64> {
        match self.total {
            Some(0) => Some(1.0),
            Some(total) => Some((self.completed as f64 / total as f64).min(1.0)),
            None => None,
        }
    }
}

/// Result artifact of a completed task. The core does not interpret it.
#[derive(Debug, Clone)]
pub struct TaskOutput {
    /// HTTP status code.
    pub status: u16,
    /// Response headers.
    pub headers: HeaderMap,
    /// Where the response body ended up.
    pub body: ResponseBody,
}

impl TaskOutput {
    /// Creates an output with no headers.
    #[must_use]
    pub fn new(status: u16, body: ResponseBody) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body,
        }
    }
}

/// Response body location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseBody {
    /// No body was returned.
    Empty,
    /// Body collected in memory.
    Bytes(Vec<u8>),
    /// Body streamed to a file.
    File(PathBuf),
}

/// Origin and scheme of an authentication challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtectionSpace {
    /// Host that issued the challenge.
    pub host: String,
    /// Port, when not the scheme default.
    pub port: Option<u16>,
    /// Authentication scheme in lowercase (e.g. `basic`).
    pub scheme: String,
    /// Realm parameter of the challenge.
    pub realm: Option<String>,
}

/// User credential offered in response to a challenge.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    /// User name.
    pub user: String,
    /// Password, if the scheme uses one.
    pub password: Option<String>,
}

impl Credential {
    /// Creates a user/password credential.
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: Some(password.into()),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}
