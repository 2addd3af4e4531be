//! Shared fixtures for unit tests.

use std::sync::{Arc, Mutex};

use crate::config::CancellationPolicy;
use crate::request::{Request, RequestDescriptor, RequestId, RequestKind, SubmitOptions};
use crate::session::RootSender;
use crate::task::{TaskId, TaskStatus, TransportTask};

/// Transport task that records every control call.
///
/// Clones share their call log and status.
#[derive(Debug, Clone)]
pub(crate) struct StubTask {
    id: TaskId,
    reports_metrics: bool,
    calls: Arc<Mutex<Vec<&'static str>>>,
    status: Arc<Mutex<TaskStatus>>,
}

impl StubTask {
    pub(crate) fn new(id: u64) -> Self {
        Self {
            id: TaskId::new(id),
            reports_metrics: true,
            calls: Arc::default(),
            status: Arc::new(Mutex::new(TaskStatus::Suspended)),
        }
    }

    pub(crate) fn without_metrics(mut self) -> Self {
        self.reports_metrics = false;
        self
    }

    pub(crate) fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: &'static str, status: TaskStatus) {
        self.calls.lock().unwrap().push(call);
        *self.status.lock().unwrap() = status;
    }
}

impl TransportTask for StubTask {
    fn id(&self) -> TaskId {
        self.id
    }

    fn status(&self) -> TaskStatus {
        *self.status.lock().unwrap()
    }

    fn reports_metrics(&self) -> bool {
        self.reports_metrics
    }

    fn resume(&self) {
        self.record("resume", TaskStatus::Running);
    }

    fn suspend(&self) {
        self.record("suspend", TaskStatus::Suspended);
    }

    fn cancel(&self) {
        self.record("cancel", TaskStatus::Canceling);
    }
}

/// A `GET https://example.com` request whose root queue is already gone.
pub(crate) fn detached_request(id: u64) -> Request {
    Request::detached(
        RequestId::new(id),
        RequestKind::from(RequestDescriptor::get("https://example.com")),
    )
}

/// A request that posts its lifecycle events to `root`.
pub(crate) fn attached_request(id: u64, kind: RequestKind, root: RootSender) -> Request {
    Request::new(
        RequestId::new(id),
        kind,
        SubmitOptions::default(),
        root,
        CancellationPolicy::default(),
    )
}
