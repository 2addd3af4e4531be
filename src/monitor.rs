//! Observers of request lifecycle events.
//!
//! Every callback runs on the session's root queue in the order the session
//! processed the underlying event, so implementations must return quickly.

use std::sync::Arc;

use tracing::{debug, info, trace, warn};

use crate::error::SessionError;
use crate::request::{Outcome, Request, TransportRequest};
use crate::task::{Progress, TaskHandle, TaskMetrics, TaskOutput, TransportError};

/// Receives lifecycle callbacks for every request of a session.
///
/// All methods default to doing nothing.
#[allow(unused_variables)]
pub trait EventMonitor: Send + Sync {
    /// The request kind was built into a transport request.
    fn request_did_create_initial(&self, request: &Request, initial: &TransportRequest) {}

    /// Building or validating the transport request failed.
    fn request_did_fail_to_create(&self, request: &Request, error: &SessionError) {}

    /// The adapter chain produced `adapted`.
    fn request_did_adapt(
        &self,
        request: &Request,
        initial: &TransportRequest,
        adapted: &TransportRequest,
    ) {
    }

    /// The adapter chain failed.
    fn request_did_fail_to_adapt(&self, request: &Request, error: &SessionError) {}

    /// The final transport request for this attempt is known.
    fn request_did_create_transport_request(&self, request: &Request, built: &TransportRequest) {}

    /// A task was created and bound to the request.
    fn request_did_create_task(&self, request: &Request, task: &TaskHandle) {}

    /// The request moved to `Resumed`.
    fn request_did_resume(&self, request: &Request) {}

    /// The request's task was resumed.
    fn request_did_resume_task(&self, request: &Request, task: &TaskHandle) {}

    /// The request moved to `Suspended`.
    fn request_did_suspend(&self, request: &Request) {}

    /// The request's task was suspended.
    fn request_did_suspend_task(&self, request: &Request, task: &TaskHandle) {}

    /// The request moved to `Cancelled`.
    fn request_did_cancel(&self, request: &Request) {}

    /// The request's task was cancelled.
    fn request_did_cancel_task(&self, request: &Request, task: &TaskHandle) {}

    /// The transport reported progress.
    fn task_did_progress(&self, request: &Request, progress: Progress) {}

    /// The transport reported metrics.
    fn task_did_gather_metrics(&self, request: &Request, metrics: &TaskMetrics) {}

    /// The transport reported completion.
    fn task_did_complete(&self, request: &Request, result: &Result<TaskOutput, TransportError>) {}

    /// The retrier chain decided to retry.
    fn request_is_retrying(&self, request: &Request) {}

    /// The request delivered its outcome.
    fn request_did_finish(&self, request: &Request, outcome: &Outcome) {}
}

/// Fans every callback out to a list of monitors, in order.
#[derive(Clone, Default)]
pub struct CompositeMonitor {
    monitors: Vec<Arc<dyn EventMonitor>>,
}

impl CompositeMonitor {
    /// Creates a composite over `monitors`.
    #[must_use]
    pub fn new(monitors: Vec<Arc<dyn EventMonitor>>) -> Self {
        Self { monitors }
    }

    /// Appends a monitor.
    pub fn push(&mut self, monitor: Arc<dyn EventMonitor>) {
        self.monitors.push(monitor);
    }

    /// Number of monitors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.monitors.len()
    }

    /// Returns true if there are no monitors.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.monitors.is_empty()
    }

    fn each(&self, f: impl Fn(&dyn EventMonitor)) {
        for monitor in &self.monitors {
            f(monitor.as_ref());
        }
    }
}

impl std::fmt::Debug for CompositeMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeMonitor")
            .field("monitors", &self.monitors.len())
            .finish()
    }
}

impl EventMonitor for CompositeMonitor {
    fn request_did_create_initial(&self, request: &Request, initial: &TransportRequest) {
        self.each(|m| m.request_did_create_initial(request, initial));
    }

    fn request_did_fail_to_create(&self, request: &Request, error: &SessionError) {
        self.each(|m| m.request_did_fail_to_create(request, error));
    }

    fn request_did_adapt(
        &self,
        request: &Request,
        initial: &TransportRequest,
        adapted: &TransportRequest,
    ) {
        self.each(|m| m.request_did_adapt(request, initial, adapted));
    }

    fn request_did_fail_to_adapt(&self, request: &Request, error: &SessionError) {
        self.each(|m| m.request_did_fail_to_adapt(request, error));
    }

    fn request_did_create_transport_request(&self, request: &Request, built: &TransportRequest) {
        self.each(|m| m.request_did_create_transport_request(request, built));
    }

    fn request_did_create_task(&self, request: &Request, task: &TaskHandle) {
        self.each(|m| m.request_did_create_task(request, task));
    }

    fn request_did_resume(&self, request: &Request) {
        self.each(|m| m.request_did_resume(request));
    }

    fn request_did_resume_task(&self, request: &Request, task: &TaskHandle) {
        self.each(|m| m.request_did_resume_task(request, task));
    }

    fn request_did_suspend(&self, request: &Request) {
        self.each(|m| m.request_did_suspend(request));
    }

    fn request_did_suspend_task(&self, request: &Request, task: &TaskHandle) {
        self.each(|m| m.request_did_suspend_task(request, task));
    }

    fn request_did_cancel(&self, request: &Request) {
        self.each(|m| m.request_did_cancel(request));
    }

    fn request_did_cancel_task(&self, request: &Request, task: &TaskHandle) {
        self.each(|m| m.request_did_cancel_task(request, task));
    }

    fn task_did_progress(&self, request: &Request, progress: Progress) {
        self.each(|m| m.task_did_progress(request, progress));
    }

    fn task_did_gather_metrics(&self, request: &Request, metrics: &TaskMetrics) {
        self.each(|m| m.task_did_gather_metrics(request, metrics));
    }

    fn task_did_complete(&self, request: &Request, result: &Result<TaskOutput, TransportError>) {
        self.each(|m| m.task_did_complete(request, result));
    }

    fn request_is_retrying(&self, request: &Request) {
        self.each(|m| m.request_is_retrying(request));
    }

    fn request_did_finish(&self, request: &Request, outcome: &Outcome) {
        self.each(|m| m.request_did_finish(request, outcome));
    }
}

/// Logs every lifecycle callback through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingMonitor;

impl EventMonitor for TracingMonitor {
    fn request_did_create_initial(&self, request: &Request, initial: &TransportRequest) {
        debug!(
            request_id = %request.id(),
            method = %initial.method,
            url = %initial.url,
            "created transport request"
        );
    }

    fn request_did_fail_to_create(&self, request: &Request, error: &SessionError) {
        warn!(request_id = %request.id(), %error, "failed to create transport request");
    }

    fn request_did_adapt(
        &self,
        request: &Request,
        _initial: &TransportRequest,
        adapted: &TransportRequest,
    ) {
        debug!(request_id = %request.id(), url = %adapted.url, "adapted request");
    }

    fn request_did_fail_to_adapt(&self, request: &Request, error: &SessionError) {
        warn!(request_id = %request.id(), %error, "adaptation failed");
    }

    fn request_did_create_task(&self, request: &Request, task: &TaskHandle) {
        debug!(request_id = %request.id(), task_id = %task.id(), "created task");
    }

    fn request_did_resume(&self, request: &Request) {
        trace!(request_id = %request.id(), "resumed");
    }

    fn request_did_suspend(&self, request: &Request) {
        debug!(request_id = %request.id(), "suspended");
    }

    fn request_did_cancel(&self, request: &Request) {
        debug!(request_id = %request.id(), "cancelled");
    }

    fn task_did_gather_metrics(&self, request: &Request, metrics: &TaskMetrics) {
        debug!(
            request_id = %request.id(),
            duration_ms = metrics.duration.as_millis(),
            bytes_sent = metrics.bytes_sent,
            bytes_received = metrics.bytes_received,
            "gathered metrics"
        );
    }

    fn task_did_complete(&self, request: &Request, result: &Result<TaskOutput, TransportError>) {
        match result {
            Ok(output) => {
                debug!(request_id = %request.id(), status = output.status, "task completed");
            }
            Err(error) => debug!(request_id = %request.id(), %error, "task failed"),
        }
    }

    fn request_is_retrying(&self, request: &Request) {
        info!(
            request_id = %request.id(),
            attempt = request.retry_count() + 1,
            "retrying request"
        );
    }

    fn request_did_finish(&self, request: &Request, outcome: &Outcome) {
        match outcome {
            Ok(response) => info!(
                request_id = %request.id(),
                status = response.output.status,
                retries = response.retry_count,
                "request finished"
            ),
            Err(error) if error.is_cancelled() => {
                debug!(request_id = %request.id(), "request cancelled");
            }
            Err(error) => warn!(request_id = %request.id(), %error, "request failed"),
        }
    }
}
