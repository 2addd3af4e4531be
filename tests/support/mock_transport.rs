//! Scripted in-memory transport for session tests.
//!
//! Each created task takes the next [`Script`] from the queue (falling back to
//! `Succeed(200)`) and acts it out when resumed. Events are reported
//! synchronously from `resume`/`cancel`, which only enqueue onto the
//! session's root queue.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use transfer_core::{
    ResponseBody, TaskEvents, TaskHandle, TaskId, TaskMetrics, TaskOutput, TaskStatus, Transport,
    TransportError, TransportRequest, TransportTask,
};

/// What a mock task does once resumed.
#[derive(Debug, Clone)]
#[allow(dead_code)]
pub enum Script {
    /// Completes with the status and body `ok`.
    Succeed(u16),
    /// Completes with the error.
    Fail(TransportError),
    /// Never completes on its own; only `cancel` ends it.
    Hang,
    /// Completes with the status but holds its metrics back until
    /// [`MockTransport::release_metrics`].
    MetricsLater(u16),
}

#[derive(Default)]
struct Shared {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<TransportRequest>>,
    calls: Mutex<Vec<&'static str>>,
    withheld: Mutex<Vec<(TaskId, TaskEvents)>>,
    next_id: AtomicU64,
}

/// Transport whose tasks follow a script.
#[derive(Clone, Default)]
pub struct MockTransport {
    shared: Arc<Shared>,
}

#[allow(dead_code)]
impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport that plays `scripts` in order.
    pub fn scripted(scripts: impl IntoIterator<Item = Script>) -> Self {
        let transport = Self::new();
        transport
            .shared
            .scripts
            .lock()
            .unwrap()
            .extend(scripts);
        transport
    }

    /// Number of tasks created so far.
    pub fn created(&self) -> usize {
        self.shared.requests.lock().unwrap().len()
    }

    /// Transport requests tasks were created for, in order.
    pub fn requests(&self) -> Vec<TransportRequest> {
        self.shared.requests.lock().unwrap().clone()
    }

    /// Control calls made on any task, in order.
    pub fn calls(&self) -> Vec<&'static str> {
        self.shared.calls.lock().unwrap().clone()
    }

    /// Sends the metrics that `MetricsLater` tasks held back.
    pub fn release_metrics(&self) {
        let withheld = std::mem::take(&mut *self.shared.withheld.lock().unwrap());
        for (id, events) in withheld {
            events.metrics_gathered(id, late_metrics());
        }
    }
}

fn late_metrics() -> TaskMetrics {
    TaskMetrics {
        bytes_received: 7,
        ..TaskMetrics::default()
    }
}

impl Transport for MockTransport {
    fn create_task(&self, request: &TransportRequest, events: TaskEvents) -> TaskHandle {
        self.shared.requests.lock().unwrap().push(request.clone());
        let script = self
            .shared
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Script::Succeed(200));
        let id = TaskId::new(self.shared.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        TaskHandle::from_task(MockTask {
            id,
            script,
            events,
            shared: Arc::clone(&self.shared),
            status: Mutex::new(TaskStatus::Suspended),
            done: AtomicBool::new(false),
        })
    }
}

#[derive(Debug)]
struct MockTask {
    id: TaskId,
    script: Script,
    events: TaskEvents,
    shared: Arc<Shared>,
    status: Mutex<TaskStatus>,
    done: AtomicBool,
}

impl std::fmt::Debug for Shared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shared").finish_non_exhaustive()
    }
}

impl MockTask {
    fn record(&self, call: &'static str) {
        self.shared.calls.lock().unwrap().push(call);
    }

    fn complete_withholding_metrics(&self, status: u16) {
        if self.done.swap(true, Ordering::SeqCst) {
            return;
        }
        *self.status.lock().unwrap() = TaskStatus::Completed;
        self.events.completed(
            self.id,
            Ok(TaskOutput::new(status, ResponseBody::Bytes(b"ok".to_vec()))),
        );
        self.shared
            .withheld
            .lock()
            .unwrap()
            .push((self.id, self.events.clone()));
    }

    fn complete(&self, result: Result<TaskOutput, TransportError>) {
        if self.done.swap(true, Ordering::SeqCst) {
            return;
        }
        *self.status.lock().unwrap() = TaskStatus::Completed;
        self.events.metrics_gathered(
            self.id,
            TaskMetrics {
                bytes_received: 2,
                ..TaskMetrics::default()
            },
        );
        self.events.completed(self.id, result);
    }
}

impl TransportTask for MockTask {
    fn id(&self) -> TaskId {
        self.id
    }

    fn status(&self) -> TaskStatus {
        *self.status.lock().unwrap()
    }

    fn resume(&self) {
        self.record("resume");
        if self.done.load(Ordering::SeqCst) {
            return;
        }
        *self.status.lock().unwrap() = TaskStatus::Running;
        match &self.script {
            Script::Succeed(status) => self.complete(Ok(TaskOutput::new(
                *status,
                ResponseBody::Bytes(b"ok".to_vec()),
            ))),
            Script::Fail(error) => self.complete(Err(error.clone())),
            Script::Hang => {}
            Script::MetricsLater(status) => self.complete_withholding_metrics(*status),
        }
    }

    fn suspend(&self) {
        self.record("suspend");
        if !self.done.load(Ordering::SeqCst) {
            *self.status.lock().unwrap() = TaskStatus::Suspended;
        }
    }

    fn cancel(&self) {
        self.record("cancel");
        self.complete(Err(TransportError::Cancelled));
    }
}
