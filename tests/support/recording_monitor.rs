//! Event monitor that records callback names in delivery order.

use std::sync::{Arc, Mutex};

use transfer_core::{
    EventMonitor, Outcome, Progress, Request, SessionError, TaskHandle, TaskMetrics, TaskOutput,
    TransportError, TransportRequest,
};

#[derive(Clone, Default)]
pub struct RecordingMonitor {
    events: Arc<Mutex<Vec<String>>>,
}

#[allow(dead_code)]
impl RecordingMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Recorded callback names.
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    /// Recorded callback names, without progress noise.
    pub fn lifecycle(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter(|event| event != "task_did_progress")
            .collect()
    }

    fn record(&self, name: &str) {
        self.events.lock().unwrap().push(name.to_string());
    }
}

impl EventMonitor for RecordingMonitor {
    fn request_did_create_initial(&self, _: &Request, _: &TransportRequest) {
        self.record("request_did_create_initial");
    }

    fn request_did_fail_to_create(&self, _: &Request, _: &SessionError) {
        self.record("request_did_fail_to_create");
    }

    fn request_did_adapt(&self, _: &Request, _: &TransportRequest, _: &TransportRequest) {
        self.record("request_did_adapt");
    }

    fn request_did_fail_to_adapt(&self, _: &Request, _: &SessionError) {
        self.record("request_did_fail_to_adapt");
    }

    fn request_did_create_transport_request(&self, _: &Request, _: &TransportRequest) {
        self.record("request_did_create_transport_request");
    }

    fn request_did_create_task(&self, _: &Request, _: &TaskHandle) {
        self.record("request_did_create_task");
    }

    fn request_did_resume(&self, _: &Request) {
        self.record("request_did_resume");
    }

    fn request_did_resume_task(&self, _: &Request, _: &TaskHandle) {
        self.record("request_did_resume_task");
    }

    fn request_did_suspend(&self, _: &Request) {
        self.record("request_did_suspend");
    }

    fn request_did_suspend_task(&self, _: &Request, _: &TaskHandle) {
        self.record("request_did_suspend_task");
    }

    fn request_did_cancel(&self, _: &Request) {
        self.record("request_did_cancel");
    }

    fn request_did_cancel_task(&self, _: &Request, _: &TaskHandle) {
        self.record("request_did_cancel_task");
    }

    fn task_did_progress(&self, _: &Request, _: Progress) {
        self.record("task_did_progress");
    }

    fn task_did_gather_metrics(&self, _: &Request, _: &TaskMetrics) {
        self.record("task_did_gather_metrics");
    }

    fn task_did_complete(&self, _: &Request, _: &Result<TaskOutput, TransportError>) {
        self.record("task_did_complete");
    }

    fn request_is_retrying(&self, _: &Request) {
        self.record("request_is_retrying");
    }

    fn request_did_finish(&self, _: &Request, _: &Outcome) {
        self.record("request_did_finish");
    }
}
