//! The root queue: a single task that owns all session-wide mutable state.
//!
//! Every lifecycle callback, map mutation, active-set change and retry
//! scheduling happens here, one command at a time. Work that may wait
//! (building, adapting, retry decisions, retry delays) is spawned and reports
//! back with another command, so the loop itself never awaits anything but
//! the next command.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};

use super::queues::{RequestQueue, SerializationQueue};
use crate::config::SessionConfig;
use crate::error::{BoxError, SessionError};
use crate::interceptor::{AdaptState, Adapter, Interceptor, Retrier, RetryResult};
use crate::monitor::EventMonitor;
use crate::request::{Request, RequestId, TransportRequest};
use crate::task::{Eviction, Progress, RequestTaskMap, TaskEvents, TaskHandle, TaskId};
use crate::task::{TaskMetrics, TaskOutput, TaskStatus, Transport, TransportError};

pub(crate) type RootSender = mpsc::UnboundedSender<RootCommand>;
pub(crate) type RootReceiver = mpsc::UnboundedReceiver<RootCommand>;

/// State-change notifications posted by a [`Request`].
#[derive(Debug)]
pub(crate) enum Lifecycle {
    DidResume,
    DidResumeTask(TaskHandle),
    DidSuspend,
    DidSuspendTask(TaskHandle),
    DidCancel,
    DidCancelTask(TaskHandle),
    /// The request has no live task left; deliver its outcome.
    Finish,
}

impl Lifecycle {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Self::DidResume => "did_resume",
            Self::DidResumeTask(_) => "did_resume_task",
            Self::DidSuspend => "did_suspend",
            Self::DidSuspendTask(_) => "did_suspend_task",
            Self::DidCancel => "did_cancel",
            Self::DidCancelTask(_) => "did_cancel_task",
            Self::Finish => "finish",
        }
    }
}

pub(crate) enum RootCommand {
    Perform(Request),
    InitialRequestBuilt {
        request: Request,
        result: Result<TransportRequest, SessionError>,
    },
    Adapted {
        request: Request,
        initial: TransportRequest,
        result: Result<TransportRequest, BoxError>,
    },
    Lifecycle {
        request: Request,
        event: Lifecycle,
    },
    TaskMetrics {
        task: TaskId,
        metrics: TaskMetrics,
    },
    TaskProgress {
        task: TaskId,
        progress: Progress,
    },
    TaskCompleted {
        task: TaskId,
        result: Result<TaskOutput, TransportError>,
    },
    RetryDecided {
        request: Request,
        error: SessionError,
        result: Result<RetryResult, BoxError>,
    },
    Retry(Request),
    CancelAll {
        reason: Option<String>,
    },
    ActiveCount(oneshot::Sender<usize>),
    Shutdown,
}

pub(crate) struct RootQueue {
    config: SessionConfig,
    transport: Arc<dyn Transport>,
    interceptor: Option<Interceptor>,
    monitor: Arc<dyn EventMonitor>,
    map: Arc<RequestTaskMap>,
    events: TaskEvents,
    sender: RootSender,
    active: HashMap<RequestId, Request>,
    /// Completed tasks whose metrics are still outstanding.
    waiting_completions: HashMap<TaskId, Request>,
    invalidation: Option<SessionError>,
    request_queue: RequestQueue,
    serialization: SerializationQueue,
}

impl RootQueue {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        config: SessionConfig,
        transport: Arc<dyn Transport>,
        interceptor: Option<Interceptor>,
        monitor: Arc<dyn EventMonitor>,
        map: Arc<RequestTaskMap>,
        events: TaskEvents,
        sender: RootSender,
    ) -> Self {
        let request_queue = RequestQueue::new(config.request_queue_limit);
        Self {
            config,
            transport,
            interceptor,
            monitor,
            map,
            events,
            sender,
            active: HashMap::new(),
            waiting_completions: HashMap::new(),
            invalidation: None,
            request_queue,
            serialization: SerializationQueue::spawn(),
        }
    }

    pub(crate) async fn run(mut self, mut commands: RootReceiver) {
        debug!("root queue started");
        while let Some(command) = commands.recv().await {
            if !self.handle(command) {
                break;
            }
        }
        debug!("root queue stopped");
    }

    /// Returns false once the queue should stop.
    fn handle(&mut self, command: RootCommand) -> bool {
        match command {
            RootCommand::Perform(request) => self.perform(request),
            RootCommand::InitialRequestBuilt { request, result } => {
                self.did_build_initial(request, result);
            }
            RootCommand::Adapted {
                request,
                initial,
                result,
            } => self.did_adapt(request, &initial, result),
            RootCommand::Lifecycle { request, event } => self.lifecycle(&request, event),
            RootCommand::TaskMetrics { task, metrics } => self.task_metrics(task, &metrics),
            RootCommand::TaskProgress { task, progress } => self.task_progress(task, progress),
            RootCommand::TaskCompleted { task, result } => self.task_completed(task, result),
            RootCommand::RetryDecided {
                request,
                error,
                result,
            } => self.retry_decided(request, error, result),
            RootCommand::Retry(request) => self.retry_now(request),
            RootCommand::CancelAll { reason } => {
                let error = self
                    .invalidation
                    .get_or_insert(SessionError::SessionInvalidated { reason })
                    .clone();
                info!(%error, "invalidating session");
                self.terminate_all(&error);
            }
            RootCommand::ActiveCount(reply) => {
                let _ = reply.send(self.active.len());
            }
            RootCommand::Shutdown => {
                self.terminate_all(&SessionError::SessionDeinitialized);
                return false;
            }
        }
        true
    }

    fn perform(&mut self, request: Request) {
        if request.is_finished() {
            return;
        }
        if let Some(error) = self.invalidation.clone() {
            debug!(request_id = %request.id(), "session invalidated; refusing request");
            self.finish(&request, Some(error));
            return;
        }
        if request.is_cancelled() {
            // The cancel already scheduled its finish.
            return;
        }
        debug!(request_id = %request.id(), kind = request.kind().name(), "performing request");
        self.active.insert(request.id(), request.clone());
        self.request_queue.build(request, self.sender.clone());
    }

    fn did_build_initial(
        &mut self,
        request: Request,
        result: Result<TransportRequest, SessionError>,
    ) {
        if is_abandoned(&request) {
            return;
        }
        match result {
            Ok(initial) => {
                self.monitor.request_did_create_initial(&request, &initial);
                self.adapt(request, initial);
            }
            Err(error) => {
                self.monitor.request_did_fail_to_create(&request, &error);
                request.set_error(error);
                self.retry_or_finish(request);
            }
        }
    }

    fn adapt(&mut self, request: Request, initial: TransportRequest) {
        let adapter = Interceptor::combine(request.interceptor(), self.interceptor.as_ref())
            .filter(|interceptor| interceptor.adapter_count() > 0);
        let Some(adapter) = adapter else {
            self.did_create_transport_request(request, initial);
            return;
        };
        let state = AdaptState {
            request_id: request.id(),
            retry_count: request.retry_count(),
        };
        let sender = self.sender.clone();
        tokio::spawn(async move {
            let result = adapter.adapt(initial.clone(), &state).await;
            let _ = sender.send(RootCommand::Adapted {
                request,
                initial,
                result,
            });
        });
    }

    fn did_adapt(
        &mut self,
        request: Request,
        initial: &TransportRequest,
        result: Result<TransportRequest, BoxError>,
    ) {
        if is_abandoned(&request) {
            return;
        }
        let adapted = result
            .map_err(SessionError::adaptation_failed)
            .and_then(|adapted| adapted.validate().map(|()| adapted));
        match adapted {
            Ok(adapted) => {
                self.monitor.request_did_adapt(&request, initial, &adapted);
                self.did_create_transport_request(request, adapted);
            }
            Err(error) => {
                self.monitor.request_did_fail_to_adapt(&request, &error);
                request.set_error(error);
                self.retry_or_finish(request);
            }
        }
    }

    fn did_create_transport_request(&mut self, request: Request, built: TransportRequest) {
        if is_abandoned(&request) {
            return;
        }
        request.did_create_transport_request(built.clone());
        self.monitor.request_did_create_transport_request(&request, &built);

        let task = self.transport.create_task(&built, self.events.clone());
        if let Err(error) = self.map.bind(&request, task.clone()) {
            warn!(request_id = %request.id(), task_id = %task.id(), %error, "failed to bind task");
            request.cancel_task(&task);
            request.set_error(SessionError::task_creation_failed(Box::new(error)));
            self.retry_or_finish(request);
            return;
        }
        request.did_create_task(task.clone());
        self.monitor.request_did_create_task(&request, &task);
        request.drive_task(&task, self.config.start_requests_immediately);
    }

    fn lifecycle(&mut self, request: &Request, event: Lifecycle) {
        trace!(request_id = %request.id(), event = event.name(), "lifecycle event");
        match event {
            Lifecycle::DidResume => self.monitor.request_did_resume(request),
            Lifecycle::DidResumeTask(task) => self.monitor.request_did_resume_task(request, &task),
            Lifecycle::DidSuspend => self.monitor.request_did_suspend(request),
            Lifecycle::DidSuspendTask(task) => {
                self.monitor.request_did_suspend_task(request, &task);
            }
            Lifecycle::DidCancel => self.monitor.request_did_cancel(request),
            Lifecycle::DidCancelTask(task) => self.monitor.request_did_cancel_task(request, &task),
            Lifecycle::Finish => self.finish(request, None),
        }
    }

    fn task_metrics(&mut self, task: TaskId, metrics: &TaskMetrics) {
        let Some(request) = self.map.request_for(task) else {
            trace!(task_id = %task, "metrics for untracked task");
            return;
        };
        request.did_gather_metrics(metrics.clone());
        self.monitor.task_did_gather_metrics(&request, metrics);
        if self.map.on_metrics_gathered(task) == Eviction::Evicted
            && let Some(request) = self.waiting_completions.remove(&task)
        {
            self.retry_or_finish(request);
        }
    }

    fn task_progress(&mut self, task: TaskId, progress: Progress) {
        let Some(request) = self.map.request_for(task) else {
            return;
        };
        self.monitor.task_did_progress(&request, progress);
        if let Some(handler) = request.progress_handler() {
            self.serialization.dispatch(move || handler(progress));
        }
    }

    fn task_completed(&mut self, task: TaskId, result: Result<TaskOutput, TransportError>) {
        let Some(request) = self.map.request_for(task) else {
            debug!(task_id = %task, "completion for untracked task");
            return;
        };
        self.monitor.task_did_complete(&request, &result);
        request.did_complete_task(result);
        match self.map.on_completed(task) {
            Eviction::Evicted => self.retry_or_finish(request),
            Eviction::Pending => {
                trace!(task_id = %task, "completion parked until metrics arrive");
                self.waiting_completions.insert(task, request);
            }
            Eviction::Unknown => warn!(task_id = %task, "task evicted before completion"),
        }
    }

    fn retry_or_finish(&mut self, request: Request) {
        if request.is_finished() {
            return;
        }
        let Some(error) = request.error() else {
            self.finish(&request, None);
            return;
        };
        if request.is_cancelled() {
            self.finish(&request, None);
            return;
        }
        let retrier = Interceptor::combine(request.interceptor(), self.interceptor.as_ref())
            .filter(|interceptor| interceptor.retrier_count() > 0);
        let Some(retrier) = retrier else {
            self.finish(&request, None);
            return;
        };
        let sender = self.sender.clone();
        tokio::spawn(async move {
            let result = retrier.retry(&request, &error).await;
            let _ = sender.send(RootCommand::RetryDecided {
                request,
                error,
                result,
            });
        });
    }

    fn retry_decided(
        &mut self,
        request: Request,
        error: SessionError,
        result: Result<RetryResult, BoxError>,
    ) {
        if request.is_finished() {
            return;
        }
        match result {
            Ok(RetryResult::Retry) => self.retry_request(request, None),
            Ok(RetryResult::RetryWithDelay(delay)) => self.retry_request(request, Some(delay)),
            Ok(RetryResult::DoNotRetry) => self.finish(&request, None),
            Ok(RetryResult::DoNotRetryWithError(retry_error)) | Err(retry_error) => {
                let error = SessionError::retry_decision_failed(retry_error, error);
                self.finish(&request, Some(error));
            }
        }
    }

    fn retry_request(&mut self, request: Request, delay: Option<Duration>) {
        if request.is_cancelled() {
            return;
        }
        self.monitor.request_is_retrying(&request);
        match delay.filter(|delay| !delay.is_zero()) {
            None => self.retry_now(request),
            Some(delay) => {
                debug!(request_id = %request.id(), delay_ms = delay.as_millis(), "retry scheduled");
                let sender = self.sender.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = sender.send(RootCommand::Retry(request));
                });
            }
        }
    }

    fn retry_now(&mut self, request: Request) {
        if request.is_cancelled() || request.is_finished() {
            debug!(request_id = %request.id(), "request ended before retry");
            return;
        }
        request.prepare_for_retry();
        self.perform(request);
    }

    fn finish(&mut self, request: &Request, error: Option<SessionError>) {
        let Some((outcome, handler)) = request.finish(error) else {
            return;
        };
        self.active.remove(&request.id());
        self.monitor.request_did_finish(request, &outcome);
        if let Some(handler) = handler {
            self.serialization.dispatch(move || handler(outcome));
        }
    }

    /// Finishes every tracked request with `error`, cancelling live tasks.
    fn terminate_all(&mut self, error: &SessionError) {
        let mut tracked: HashMap<RequestId, Request> = self.active.drain().collect();
        for request in self.map.requests() {
            tracked.entry(request.id()).or_insert(request);
        }
        let mut requests: Vec<Request> = tracked.into_values().collect();
        requests.sort_by_key(Request::id);

        for request in requests {
            if let Some(task) = request.task()
                && task.status() != TaskStatus::Completed
            {
                request.cancel_task(&task);
            }
            self.finish(&request, Some(error.clone()));
        }
        self.waiting_completions.clear();
    }
}

fn is_abandoned(request: &Request) -> bool {
    request.is_cancelled() || request.is_finished()
}
