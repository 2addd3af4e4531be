//! Logical requests and their lifecycle.
//!
//! A [`Request`] is a cheap, cloneable handle. All clones share one lifecycle:
//! a per-request lock guards the state machine, and every state change posts a
//! notification to the owning session's root queue while the lock is held, so
//! the root queue observes changes in the order they happened. Task-level
//! notifications are posted before the task is touched, so they always precede
//! any event the task itself emits in response.

mod kind;
mod state;

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{mpsc, watch};
use tracing::{debug, trace};

use crate::config::CancellationPolicy;
use crate::error::SessionError;
use crate::interceptor::Interceptor;
use crate::session::{Lifecycle, RootCommand, RootSender};
use crate::task::{Credential, Progress, TaskHandle, TaskId, TaskMetrics, TaskOutput};
use crate::task::{TaskStatus, TransportError};

pub use kind::{
    DownloadSource, RequestDescriptor, RequestKind, ResumeData, TransportBody, TransportRequest,
    UploadSource,
};
pub use state::RequestState;
pub(crate) use state::TaskAction;

/// Session-assigned request identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl RequestId {
    pub(crate) const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw identifier.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

/// Final result of a request.
pub type Outcome = Result<Response, SessionError>;

/// Callback invoked exactly once with the request's outcome.
pub type CompletionHandler = Box<dyn FnOnce(Outcome) + Send + 'static>;

/// Callback invoked for every progress notification.
pub type ProgressHandler = Arc<dyn Fn(Progress) + Send + Sync + 'static>;

/// Successful outcome of a request.
#[derive(Debug, Clone)]
pub struct Response {
    /// The request this response belongs to.
    pub request_id: RequestId,
    /// The task that produced the output.
    pub task_id: Option<TaskId>,
    /// Status, headers and body location.
    pub output: TaskOutput,
    /// Metrics of the final attempt, when the transport reported them.
    pub metrics: Option<TaskMetrics>,
    /// Number of retries performed before this attempt.
    pub retry_count: u32,
}

/// Per-request options passed to [`Session::submit_with`](crate::Session::submit_with).
#[derive(Default)]
pub struct SubmitOptions {
    pub(crate) interceptor: Option<Interceptor>,
    pub(crate) credential: Option<Credential>,
    pub(crate) on_progress: Option<ProgressHandler>,
    pub(crate) on_completion: Option<CompletionHandler>,
}

impl SubmitOptions {
    /// Creates empty options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a request-level interceptor, consulted before the session's.
    #[must_use]
    pub fn interceptor(mut self, interceptor: Interceptor) -> Self {
        self.interceptor = Some(interceptor);
        self
    }

    /// Sets the credential offered on authentication challenges.
    #[must_use]
    pub fn credential(mut self, credential: Credential) -> Self {
        self.credential = Some(credential);
        self
    }

    /// Sets the progress callback.
    #[must_use]
    pub fn on_progress<F>(mut self, handler: F) -> Self
    where
        F: Fn(Progress) + Send + Sync + 'static,
    {
        self.on_progress = Some(Arc::new(handler));
        self
    }

    /// Sets the completion callback.
    #[must_use]
    pub fn on_completion<F>(mut self, handler: F) -> Self
    where
        F: FnOnce(Outcome) + Send + 'static,
    {
        self.on_completion = Some(Box::new(handler));
        self
    }
}

impl fmt::Debug for SubmitOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubmitOptions")
            .field("interceptor", &self.interceptor)
            .field("credential", &self.credential)
            .field("on_progress", &self.on_progress.is_some())
            .field("on_completion", &self.on_completion.is_some())
            .finish()
    }
}

struct MutableState {
    state: RequestState,
    cancelled: bool,
    is_finishing: bool,
    task: Option<TaskHandle>,
    task_completed: bool,
    error: Option<SessionError>,
    retry_count: u32,
    credential: Option<Credential>,
    transport_request: Option<TransportRequest>,
    metrics: Option<TaskMetrics>,
    output: Option<TaskOutput>,
    on_completion: Option<CompletionHandler>,
}

impl MutableState {
    fn live_task(&self) -> Option<TaskHandle> {
        if self.task_completed {
            return None;
        }
        self.task
            .as_ref()
            .filter(|task| task.status() != TaskStatus::Completed)
            .cloned()
    }
}

struct Inner {
    id: RequestId,
    kind: RequestKind,
    interceptor: Option<Interceptor>,
    progress: Option<ProgressHandler>,
    root: RootSender,
    cancellation: CancellationPolicy,
    mutable: Mutex<MutableState>,
    outcome: watch::Sender<Option<Outcome>>,
}

/// A logical unit of work tracked by a session.
///
/// Equality and hashing use the request's identity, never its content.
#[derive(Clone)]
pub struct Request {
    inner: Arc<Inner>,
}

impl Request {
    pub(crate) fn new(
        id: RequestId,
        kind: RequestKind,
        options: SubmitOptions,
        root: RootSender,
        cancellation: CancellationPolicy,
    ) -> Self {
        let (outcome, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                id,
                kind,
                interceptor: options.interceptor,
                progress: options.on_progress,
                root,
                cancellation,
                mutable: Mutex::new(MutableState {
                    state: RequestState::Initialized,
                    cancelled: false,
                    is_finishing: false,
                    task: None,
                    task_completed: false,
                    error: None,
                    retry_count: 0,
                    credential: options.credential,
                    transport_request: None,
                    metrics: None,
                    output: None,
                    on_completion: options.on_completion,
                }),
                outcome,
            }),
        }
    }

    /// A request whose root queue is already closed.
    #[cfg(test)]
    pub(crate) fn detached(id: RequestId, kind: RequestKind) -> Self {
        let (root, _) = mpsc::unbounded_channel();
        Self::new(
            id,
            kind,
            SubmitOptions::default(),
            root,
            CancellationPolicy::default(),
        )
    }

    fn lock(&self) -> MutexGuard<'_, MutableState> {
        self.inner
            .mutable
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the request identifier.
    #[must_use]
    pub fn id(&self) -> RequestId {
        self.inner.id
    }

    /// Returns what this request does.
    #[must_use]
    pub fn kind(&self) -> &RequestKind {
        &self.inner.kind
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> RequestState {
        self.lock().state
    }

    /// Returns the number of retries performed so far.
    #[must_use]
    pub fn retry_count(&self) -> u32 {
        self.lock().retry_count
    }

    /// Returns the error accumulated by the current attempt.
    #[must_use]
    pub fn error(&self) -> Option<SessionError> {
        self.lock().error.clone()
    }

    /// Returns the currently bound task.
    #[must_use]
    pub fn task(&self) -> Option<TaskHandle> {
        self.lock().task.clone()
    }

    /// Returns the transport request of the current attempt.
    #[must_use]
    pub fn transport_request(&self) -> Option<TransportRequest> {
        self.lock().transport_request.clone()
    }

    /// Returns the metrics of the most recent task.
    #[must_use]
    pub fn metrics(&self) -> Option<TaskMetrics> {
        self.lock().metrics.clone()
    }

    /// Returns the credential offered on authentication challenges.
    #[must_use]
    pub fn credential(&self) -> Option<Credential> {
        self.lock().credential.clone()
    }

    /// Sets the credential offered on authentication challenges.
    pub fn authenticate(&self, credential: Credential) -> &Self {
        self.lock().credential = Some(credential);
        self
    }

    /// Returns true once [`Request::cancel`] has taken effect.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.lock().cancelled
    }

    /// Returns true once the outcome has been delivered.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.lock().state == RequestState::Finished
    }

    /// Waits for the request's outcome.
    ///
    /// Any number of callers may wait; all observe the same outcome as the
    /// completion handler.
    pub async fn response(&self) -> Outcome {
        let mut receiver = self.inner.outcome.subscribe();
        let outcome = match receiver.wait_for(Option::is_some).await {
            Ok(value) => value.clone(),
            Err(_) => None,
        };
        outcome.unwrap_or(Err(SessionError::SessionDeinitialized))
    }

    /// Resumes the request, starting its task if one exists.
    pub fn resume(&self) -> &Self {
        let delivered = {
            let mut state = self.lock();
            if !state.state.can_transition_to(RequestState::Resumed) {
                trace!(request_id = %self.id(), state = %state.state, "resume ignored");
                return self;
            }
            state.state = RequestState::Resumed;
            let mut delivered = self.post(Lifecycle::DidResume);
            if let Some(task) = state.live_task() {
                delivered &= self.post(Lifecycle::DidResumeTask(task.clone()));
                task.resume();
            }
            delivered
        };
        self.resolve_if_orphaned(delivered);
        self
    }

    /// Suspends the request and its task.
    pub fn suspend(&self) -> &Self {
        let delivered = {
            let mut state = self.lock();
            if !state.state.can_transition_to(RequestState::Suspended) {
                trace!(request_id = %self.id(), state = %state.state, "suspend ignored");
                return self;
            }
            state.state = RequestState::Suspended;
            let mut delivered = self.post(Lifecycle::DidSuspend);
            if let Some(task) = state.live_task() {
                delivered &= self.post(Lifecycle::DidSuspendTask(task.clone()));
                task.suspend();
            }
            delivered
        };
        self.resolve_if_orphaned(delivered);
        self
    }

    /// Cancels the request.
    ///
    /// Without a live task the request finishes right away; otherwise it
    /// finishes once the task reports completion. Either way the outcome is
    /// [`SessionError::Cancelled`].
    pub fn cancel(&self) -> &Self {
        let delivered = {
            let mut state = self.lock();
            if !state.state.can_transition_to(RequestState::Cancelled) {
                trace!(request_id = %self.id(), state = %state.state, "cancel ignored");
                return self;
            }
            state.state = RequestState::Cancelled;
            state.cancelled = true;
            let mut delivered = self.post(Lifecycle::DidCancel);
            match state.live_task() {
                Some(task) => {
                    delivered &= self.post(Lifecycle::DidCancelTask(task.clone()));
                    self.cancel_task(&task);
                }
                None => delivered &= self.post(Lifecycle::Finish),
            }
            delivered
        };
        self.resolve_if_orphaned(delivered);
        self
    }

    /// Cancels `task`, resuming it first under [`CancellationPolicy::ResumeThenCancel`].
    pub(crate) fn cancel_task(&self, task: &TaskHandle) {
        if self.inner.cancellation == CancellationPolicy::ResumeThenCancel {
            task.resume();
        }
        task.cancel();
    }

    fn post(&self, event: Lifecycle) -> bool {
        self.inner
            .root
            .send(RootCommand::Lifecycle {
                request: self.clone(),
                event,
            })
            .is_ok()
    }

    fn resolve_if_orphaned(&self, delivered: bool) {
        if delivered {
            return;
        }
        debug!(request_id = %self.id(), "root queue closed; resolving request locally");
        let finished = self.finish(Some(SessionError::SessionDeinitialized));
        if let Some((outcome, Some(handler))) = finished {
            handler(outcome);
        }
    }

    pub(crate) fn interceptor(&self) -> Option<&Interceptor> {
        self.inner.interceptor.as_ref()
    }

    pub(crate) fn progress_handler(&self) -> Option<ProgressHandler> {
        self.inner.progress.clone()
    }

    /// Applies the task-binding action table to a freshly bound task.
    pub(crate) fn drive_task(&self, task: &TaskHandle, start_immediately: bool) {
        let mut state = self.lock();
        match TaskAction::for_new_task(start_immediately, state.state) {
            TaskAction::ResumeRequest => {
                state.state = RequestState::Resumed;
                self.post(Lifecycle::DidResume);
                self.post(Lifecycle::DidResumeTask(task.clone()));
                task.resume();
            }
            TaskAction::ResumeTask => {
                self.post(Lifecycle::DidResumeTask(task.clone()));
                task.resume();
            }
            TaskAction::SuspendTask => {
                self.post(Lifecycle::DidSuspendTask(task.clone()));
                task.suspend();
            }
            TaskAction::CancelTask => {
                self.post(Lifecycle::DidCancelTask(task.clone()));
                self.cancel_task(task);
            }
            TaskAction::None => {}
        }
    }

    pub(crate) fn did_create_transport_request(&self, request: TransportRequest) {
        self.lock().transport_request = Some(request);
    }

    pub(crate) fn did_create_task(&self, task: TaskHandle) {
        let mut state = self.lock();
        state.task = Some(task);
        state.task_completed = false;
    }

    pub(crate) fn did_gather_metrics(&self, metrics: TaskMetrics) {
        self.lock().metrics = Some(metrics);
    }

    pub(crate) fn did_complete_task(&self, result: Result<TaskOutput, TransportError>) {
        let mut state = self.lock();
        state.task_completed = true;
        if state.is_finishing {
            return;
        }
        match result {
            _ if state.cancelled => state.error = Some(SessionError::Cancelled),
            Ok(output) => state.output = Some(output),
            Err(error) => state.error = Some(SessionError::Transport(error)),
        }
    }

    pub(crate) fn set_error(&self, error: SessionError) {
        let mut state = self.lock();
        if state.is_finishing {
            return;
        }
        state.error = Some(if state.cancelled {
            SessionError::Cancelled
        } else {
            error
        });
    }

    pub(crate) fn prepare_for_retry(&self) {
        let mut state = self.lock();
        state.retry_count += 1;
        state.error = None;
        state.output = None;
        state.task = None;
        state.task_completed = false;
        state.metrics = None;
        state.transport_request = None;
    }

    /// Moves the request to `Finished` and publishes its outcome.
    ///
    /// Returns `None` if the request already finished. `error` overrides the
    /// accumulated error unless the request was cancelled.
    pub(crate) fn finish(
        &self,
        error: Option<SessionError>,
    ) -> Option<(Outcome, Option<CompletionHandler>)> {
        let mut state = self.lock();
        if state.is_finishing {
            return None;
        }
        state.is_finishing = true;

        let error = if state.cancelled {
            Some(SessionError::Cancelled)
        } else {
            error.or_else(|| state.error.clone())
        };
        let outcome = match (error, state.output.clone()) {
            (Some(error), _) => Err(error),
            (None, Some(output)) => Ok(Response {
                request_id: self.id(),
                task_id: state.task.as_ref().map(TaskHandle::id),
                output,
                metrics: state.metrics.clone(),
                retry_count: state.retry_count,
            }),
            (None, None) => Err(SessionError::task_creation_failed(
                "task finished without output".into(),
            )),
        };
        if let Err(error) = &outcome {
            state.error = Some(error.clone());
        }
        state.state = RequestState::Finished;
        let handler = state.on_completion.take();
        self.inner.outcome.send_replace(Some(outcome.clone()));
        Some((outcome, handler))
    }
}

impl PartialEq for Request {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Request {}

impl std::hash::Hash for Request {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("Request")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind.name())
            .field("state", &state.state)
            .field("task", &state.task.as_ref().map(TaskHandle::id))
            .field("retry_count", &state.retry_count)
            .field("error", &state.error)
            .finish_non_exhaustive()
    }
}
