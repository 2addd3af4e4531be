//! Notification sink handed to transports.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, trace};

use super::{Credential, Progress, ProtectionSpace, RequestTaskMap, TaskId, TaskMetrics};
use super::{TaskOutput, TransportError};
use crate::session::{RootCommand, RootSender};

/// Sink through which a transport reports task events to its session.
///
/// Every notification is queued onto the session's root queue, so it is safe
/// to call from any thread. Notifications for a session that has shut down are
/// dropped.
#[derive(Clone)]
pub struct TaskEvents {
    root: RootSender,
    map: Arc<RequestTaskMap>,
    fallback_credential: Option<Credential>,
}

impl TaskEvents {
    pub(crate) fn new(
        root: RootSender,
        map: Arc<RequestTaskMap>,
        fallback_credential: Option<Credential>,
    ) -> Self {
        Self {
            root,
            map,
            fallback_credential,
        }
    }

    /// Reports that metrics for `task` are available.
    pub fn metrics_gathered(&self, task: TaskId, metrics: TaskMetrics) {
        self.post(RootCommand::TaskMetrics { task, metrics });
    }

    /// Reports that `task` finished with `result`.
    pub fn completed(&self, task: TaskId, result: Result<TaskOutput, TransportError>) {
        self.post(RootCommand::TaskCompleted { task, result });
    }

    /// Reports transfer progress for `task`.
    pub fn progress(&self, task: TaskId, progress: Progress) {
        trace!(%task, completed = progress.completed, "task progress");
        self.post(RootCommand::TaskProgress { task, progress });
    }

    /// Answers an authentication challenge for `task`.
    ///
    /// The request's own credential takes precedence over the session default.
    #[must_use]
    pub fn credential_challenge(
        &self,
        task: TaskId,
        space: &ProtectionSpace,
    ) -> Option<Credential> {
        let credential = self
            .map
            .request_for(task)
            .and_then(|request| request.credential())
            .or_else(|| self.fallback_credential.clone());
        debug!(
            %task,
            host = %space.host,
            scheme = %space.scheme,
            answered = credential.is_some(),
            "credential challenge"
        );
        credential
    }

    fn post(&self, command: RootCommand) {
        if self.root.send(command).is_err() {
            debug!("session root queue closed; dropping task event");
        }
    }
}

impl fmt::Debug for TaskEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskEvents")
            .field("tracked_tasks", &self.map.len())
            .field("has_fallback_credential", &self.fallback_credential.is_some())
            .finish()
    }
}
