//! Bidirectional association between requests and transport tasks.
//!
//! The transport delivers "metrics gathered" and "completed" as two separate,
//! order-unspecified notifications for the same task. An entry therefore stays
//! in the map until both have been observed, so a late metrics notification can
//! still find its request.
//!
//! # Example
//!
//! ```text
//! bind(request, task)           -> both pending
//! on_completed(task)            -> Pending   (metrics outstanding)
//! on_metrics_gathered(task)     -> Evicted   (entry removed)
//! on_metrics_gathered(task)     -> Unknown   (never evicted twice)
//! ```

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tracing::{debug, trace};

use super::{TaskHandle, TaskId};
use crate::request::{Request, RequestId};

/// Errors returned by [`RequestTaskMap::bind`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MapError {
    /// The request already has a different live task.
    #[error("{request} is already bound to {existing}; cannot bind {attempted}")]
    RequestAlreadyBound {
        /// The request being bound.
        request: RequestId,
        /// The task currently bound to it.
        existing: TaskId,
        /// The task that was rejected.
        attempted: TaskId,
    },

    /// The task already belongs to another request.
    #[error("{task} already belongs to {owner}; cannot bind it to {request}")]
    TaskAlreadyBound {
        /// The task being bound.
        task: TaskId,
        /// The request that owns it.
        owner: RequestId,
        /// The request that was rejected.
        request: RequestId,
    },
}

/// Outcome of clearing one of an entry's pending events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eviction {
    /// Both events have now been observed and the entry was removed.
    Evicted,
    /// The other event is still outstanding.
    Pending,
    /// The task is not tracked (never bound or already evicted).
    Unknown,
}

#[derive(Debug, Clone, Copy)]
struct PendingEvents {
    metrics: bool,
    completion: bool,
}

#[derive(Debug, Default)]
struct MapState {
    requests_to_tasks: HashMap<RequestId, TaskHandle>,
    tasks_to_requests: HashMap<TaskId, Request>,
    pending: HashMap<TaskId, PendingEvents>,
}

impl MapState {
    fn remove(&mut self, task: TaskId) {
        if let Some(request) = self.tasks_to_requests.remove(&task) {
            self.requests_to_tasks.remove(&request.id());
        }
        self.pending.remove(&task);
    }
}

/// Concurrency-safe request/task map with deferred eviction.
///
/// All operations take a single internal lock and never await.
#[derive(Debug, Default)]
pub struct RequestTaskMap {
    state: Mutex<MapState>,
}

impl RequestTaskMap {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MapState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Associates `request` with `task`.
    ///
    /// Binding the same pair twice is a no-op. The metrics bit starts cleared
    /// for tasks that never report metrics.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::RequestAlreadyBound`] if the request has a different
    /// live task, or [`MapError::TaskAlreadyBound`] if the task belongs to
    /// another request.
    pub fn bind(&self, request: &Request, task: TaskHandle) -> Result<(), MapError> {
        let mut state = self.lock();
        let request_id = request.id();
        let task_id = task.id();

        if let Some(existing) = state.requests_to_tasks.get(&request_id) {
            if existing.id() == task_id {
                return Ok(());
            }
            return Err(MapError::RequestAlreadyBound {
                request: request_id,
                existing: existing.id(),
                attempted: task_id,
            });
        }
        if let Some(owner) = state.tasks_to_requests.get(&task_id) {
            return Err(MapError::TaskAlreadyBound {
                task: task_id,
                owner: owner.id(),
                request: request_id,
            });
        }

        let pending = PendingEvents {
            metrics: task.reports_metrics(),
            completion: true,
        };
        state.requests_to_tasks.insert(request_id, task);
        state.tasks_to_requests.insert(task_id, request.clone());
        state.pending.insert(task_id, pending);
        debug!(%request_id, %task_id, metrics_expected = pending.metrics, "bound task");
        Ok(())
    }

    /// Returns the task bound to `request`.
    #[must_use]
    pub fn task_for(&self, request: RequestId) -> Option<TaskHandle> {
        self.lock().requests_to_tasks.get(&request).cloned()
    }

    /// Returns the request bound to `task`.
    #[must_use]
    pub fn request_for(&self, task: TaskId) -> Option<Request> {
        self.lock().tasks_to_requests.get(&task).cloned()
    }

    /// Records that metrics for `task` were gathered.
    pub fn on_metrics_gathered(&self, task: TaskId) -> Eviction {
        self.clear(task, |pending| pending.metrics = false)
    }

    /// Records that `task` completed.
    pub fn on_completed(&self, task: TaskId) -> Eviction {
        self.clear(task, |pending| pending.completion = false)
    }

    fn clear(&self, task: TaskId, update: impl FnOnce(&mut PendingEvents)) -> Eviction {
        let mut state = self.lock();
        let Some(pending) = state.pending.get_mut(&task) else {
            trace!(%task, "event for untracked task");
            return Eviction::Unknown;
        };
        update(pending);
        if pending.metrics || pending.completion {
            return Eviction::Pending;
        }
        state.remove(task);
        debug!(%task, "evicted task");
        Eviction::Evicted
    }

    /// Returns every request that currently has a task bound.
    #[must_use]
    pub fn requests(&self) -> Vec<Request> {
        self.lock().tasks_to_requests.values().cloned().collect()
    }

    /// Returns the number of tracked tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().tasks_to_requests.len()
    }

    /// Returns true if no tasks are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
