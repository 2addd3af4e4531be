//! Request lifecycle states and the task-binding action table.

use std::fmt;

/// Lifecycle state of a [`Request`](super::Request).
///
/// ```text
/// Initialized -> Resumed <-> Suspended
///      |            |            |
///      +------------+------------+--> Cancelled --> Finished
///      +------------+------------+------------------^
/// ```
///
/// `Finished` is terminal. `Cancelled` may only move to `Finished`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestState {
    /// Created; no resume/suspend/cancel has been applied yet.
    Initialized,
    /// Running, or will run once its task exists.
    Resumed,
    /// Paused by the caller.
    Suspended,
    /// Cancelled; will finish once the task (if any) reports completion.
    Cancelled,
    /// Completion has been delivered.
    Finished,
}

impl RequestState {
    /// Returns whether a transition from `self` to `next` is allowed.
    #[must_use]
    #[allow(clippy::match_same_arms)]
    pub fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::Finished, _) => false,
            (Self::Cancelled, Self::Finished) => true,
            (Self::Cancelled, _) | (_, Self::Initialized) => false,
            (Self::Initialized, _) => true,
            (Self::Resumed, Self::Suspended) | (Self::Suspended, Self::Resumed) => true,
            (Self::Resumed | Self::Suspended, Self::Cancelled | Self::Finished) => true,
            (Self::Resumed, Self::Resumed) | (Self::Suspended, Self::Suspended) => false,
        }
    }

    /// Returns true for [`RequestState::Finished`].
    #[must_use]
    pub fn is_terminal(self) -> bool {
        self == Self::Finished
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Initialized => "initialized",
            Self::Resumed => "resumed",
            Self::Suspended => "suspended",
            Self::Cancelled => "cancelled",
            Self::Finished => "finished",
        };
        f.write_str(name)
    }
}

/// What to do with a freshly bound task, given the request's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TaskAction {
    /// Move the request to `Resumed` and start the task.
    ResumeRequest,
    /// Start the task; the request is already resumed.
    ResumeTask,
    /// Pause the task; the request is suspended.
    SuspendTask,
    /// Cancel the task; the request was cancelled before the task existed.
    CancelTask,
    /// Leave the task alone.
    None,
}

impl TaskAction {
    pub(crate) fn for_new_task(start_immediately: bool, state: RequestState) -> Self {
        match (start_immediately, state) {
            (true, RequestState::Initialized) => Self::ResumeRequest,
            (false, RequestState::Initialized) | (_, RequestState::Finished) => Self::None,
            (_, RequestState::Resumed) => Self::ResumeTask,
            (_, RequestState::Suspended) => Self::SuspendTask,
            (_, RequestState::Cancelled) => Self::CancelTask,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [RequestState; 5] = [
        RequestState::Initialized,
        RequestState::Resumed,
        RequestState::Suspended,
        RequestState::Cancelled,
        RequestState::Finished,
    ];

    #[test]
    fn test_finished_is_absorbing() {
        for next in ALL {
            assert!(!RequestState::Finished.can_transition_to(next), "{next}");
        }
        assert!(RequestState::Finished.is_terminal());
    }

    #[test]
    fn test_cancelled_only_finishes() {
        for next in ALL {
            let allowed = RequestState::Cancelled.can_transition_to(next);
            assert_eq!(allowed, next == RequestState::Finished, "{next}");
        }
        assert!(!RequestState::Cancelled.is_terminal());
    }

    #[test]
    fn test_nothing_returns_to_initialized() {
        for from in ALL {
            assert!(!from.can_transition_to(RequestState::Initialized), "{from}");
        }
    }

    #[test]
    fn test_resume_suspend_toggle() {
        assert!(RequestState::Resumed.can_transition_to(RequestState::Suspended));
        assert!(RequestState::Suspended.can_transition_to(RequestState::Resumed));
        assert!(!RequestState::Resumed.can_transition_to(RequestState::Resumed));
        assert!(!RequestState::Suspended.can_transition_to(RequestState::Suspended));
    }

    #[test]
    fn test_every_live_state_can_cancel_and_finish() {
        for from in [
            RequestState::Initialized,
            RequestState::Resumed,
            RequestState::Suspended,
        ] {
            assert!(from.can_transition_to(RequestState::Cancelled), "{from}");
            assert!(from.can_transition_to(RequestState::Finished), "{from}");
        }
    }

    #[test]
    fn test_task_action_table() {
        use RequestState::{Cancelled, Finished, Initialized, Resumed, Suspended};

        assert_eq!(
            TaskAction::for_new_task(true, Initialized),
            TaskAction::ResumeRequest
        );
        assert_eq!(TaskAction::for_new_task(false, Initialized), TaskAction::None);
        for auto_start in [true, false] {
            assert_eq!(
                TaskAction::for_new_task(auto_start, Resumed),
                TaskAction::ResumeTask
            );
            assert_eq!(
                TaskAction::for_new_task(auto_start, Suspended),
                TaskAction::SuspendTask
            );
            assert_eq!(
                TaskAction::for_new_task(auto_start, Cancelled),
                TaskAction::CancelTask
            );
            assert_eq!(TaskAction::for_new_task(auto_start, Finished), TaskAction::None);
        }
    }
}
