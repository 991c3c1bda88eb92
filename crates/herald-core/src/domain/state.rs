//! Task lifecycle state machine.
//!
//! Forward edges (`Transition`) are reachable by the dispatcher, executor
//! callbacks and administrative confirm/cancel. Backward edges (`Rewind`) move
//! a task back into the queue and require an `AdminAuthority`, which only the
//! administrative service can mint.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::errors::InvalidTransition;

/// Task status.
///
/// State transitions:
/// - Draft -> Queued -> Sent -> (InProgress) -> AwaitingConfirmation -> Done
/// - Queued -> Failed -> Queued (operator requeue)
/// - Sent | InProgress | AwaitingConfirmation -> Queued (operator reminder)
/// - any non-terminal -> Cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Draft,
    Queued,
    Sent,
    InProgress,
    AwaitingConfirmation,
    Done,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 8] = [
        TaskStatus::Draft,
        TaskStatus::Queued,
        TaskStatus::Sent,
        TaskStatus::InProgress,
        TaskStatus::AwaitingConfirmation,
        TaskStatus::Done,
        TaskStatus::Failed,
        TaskStatus::Cancelled,
    ];

    /// Statuses an executor sees in their open-task listing.
    pub const OPEN_FOR_EXECUTOR: [TaskStatus; 3] =
        [TaskStatus::Queued, TaskStatus::Sent, TaskStatus::InProgress];

    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Cancelled)
    }

    /// Apply a forward edge.
    pub fn apply(self, transition: Transition) -> Result<TaskStatus, InvalidTransition> {
        if transition.sources().contains(&self) {
            Ok(transition.target())
        } else {
            Err(InvalidTransition {
                from: self,
                to: transition.target(),
            })
        }
    }

    /// Apply a backward edge. Only reachable with administrator authority.
    pub fn rewind(
        self,
        rewind: Rewind,
        _authority: &AdminAuthority,
    ) -> Result<TaskStatus, InvalidTransition> {
        if rewind.sources().contains(&self) {
            Ok(TaskStatus::Queued)
        } else {
            Err(InvalidTransition {
                from: self,
                to: TaskStatus::Queued,
            })
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Draft => "draft",
            Self::Queued => "queued",
            Self::Sent => "sent",
            Self::InProgress => "in_progress",
            Self::AwaitingConfirmation => "awaiting_confirmation",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskStatus::ALL
            .into_iter()
            .find(|status| status.to_string() == s)
            .ok_or_else(|| format!("Invalid task status: {s}"))
    }
}

/// Forward edges of the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transition {
    /// Draft with a valid executor enters the dispatch queue.
    Enqueue,
    /// Dispatcher delivered the message.
    Delivered,
    /// Dispatcher gave up (retries exhausted or permanent failure).
    DispatchExhausted,
    /// Executor pressed "add calculation".
    StartCalculation,
    /// Executor pressed "complete".
    Complete,
    /// Administrator confirmed the executor's completion.
    Confirm,
    /// Administrative cancellation.
    Cancel,
}

impl Transition {
    pub fn target(self) -> TaskStatus {
        match self {
            Transition::Enqueue => TaskStatus::Queued,
            Transition::Delivered => TaskStatus::Sent,
            Transition::DispatchExhausted => TaskStatus::Failed,
            Transition::StartCalculation => TaskStatus::InProgress,
            Transition::Complete => TaskStatus::AwaitingConfirmation,
            Transition::Confirm => TaskStatus::Done,
            Transition::Cancel => TaskStatus::Cancelled,
        }
    }

    fn sources(self) -> &'static [TaskStatus] {
        use TaskStatus::*;
        match self {
            Transition::Enqueue => &[Draft],
            Transition::Delivered | Transition::DispatchExhausted => &[Queued],
            Transition::StartCalculation => &[Sent],
            Transition::Complete => &[Sent, InProgress],
            Transition::Confirm => &[AwaitingConfirmation],
            Transition::Cancel => &[Draft, Queued, Sent, InProgress, AwaitingConfirmation, Failed],
        }
    }
}

/// Backward edges: both land in `Queued`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rewind {
    /// Re-notify an executor whose task stalled.
    Remind,
    /// Retry a task whose dispatch failed.
    Requeue,
}

impl Rewind {
    fn sources(self) -> &'static [TaskStatus] {
        use TaskStatus::*;
        match self {
            Rewind::Remind => &[Sent, InProgress, AwaitingConfirmation],
            Rewind::Requeue => &[Failed],
        }
    }
}

/// Proof that the caller is the administrative surface.
#[derive(Debug)]
pub struct AdminAuthority {
    _private: (),
}

impl AdminAuthority {
    pub(crate) fn grant() -> Self {
        Self { _private: () }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use TaskStatus::*;

    const FORWARD: [Transition; 7] = [
        Transition::Enqueue,
        Transition::Delivered,
        Transition::DispatchExhausted,
        Transition::StartCalculation,
        Transition::Complete,
        Transition::Confirm,
        Transition::Cancel,
    ];

    fn allowed_forward() -> Vec<(TaskStatus, Transition)> {
        vec![
            (Draft, Transition::Enqueue),
            (Queued, Transition::Delivered),
            (Queued, Transition::DispatchExhausted),
            (Sent, Transition::StartCalculation),
            (Sent, Transition::Complete),
            (InProgress, Transition::Complete),
            (AwaitingConfirmation, Transition::Confirm),
            (Draft, Transition::Cancel),
            (Queued, Transition::Cancel),
            (Sent, Transition::Cancel),
            (InProgress, Transition::Cancel),
            (AwaitingConfirmation, Transition::Cancel),
            (Failed, Transition::Cancel),
        ]
    }

    #[rstest]
    #[case::enqueue(Draft, Transition::Enqueue, Queued)]
    #[case::delivered(Queued, Transition::Delivered, Sent)]
    #[case::exhausted(Queued, Transition::DispatchExhausted, Failed)]
    #[case::calculation(Sent, Transition::StartCalculation, InProgress)]
    #[case::complete_from_sent(Sent, Transition::Complete, AwaitingConfirmation)]
    #[case::complete_from_progress(InProgress, Transition::Complete, AwaitingConfirmation)]
    #[case::confirm(AwaitingConfirmation, Transition::Confirm, Done)]
    #[case::cancel_failed(Failed, Transition::Cancel, Cancelled)]
    fn forward_edges_reach_their_target(
        #[case] from: TaskStatus,
        #[case] transition: Transition,
        #[case] expected: TaskStatus,
    ) {
        assert_eq!(from.apply(transition), Ok(expected));
    }

    #[test]
    fn every_off_graph_forward_edge_is_rejected() {
        let allowed = allowed_forward();
        for from in TaskStatus::ALL {
            for transition in FORWARD {
                let result = from.apply(transition);
                if allowed.contains(&(from, transition)) {
                    assert!(result.is_ok(), "{from} -> {transition:?} should be allowed");
                } else {
                    let err = result.unwrap_err();
                    assert_eq!(err.from, from);
                    assert_eq!(err.to, transition.target());
                }
            }
        }
    }

    #[test]
    fn terminal_states_accept_nothing() {
        let authority = AdminAuthority::grant();
        for from in [Done, Cancelled] {
            assert!(from.is_terminal());
            assert!(FORWARD.iter().all(|t| from.apply(*t).is_err()));
            assert!(from.rewind(Rewind::Remind, &authority).is_err());
            assert!(from.rewind(Rewind::Requeue, &authority).is_err());
        }
    }

    #[rstest]
    #[case::sent(Sent)]
    #[case::in_progress(InProgress)]
    #[case::awaiting(AwaitingConfirmation)]
    fn remind_returns_to_queue(#[case] from: TaskStatus) {
        let authority = AdminAuthority::grant();
        assert_eq!(from.rewind(Rewind::Remind, &authority), Ok(Queued));
        assert!(from.rewind(Rewind::Requeue, &authority).is_err());
    }

    #[rstest]
    #[case::draft(Draft)]
    #[case::queued(Queued)]
    #[case::failed(Failed)]
    fn remind_rejected_before_delivery(#[case] from: TaskStatus) {
        let authority = AdminAuthority::grant();
        assert!(from.rewind(Rewind::Remind, &authority).is_err());
    }

    #[test]
    fn requeue_only_from_failed() {
        let authority = AdminAuthority::grant();
        for from in TaskStatus::ALL {
            let result = from.rewind(Rewind::Requeue, &authority);
            assert_eq!(result.is_ok(), from == Failed, "{from}");
        }
    }

    #[test]
    fn status_names_roundtrip() {
        for status in TaskStatus::ALL {
            assert_eq!(status.to_string().parse::<TaskStatus>(), Ok(status));
        }
        assert!("finished".parse::<TaskStatus>().is_err());
    }
}
