//! Events - ドメインイベント
//!
//! 状態遷移ごとに発生し、`Notifier` が trace と管理者通知に使います。

use std::fmt;

use super::ids::{ExecutorId, TaskId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainEvent {
    TaskQueued {
        task_id: TaskId,
        executor_id: ExecutorId,
    },
    TaskSent {
        task_id: TaskId,
        executor_id: ExecutorId,
    },
    DispatchFailed {
        task_id: TaskId,
        reason: String,
    },
    CalculationStarted {
        task_id: TaskId,
        executor_id: ExecutorId,
    },
    CompletedByExecutor {
        task_id: TaskId,
        executor_id: ExecutorId,
    },
    TaskConfirmed {
        task_id: TaskId,
    },
    TaskReminded {
        task_id: TaskId,
        reminder_count: u32,
    },
    TaskRequeued {
        task_id: TaskId,
    },
    TaskCancelled {
        task_id: TaskId,
    },
    QuestionAsked {
        task_id: TaskId,
        executor_id: ExecutorId,
        text: String,
    },
    NoteAppended {
        task_id: TaskId,
        executor_id: ExecutorId,
        text: String,
    },
}

impl DomainEvent {
    pub fn task_id(&self) -> TaskId {
        match self {
            DomainEvent::TaskQueued { task_id, .. }
            | DomainEvent::TaskSent { task_id, .. }
            | DomainEvent::DispatchFailed { task_id, .. }
            | DomainEvent::CalculationStarted { task_id, .. }
            | DomainEvent::CompletedByExecutor { task_id, .. }
            | DomainEvent::TaskConfirmed { task_id }
            | DomainEvent::TaskReminded { task_id, .. }
            | DomainEvent::TaskRequeued { task_id }
            | DomainEvent::TaskCancelled { task_id }
            | DomainEvent::QuestionAsked { task_id, .. }
            | DomainEvent::NoteAppended { task_id, .. } => *task_id,
        }
    }

    /// Events the administrator is told about.
    pub fn notifies_admin(&self) -> bool {
        matches!(
            self,
            DomainEvent::TaskQueued { .. }
                | DomainEvent::DispatchFailed { .. }
                | DomainEvent::CompletedByExecutor { .. }
                | DomainEvent::QuestionAsked { .. }
                | DomainEvent::NoteAppended { .. }
        )
    }
}

impl fmt::Display for DomainEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DomainEvent::TaskQueued {
                task_id,
                executor_id,
            } => write!(f, "📤 Task {task_id} queued for {executor_id}"),
            DomainEvent::TaskSent {
                task_id,
                executor_id,
            } => write!(f, "📬 Task {task_id} sent to {executor_id}"),
            DomainEvent::DispatchFailed { task_id, reason } => {
                write!(f, "❗ Task {task_id} could not be delivered: {reason}")
            }
            DomainEvent::CalculationStarted {
                task_id,
                executor_id,
            } => write!(f, "➕ {executor_id} is adding a calculation to task {task_id}"),
            DomainEvent::CompletedByExecutor {
                task_id,
                executor_id,
            } => write!(
                f,
                "✅ {executor_id} completed task {task_id}; waiting for your confirmation"
            ),
            DomainEvent::TaskConfirmed { task_id } => write!(f, "🏁 Task {task_id} confirmed"),
            DomainEvent::TaskReminded {
                task_id,
                reminder_count,
            } => write!(f, "🔔 Reminder #{reminder_count} queued for task {task_id}"),
            DomainEvent::TaskRequeued { task_id } => {
                write!(f, "↩ Task {task_id} returned to the queue")
            }
            DomainEvent::TaskCancelled { task_id } => write!(f, "✖ Task {task_id} cancelled"),
            DomainEvent::QuestionAsked {
                task_id,
                executor_id,
                text,
            } => write!(f, "❓ Question from {executor_id} on task {task_id}: {text}"),
            DomainEvent::NoteAppended {
                task_id,
                executor_id,
                text,
            } => write!(f, "📝 Update from {executor_id} on task {task_id}: {text}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[test]
    fn question_text_reaches_the_notice() {
        let task_id = TaskId::from_ulid(Ulid::new());
        let event = DomainEvent::QuestionAsked {
            task_id,
            executor_id: ExecutorId::new(42),
            text: "which tariff?".into(),
        };
        assert!(event.notifies_admin());
        let text = event.to_string();
        assert!(text.contains(&task_id.to_string()));
        assert!(text.contains("which tariff?"));
    }

    #[test]
    fn routine_deliveries_stay_quiet() {
        let event = DomainEvent::TaskSent {
            task_id: TaskId::from_ulid(Ulid::new()),
            executor_id: ExecutorId::new(1),
        };
        assert!(!event.notifies_admin());
    }
}
