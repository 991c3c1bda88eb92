//! CallbackHandler - executor からの操作を状態遷移に変換
//!
//! # 判定順
//! 1. executor が承認済みか（未承認・未知なら `Unauthorized`）
//! 2. task の担当者本人か
//! 3. `(task, action, token)` が初見か（重複なら `Duplicate` で ack）
//! 4. action を遷移に写像して適用（不正な遷移は変更なしで ack）
//!
//! gateway へは常に ack を返し、再配送を止めます。

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::app::dedup::{BoundedSet, RecentTokens};
use crate::app::formatter::render_status_notice;
use crate::app::locks::TaskLocks;
use crate::app::notifier::Notifier;
use crate::app::registry::ExecutorRegistry;
use crate::app::service::TaskService;
use crate::domain::{
    Action, CallbackEvent, DomainEvent, ExecutorId, HeraldError, StoreError, Task, TaskId,
    TaskPatch, TaskStatus, ValidationError,
};
use crate::ports::{MessagingGateway, TaskStore, bounded};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    Ack(AckKind),
    Reject(RejectReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckKind {
    Applied { from: TaskStatus, to: TaskStatus },
    /// Same token seen before; nothing applied.
    Duplicate,
    /// The transition does not apply from the current status (e.g. a second "complete").
    NoOp { status: TaskStatus },
    QuestionForwarded,
    /// "Ask a question" pressed without text; the next reply is the question.
    QuestionPrompt,
    NoteAppended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    Unauthorized,
    UnknownTask,
    TaskClosed,
}

impl CallbackOutcome {
    pub fn is_ack(&self) -> bool {
        matches!(self, CallbackOutcome::Ack(_))
    }

    /// Short text shown to the executor, if any.
    pub fn reply_text(&self) -> Option<&'static str> {
        match self {
            CallbackOutcome::Ack(AckKind::Applied { to, .. }) => match to {
                TaskStatus::InProgress => Some("➕ Calculation started"),
                TaskStatus::AwaitingConfirmation => Some("✅ Marked complete, awaiting confirmation"),
                _ => None,
            },
            CallbackOutcome::Ack(AckKind::QuestionPrompt) => {
                Some("💬 Reply to the task message with your question")
            }
            CallbackOutcome::Ack(AckKind::QuestionForwarded) => Some("💬 Question sent"),
            CallbackOutcome::Ack(AckKind::NoteAppended) => Some("📝 Note added"),
            CallbackOutcome::Ack(AckKind::Duplicate | AckKind::NoOp { .. }) => None,
            CallbackOutcome::Reject(RejectReason::Unauthorized) => Some("⛔ Not allowed"),
            CallbackOutcome::Reject(RejectReason::UnknownTask) => Some("Task not found"),
            CallbackOutcome::Reject(RejectReason::TaskClosed) => Some("Task is already closed"),
        }
    }
}

pub struct CallbackHandler {
    store: Arc<dyn TaskStore>,
    registry: Arc<ExecutorRegistry>,
    gateway: Arc<dyn MessagingGateway>,
    notifier: Arc<Notifier>,
    locks: Arc<TaskLocks>,
    service: Arc<TaskService>,
    tokens: RecentTokens,
    /// "Ask a question" presses still waiting for their text.
    pending_questions: BoundedSet<(ExecutorId, TaskId)>,
    gateway_timeout: Duration,
}

impl CallbackHandler {
    pub fn new(
        store: Arc<dyn TaskStore>,
        registry: Arc<ExecutorRegistry>,
        gateway: Arc<dyn MessagingGateway>,
        notifier: Arc<Notifier>,
        locks: Arc<TaskLocks>,
        service: Arc<TaskService>,
        tokens: RecentTokens,
        gateway_timeout: Duration,
    ) -> Self {
        let pending_questions = BoundedSet::new(tokens.capacity());
        Self {
            store,
            registry,
            gateway,
            notifier,
            locks,
            service,
            tokens,
            pending_questions,
            gateway_timeout,
        }
    }

    /// Apply a button press.
    ///
    /// Errors are infrastructure failures only; the token is forgotten so a
    /// redelivery is processed again.
    pub async fn handle(&self, event: &CallbackEvent) -> Result<CallbackOutcome, HeraldError> {
        let CallbackEvent {
            task_id,
            executor_id,
            action,
            ref token,
            ref text,
        } = *event;

        if !self.registry.is_approved(executor_id) {
            warn!(%task_id, %executor_id, %action, "callback from unapproved executor rejected");
            return Ok(CallbackOutcome::Reject(RejectReason::Unauthorized));
        }

        let guard = self.locks.acquire(task_id).await;
        let task = match self.authorized_task(task_id, executor_id).await? {
            Ok(task) => task,
            Err(reason) => return Ok(CallbackOutcome::Reject(reason)),
        };

        if !self.tokens.first_seen(task_id, action, token) {
            debug!(%task_id, %action, token = %token, "duplicate callback acknowledged");
            return Ok(CallbackOutcome::Ack(AckKind::Duplicate));
        }

        let Some(transition) = action.transition() else {
            drop(guard);
            return Ok(self.ask_question(&task, executor_id, text.as_deref()).await);
        };

        let to = match task.status.apply(transition) {
            Ok(to) => to,
            Err(invalid) => {
                debug!(%task_id, %action, from = %invalid.from, to = %invalid.to, "repeated or stale action ignored");
                return Ok(CallbackOutcome::Ack(AckKind::NoOp {
                    status: task.status,
                }));
            }
        };

        let updated = match self
            .store
            .update_task_status(task_id, task.status, to, TaskPatch::new())
            .await
        {
            Ok(updated) => updated,
            Err(StoreError::StatusMismatch { actual, .. }) => {
                return Ok(CallbackOutcome::Ack(AckKind::NoOp { status: actual }));
            }
            Err(e) => {
                self.tokens.forget(task_id, action, token);
                return Err(HeraldError::from_store(e, to));
            }
        };
        info!(%task_id, %executor_id, %action, from = %task.status, to = %to, "callback applied");
        drop(guard);

        if action == Action::Complete
            && let Some(message_ref) = updated.external_message_ref
        {
            let notice = render_status_notice(&updated, "✅ Completed, awaiting confirmation");
            let edited = bounded(
                self.gateway_timeout,
                self.gateway.edit_message(message_ref, &notice),
            )
            .await;
            if let Err(e) = edited {
                warn!(%task_id, %message_ref, error = %e, "could not update task message");
            }
        }

        let event = if to == TaskStatus::InProgress {
            DomainEvent::CalculationStarted {
                task_id,
                executor_id,
            }
        } else {
            DomainEvent::CompletedByExecutor {
                task_id,
                executor_id,
            }
        };
        self.notifier.emit(event).await;

        Ok(CallbackOutcome::Ack(AckKind::Applied {
            from: task.status,
            to,
        }))
    }

    /// Free text replied to a task message: the pending question, or a note.
    pub async fn handle_reply(
        &self,
        executor_id: ExecutorId,
        task_id: TaskId,
        text: &str,
    ) -> Result<CallbackOutcome, HeraldError> {
        if !self.registry.is_approved(executor_id) {
            warn!(%task_id, %executor_id, "reply from unapproved executor rejected");
            return Ok(CallbackOutcome::Reject(RejectReason::Unauthorized));
        }
        let task = match self.authorized_task(task_id, executor_id).await? {
            Ok(task) => task,
            Err(reason) => return Ok(CallbackOutcome::Reject(reason)),
        };

        let asked = self.pending_questions.remove(&(executor_id, task_id));
        if asked && !task.status.is_terminal() {
            return Ok(self.ask_question(&task, executor_id, Some(text)).await);
        }
        self.submit_note(executor_id, task_id, text).await
    }

    /// Append an executor note to the task and forward it to the administrator.
    pub async fn submit_note(
        &self,
        executor_id: ExecutorId,
        task_id: TaskId,
        text: &str,
    ) -> Result<CallbackOutcome, HeraldError> {
        if !self.registry.is_approved(executor_id) {
            return Ok(CallbackOutcome::Reject(RejectReason::Unauthorized));
        }
        if let Err(reason) = self.authorized_task(task_id, executor_id).await? {
            return Ok(CallbackOutcome::Reject(reason));
        }

        match self.service.append_note(task_id, executor_id, text).await {
            Ok(_) => Ok(CallbackOutcome::Ack(AckKind::NoteAppended)),
            Err(HeraldError::Validation(ValidationError::TaskClosed { .. })) => {
                Ok(CallbackOutcome::Reject(RejectReason::TaskClosed))
            }
            Err(HeraldError::Validation(ValidationError::EmptyNote)) => {
                Ok(CallbackOutcome::Ack(AckKind::NoOp {
                    status: self.service.get(task_id).await?.status,
                }))
            }
            Err(e) => Err(e),
        }
    }

    /// Open tasks of an approved executor (`Queued`, `Sent`, `InProgress`), oldest first.
    pub async fn open_tasks(&self, executor_id: ExecutorId) -> Result<Vec<Task>, HeraldError> {
        self.registry.approved(executor_id)?;
        Ok(self
            .store
            .list_tasks_by_executor(executor_id, &TaskStatus::OPEN_FOR_EXECUTOR)
            .await?)
    }

    /// Questions prompted for but not yet answered.
    pub fn pending_question_count(&self) -> usize {
        self.pending_questions.len()
    }

    async fn ask_question(
        &self,
        task: &Task,
        executor_id: ExecutorId,
        text: Option<&str>,
    ) -> CallbackOutcome {
        match text.map(str::trim).filter(|t| !t.is_empty()) {
            Some(text) => {
                self.notifier
                    .emit(DomainEvent::QuestionAsked {
                        task_id: task.id,
                        executor_id,
                        text: text.to_string(),
                    })
                    .await;
                CallbackOutcome::Ack(AckKind::QuestionForwarded)
            }
            None => {
                self.pending_questions.insert((executor_id, task.id));
                CallbackOutcome::Ack(AckKind::QuestionPrompt)
            }
        }
    }

    /// The task, if it exists and is assigned to `executor_id`.
    async fn authorized_task(
        &self,
        task_id: TaskId,
        executor_id: ExecutorId,
    ) -> Result<Result<Task, RejectReason>, HeraldError> {
        let Some(task) = self.store.get_task(task_id).await? else {
            warn!(%task_id, %executor_id, "interaction for unknown task");
            return Ok(Err(RejectReason::UnknownTask));
        };
        if task.executor_id != Some(executor_id) {
            warn!(%task_id, %executor_id, "interaction from executor not assigned to task");
            return Ok(Err(RejectReason::Unauthorized));
        }
        Ok(Ok(task))
    }
}
