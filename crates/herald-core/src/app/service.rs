//! TaskService - record service と管理者が呼ぶ操作
//!
//! 作成・キュー投入・リマインド・再投入・確認・キャンセル・メモ追記。
//! 状態変更はすべて task 単位のロックの下で store の compare-and-swap を通ります。
//! message の編集と管理者通知はロックを解放してから行います。
//! 逆方向の遷移（remind / requeue）はこのサービスだけが `AdminAuthority` を持ちます。

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::app::formatter::render_status_notice;
use crate::app::locks::TaskLocks;
use crate::app::notifier::Notifier;
use crate::app::registry::ExecutorRegistry;
use crate::app::status::StatusCounts;
use crate::domain::{
    AdminAuthority, DomainEvent, Executor, ExecutorId, HeraldError, InvalidTransition, NewTask,
    MessageRef, RenderedMessage, Rewind, Task, TaskId, TaskPatch, TaskStatus, Transition,
    ValidationError,
};
use crate::ports::{
    Clock, DispatchQueue, IdGenerator, MessagingGateway, QueueEntry, TaskStore, bounded,
};

pub struct TaskService {
    store: Arc<dyn TaskStore>,
    queue: Arc<dyn DispatchQueue>,
    registry: Arc<ExecutorRegistry>,
    gateway: Arc<dyn MessagingGateway>,
    notifier: Arc<Notifier>,
    locks: Arc<TaskLocks>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    gateway_timeout: Duration,
}

impl TaskService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn TaskStore>,
        queue: Arc<dyn DispatchQueue>,
        registry: Arc<ExecutorRegistry>,
        gateway: Arc<dyn MessagingGateway>,
        notifier: Arc<Notifier>,
        locks: Arc<TaskLocks>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        gateway_timeout: Duration,
    ) -> Self {
        Self {
            store,
            queue,
            registry,
            gateway,
            notifier,
            locks,
            clock,
            ids,
            gateway_timeout,
        }
    }

    /// Store a new task in `Draft`.
    ///
    /// The association is validated here; an executor, if given, must be
    /// approved already.
    pub async fn create_draft(&self, input: NewTask) -> Result<Task, HeraldError> {
        let association = input.association()?;
        if let Some(executor_id) = input.executor_id {
            self.registry.approved(executor_id)?;
        }
        let task = Task::new_draft(
            self.ids.generate_task_id(),
            input,
            association,
            self.clock.now(),
        );
        let task = self.store.create_task(task).await?;
        info!(task_id = %task.id, status = %task.status, "task created");
        Ok(task)
    }

    /// `Draft -> Queued`, then hand the task to the dispatcher.
    pub async fn queue_task(&self, task_id: TaskId) -> Result<Task, HeraldError> {
        let guard = self.locks.acquire(task_id).await;
        let task = self.load(task_id).await?;
        let executor = self.assigned_executor(&task)?;
        let to = forward(&task, Transition::Enqueue)?;

        let now = self.clock.now();
        let task = self
            .store
            .update_task_status(task_id, task.status, to, TaskPatch::new().queued_at(now))
            .await
            .map_err(|e| HeraldError::from_store(e, to))?;
        self.queue.push(QueueEntry::fresh(task_id, now)).await?;
        drop(guard);

        self.notifier
            .emit(DomainEvent::TaskQueued {
                task_id,
                executor_id: executor.id,
            })
            .await;
        Ok(task)
    }

    /// Create and queue in one step. The executor is required.
    pub async fn create_task(&self, input: NewTask) -> Result<Task, HeraldError> {
        if input.executor_id.is_none() {
            input.association()?;
            return Err(ValidationError::Unassigned.into());
        }
        let task = self.create_draft(input).await?;
        self.queue_task(task.id).await
    }

    /// Re-notify a stalled task: a new message is sent, the old one is superseded.
    ///
    /// The dispatch attempt counter starts over.
    pub async fn remind(&self, task_id: TaskId) -> Result<Task, HeraldError> {
        let guard = self.locks.acquire(task_id).await;
        let task = self.load(task_id).await?;
        self.assigned_executor(&task)?;
        let to = backward(&task, Rewind::Remind)?;

        let now = self.clock.now();
        let patch = TaskPatch::new()
            .supersede_message_ref()
            .bump_reminder()
            .reset_attempts()
            .queued_at(now);
        let updated = self
            .store
            .update_task_status(task_id, task.status, to, patch)
            .await
            .map_err(|e| HeraldError::from_store(e, to))?;
        self.queue.push(QueueEntry::fresh(task_id, now)).await?;
        drop(guard);

        if let Some(previous) = task.external_message_ref {
            let notice = render_status_notice(&task, "🔔 Superseded by a reminder");
            self.retire_message(task_id, previous, &notice).await;
        }

        self.notifier
            .emit(DomainEvent::TaskReminded {
                task_id,
                reminder_count: updated.reminder_count,
            })
            .await;
        Ok(updated)
    }

    /// `Failed -> Queued` for another dispatch cycle.
    pub async fn requeue_failed(&self, task_id: TaskId) -> Result<Task, HeraldError> {
        let guard = self.locks.acquire(task_id).await;
        let task = self.load(task_id).await?;
        self.assigned_executor(&task)?;
        let to = backward(&task, Rewind::Requeue)?;

        let now = self.clock.now();
        let mut patch = TaskPatch::new().reset_attempts().queued_at(now);
        if task.attempts_made() > 0 || task.last_notified_at.is_some() {
            patch = patch.bump_reminder();
        }
        let updated = self
            .store
            .update_task_status(task_id, task.status, to, patch)
            .await
            .map_err(|e| HeraldError::from_store(e, to))?;
        self.queue.push(QueueEntry::fresh(task_id, now)).await?;
        drop(guard);

        self.notifier
            .emit(DomainEvent::TaskRequeued { task_id })
            .await;
        Ok(updated)
    }

    /// Administrator accepts the executor's completion.
    pub async fn confirm(&self, task_id: TaskId) -> Result<Task, HeraldError> {
        let guard = self.locks.acquire(task_id).await;
        let task = self.load(task_id).await?;
        let to = forward(&task, Transition::Confirm)?;

        let patch = TaskPatch::new().completed_at(self.clock.now());
        let updated = self
            .store
            .update_task_status(task_id, task.status, to, patch)
            .await
            .map_err(|e| HeraldError::from_store(e, to))?;
        drop(guard);

        self.notifier
            .emit(DomainEvent::TaskConfirmed { task_id })
            .await;
        Ok(updated)
    }

    /// Administrative cancellation. A scheduled retry sees it at its recheck and drops.
    pub async fn cancel(&self, task_id: TaskId) -> Result<Task, HeraldError> {
        let guard = self.locks.acquire(task_id).await;
        let task = self.load(task_id).await?;
        let to = forward(&task, Transition::Cancel)?;

        let updated = self
            .store
            .update_task_status(task_id, task.status, to, TaskPatch::new())
            .await
            .map_err(|e| HeraldError::from_store(e, to))?;
        drop(guard);

        if let Some(message_ref) = updated.external_message_ref {
            let notice = render_status_notice(&updated, "✖ Cancelled");
            self.retire_message(task_id, message_ref, &notice).await;
        }

        self.notifier
            .emit(DomainEvent::TaskCancelled { task_id })
            .await;
        Ok(updated)
    }

    /// Append a timestamped note from the executor and tell the administrator.
    ///
    /// Status is unchanged; terminal tasks take no more notes.
    pub async fn append_note(
        &self,
        task_id: TaskId,
        executor_id: ExecutorId,
        text: &str,
    ) -> Result<Task, HeraldError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ValidationError::EmptyNote.into());
        }

        let guard = self.locks.acquire(task_id).await;
        let task = self.load(task_id).await?;
        if task.status.is_terminal() {
            return Err(ValidationError::TaskClosed {
                task_id,
                status: task.status,
            }
            .into());
        }

        let stamped = format!("[{}] {text}", self.clock.now().format("%Y-%m-%d %H:%M"));
        let updated = self
            .store
            .update_task_status(
                task_id,
                task.status,
                task.status,
                TaskPatch::new().append_note(stamped),
            )
            .await
            .map_err(|e| HeraldError::from_store(e, task.status))?;
        drop(guard);

        self.notifier
            .emit(DomainEvent::NoteAppended {
                task_id,
                executor_id,
                text: text.to_string(),
            })
            .await;
        Ok(updated)
    }

    /// Push every `Queued` task back into the dispatch queue, oldest first.
    pub async fn rebuild_queue(&self) -> Result<usize, HeraldError> {
        let queued = self.store.list_tasks_by_status(&[TaskStatus::Queued]).await?;
        for task in &queued {
            let enqueued_at = task.queued_at.unwrap_or(task.created_at);
            self.queue.push(QueueEntry::fresh(task.id, enqueued_at)).await?;
        }
        info!(count = queued.len(), "dispatch queue rebuilt");
        Ok(queued.len())
    }

    pub async fn counts(&self) -> Result<StatusCounts, HeraldError> {
        let tasks = self.store.list_tasks_by_status(&TaskStatus::ALL).await?;
        Ok(tasks.iter().map(|task| task.status).collect())
    }

    pub async fn get(&self, task_id: TaskId) -> Result<Task, HeraldError> {
        self.load(task_id).await
    }

    /// Replace an outstanding message's content; failures are only logged.
    async fn retire_message(
        &self,
        task_id: TaskId,
        message_ref: MessageRef,
        notice: &RenderedMessage,
    ) {
        let edited = bounded(
            self.gateway_timeout,
            self.gateway.edit_message(message_ref, notice),
        )
        .await;
        if let Err(e) = edited {
            warn!(%task_id, %message_ref, error = %e, "could not update task message");
        }
    }

    async fn load(&self, task_id: TaskId) -> Result<Task, HeraldError> {
        self.store
            .get_task(task_id)
            .await?
            .ok_or(HeraldError::TaskNotFound(task_id))
    }

    fn assigned_executor(&self, task: &Task) -> Result<Executor, HeraldError> {
        let executor_id = task
            .executor_id
            .ok_or(ValidationError::MissingExecutor(task.id))?;
        Ok(self.registry.approved(executor_id)?)
    }
}

fn forward(task: &Task, transition: Transition) -> Result<TaskStatus, HeraldError> {
    task.status
        .apply(transition)
        .map_err(|source| invalid(task.id, source))
}

fn backward(task: &Task, rewind: Rewind) -> Result<TaskStatus, HeraldError> {
    task.status
        .rewind(rewind, &AdminAuthority::grant())
        .map_err(|source| invalid(task.id, source))
}

fn invalid(task_id: TaskId, source: InvalidTransition) -> HeraldError {
    warn!(%task_id, from = %source.from, to = %source.to, "transition rejected");
    HeraldError::InvalidTransition { task_id, source }
}
