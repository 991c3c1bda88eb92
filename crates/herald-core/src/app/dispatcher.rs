//! Dispatcher - 配送キューを処理する worker 群
//!
//! # フロー（1 entry あたり）
//! 1. task 単位のロックを取り、store で現在の状態を再確認（`Queued` 以外は古い entry として捨てる）
//! 2. 現在の状態から message を生成
//! 3. gateway に送信（timeout 付き）
//! 4. 成功 → `Queued -> Sent`、message ref を記録
//! 5. 一時的な失敗 → 試行を記録し、backoff 後に再投入
//! 6. 恒久的な失敗 / 上限到達 → `Queued -> Failed`、管理者に通知
//!
//! ロックを持つのは 1 回の試行の間だけです。backoff 待ちの間と管理者通知の間は解放します。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::app::formatter::render_task;
use crate::app::locks::{TaskGuard, TaskLocks};
use crate::app::notifier::Notifier;
use crate::app::registry::ExecutorRegistry;
use crate::domain::{
    AttemptOutcome, Decider, Decision, DispatchAttempt, DomainEvent, Executor, GatewayError,
    HeraldError, MessageRef, QueueError, Task, TaskId, TaskPatch, TaskStatus, Transition,
};
use crate::ports::{Clock, DispatchQueue, MessagingGateway, QueueEntry, TaskStore, bounded};

/// Delay before retrying an entry whose processing hit a store/queue failure.
const INFRA_RETRY_DELAY: Duration = Duration::from_secs(1);

/// What a single dispatch attempt did.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Sent(MessageRef),
    /// Entry no longer matches a `Queued` task (`None`: task is gone).
    Dropped(Option<TaskStatus>),
    RetryScheduled { attempt: u32, delay: Duration },
    Failed { reason: String },
}

pub struct Dispatcher {
    store: Arc<dyn TaskStore>,
    queue: Arc<dyn DispatchQueue>,
    registry: Arc<ExecutorRegistry>,
    gateway: Arc<dyn MessagingGateway>,
    notifier: Arc<Notifier>,
    locks: Arc<TaskLocks>,
    decider: Arc<dyn Decider>,
    clock: Arc<dyn Clock>,
    send_timeout: Duration,
    pop_timeout: Duration,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn TaskStore>,
        queue: Arc<dyn DispatchQueue>,
        registry: Arc<ExecutorRegistry>,
        gateway: Arc<dyn MessagingGateway>,
        notifier: Arc<Notifier>,
        locks: Arc<TaskLocks>,
        decider: Arc<dyn Decider>,
        clock: Arc<dyn Clock>,
        send_timeout: Duration,
        pop_timeout: Duration,
    ) -> Self {
        Self {
            store,
            queue,
            registry,
            gateway,
            notifier,
            locks,
            decider,
            clock,
            send_timeout,
            pop_timeout,
        }
    }

    /// Spawn `workers` worker routines draining the queue.
    pub fn spawn(self: &Arc<Self>, workers: usize) -> DispatcherHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut joins = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let dispatcher = Arc::clone(self);
            let rx = shutdown_rx.clone();
            joins.push(tokio::spawn(async move {
                worker_loop(worker_id, dispatcher, rx).await;
            }));
        }
        info!(workers, "dispatcher started");

        DispatcherHandle { shutdown_tx, joins }
    }

    /// Process one queue entry.
    pub async fn dispatch_once(&self, entry: QueueEntry) -> Result<DispatchOutcome, HeraldError> {
        let task_id = entry.task_id;
        let guard = self.locks.acquire(task_id).await;

        let Some(task) = self.store.get_task(task_id).await? else {
            warn!(%task_id, "queue entry for unknown task dropped");
            return Ok(DispatchOutcome::Dropped(None));
        };
        if task.status != TaskStatus::Queued {
            debug!(%task_id, status = %task.status, "stale queue entry dropped");
            return Ok(DispatchOutcome::Dropped(Some(task.status)));
        }

        let attempt = task.attempts_made() + 1;
        let executor = match self.assigned_executor(&task) {
            Ok(executor) => executor,
            Err(reason) => return self.fail(guard, &task, attempt, reason).await,
        };

        let message = render_task(&task, &executor);
        let sent = bounded(
            self.send_timeout,
            self.gateway.send_message(executor.messaging_identity, &message),
        )
        .await;

        match sent {
            Ok(message_ref) => {
                self.mark_sent(guard, &task, &executor, attempt, message_ref)
                    .await
            }
            Err(error) => match self
                .decider
                .decide(attempt, task.last_retry_delay(), &error)
            {
                Decision::Retry { delay, reason } => {
                    self.record_retry(&task, attempt, &error, delay).await?;
                    drop(guard);
                    info!(
                        %task_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "{reason}"
                    );
                    self.queue.push_after(entry.retry(), delay).await?;
                    Ok(DispatchOutcome::RetryScheduled { attempt, delay })
                }
                Decision::MarkFailed { reason } => self.fail(guard, &task, attempt, reason).await,
            },
        }
    }

    async fn mark_sent(
        &self,
        guard: TaskGuard,
        task: &Task,
        executor: &Executor,
        attempt: u32,
        message_ref: MessageRef,
    ) -> Result<DispatchOutcome, HeraldError> {
        let to = transition(task, Transition::Delivered)?;
        let now = self.clock.now();
        let patch = TaskPatch::new()
            .message_ref(message_ref)
            .notified_at(now)
            .attempt(DispatchAttempt::new(
                attempt,
                now,
                AttemptOutcome::Delivered { message_ref },
            ));
        self.store
            .update_task_status(task.id, task.status, to, patch)
            .await
            .map_err(|e| HeraldError::from_store(e, to))?;
        drop(guard);

        info!(task_id = %task.id, executor_id = %executor.id, attempt, %message_ref, "task sent");
        self.notifier
            .emit(DomainEvent::TaskSent {
                task_id: task.id,
                executor_id: executor.id,
            })
            .await;
        Ok(DispatchOutcome::Sent(message_ref))
    }

    async fn record_retry(
        &self,
        task: &Task,
        attempt: u32,
        error: &GatewayError,
        delay: Duration,
    ) -> Result<(), HeraldError> {
        let now = self.clock.now();
        let patch = TaskPatch::new()
            .last_error(error.to_string())
            .attempt(DispatchAttempt::new(
                attempt,
                now,
                AttemptOutcome::Retrying {
                    error: error.to_string(),
                    delay_ms: delay.as_millis() as u64,
                },
            ));
        self.store
            .update_task_status(task.id, task.status, task.status, patch)
            .await
            .map_err(|e| HeraldError::from_store(e, task.status))?;
        Ok(())
    }

    async fn fail(
        &self,
        guard: TaskGuard,
        task: &Task,
        attempt: u32,
        reason: String,
    ) -> Result<DispatchOutcome, HeraldError> {
        let to = transition(task, Transition::DispatchExhausted)?;
        let patch = TaskPatch::new()
            .last_error(reason.clone())
            .attempt(DispatchAttempt::new(
                attempt,
                self.clock.now(),
                AttemptOutcome::Failed {
                    error: reason.clone(),
                },
            ));
        self.store
            .update_task_status(task.id, task.status, to, patch)
            .await
            .map_err(|e| HeraldError::from_store(e, to))?;
        drop(guard);

        warn!(task_id = %task.id, attempt, %reason, "dispatch failed");
        self.notifier
            .emit(DomainEvent::DispatchFailed {
                task_id: task.id,
                reason: reason.clone(),
            })
            .await;
        Ok(DispatchOutcome::Failed { reason })
    }

    /// Unknown or unapproved executors fail the dispatch without a send.
    fn assigned_executor(&self, task: &Task) -> Result<Executor, String> {
        let executor_id = task
            .executor_id
            .ok_or_else(|| format!("task {} has no executor assigned", task.id))?;
        self.registry
            .approved(executor_id)
            .map_err(|e| format!("permanent failure: {e}"))
    }

    async fn requeue_after_error(&self, entry: QueueEntry) {
        if let Err(e) = self.queue.push_after(entry, INFRA_RETRY_DELAY).await {
            error!(task_id = %entry.task_id, error = %e, "entry lost; rebuild the queue to recover it");
        }
    }
}

fn transition(task: &Task, transition: Transition) -> Result<TaskStatus, HeraldError> {
    task.status
        .apply(transition)
        .map_err(|source| HeraldError::InvalidTransition {
            task_id: task.id,
            source,
        })
}

/// Dispatcher worker group handle.
/// - `request_shutdown` stops workers from taking new entries
/// - in-flight sends are not interrupted
pub struct DispatcherHandle {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl DispatcherHandle {
    pub fn request_shutdown(&self) {
        // receivers may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for join in self.joins {
            let _ = join.await;
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    dispatcher: Arc<Dispatcher>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let popped = tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            popped = dispatcher.queue.pop(dispatcher.pop_timeout) => popped,
        };

        let entry = match popped {
            Ok(Some(entry)) => entry,
            Ok(None) => continue,
            Err(QueueError::Closed) => break,
            Err(e) => {
                warn!(worker_id, error = %e, "queue pop failed");
                tokio::time::sleep(dispatcher.pop_timeout).await;
                continue;
            }
        };

        let task_id: TaskId = entry.task_id;
        if let Err(e) = dispatcher.dispatch_once(entry).await {
            error!(worker_id, %task_id, error = %e, kind = ?e.kind(), "dispatch attempt aborted");
            dispatcher.requeue_after_error(entry).await;
        }
    }
    debug!(worker_id, "dispatcher worker stopped");
}
