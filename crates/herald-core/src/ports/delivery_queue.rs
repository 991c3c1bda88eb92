//! DispatchQueue port - 送信待ち task の配送キュー
//!
//! キューは task_id と attempt 数のみを流します（状態は TaskStore にある）。
//! 耐久性は不要で、`Queued` の task から再構築できます。

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{QueueError, TaskId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueEntry {
    pub task_id: TaskId,
    pub enqueued_at: DateTime<Utc>,
    /// Send attempts already made in this dispatch cycle.
    pub attempt: u32,
}

impl QueueEntry {
    pub fn fresh(task_id: TaskId, enqueued_at: DateTime<Utc>) -> Self {
        Self {
            task_id,
            enqueued_at,
            attempt: 0,
        }
    }

    /// Entry for the follow-up attempt after a failed one.
    pub fn retry(self) -> Self {
        Self {
            attempt: self.attempt + 1,
            ..self
        }
    }
}

/// DispatchQueue は FIFO。順序は公平性のためだけで、正しさには影響しない。
#[async_trait]
pub trait DispatchQueue: Send + Sync {
    async fn push(&self, entry: QueueEntry) -> Result<(), QueueError>;

    /// Make `entry` available after `delay` (retry backoff).
    async fn push_after(&self, entry: QueueEntry, delay: Duration) -> Result<(), QueueError>;

    /// Wait up to `timeout` for the next ready entry.
    async fn pop(&self, timeout: Duration) -> Result<Option<QueueEntry>, QueueError>;

    /// Ready plus scheduled entries.
    async fn len(&self) -> usize;

    async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
