//! TaskLocks - task 単位の排他
//!
//! 同じ task の dispatch と callback を直列化します。
//! 異なる task 同士は互いを待ちません（グローバルロックなし）。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::domain::TaskId;

/// Prune idle entries once the map grows past this size.
const PRUNE_THRESHOLD: usize = 1_024;

#[derive(Debug, Default)]
pub struct TaskLocks {
    locks: Mutex<HashMap<TaskId, Arc<AsyncMutex<()>>>>,
}

/// Held while a task is being worked on; dropping it releases the task.
pub type TaskGuard = OwnedMutexGuard<()>;

impl TaskLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, task_id: TaskId) -> TaskGuard {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            if locks.len() >= PRUNE_THRESHOLD {
                // Only the map holds a reference: nobody waits on it.
                locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            }
            Arc::clone(locks.entry(task_id).or_default())
        };
        lock.lock_owned().await
    }

    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use ulid::Ulid;

    #[tokio::test]
    async fn same_task_is_serialized() {
        let locks = Arc::new(TaskLocks::new());
        let task_id = TaskId::from_ulid(Ulid::new());

        let guard = locks.acquire(task_id).await;
        let contender = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move { locks.acquire(task_id).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        let second = tokio::time::timeout(Duration::from_secs(1), contender).await;
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn different_tasks_do_not_block_each_other() {
        let locks = TaskLocks::new();
        let _a = locks.acquire(TaskId::from_ulid(Ulid::new())).await;
        let b = tokio::time::timeout(
            Duration::from_millis(100),
            locks.acquire(TaskId::from_ulid(Ulid::new())),
        )
        .await;
        assert!(b.is_ok());
        assert_eq!(locks.len(), 2);
    }
}
