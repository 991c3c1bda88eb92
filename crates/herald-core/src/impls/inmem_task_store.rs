//! InMemoryTaskStore - テスト・デモ用の正本
//!
//! 1 つの Mutex の中で read-modify-write を完結させることで、
//! `update_task_status` の compare-and-swap を原子的にしています。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{ExecutorId, StoreError, Task, TaskId, TaskPatch, TaskStatus};
use crate::ports::{Clock, SystemClock, TaskStore};

pub struct InMemoryTaskStore {
    tasks: Mutex<HashMap<TaskId, Task>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryTaskStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
            clock,
        }
    }

    fn sorted(mut tasks: Vec<Task>) -> Vec<Task> {
        tasks.sort_by_key(|t| (t.created_at, t.id));
        tasks
    }
}

impl Default for InMemoryTaskStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create_task(&self, task: Task) -> Result<Task, StoreError> {
        let mut tasks = self.tasks.lock().await;
        if tasks.contains_key(&task.id) {
            return Err(StoreError::Backend(format!("duplicate task id {}", task.id)));
        }
        tasks.insert(task.id, task.clone());
        Ok(task)
    }

    async fn get_task(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
        Ok(self.tasks.lock().await.get(&id).cloned())
    }

    async fn update_task_status(
        &self,
        id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
        patch: TaskPatch,
    ) -> Result<Task, StoreError> {
        let mut tasks = self.tasks.lock().await;
        let task = tasks.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if task.status != from {
            return Err(StoreError::StatusMismatch {
                task_id: id,
                expected: from,
                actual: task.status,
            });
        }
        task.apply(to, patch, self.clock.now());
        Ok(task.clone())
    }

    async fn list_tasks_by_executor(
        &self,
        executor_id: ExecutorId,
        statuses: &[TaskStatus],
    ) -> Result<Vec<Task>, StoreError> {
        let tasks = self.tasks.lock().await;
        Ok(Self::sorted(
            tasks
                .values()
                .filter(|t| t.executor_id == Some(executor_id) && statuses.contains(&t.status))
                .cloned()
                .collect(),
        ))
    }

    async fn list_tasks_by_status(&self, statuses: &[TaskStatus]) -> Result<Vec<Task>, StoreError> {
        let tasks = self.tasks.lock().await;
        Ok(Self::sorted(
            tasks
                .values()
                .filter(|t| statuses.contains(&t.status))
                .cloned()
                .collect(),
        ))
    }
}
