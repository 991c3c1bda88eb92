//! TaskStore port - 外部 record store が実装する正本（source of truth）
//!
//! このコアは store の実装に関与しません。要求するのは
//! `update_task_status` の compare-and-swap だけです。

use async_trait::async_trait;

use crate::domain::{ExecutorId, StoreError, Task, TaskId, TaskPatch, TaskStatus};

/// TaskStore は task の状態の正本
///
/// # 設計原則
/// - 状態変更はすべて `update_task_status` を通る
/// - `from` が現在の状態と一致しなければ `StatusMismatch` で失敗する
/// - 1 task に対する read-modify-write は原子的
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Persist a new task (normally in `Draft`).
    async fn create_task(&self, task: Task) -> Result<Task, StoreError>;

    async fn get_task(&self, id: TaskId) -> Result<Option<Task>, StoreError>;

    /// Compare-and-swap on status, applying `patch` in the same step.
    async fn update_task_status(
        &self,
        id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
        patch: TaskPatch,
    ) -> Result<Task, StoreError>;

    /// Tasks assigned to `executor_id` in any of `statuses`, oldest first.
    async fn list_tasks_by_executor(
        &self,
        executor_id: ExecutorId,
        statuses: &[TaskStatus],
    ) -> Result<Vec<Task>, StoreError>;

    /// Tasks in any of `statuses`, oldest first.
    async fn list_tasks_by_status(&self, statuses: &[TaskStatus]) -> Result<Vec<Task>, StoreError>;
}
