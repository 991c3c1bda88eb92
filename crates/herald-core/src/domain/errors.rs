//! Errors - エラー型と分類
//!
//! すべてのエラーは `ErrorKind` に分類されます。Dispatcher の retry 判断は
//! この分類だけを見ます。

use std::time::Duration;

use thiserror::Error;

use super::ids::{ExecutorId, TaskId};
use super::state::TaskStatus;

/// ErrorKind は実行エラーの分類
///
/// - Transient: 一時的なエラー（リトライ推奨）
/// - Permanent: 恒久的なエラー（リトライ無意味）
/// - Infrastructure: インフラエラー（store / queue の障害）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Permanent,
    Infrastructure,
}

/// A status change that is not an edge of the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: TaskStatus,
    pub to: TaskStatus,
}

/// Input rejected before anything is queued. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("task references both a deal and a policy")]
    BothAssociations,

    #[error("task must reference a deal or a policy unless it is administrative")]
    MissingAssociation,

    #[error("task {0} has no executor assigned")]
    MissingExecutor(TaskId),

    #[error("new task has no executor assigned")]
    Unassigned,

    #[error("unknown executor {0}")]
    UnknownExecutor(ExecutorId),

    #[error("executor {0} is not approved")]
    ExecutorNotApproved(ExecutorId),

    #[error("task {task_id} is {status} and no longer accepts changes")]
    TaskClosed { task_id: TaskId, status: TaskStatus },

    #[error("note text is empty")]
    EmptyNote,
}

/// Failure modes of the messaging gateway.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("invalid recipient: {0}")]
    InvalidRecipient(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("gateway call timed out after {0:?}")]
    Timeout(Duration),

    #[error("gateway error: {0}")]
    Unknown(String),
}

impl GatewayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::RateLimited { .. }
            | GatewayError::Network(_)
            | GatewayError::Timeout(_) => ErrorKind::Transient,
            GatewayError::InvalidRecipient(_) | GatewayError::Unknown(_) => ErrorKind::Permanent,
        }
    }

    /// Minimum wait the gateway asked for, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            GatewayError::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}

/// Failures of the record store boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("task {0} not found")]
    NotFound(TaskId),

    #[error("task {task_id} is {actual}, expected {expected}")]
    StatusMismatch {
        task_id: TaskId,
        expected: TaskStatus,
        actual: TaskStatus,
    },

    #[error("store backend error: {0}")]
    Backend(String),
}

/// Failures of the dispatch queue.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("dispatch queue is closed")]
    Closed,

    #[error("queue operation failed: {0}")]
    OperationFailed(String),
}

/// HeraldError は crate 全体のエラー
#[derive(Debug, Error)]
pub enum HeraldError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("task {task_id}: {source}")]
    InvalidTransition {
        task_id: TaskId,
        #[source]
        source: InvalidTransition,
    },

    #[error("task {0} not found")]
    TaskNotFound(TaskId),

    #[error("executor {executor_id} may not act on task {task_id}")]
    Unauthorized {
        executor_id: ExecutorId,
        task_id: TaskId,
    },

    #[error("dispatch of task {task_id} failed: {source}")]
    Dispatch {
        task_id: TaskId,
        #[source]
        source: GatewayError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl HeraldError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            HeraldError::Validation(_)
            | HeraldError::InvalidTransition { .. }
            | HeraldError::TaskNotFound(_)
            | HeraldError::Unauthorized { .. } => ErrorKind::Permanent,
            HeraldError::Dispatch { source, .. } => source.kind(),
            HeraldError::Store(StoreError::Backend(_)) | HeraldError::Queue(_) => {
                ErrorKind::Infrastructure
            }
            HeraldError::Store(_) => ErrorKind::Permanent,
        }
    }

    /// Lift a failed compare-and-swap into the transition the caller attempted.
    pub(crate) fn from_store(err: StoreError, to: TaskStatus) -> Self {
        match err {
            StoreError::StatusMismatch {
                task_id, actual, ..
            } => HeraldError::InvalidTransition {
                task_id,
                source: InvalidTransition { from: actual, to },
            },
            StoreError::NotFound(task_id) => HeraldError::TaskNotFound(task_id),
            other => HeraldError::Store(other),
        }
    }
}
