//! Inbound interaction events delivered by the messaging gateway.

use super::action::Action;
use super::ids::{CallbackToken, ExecutorId, MessagingIdentity, TaskId};

/// A button press on a task message.
///
/// The gateway delivers at least once, so the same `token` may arrive
/// several times.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackEvent {
    pub task_id: TaskId,
    pub executor_id: ExecutorId,
    pub action: Action,
    pub token: CallbackToken,
    /// Free text carried with the press (question text), if the platform has any.
    pub text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    Callback(CallbackEvent),
    /// Payload could not be decoded; only acknowledged.
    MalformedCallback {
        token: CallbackToken,
        executor_id: ExecutorId,
        reason: String,
    },
    /// `/tasks`: list the sender's open tasks.
    ListTasks {
        executor_id: ExecutorId,
        chat: MessagingIdentity,
    },
    /// Free text sent in reply to a task message.
    Reply {
        executor_id: ExecutorId,
        chat: MessagingIdentity,
        task_id: TaskId,
        text: String,
    },
}
