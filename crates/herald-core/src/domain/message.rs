//! Platform-neutral rendered message.

use serde::{Deserialize, Serialize};

use super::action::{Action, CallbackData};
use super::ids::TaskId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionButton {
    pub action: Action,
    pub label: String,
    pub callback_data: String,
}

impl ActionButton {
    pub fn for_task(action: Action, task_id: TaskId) -> Self {
        Self {
            action,
            label: action.label().to_string(),
            callback_data: CallbackData::new(action, task_id).encode(),
        }
    }
}

/// Text plus inline actions. An empty action list means informational.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedMessage {
    pub text: String,
    pub actions: Vec<ActionButton>,
}

impl RenderedMessage {
    pub fn informational(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            actions: Vec::new(),
        }
    }

    pub fn is_informational(&self) -> bool {
        self.actions.is_empty()
    }
}
