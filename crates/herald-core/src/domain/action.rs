//! Executor-facing inline actions.
//!
//! The set is closed: every action maps to exactly one handler arm in the
//! callback handler, and adding one means extending this enum and its tables.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::ids::TaskId;
use super::state::Transition;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    AddCalculation,
    Complete,
    AskQuestion,
}

impl Action {
    /// Action set attached to every executor-facing task message.
    pub const TASK_ACTIONS: [Action; 3] =
        [Action::AddCalculation, Action::Complete, Action::AskQuestion];

    /// Wire tag used in callback payloads.
    pub fn tag(self) -> &'static str {
        match self {
            Action::AddCalculation => "calc",
            Action::Complete => "done",
            Action::AskQuestion => "question",
        }
    }

    /// Button label shown to the executor.
    pub fn label(self) -> &'static str {
        match self {
            Action::AddCalculation => "➕ Add calculation",
            Action::Complete => "✅ Complete",
            Action::AskQuestion => "💬 Ask a question",
        }
    }

    /// The state transition this action requests, if any.
    pub fn transition(self) -> Option<Transition> {
        match self {
            Action::AddCalculation => Some(Transition::StartCalculation),
            Action::Complete => Some(Transition::Complete),
            Action::AskQuestion => None,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallbackDataError {
    #[error("callback payload has no separator: {0:?}")]
    Malformed(String),

    #[error("unknown action tag: {0:?}")]
    UnknownAction(String),

    #[error(transparent)]
    InvalidTaskId(#[from] super::ids::ParseIdError),
}

impl FromStr for Action {
    type Err = CallbackDataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Action::TASK_ACTIONS
            .into_iter()
            .find(|action| action.tag() == s)
            .ok_or_else(|| CallbackDataError::UnknownAction(s.to_string()))
    }
}

/// Payload carried by an inline button: `"<tag>:<task id>"`.
///
/// Nothing else is embedded; authorization is decided server-side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallbackData {
    pub action: Action,
    pub task_id: TaskId,
}

impl CallbackData {
    pub fn new(action: Action, task_id: TaskId) -> Self {
        Self { action, task_id }
    }

    pub fn encode(&self) -> String {
        format!("{}:{}", self.action.tag(), self.task_id)
    }

    pub fn parse(raw: &str) -> Result<Self, CallbackDataError> {
        let (tag, id) = raw
            .split_once(':')
            .ok_or_else(|| CallbackDataError::Malformed(raw.to_string()))?;
        Ok(Self {
            action: tag.parse()?,
            task_id: id.parse()?,
        })
    }
}
