//! Dispatch attempt history.
//!
//! Every send attempt is recorded on the task so an operator can see why a
//! task ended up in `Failed` without digging through logs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::MessageRef;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// The gateway accepted the message.
    Delivered { message_ref: MessageRef },

    /// Transient failure; another attempt was scheduled.
    Retrying { error: String, delay_ms: u64 },

    /// The dispatcher gave up on this cycle.
    Failed { error: String },
}

/// A single send attempt of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchAttempt {
    /// 1-indexed within the current dispatch cycle.
    pub attempt: u32,
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub outcome: AttemptOutcome,
}

impl DispatchAttempt {
    pub fn new(attempt: u32, at: DateTime<Utc>, outcome: AttemptOutcome) -> Self {
        Self {
            attempt,
            at,
            outcome,
        }
    }
}
