use serde::{Deserialize, Serialize};

use crate::domain::TaskStatus;

/// Per-status task counts for operators.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub draft: usize,
    pub queued: usize,
    pub sent: usize,
    pub in_progress: usize,
    pub awaiting_confirmation: usize,
    pub done: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl StatusCounts {
    pub fn record(&mut self, status: TaskStatus) {
        let slot = match status {
            TaskStatus::Draft => &mut self.draft,
            TaskStatus::Queued => &mut self.queued,
            TaskStatus::Sent => &mut self.sent,
            TaskStatus::InProgress => &mut self.in_progress,
            TaskStatus::AwaitingConfirmation => &mut self.awaiting_confirmation,
            TaskStatus::Done => &mut self.done,
            TaskStatus::Failed => &mut self.failed,
            TaskStatus::Cancelled => &mut self.cancelled,
        };
        *slot += 1;
    }

    pub fn total(&self) -> usize {
        self.draft
            + self.queued
            + self.sent
            + self.in_progress
            + self.awaiting_confirmation
            + self.done
            + self.failed
            + self.cancelled
    }
}

impl FromIterator<TaskStatus> for StatusCounts {
    fn from_iter<I: IntoIterator<Item = TaskStatus>>(iter: I) -> Self {
        let mut counts = Self::default();
        for status in iter {
            counts.record(status);
        }
        counts
    }
}
