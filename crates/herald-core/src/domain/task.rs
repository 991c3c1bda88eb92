//! Task record: the unit of work handed to an executor.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::attempt::{AttemptOutcome, DispatchAttempt};
use super::errors::ValidationError;
use super::ids::{DealId, ExecutorId, MessageRef, PolicyId, TaskId};
use super::state::TaskStatus;

/// Business record a task belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Association {
    Deal(DealId),
    Policy(PolicyId),
}

/// Input from the record service for a new task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTask {
    pub title: String,
    pub note: String,
    pub deal_id: Option<DealId>,
    pub policy_id: Option<PolicyId>,
    /// Free-form administrative tasks may omit the association.
    pub administrative: bool,
    pub executor_id: Option<ExecutorId>,
}

impl NewTask {
    pub fn for_deal(deal_id: DealId, title: impl Into<String>) -> Self {
        Self {
            deal_id: Some(deal_id),
            ..Self::blank(title)
        }
    }

    pub fn for_policy(policy_id: PolicyId, title: impl Into<String>) -> Self {
        Self {
            policy_id: Some(policy_id),
            ..Self::blank(title)
        }
    }

    pub fn administrative(title: impl Into<String>) -> Self {
        Self {
            administrative: true,
            ..Self::blank(title)
        }
    }

    fn blank(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            note: String::new(),
            deal_id: None,
            policy_id: None,
            administrative: false,
            executor_id: None,
        }
    }

    pub fn assigned_to(mut self, executor_id: ExecutorId) -> Self {
        self.executor_id = Some(executor_id);
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = note.into();
        self
    }

    /// Exactly one of deal/policy, unless administrative.
    pub fn association(&self) -> Result<Option<Association>, ValidationError> {
        match (self.deal_id, self.policy_id) {
            (Some(_), Some(_)) => Err(ValidationError::BothAssociations),
            (Some(deal), None) => Ok(Some(Association::Deal(deal))),
            (None, Some(policy)) => Ok(Some(Association::Policy(policy))),
            (None, None) if self.administrative => Ok(None),
            (None, None) => Err(ValidationError::MissingAssociation),
        }
    }
}

/// Task as held by the record store.
///
/// All status changes go through `TaskStore::update_task_status`, which calls
/// `apply` under the store's compare-and-swap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    pub note: String,
    pub association: Option<Association>,
    pub executor_id: Option<ExecutorId>,
    pub status: TaskStatus,

    /// Message currently representing this task on the executor's device.
    pub external_message_ref: Option<MessageRef>,
    /// Messages replaced by reminders (audit only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub superseded_refs: Vec<MessageRef>,

    pub reminder_count: u32,
    /// Send attempts of the current dispatch cycle.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dispatch_attempts: Vec<DispatchAttempt>,
    pub last_error: Option<String>,

    pub created_at: DateTime<Utc>,
    pub queued_at: Option<DateTime<Utc>>,
    pub last_notified_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new_draft(
        id: TaskId,
        input: NewTask,
        association: Option<Association>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            title: input.title,
            note: input.note,
            association,
            executor_id: input.executor_id,
            status: TaskStatus::Draft,
            external_message_ref: None,
            superseded_refs: Vec::new(),
            reminder_count: 0,
            dispatch_attempts: Vec::new(),
            last_error: None,
            created_at: now,
            queued_at: None,
            last_notified_at: None,
            completed_at: None,
            updated_at: now,
        }
    }

    /// Number of send attempts in the current dispatch cycle.
    pub fn attempts_made(&self) -> u32 {
        self.dispatch_attempts.len() as u32
    }

    /// Delay scheduled after the most recent retried attempt of this cycle.
    pub fn last_retry_delay(&self) -> Option<Duration> {
        self.dispatch_attempts
            .iter()
            .rev()
            .find_map(|attempt| match attempt.outcome {
                AttemptOutcome::Retrying { delay_ms, .. } => Some(Duration::from_millis(delay_ms)),
                _ => None,
            })
    }

    /// Apply a status change and its field updates.
    ///
    /// Timestamps are clamped so that
    /// `completed_at >= last_notified_at >= created_at` always holds.
    pub fn apply(&mut self, to: TaskStatus, patch: TaskPatch, now: DateTime<Utc>) {
        self.status = to;

        if patch.supersede_message_ref
            && let Some(previous) = self.external_message_ref.take()
        {
            self.superseded_refs.push(previous);
        }
        if let Some(message_ref) = patch.message_ref {
            self.external_message_ref = Some(message_ref);
        }
        if patch.reset_attempts {
            self.dispatch_attempts.clear();
        }
        if let Some(attempt) = patch.attempt {
            self.dispatch_attempts.push(attempt);
        }
        if patch.bump_reminder {
            self.reminder_count += 1;
        }
        if let Some(error) = patch.last_error {
            self.last_error = Some(error);
        }
        if let Some(text) = patch.append_note {
            if !self.note.is_empty() {
                self.note.push('\n');
            }
            self.note.push_str(&text);
        }
        if let Some(at) = patch.queued_at {
            self.queued_at = Some(at.max(self.created_at));
        }
        if let Some(at) = patch.notified_at {
            let floor = self.last_notified_at.unwrap_or(self.created_at);
            self.last_notified_at = Some(at.max(floor));
        }
        if let Some(at) = patch.completed_at {
            let floor = self.last_notified_at.unwrap_or(self.created_at);
            self.completed_at = Some(at.max(floor));
        }
        self.updated_at = now.max(self.updated_at);
    }
}

/// Field updates that travel with a status compare-and-swap.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskPatch {
    pub message_ref: Option<MessageRef>,
    pub supersede_message_ref: bool,
    pub bump_reminder: bool,
    pub reset_attempts: bool,
    pub attempt: Option<DispatchAttempt>,
    pub last_error: Option<String>,
    pub append_note: Option<String>,
    pub queued_at: Option<DateTime<Utc>>,
    pub notified_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn message_ref(mut self, message_ref: MessageRef) -> Self {
        self.message_ref = Some(message_ref);
        self
    }

    pub fn supersede_message_ref(mut self) -> Self {
        self.supersede_message_ref = true;
        self
    }

    pub fn bump_reminder(mut self) -> Self {
        self.bump_reminder = true;
        self
    }

    pub fn reset_attempts(mut self) -> Self {
        self.reset_attempts = true;
        self
    }

    pub fn attempt(mut self, attempt: DispatchAttempt) -> Self {
        self.attempt = Some(attempt);
        self
    }

    pub fn last_error(mut self, error: impl Into<String>) -> Self {
        self.last_error = Some(error.into());
        self
    }

    pub fn append_note(mut self, text: impl Into<String>) -> Self {
        self.append_note = Some(text.into());
        self
    }

    pub fn queued_at(mut self, at: DateTime<Utc>) -> Self {
        self.queued_at = Some(at);
        self
    }

    pub fn notified_at(mut self, at: DateTime<Utc>) -> Self {
        self.notified_at = Some(at);
        self
    }

    pub fn completed_at(mut self, at: DateTime<Utc>) -> Self {
        self.completed_at = Some(at);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use ulid::Ulid;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, minute, 0).unwrap()
    }

    fn draft() -> Task {
        let input = NewTask::for_deal(DealId::from_ulid(Ulid::new()), "call insurer");
        let association = input.association().unwrap();
        Task::new_draft(TaskId::from_ulid(Ulid::new()), input, association, at(10))
    }

    #[test]
    fn association_requires_exactly_one_record() {
        let deal = DealId::from_ulid(Ulid::new());
        let policy = PolicyId::from_ulid(Ulid::new());

        let mut both = NewTask::for_deal(deal, "x");
        both.policy_id = Some(policy);
        assert_eq!(both.association(), Err(ValidationError::BothAssociations));

        let mut neither = NewTask::for_deal(deal, "x");
        neither.deal_id = None;
        assert_eq!(neither.association(), Err(ValidationError::MissingAssociation));

        assert_eq!(
            NewTask::for_policy(policy, "x").association(),
            Ok(Some(Association::Policy(policy)))
        );
    }

    #[test]
    fn administrative_task_may_skip_association() {
        assert_eq!(NewTask::administrative("renew licence").association(), Ok(None));
    }

    #[test]
    fn supersede_moves_ref_into_history() {
        let mut task = draft();
        let first = MessageRef::new(1, 10);
        task.apply(TaskStatus::Sent, TaskPatch::new().message_ref(first), at(11));

        task.apply(
            TaskStatus::Queued,
            TaskPatch::new().supersede_message_ref().bump_reminder(),
            at(12),
        );

        assert_eq!(task.external_message_ref, None);
        assert_eq!(task.superseded_refs, vec![first]);
        assert_eq!(task.reminder_count, 1);
    }

    #[test]
    fn timestamps_never_go_backwards() {
        let mut task = draft();
        let early = at(10) - Duration::minutes(5);

        task.apply(TaskStatus::Sent, TaskPatch::new().notified_at(early), at(11));
        assert_eq!(task.last_notified_at, Some(task.created_at));

        task.apply(TaskStatus::Done, TaskPatch::new().completed_at(early), at(12));
        let notified = task.last_notified_at.unwrap();
        assert!(task.completed_at.unwrap() >= notified);
    }

    #[test]
    fn notes_are_appended_on_new_lines() {
        let mut task = draft();
        task.apply(TaskStatus::Draft, TaskPatch::new().append_note("first"), at(11));
        task.apply(TaskStatus::Draft, TaskPatch::new().append_note("second"), at(12));
        assert_eq!(task.note, "first\nsecond");
    }

    #[test]
    fn reset_attempts_starts_a_fresh_cycle() {
        let mut task = draft();
        let failed = DispatchAttempt::new(
            1,
            at(11),
            AttemptOutcome::Failed {
                error: "chat not found".into(),
            },
        );
        task.apply(TaskStatus::Failed, TaskPatch::new().attempt(failed), at(11));
        assert_eq!(task.attempts_made(), 1);

        task.apply(TaskStatus::Queued, TaskPatch::new().reset_attempts(), at(12));
        assert_eq!(task.attempts_made(), 0);
    }

    #[test]
    fn last_retry_delay_comes_from_the_latest_retry() {
        let mut task = draft();
        assert_eq!(task.last_retry_delay(), None);
        for (attempt, delay_ms) in [(1, 2_000), (2, 30_000)] {
            let outcome = AttemptOutcome::Retrying {
                error: "network".into(),
                delay_ms,
            };
            task.apply(
                TaskStatus::Draft,
                TaskPatch::new().attempt(DispatchAttempt::new(attempt, at(11), outcome)),
                at(11),
            );
        }
        assert_eq!(
            task.last_retry_delay(),
            Some(std::time::Duration::from_secs(30))
        );
    }
}
