//! Message formatter: task state in, platform message out.
//!
//! Pure and deterministic. The text names the deal/policy and the work;
//! the callback payloads carry only the task id and an action tag.

use crate::domain::{Action, ActionButton, Association, Executor, RenderedMessage, Task};

/// Executor-facing task message with the full action set.
pub fn render_task(task: &Task, executor: &Executor) -> RenderedMessage {
    let mut lines = Vec::new();
    if task.reminder_count > 0 {
        lines.push(format!("🔔 Reminder #{}", task.reminder_count));
    }
    lines.push(format!("📋 {}", task.title));
    lines.push(association_line(task.association));
    if !task.note.is_empty() {
        lines.push(format!("📝 {}", task.note));
    }
    lines.push(format!("👤 {}", executor.display_name()));
    lines.push(format!("ID: {}", task.id));

    RenderedMessage {
        text: lines.join("\n"),
        actions: Action::TASK_ACTIONS
            .iter()
            .map(|action| ActionButton::for_task(*action, task.id))
            .collect(),
    }
}

/// Informational replacement for a task message (no actions).
pub fn render_status_notice(task: &Task, status_text: &str) -> RenderedMessage {
    RenderedMessage::informational(format!(
        "📋 {}\n{}\n{}\nID: {}",
        task.title,
        association_line(task.association),
        status_text,
        task.id
    ))
}

/// `/tasks` reply listing open tasks, oldest first.
pub fn render_task_list(tasks: &[Task]) -> RenderedMessage {
    if tasks.is_empty() {
        return RenderedMessage::informational("No open tasks 💤");
    }
    let lines: Vec<String> = tasks
        .iter()
        .enumerate()
        .map(|(i, task)| format!("{}. {} [{}] {}", i + 1, task.title, task.status, task.id))
        .collect();
    RenderedMessage::informational(format!("Open tasks:\n{}", lines.join("\n")))
}

fn association_line(association: Option<Association>) -> String {
    match association {
        Some(Association::Deal(id)) => format!("Deal: {id}"),
        Some(Association::Policy(id)) => format!("Policy: {id}"),
        None => "Administrative task".to_string(),
    }
}
