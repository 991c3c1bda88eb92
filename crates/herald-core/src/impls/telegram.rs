//! Telegram Bot API adapter
//!
//! Outbound: `sendMessage` / `editMessageText` / `answerCallbackQuery`.
//! Inbound: long-polling `getUpdates`, parsed into `InboundEvent`s.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::config::GatewaySection;
use crate::domain::{
    CallbackData, CallbackEvent, CallbackToken, ExecutorId, GatewayError, InboundEvent,
    MessageRef, MessagingIdentity, RenderedMessage, TaskId,
};
use crate::ports::{AdminChannel, MessagingGateway};

/// Timeout for single (non-polling) API calls.
const API_TIMEOUT: Duration = Duration::from_secs(30);
/// Used when a 429 carries no `retry_after`.
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(1);

pub struct TelegramGateway {
    client: Client,
    api_base: String,
    token: String,
    poll_timeout_secs: u64,
    /// Highest update id handed out so far.
    last_update_id: AtomicI64,
}

impl TelegramGateway {
    pub fn new(token: impl Into<String>, settings: &GatewaySection) -> Self {
        Self {
            client: Client::new(),
            api_base: settings.api_base.trim_end_matches('/').to_string(),
            token: token.into(),
            poll_timeout_secs: settings.poll_timeout_secs,
            last_update_id: AtomicI64::new(0),
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<T, GatewayError> {
        let response = self
            .client
            .post(self.api_url(method))
            .json(&params)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| transport_error(e, timeout))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| transport_error(e, timeout))?;

        let parsed: ApiResponse<T> = match serde_json::from_str(&body) {
            Ok(parsed) => parsed,
            Err(_) if status.is_server_error() => {
                return Err(GatewayError::Network(format!("HTTP {status}")));
            }
            Err(e) => {
                return Err(GatewayError::Unknown(format!(
                    "unreadable {method} response (HTTP {status}): {e}"
                )));
            }
        };

        if parsed.ok {
            parsed
                .result
                .ok_or_else(|| GatewayError::Unknown(format!("{method} returned ok without result")))
        } else {
            Err(api_error(
                parsed.error_code.unwrap_or_else(|| i64::from(status.as_u16())),
                parsed.description.unwrap_or_default(),
                parsed.parameters.and_then(|p| p.retry_after),
            ))
        }
    }

    /// Acknowledge a button press so the client stops its spinner.
    pub async fn answer_callback(
        &self,
        token: &CallbackToken,
        text: Option<&str>,
    ) -> Result<(), GatewayError> {
        let mut params = json!({ "callback_query_id": token.as_str() });
        if let Some(text) = text {
            params["text"] = Value::String(text.to_string());
        }
        let _: bool = self.call("answerCallbackQuery", params, API_TIMEOUT).await?;
        Ok(())
    }

    /// One long-poll round. Updates that carry nothing actionable are skipped.
    pub async fn poll_updates(&self) -> Result<Vec<InboundEvent>, GatewayError> {
        let offset = self.last_update_id.load(Ordering::SeqCst);
        let params = json!({
            "offset": if offset > 0 { offset + 1 } else { 0 },
            "timeout": self.poll_timeout_secs,
            "allowed_updates": ["message", "callback_query"],
        });
        let timeout = Duration::from_secs(self.poll_timeout_secs + 10);
        let updates: Vec<Update> = self.call("getUpdates", params, timeout).await?;

        if let Some(last) = updates.last() {
            self.last_update_id.store(last.update_id, Ordering::SeqCst);
        }
        Ok(updates.into_iter().filter_map(parse_update).collect())
    }
}

#[async_trait]
impl MessagingGateway for TelegramGateway {
    async fn send_message(
        &self,
        to: MessagingIdentity,
        message: &RenderedMessage,
    ) -> Result<MessageRef, GatewayError> {
        let mut params = json!({
            "chat_id": to.chat_id(),
            "text": message.text,
        });
        if !message.is_informational() {
            params["reply_markup"] = inline_keyboard(message);
        }
        let sent: SentMessage = self.call("sendMessage", params, API_TIMEOUT).await?;
        Ok(MessageRef::new(sent.chat.id, sent.message_id))
    }

    async fn edit_message(
        &self,
        message_ref: MessageRef,
        message: &RenderedMessage,
    ) -> Result<(), GatewayError> {
        let params = json!({
            "chat_id": message_ref.chat_id,
            "message_id": message_ref.message_id,
            "text": message.text,
            "reply_markup": inline_keyboard(message),
        });
        // editMessageText returns the message, or `true` for inline messages.
        match self.call::<Value>("editMessageText", params, API_TIMEOUT).await {
            Ok(_) => Ok(()),
            Err(GatewayError::Unknown(description)) if description.contains("not modified") => {
                debug!(%message_ref, "edit skipped, message not modified");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl AdminChannel for TelegramGateway {
    async fn notify(&self, admin: MessagingIdentity, text: &str) -> Result<(), GatewayError> {
        let params = json!({ "chat_id": admin.chat_id(), "text": text });
        let _: SentMessage = self.call("sendMessage", params, API_TIMEOUT).await?;
        Ok(())
    }
}

/// One button per row. An empty keyboard removes existing buttons on edit.
fn inline_keyboard(message: &RenderedMessage) -> Value {
    let rows: Vec<Value> = message
        .actions
        .iter()
        .map(|button| json!([{ "text": button.label, "callback_data": button.callback_data }]))
        .collect();
    json!({ "inline_keyboard": rows })
}

fn transport_error(error: reqwest::Error, timeout: Duration) -> GatewayError {
    if error.is_timeout() {
        GatewayError::Timeout(timeout)
    } else {
        GatewayError::Network(error.to_string())
    }
}

/// Map a Bot API error reply onto the gateway taxonomy.
fn api_error(code: i64, description: String, retry_after: Option<u64>) -> GatewayError {
    match code {
        429 => GatewayError::RateLimited {
            retry_after: retry_after.map_or(DEFAULT_RETRY_AFTER, Duration::from_secs),
        },
        403 => GatewayError::InvalidRecipient(description),
        400 if description.contains("chat not found") || description.contains("user not found") => {
            GatewayError::InvalidRecipient(description)
        }
        500..=599 => GatewayError::Network(description),
        _ => GatewayError::Unknown(description),
    }
}

fn parse_update(update: Update) -> Option<InboundEvent> {
    if let Some(query) = update.callback_query {
        return Some(parse_callback(query));
    }

    let message = update.message?;
    let from = message.from?;
    let executor_id = ExecutorId::new(from.id);
    let chat = MessagingIdentity::new(message.chat.id);
    let text = message.text?;

    if is_command(&text, "tasks") {
        return Some(InboundEvent::ListTasks { executor_id, chat });
    }

    let task_id = message
        .reply_to_message
        .and_then(|original| original.text)
        .and_then(|original| find_task_id(&original));
    match task_id {
        Some(task_id) => Some(InboundEvent::Reply {
            executor_id,
            chat,
            task_id,
            text,
        }),
        None => {
            debug!(update_id = update.update_id, "ignoring message without task reference");
            None
        }
    }
}

fn parse_callback(query: CallbackQuery) -> InboundEvent {
    let token = CallbackToken::new(query.id);
    let executor_id = ExecutorId::new(query.from.id);
    match CallbackData::parse(query.data.as_deref().unwrap_or_default()) {
        Ok(data) => InboundEvent::Callback(CallbackEvent {
            task_id: data.task_id,
            executor_id,
            action: data.action,
            token,
            text: None,
        }),
        Err(e) => {
            warn!(%executor_id, error = %e, "malformed callback payload");
            InboundEvent::MalformedCallback {
                token,
                executor_id,
                reason: e.to_string(),
            }
        }
    }
}

/// `/tasks` or `/tasks@botname`, optionally followed by arguments.
fn is_command(text: &str, command: &str) -> bool {
    let Some(head) = text.split_whitespace().next() else {
        return false;
    };
    let Some(name) = head.strip_prefix('/') else {
        return false;
    };
    name.split('@').next() == Some(command)
}

fn find_task_id(text: &str) -> Option<TaskId> {
    text.split(|c: char| c.is_whitespace() || matches!(c, '(' | ')' | '[' | ']' | ','))
        .find_map(|word| word.parse::<TaskId>().ok())
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
    error_code: Option<i64>,
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    retry_after: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    message: Option<Message>,
    callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Deserialize)]
struct Message {
    from: Option<User>,
    chat: Chat,
    text: Option<String>,
    reply_to_message: Option<Box<Message>>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
    chat: Chat,
}

#[derive(Debug, Deserialize)]
struct CallbackQuery {
    id: String,
    from: User,
    data: Option<String>,
}

#[derive(Debug, Deserialize)]
struct User {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Action;
    use ulid::Ulid;

    fn update(value: Value) -> Update {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn callback_query_becomes_callback_event() {
        let task_id = TaskId::from_ulid(Ulid::new());
        let data = CallbackData::new(Action::Complete, task_id).encode();
        let event = parse_update(update(json!({
            "update_id": 10,
            "callback_query": {
                "id": "4382bfdwdsb323b2d9",
                "from": { "id": 77, "is_bot": false, "first_name": "Anna" },
                "data": data,
            }
        })));

        assert_eq!(
            event,
            Some(InboundEvent::Callback(CallbackEvent {
                task_id,
                executor_id: ExecutorId::new(77),
                action: Action::Complete,
                token: CallbackToken::new("4382bfdwdsb323b2d9"),
                text: None,
            }))
        );
    }

    #[test]
    fn unknown_callback_payload_is_reported_not_dropped() {
        let event = parse_update(update(json!({
            "update_id": 11,
            "callback_query": { "id": "q1", "from": { "id": 77 }, "data": "ret:42" }
        })));
        assert!(matches!(event, Some(InboundEvent::MalformedCallback { .. })));
    }

    #[test]
    fn tasks_command_with_bot_suffix() {
        let event = parse_update(update(json!({
            "update_id": 12,
            "message": {
                "message_id": 5,
                "from": { "id": 77 },
                "chat": { "id": 77, "type": "private" },
                "text": "/tasks@herald_bot"
            }
        })));
        assert_eq!(
            event,
            Some(InboundEvent::ListTasks {
                executor_id: ExecutorId::new(77),
                chat: MessagingIdentity::new(77),
            })
        );
    }

    #[test]
    fn reply_to_task_message_carries_task_id() {
        let task_id = TaskId::from_ulid(Ulid::new());
        let event = parse_update(update(json!({
            "update_id": 13,
            "message": {
                "message_id": 9,
                "from": { "id": 77 },
                "chat": { "id": 77 },
                "text": "documents uploaded",
                "reply_to_message": {
                    "message_id": 3,
                    "chat": { "id": 77 },
                    "text": format!("📋 Collect documents\nID: {task_id}")
                }
            }
        })));
        assert_eq!(
            event,
            Some(InboundEvent::Reply {
                executor_id: ExecutorId::new(77),
                chat: MessagingIdentity::new(77),
                task_id,
                text: "documents uploaded".into(),
            })
        );
    }

    #[test]
    fn plain_chatter_is_ignored() {
        let event = parse_update(update(json!({
            "update_id": 14,
            "message": { "message_id": 1, "from": { "id": 77 }, "chat": { "id": 77 }, "text": "hi" }
        })));
        assert_eq!(event, None);
    }

    #[test]
    fn api_errors_map_to_gateway_taxonomy() {
        assert_eq!(
            api_error(429, "Too Many Requests".into(), Some(7)),
            GatewayError::RateLimited {
                retry_after: Duration::from_secs(7)
            }
        );
        assert!(matches!(
            api_error(403, "Forbidden: bot was blocked by the user".into(), None),
            GatewayError::InvalidRecipient(_)
        ));
        assert!(matches!(
            api_error(400, "Bad Request: chat not found".into(), None),
            GatewayError::InvalidRecipient(_)
        ));
        assert!(matches!(
            api_error(502, "Bad Gateway".into(), None),
            GatewayError::Network(_)
        ));
        assert!(matches!(
            api_error(400, "Bad Request: message text is empty".into(), None),
            GatewayError::Unknown(_)
        ));
    }

    #[test]
    fn keyboard_has_one_button_per_row() {
        let task_id = TaskId::from_ulid(Ulid::new());
        let message = RenderedMessage {
            text: "t".into(),
            actions: Action::TASK_ACTIONS
                .iter()
                .map(|a| crate::domain::ActionButton::for_task(*a, task_id))
                .collect(),
        };
        let keyboard = inline_keyboard(&message);
        let rows = keyboard["inline_keyboard"].as_array().unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(
            rows[1][0]["callback_data"],
            Value::String(CallbackData::new(Action::Complete, task_id).encode())
        );
    }
}
