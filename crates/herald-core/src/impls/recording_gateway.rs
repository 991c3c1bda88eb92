//! RecordingGateway - テスト・デモ用の messaging gateway
//!
//! 送信・編集・管理者通知をすべて記録します。`fail_next` で失敗を
//! 台本どおりに注入でき、retry / backoff の経路をネットワークなしで
//! 再現できます。

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{GatewayError, MessageRef, MessagingIdentity, RenderedMessage};
use crate::ports::{AdminChannel, MessagingGateway};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub to: MessagingIdentity,
    pub message_ref: MessageRef,
    pub message: RenderedMessage,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditedMessage {
    pub message_ref: MessageRef,
    pub message: RenderedMessage,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminNotice {
    pub admin: MessagingIdentity,
    pub text: String,
}

#[derive(Debug, Default)]
struct Recorded {
    sent: Vec<SentMessage>,
    edited: Vec<EditedMessage>,
    notices: Vec<AdminNotice>,
    scripted_failures: VecDeque<GatewayError>,
}

#[derive(Debug, Default)]
pub struct RecordingGateway {
    recorded: Mutex<Recorded>,
    next_message_id: AtomicI64,
    send_delay: Option<Duration>,
    edits_hang: bool,
}

impl RecordingGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep inside every send, widening the window for concurrency tests.
    pub fn with_send_delay(mut self, delay: Duration) -> Self {
        self.send_delay = Some(delay);
        self
    }

    /// Edits never complete, like a platform that stopped answering.
    pub fn with_hanging_edits(mut self) -> Self {
        self.edits_hang = true;
        self
    }

    /// The next send fails with `error`. Failures queue up in call order.
    pub fn fail_next(&self, error: GatewayError) {
        self.lock().scripted_failures.push_back(error);
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.lock().sent.clone()
    }

    pub fn edited(&self) -> Vec<EditedMessage> {
        self.lock().edited.clone()
    }

    pub fn notices(&self) -> Vec<AdminNotice> {
        self.lock().notices.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Recorded> {
        self.recorded.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl MessagingGateway for RecordingGateway {
    async fn send_message(
        &self,
        to: MessagingIdentity,
        message: &RenderedMessage,
    ) -> Result<MessageRef, GatewayError> {
        if let Some(delay) = self.send_delay {
            tokio::time::sleep(delay).await;
        }
        let mut recorded = self.lock();
        if let Some(error) = recorded.scripted_failures.pop_front() {
            return Err(error);
        }
        let message_id = self.next_message_id.fetch_add(1, Ordering::SeqCst) + 1;
        let message_ref = MessageRef::new(to.chat_id(), message_id);
        recorded.sent.push(SentMessage {
            to,
            message_ref,
            message: message.clone(),
        });
        Ok(message_ref)
    }

    async fn edit_message(
        &self,
        message_ref: MessageRef,
        message: &RenderedMessage,
    ) -> Result<(), GatewayError> {
        if self.edits_hang {
            std::future::pending::<()>().await;
        }
        self.lock().edited.push(EditedMessage {
            message_ref,
            message: message.clone(),
        });
        Ok(())
    }
}

#[async_trait]
impl AdminChannel for RecordingGateway {
    async fn notify(&self, admin: MessagingIdentity, text: &str) -> Result<(), GatewayError> {
        self.lock().notices.push(AdminNotice {
            admin,
            text: text.to_string(),
        });
        Ok(())
    }
}
