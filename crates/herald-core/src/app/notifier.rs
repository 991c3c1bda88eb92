//! Notifier - ドメインイベントの trace と管理者通知
//!
//! 通知は fire-and-forget: 失敗しても呼び出し元には返さず、ログだけ残します。

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::domain::{DomainEvent, MessagingIdentity};
use crate::ports::AdminChannel;

const NOTIFY_TIMEOUT: Duration = Duration::from_secs(10);

pub struct Notifier {
    channel: Arc<dyn AdminChannel>,
    admin: MessagingIdentity,
}

impl Notifier {
    pub fn new(channel: Arc<dyn AdminChannel>, admin: MessagingIdentity) -> Self {
        Self { channel, admin }
    }

    pub async fn emit(&self, event: DomainEvent) {
        let task_id = event.task_id();
        info!(%task_id, event = ?event, "domain event");
        if event.notifies_admin() {
            self.notify(&event.to_string()).await;
        }
    }

    /// Send free text to the administrator.
    pub async fn notify(&self, text: &str) {
        match tokio::time::timeout(NOTIFY_TIMEOUT, self.channel.notify(self.admin, text)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(admin = %self.admin, error = %e, "admin notification failed"),
            Err(_) => warn!(admin = %self.admin, "admin notification timed out"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ExecutorId, TaskId};
    use crate::impls::RecordingGateway;
    use ulid::Ulid;

    #[tokio::test]
    async fn only_admin_events_are_forwarded() {
        let gateway = Arc::new(RecordingGateway::new());
        let notifier = Notifier::new(gateway.clone(), MessagingIdentity::new(1));
        let task_id = TaskId::from_ulid(Ulid::new());

        notifier
            .emit(DomainEvent::TaskSent {
                task_id,
                executor_id: ExecutorId::new(2),
            })
            .await;
        notifier
            .emit(DomainEvent::DispatchFailed {
                task_id,
                reason: "blocked".into(),
            })
            .await;

        let notices = gateway.notices();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].admin, MessagingIdentity::new(1));
        assert!(notices[0].text.contains("blocked"));
    }
}
