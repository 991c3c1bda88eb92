//! AdminChannel port - 管理者への通知
//!
//! fire-and-forget: 失敗は `Notifier` が log に落とし、呼び出し元には返しません。

use async_trait::async_trait;

use crate::domain::{GatewayError, MessagingIdentity};

#[async_trait]
pub trait AdminChannel: Send + Sync {
    async fn notify(&self, admin: MessagingIdentity, text: &str) -> Result<(), GatewayError>;
}
