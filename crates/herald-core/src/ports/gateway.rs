//! MessagingGateway port - 外部 messaging platform への送信
//!
//! 呼び出し側（Dispatcher / TaskService / CallbackHandler）が `bounded` で timeout を付けます。

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{GatewayError, MessageRef, MessagingIdentity, RenderedMessage};

#[async_trait]
pub trait MessagingGateway: Send + Sync {
    async fn send_message(
        &self,
        to: MessagingIdentity,
        message: &RenderedMessage,
    ) -> Result<MessageRef, GatewayError>;

    async fn edit_message(
        &self,
        message_ref: MessageRef,
        message: &RenderedMessage,
    ) -> Result<(), GatewayError>;
}

/// Run a gateway call under `limit`; an elapsed call is `GatewayError::Timeout`.
pub async fn bounded<T>(
    limit: Duration,
    call: impl Future<Output = Result<T, GatewayError>>,
) -> Result<T, GatewayError> {
    tokio::time::timeout(limit, call)
        .await
        .unwrap_or_else(|_| Err(GatewayError::Timeout(limit)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn hanging_call_becomes_a_timeout() {
        let limit = Duration::from_secs(1);
        let result = bounded(limit, std::future::pending::<Result<(), GatewayError>>()).await;
        assert!(matches!(result, Err(GatewayError::Timeout(d)) if d == limit));
    }

    #[tokio::test]
    async fn finished_call_passes_through() {
        let result = bounded(Duration::from_secs(1), async { Ok::<_, GatewayError>(7) }).await;
        assert!(matches!(result, Ok(7)));
    }
}
