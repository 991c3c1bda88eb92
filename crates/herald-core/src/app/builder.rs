//! AppBuilder - アプリケーションの構築とワイヤリング
//!
//! # Fail-fast 設計
//! - gateway / admin channel が未設定なら build() で失敗
//! - retry policy や worker 数が動かせない値なら build() で失敗
//! - allow-list の矛盾（同じ id に別の宛先）も build() で検出

use std::sync::Arc;
use std::time::Duration;

use crate::app::callback::CallbackHandler;
use crate::app::dedup::RecentTokens;
use crate::app::dispatcher::{Dispatcher, DispatcherHandle};
use crate::app::locks::TaskLocks;
use crate::app::notifier::Notifier;
use crate::app::registry::{ExecutorRegistry, RegistryError};
use crate::app::service::TaskService;
use crate::config::HeraldConfig;
use crate::domain::{DefaultDecider, Executor, HeraldError, MessagingIdentity, RetryPolicy};
use crate::impls::{InMemoryDispatchQueue, InMemoryTaskStore};
use crate::ports::{
    AdminChannel, Clock, DispatchQueue, IdGenerator, MessagingGateway, SystemClock, TaskStore,
    UlidGenerator,
};

/// BuildError はアプリケーション構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("missing component: {0}")]
    MissingComponent(&'static str),

    #[error("retry policy cannot guarantee monotonic, finite backoff: {0:?}")]
    InvalidRetryPolicy(RetryPolicy),

    #[error("dispatcher needs at least one worker")]
    NoWorkers,

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// AppBuilder はアプリケーションを構築
///
/// # 使用例
/// ```ignore
/// let app = AppBuilder::from_config(&config)
///     .gateway(gateway.clone())
///     .admin_channel(gateway)
///     .build()?;
/// let dispatcher = app.start().await?;
/// ```
///
/// store / queue / clock は省略するとインメモリ実装と system clock になります。
pub struct AppBuilder {
    store: Option<Arc<dyn TaskStore>>,
    queue: Option<Arc<dyn DispatchQueue>>,
    gateway: Option<Arc<dyn MessagingGateway>>,
    admin_channel: Option<Arc<dyn AdminChannel>>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
    allow_list: Vec<Executor>,
    admin: MessagingIdentity,
    retry_policy: RetryPolicy,
    send_timeout: Duration,
    pop_timeout: Duration,
    dedup_capacity: usize,
    workers: usize,
}

impl AppBuilder {
    pub fn new() -> Self {
        Self::from_config(&HeraldConfig::default())
    }

    /// Start from loaded configuration; components still have to be set.
    pub fn from_config(config: &HeraldConfig) -> Self {
        Self {
            store: None,
            queue: None,
            gateway: None,
            admin_channel: None,
            clock: None,
            ids: None,
            allow_list: config.allow_list(),
            admin: config.admin.identity(),
            retry_policy: config.dispatcher.retry_policy(),
            send_timeout: config.dispatcher.send_timeout(),
            pop_timeout: config.dispatcher.pop_timeout(),
            dedup_capacity: config.callbacks.dedup_capacity,
            workers: config.dispatcher.workers,
        }
    }

    pub fn store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn queue(mut self, queue: Arc<dyn DispatchQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn gateway(mut self, gateway: Arc<dyn MessagingGateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    pub fn admin_channel(mut self, channel: Arc<dyn AdminChannel>) -> Self {
        self.admin_channel = Some(channel);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn allow_list(mut self, executors: impl IntoIterator<Item = Executor>) -> Self {
        self.allow_list = executors.into_iter().collect();
        self
    }

    pub fn admin(mut self, admin: MessagingIdentity) -> Self {
        self.admin = admin;
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    pub fn pop_timeout(mut self, timeout: Duration) -> Self {
        self.pop_timeout = timeout;
        self
    }

    pub fn dedup_capacity(mut self, capacity: usize) -> Self {
        self.dedup_capacity = capacity;
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn build(self) -> Result<App, BuildError> {
        let gateway = self
            .gateway
            .ok_or(BuildError::MissingComponent("messaging gateway"))?;
        let admin_channel = self
            .admin_channel
            .ok_or(BuildError::MissingComponent("admin channel"))?;
        if !self.retry_policy.is_valid() {
            return Err(BuildError::InvalidRetryPolicy(self.retry_policy));
        }
        if self.workers == 0 {
            return Err(BuildError::NoWorkers);
        }

        let clock: Arc<dyn Clock> = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryTaskStore::new(Arc::clone(&clock))));
        let queue = self
            .queue
            .unwrap_or_else(|| Arc::new(InMemoryDispatchQueue::new()));
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(Arc::clone(&clock))));

        let registry = Arc::new(ExecutorRegistry::from_allow_list(self.allow_list)?);
        let notifier = Arc::new(Notifier::new(admin_channel, self.admin));
        let locks = Arc::new(TaskLocks::new());

        let service = Arc::new(TaskService::new(
            Arc::clone(&store),
            Arc::clone(&queue),
            Arc::clone(&registry),
            Arc::clone(&gateway),
            Arc::clone(&notifier),
            Arc::clone(&locks),
            Arc::clone(&clock),
            ids,
            self.send_timeout,
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&store),
            Arc::clone(&queue),
            Arc::clone(&registry),
            Arc::clone(&gateway),
            Arc::clone(&notifier),
            Arc::clone(&locks),
            Arc::new(DefaultDecider::new(self.retry_policy)),
            clock,
            self.send_timeout,
            self.pop_timeout,
        ));
        let callbacks = Arc::new(CallbackHandler::new(
            store,
            Arc::clone(&registry),
            gateway,
            notifier,
            locks,
            Arc::clone(&service),
            RecentTokens::new(self.dedup_capacity),
            self.send_timeout,
        ));

        Ok(App {
            registry,
            service,
            dispatcher,
            callbacks,
            workers: self.workers,
        })
    }
}

impl Default for AppBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// App は組み立て済みのコンポーネント一式
pub struct App {
    pub registry: Arc<ExecutorRegistry>,
    pub service: Arc<TaskService>,
    pub dispatcher: Arc<Dispatcher>,
    pub callbacks: Arc<CallbackHandler>,
    workers: usize,
}

impl App {
    /// Rebuild the queue from `Queued` tasks, then start the dispatcher workers.
    pub async fn start(&self) -> Result<DispatcherHandle, HeraldError> {
        self.service.rebuild_queue().await?;
        Ok(self.dispatcher.spawn(self.workers))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ExecutorId;
    use crate::impls::RecordingGateway;

    fn executor(id: i64, chat: i64) -> Executor {
        Executor {
            id: ExecutorId::new(id),
            messaging_identity: MessagingIdentity::new(chat),
            full_name: None,
            approved: true,
        }
    }

    #[test]
    fn build_success() {
        let gateway = Arc::new(RecordingGateway::new());
        let app = AppBuilder::new()
            .gateway(gateway.clone())
            .admin_channel(gateway)
            .allow_list([executor(1, 1)])
            .build();
        assert!(app.is_ok());
    }

    #[test]
    fn build_without_gateway_fails() {
        let gateway = Arc::new(RecordingGateway::new());
        let app = AppBuilder::new().admin_channel(gateway).build();
        assert!(matches!(
            app,
            Err(BuildError::MissingComponent("messaging gateway"))
        ));
    }

    #[test]
    fn build_rejects_non_monotonic_policy() {
        let gateway = Arc::new(RecordingGateway::new());
        let policy = RetryPolicy {
            multiplier: 1.0,
            jitter_ratio: 0.5,
            ..RetryPolicy::default()
        };
        let app = AppBuilder::new()
            .gateway(gateway.clone())
            .admin_channel(gateway)
            .retry_policy(policy)
            .build();
        assert!(matches!(app, Err(BuildError::InvalidRetryPolicy(_))));
    }

    #[test]
    fn build_rejects_conflicting_allow_list() {
        let gateway = Arc::new(RecordingGateway::new());
        let app = AppBuilder::new()
            .gateway(gateway.clone())
            .admin_channel(gateway)
            .allow_list([executor(1, 1), executor(1, 2)])
            .build();
        assert!(matches!(app, Err(BuildError::Registry(_))));
    }
}
