//! Config - 設定の読み込み
//!
//! 読み込み順: TOML ファイル（任意）→ 環境変数 `HERALD__*` で上書き
//! （`__` がネストの区切り。例: `HERALD__DISPATCHER__WORKERS=4`）。

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::domain::{Executor, ExecutorId, MessagingIdentity, RetryPolicy};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// 設定のルート
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HeraldConfig {
    pub admin: AdminSection,
    pub gateway: GatewaySection,
    /// Allow-list of executors permitted to receive tasks.
    pub executors: Vec<ExecutorEntry>,
    pub dispatcher: DispatcherSection,
    pub callbacks: CallbackSection,
}

/// [admin]
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AdminSection {
    #[serde(default)]
    pub chat_id: i64,
}

impl AdminSection {
    pub fn identity(&self) -> MessagingIdentity {
        MessagingIdentity::new(self.chat_id)
    }
}

/// [gateway]: Bot API の接続先
#[derive(Debug, Clone, Deserialize)]
pub struct GatewaySection {
    /// Bot token; without one the binary runs the in-memory demo.
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,
}

impl Default for GatewaySection {
    fn default() -> Self {
        Self {
            token: None,
            api_base: default_api_base(),
            poll_timeout_secs: default_poll_timeout_secs(),
        }
    }
}

fn default_api_base() -> String {
    "https://api.telegram.org".to_string()
}

fn default_poll_timeout_secs() -> u64 {
    30
}

/// [[executors]]
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutorEntry {
    pub id: i64,
    /// Defaults to `id` (private chats share the user id).
    #[serde(default)]
    pub chat_id: Option<i64>,
    #[serde(default)]
    pub name: Option<String>,
}

impl ExecutorEntry {
    pub fn to_executor(&self) -> Executor {
        Executor {
            id: ExecutorId::new(self.id),
            messaging_identity: MessagingIdentity::new(self.chat_id.unwrap_or(self.id)),
            full_name: self.name.clone(),
            approved: true,
        }
    }
}

/// [dispatcher]: worker 数と retry / timeout
#[derive(Debug, Clone, Deserialize)]
pub struct DispatcherSection {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_jitter_ratio")]
    pub jitter_ratio: f64,
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
    #[serde(default = "default_pop_timeout_ms")]
    pub pop_timeout_ms: u64,
}

impl Default for DispatcherSection {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_ratio: default_jitter_ratio(),
            send_timeout_ms: default_send_timeout_ms(),
            pop_timeout_ms: default_pop_timeout_ms(),
        }
    }
}

fn default_workers() -> usize {
    2
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    2_000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_jitter_ratio() -> f64 {
    0.5
}

fn default_send_timeout_ms() -> u64 {
    10_000
}

fn default_pop_timeout_ms() -> u64 {
    500
}

impl DispatcherSection {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            jitter_ratio: self.jitter_ratio,
            max_attempts: self.max_attempts,
            ..RetryPolicy::default()
        }
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn pop_timeout(&self) -> Duration {
        Duration::from_millis(self.pop_timeout_ms)
    }
}

/// [callbacks]
#[derive(Debug, Clone, Deserialize)]
pub struct CallbackSection {
    /// Size of the recent-tokens cache used for duplicate detection.
    #[serde(default = "default_dedup_capacity")]
    pub dedup_capacity: usize,
}

impl Default for CallbackSection {
    fn default() -> Self {
        Self {
            dedup_capacity: default_dedup_capacity(),
        }
    }
}

fn default_dedup_capacity() -> usize {
    4_096
}

impl HeraldConfig {
    /// Load from an optional TOML file, then apply `HERALD__*` overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        } else {
            builder = builder.add_source(config::File::with_name("herald").required(false));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("HERALD")
                .separator("__")
                .try_parsing(true),
        );

        let loaded: HeraldConfig = builder.build()?.try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Fail fast on values the dispatcher cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let d = &self.dispatcher;
        if d.workers == 0 {
            return Err(ConfigError::Invalid("dispatcher.workers must be > 0".into()));
        }
        if d.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "dispatcher.max_attempts must be > 0".into(),
            ));
        }
        if !(0.0..=1.0).contains(&d.jitter_ratio) {
            return Err(ConfigError::Invalid(format!(
                "dispatcher.jitter_ratio must be within [0, 1], got {}",
                d.jitter_ratio
            )));
        }
        if d.base_delay_ms > d.max_delay_ms {
            return Err(ConfigError::Invalid(format!(
                "dispatcher.base_delay_ms ({}) exceeds max_delay_ms ({})",
                d.base_delay_ms, d.max_delay_ms
            )));
        }
        if self.callbacks.dedup_capacity == 0 {
            return Err(ConfigError::Invalid(
                "callbacks.dedup_capacity must be > 0".into(),
            ));
        }
        Ok(())
    }

    pub fn allow_list(&self) -> Vec<Executor> {
        self.executors.iter().map(ExecutorEntry::to_executor).collect()
    }
}
