//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **InMemoryTaskStore**: テスト・デモ用の正本
//! - **InMemoryDispatchQueue**: 再構築可能な一時キュー
//! - **RecordingGateway**: 送信内容を記録する gateway（失敗を注入可能）
//! - **TelegramGateway**: Bot API 経由の本番用 gateway

pub mod inmem_delivery;
pub mod inmem_task_store;
pub mod recording_gateway;
pub mod telegram;

pub use self::inmem_delivery::InMemoryDispatchQueue;
pub use self::inmem_task_store::InMemoryTaskStore;
pub use self::recording_gateway::{AdminNotice, EditedMessage, RecordingGateway, SentMessage};
pub use self::telegram::TelegramGateway;
