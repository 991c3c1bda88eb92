//! herald-core
//!
//! Task dispatch and notification core: tasks tied to deals and policies
//! are queued, sent to executors as interactive messages, and driven to
//! completion by the executors' button presses.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, task, state, action, retry, decision, errors, events）
//! - **ports**: 抽象化レイヤー（TaskStore, DispatchQueue, MessagingGateway, AdminChannel, Clock）
//! - **impls**: 実装（インメモリ store / queue、記録用 gateway、Telegram adapter）
//! - **app**: アプリケーションロジック（registry, service, dispatcher, callback, builder）
//! - **config**: 設定の読み込み
//! - **observability**: tracing の初期化

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod observability;
pub mod ports;
