//! App - アプリケーション層
//!
//! ports を組み合わせて task の配送と executor とのやり取りを実装します。
//!
//! # 主要コンポーネント
//! - **ExecutorRegistry**: 許可リスト
//! - **TaskService**: 作成・キュー投入・リマインド・確認・キャンセル
//! - **Dispatcher**: 配送キューを処理する worker 群（backoff / retry）
//! - **CallbackHandler**: ボタン操作・返信の処理（冪等）
//! - **Notifier**: trace と管理者通知
//! - **AppBuilder**: ワイヤリングと起動時検証

pub mod builder;
pub mod callback;
pub mod dedup;
pub mod dispatcher;
pub mod formatter;
pub mod locks;
pub mod notifier;
pub mod registry;
pub mod service;
pub mod status;


pub use self::builder::{App, AppBuilder, BuildError};
pub use self::callback::{AckKind, CallbackHandler, CallbackOutcome, RejectReason};
pub use self::dedup::RecentTokens;
pub use self::dispatcher::{DispatchOutcome, Dispatcher, DispatcherHandle};
pub use self::locks::TaskLocks;
pub use self::notifier::Notifier;
pub use self::registry::{ExecutorRegistry, RegistryError};
pub use self::service::TaskService;
pub use self::status::StatusCounts;
