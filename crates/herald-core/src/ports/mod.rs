//! Ports - 抽象化レイヤー
//!
//! 外部システム（record store, messaging platform, 時刻）への
//! インターフェースを定義します。
//!
//! # 設計原則
//! - record store が source of truth（正本）
//! - dispatch queue は task_id のみを流す一時的な作業リスト
//! - messaging gateway は at-least-once 配送しか保証しない

pub mod admin_channel;
pub mod clock;
pub mod delivery_queue;
pub mod gateway;
pub mod id_generator;
pub mod task_store;

pub use self::admin_channel::AdminChannel;
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::delivery_queue::{DispatchQueue, QueueEntry};
pub use self::gateway::{MessagingGateway, bounded};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::task_store::TaskStore;
