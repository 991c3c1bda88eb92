//! Domain identifiers (strongly-typed IDs).
//!
//! Task / Deal / Policy の ID は ULID ベースの `Id<T>` で表現します。
//! `T` は PhantomData のマーカー型で、`TaskId` と `DealId` を取り違えると
//! コンパイルエラーになります。
//!
//! Executor / チャットの ID は messaging platform 側の数値 ID なので、
//! ULID ではなく `i64` の newtype にしています。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use ulid::Ulid;

/// IdMarker は各 ID 型のマーカー trait
///
/// Display / FromStr で使うプレフィックス（"task-", "deal-", "policy-"）を提供します。
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

/// ParseIdError は callback payload などから ID を復元できなかった場合のエラー
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {expected_prefix} id: {input:?}")]
pub struct ParseIdError {
    pub expected_prefix: &'static str,
    pub input: String,
}

impl<T: IdMarker> FromStr for Id<T> {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseIdError {
            expected_prefix: T::prefix(),
            input: s.to_string(),
        };
        let raw = s.strip_prefix(T::prefix()).ok_or_else(err)?;
        let ulid = Ulid::from_string(raw).map_err(|_| err())?;
        Ok(Self::from_ulid(ulid))
    }
}

// ========================================
// マーカー型の定義
// ========================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Task {}

impl IdMarker for Task {
    fn prefix() -> &'static str {
        "task-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Deal {}

impl IdMarker for Deal {
    fn prefix() -> &'static str {
        "deal-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Policy {}

impl IdMarker for Policy {
    fn prefix() -> &'static str {
        "policy-"
    }
}

/// Identifier of a Task (unit of work handed to an executor).
pub type TaskId = Id<Task>;

/// Reference to a deal record owned by the record store.
pub type DealId = Id<Deal>;

/// Reference to a policy record owned by the record store.
pub type PolicyId = Id<Policy>;

/// Executor identity as matched against the allow-list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutorId(i64);

impl ExecutorId {
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    pub fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for ExecutorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "executor-{}", self.0)
    }
}

/// Address the messaging gateway uses to reach someone (a chat id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessagingIdentity(i64);

impl MessagingIdentity {
    pub const fn new(chat_id: i64) -> Self {
        Self(chat_id)
    }

    pub fn chat_id(self) -> i64 {
        self.0
    }
}

impl fmt::Display for MessagingIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chat:{}", self.0)
    }
}

/// Handle of a message already delivered by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageRef {
    pub chat_id: i64,
    pub message_id: i64,
}

impl MessageRef {
    pub fn new(chat_id: i64, message_id: i64) -> Self {
        Self {
            chat_id,
            message_id,
        }
    }
}

impl fmt::Display for MessageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.chat_id, self.message_id)
    }
}

/// Opaque token the gateway attaches to each inbound interaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallbackToken(String);

impl CallbackToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallbackToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_distinct_types() {
        let task = TaskId::from_ulid(Ulid::new());
        let deal = DealId::from_ulid(Ulid::new());
        let policy = PolicyId::from_ulid(Ulid::new());

        assert!(task.to_string().starts_with("task-"));
        assert!(deal.to_string().starts_with("deal-"));
        assert!(policy.to_string().starts_with("policy-"));
        // let _: DealId = task; // <- does not compile
    }

    #[test]
    fn display_output_parses_back() {
        let task = TaskId::from_ulid(Ulid::new());
        let parsed: TaskId = task.to_string().parse().unwrap();
        assert_eq!(parsed, task);
    }

    #[test]
    fn parse_rejects_wrong_prefix() {
        let deal = DealId::from_ulid(Ulid::new());
        let err = deal.to_string().parse::<TaskId>().unwrap_err();
        assert_eq!(err.expected_prefix, "task-");
    }

    #[test]
    fn parse_rejects_garbage_after_prefix() {
        assert!("task-not-a-ulid".parse::<TaskId>().is_err());
    }

    #[test]
    fn phantom_data_does_not_consume_memory() {
        use std::mem::size_of;
        assert_eq!(size_of::<TaskId>(), size_of::<Ulid>());
    }
}
