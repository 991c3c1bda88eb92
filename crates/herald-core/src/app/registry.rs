//! ExecutorRegistry - 許可リストの保持
//!
//! 起動時に設定の allow-list から構築します。実行中に変わるのは
//! `unapprove` による承認フラグだけで、executor は削除されません。

use std::collections::HashMap;
use std::sync::RwLock;

use thiserror::Error;
use tracing::{info, warn};

use crate::domain::{Executor, ExecutorId, MessagingIdentity, ValidationError};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error(
        "executor {executor_id} is already registered as {existing}, refusing to rebind to {requested}"
    )]
    ConflictingIdentity {
        executor_id: ExecutorId,
        existing: MessagingIdentity,
        requested: MessagingIdentity,
    },
}

#[derive(Debug, Default)]
pub struct ExecutorRegistry {
    executors: RwLock<HashMap<ExecutorId, Executor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_allow_list(
        allow_list: impl IntoIterator<Item = Executor>,
    ) -> Result<Self, RegistryError> {
        let registry = Self::new();
        registry.sync(allow_list)?;
        Ok(registry)
    }

    /// Add executors from the allow-list.
    ///
    /// Re-adding an id that is already known is a no-op (its approval flag
    /// is left alone). Returns how many executors were newly added.
    pub fn sync(&self, allow_list: impl IntoIterator<Item = Executor>) -> Result<usize, RegistryError> {
        let mut executors = self.write();
        let mut added = 0;
        for executor in allow_list {
            match executors.get(&executor.id) {
                Some(existing) if existing.messaging_identity == executor.messaging_identity => {}
                Some(existing) => {
                    return Err(RegistryError::ConflictingIdentity {
                        executor_id: executor.id,
                        existing: existing.messaging_identity,
                        requested: executor.messaging_identity,
                    });
                }
                None => {
                    info!(executor_id = %executor.id, identity = %executor.messaging_identity, "executor registered");
                    executors.insert(executor.id, executor);
                    added += 1;
                }
            }
        }
        Ok(added)
    }

    pub fn is_approved(&self, executor_id: ExecutorId) -> bool {
        self.read()
            .get(&executor_id)
            .is_some_and(|executor| executor.approved)
    }

    pub fn get(&self, executor_id: ExecutorId) -> Option<Executor> {
        self.read().get(&executor_id).cloned()
    }

    /// The approved executor, or a distinguishable reason it cannot be used.
    pub fn approved(&self, executor_id: ExecutorId) -> Result<Executor, ValidationError> {
        match self.read().get(&executor_id) {
            None => Err(ValidationError::UnknownExecutor(executor_id)),
            Some(executor) if !executor.approved => {
                Err(ValidationError::ExecutorNotApproved(executor_id))
            }
            Some(executor) => Ok(executor.clone()),
        }
    }

    pub fn resolve(&self, executor_id: ExecutorId) -> Result<MessagingIdentity, ValidationError> {
        self.approved(executor_id)
            .map(|executor| executor.messaging_identity)
    }

    /// Flag an executor as no longer approved. Returns false for unknown ids.
    pub fn unapprove(&self, executor_id: ExecutorId) -> bool {
        match self.write().get_mut(&executor_id) {
            Some(executor) => {
                if executor.approved {
                    warn!(%executor_id, "executor unapproved");
                }
                executor.approved = false;
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<ExecutorId, Executor>> {
        self.executors.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<ExecutorId, Executor>> {
        self.executors.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn executor(id: i64) -> Executor {
        Executor {
            id: ExecutorId::new(id),
            messaging_identity: MessagingIdentity::new(id * 10),
            full_name: None,
            approved: true,
        }
    }

    #[test]
    fn resync_is_idempotent() {
        let registry = ExecutorRegistry::from_allow_list([executor(1), executor(2)]).unwrap();
        assert_eq!(registry.sync([executor(1), executor(2)]).unwrap(), 0);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn resync_keeps_unapproved_flag() {
        let registry = ExecutorRegistry::from_allow_list([executor(1)]).unwrap();
        assert!(registry.unapprove(ExecutorId::new(1)));
        registry.sync([executor(1)]).unwrap();
        assert!(!registry.is_approved(ExecutorId::new(1)));
    }

    #[test]
    fn resolve_distinguishes_unknown_from_unapproved() {
        let registry = ExecutorRegistry::from_allow_list([executor(1), executor(2)]).unwrap();
        registry.unapprove(ExecutorId::new(2));

        assert_eq!(
            registry.resolve(ExecutorId::new(1)),
            Ok(MessagingIdentity::new(10))
        );
        assert_eq!(
            registry.resolve(ExecutorId::new(2)),
            Err(ValidationError::ExecutorNotApproved(ExecutorId::new(2)))
        );
        assert_eq!(
            registry.resolve(ExecutorId::new(3)),
            Err(ValidationError::UnknownExecutor(ExecutorId::new(3)))
        );
    }

    #[test]
    fn conflicting_identity_is_refused() {
        let registry = ExecutorRegistry::from_allow_list([executor(1)]).unwrap();
        let mut rebound = executor(1);
        rebound.messaging_identity = MessagingIdentity::new(99);
        assert!(matches!(
            registry.sync([rebound]),
            Err(RegistryError::ConflictingIdentity { .. })
        ));
    }
}
