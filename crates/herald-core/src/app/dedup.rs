//! RecentTokens - callback token の重複検出
//!
//! gateway は at-least-once 配送なので、同じ `(task, action, token)` が
//! 何度も届きます。最近見たキーを容量付きで保持し、古いものから忘れます。

use std::collections::{HashSet, VecDeque};
use std::hash::Hash;
use std::sync::Mutex;

use crate::domain::{Action, CallbackToken, TaskId};

/// Insertion-ordered set that evicts its oldest keys past `capacity`.
#[derive(Debug)]
pub struct BoundedSet<K> {
    capacity: usize,
    inner: Mutex<Inner<K>>,
}

#[derive(Debug)]
struct Inner<K> {
    present: HashSet<K>,
    order: VecDeque<K>,
}

impl<K: Clone + Eq + Hash> BoundedSet<K> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(Inner {
                present: HashSet::new(),
                order: VecDeque::new(),
            }),
        }
    }

    /// Returns false when the key was already present.
    pub fn insert(&self, key: K) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if !inner.present.insert(key.clone()) {
            return false;
        }
        inner.order.push_back(key);
        while inner.order.len() > self.capacity {
            if let Some(oldest) = inner.order.pop_front() {
                inner.present.remove(&oldest);
            }
        }
        true
    }

    /// Returns true when the key was present.
    pub fn remove(&self, key: &K) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let removed = inner.present.remove(key);
        if removed {
            inner.order.retain(|k| k != key);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug)]
pub struct RecentTokens {
    keys: BoundedSet<(TaskId, Action, CallbackToken)>,
}

impl RecentTokens {
    pub fn new(capacity: usize) -> Self {
        Self {
            keys: BoundedSet::new(capacity),
        }
    }

    /// Record the key. Returns false when it was already present.
    pub fn first_seen(&self, task_id: TaskId, action: Action, token: &CallbackToken) -> bool {
        self.keys.insert((task_id, action, token.clone()))
    }

    /// Drop a key whose processing did not complete, so a redelivery is retried.
    pub fn forget(&self, task_id: TaskId, action: Action, token: &CallbackToken) {
        self.keys.remove(&(task_id, action, token.clone()));
    }

    pub fn capacity(&self) -> usize {
        self.keys.capacity
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[test]
    fn replay_is_detected_per_task_and_action() {
        let tokens = RecentTokens::new(16);
        let task = TaskId::from_ulid(Ulid::new());
        let t1 = CallbackToken::new("t1");

        assert!(tokens.first_seen(task, Action::Complete, &t1));
        assert!(!tokens.first_seen(task, Action::Complete, &t1));
        assert!(tokens.first_seen(task, Action::AddCalculation, &t1));
        assert!(tokens.first_seen(TaskId::from_ulid(Ulid::new()), Action::Complete, &t1));
    }

    #[test]
    fn oldest_keys_are_evicted_at_capacity() {
        let tokens = RecentTokens::new(2);
        let task = TaskId::from_ulid(Ulid::new());
        for t in ["a", "b", "c"] {
            assert!(tokens.first_seen(task, Action::Complete, &CallbackToken::new(t)));
        }
        assert_eq!(tokens.len(), 2);
        assert!(tokens.first_seen(task, Action::Complete, &CallbackToken::new("a")));
        assert!(!tokens.first_seen(task, Action::Complete, &CallbackToken::new("c")));
    }

    #[test]
    fn forgotten_key_counts_as_new() {
        let tokens = RecentTokens::new(4);
        let task = TaskId::from_ulid(Ulid::new());
        let t = CallbackToken::new("t");
        tokens.first_seen(task, Action::Complete, &t);
        tokens.forget(task, Action::Complete, &t);
        assert!(tokens.is_empty());
        assert!(tokens.first_seen(task, Action::Complete, &t));
    }

    #[test]
    fn bounded_set_forgets_oldest_and_supports_removal() {
        let set = BoundedSet::new(2);
        assert!(set.insert(1));
        assert!(set.insert(2));
        assert!(!set.insert(2));
        assert!(set.insert(3));
        assert_eq!(set.len(), 2);
        assert!(!set.remove(&1));
        assert!(set.remove(&3));
        assert_eq!(set.len(), 1);
    }
}
