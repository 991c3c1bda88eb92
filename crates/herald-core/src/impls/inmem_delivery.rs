//! InMemoryDispatchQueue - 開発・テスト用の配送キュー
//!
//! # 実装詳細
//! - ready: すぐに取り出せる entry（FIFO）
//! - scheduled: backoff 待ちの entry（BinaryHeap による min-heap）
//! - Notify で push 時に待機中の worker を起こす

use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use crate::domain::QueueError;
use crate::ports::{DispatchQueue, QueueEntry};

/// Scheduled entry for the retry heap.
///
/// Reverse ordering so BinaryHeap acts as a min-heap (earliest first);
/// `seq` keeps FIFO order between entries due at the same instant.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ScheduledEntry {
    run_at: Instant,
    seq: u64,
    entry: QueueEntry,
}

impl PartialOrd for ScheduledEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .run_at
            .cmp(&self.run_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<QueueEntry>,
    scheduled: BinaryHeap<ScheduledEntry>,
    next_seq: u64,
    closed: bool,
}

impl QueueState {
    /// Move entries from scheduled to ready if their time has come.
    fn promote_due(&mut self, now: Instant) {
        while let Some(head) = self.scheduled.peek() {
            if head.run_at > now {
                break; // Heap is sorted, so we can stop
            }
            if let Some(due) = self.scheduled.pop() {
                self.ready.push_back(due.entry);
            }
        }
    }
}

pub struct InMemoryDispatchQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl InMemoryDispatchQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
        }
    }

    /// Refuse further pushes and wake every waiting worker.
    pub async fn close(&self) {
        self.state.lock().await.closed = true;
        self.notify.notify_waiters();
    }
}

impl Default for InMemoryDispatchQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DispatchQueue for InMemoryDispatchQueue {
    async fn push(&self, entry: QueueEntry) -> Result<(), QueueError> {
        {
            let mut state = self.state.lock().await;
            if state.closed {
                return Err(QueueError::Closed);
            }
            state.ready.push_back(entry);
        }
        // Notify outside the lock
        self.notify.notify_one();
        Ok(())
    }

    async fn push_after(&self, entry: QueueEntry, delay: Duration) -> Result<(), QueueError> {
        {
            let mut state = self.state.lock().await;
            if state.closed {
                return Err(QueueError::Closed);
            }
            let seq = state.next_seq;
            state.next_seq += 1;
            state.scheduled.push(ScheduledEntry {
                run_at: Instant::now() + delay,
                seq,
                entry,
            });
        }
        // a waiting worker may need to shorten its sleep
        self.notify.notify_one();
        Ok(())
    }

    async fn pop(&self, timeout: Duration) -> Result<Option<QueueEntry>, QueueError> {
        let deadline = Instant::now() + timeout;
        loop {
            let next_wake = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                state.promote_due(now);

                if let Some(entry) = state.ready.pop_front() {
                    return Ok(Some(entry));
                }
                if state.closed {
                    return Err(QueueError::Closed);
                }
                if now >= deadline {
                    return Ok(None);
                }
                state
                    .scheduled
                    .peek()
                    .map_or(deadline, |head| head.run_at.min(deadline))
            };

            tokio::select! {
                _ = self.notify.notified() => {},
                _ = tokio::time::sleep_until(next_wake) => {},
            }
        }
    }

    async fn len(&self) -> usize {
        let state = self.state.lock().await;
        state.ready.len() + state.scheduled.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::Arc;
    use ulid::Ulid;

    use crate::domain::TaskId;

    fn entry() -> QueueEntry {
        QueueEntry::fresh(TaskId::from_ulid(Ulid::new()), Utc::now())
    }

    #[tokio::test]
    async fn push_pop_is_fifo() {
        let queue = InMemoryDispatchQueue::new();
        let (first, second) = (entry(), entry());
        queue.push(first).await.unwrap();
        queue.push(second).await.unwrap();

        let timeout = Duration::from_millis(50);
        assert_eq!(queue.pop(timeout).await.unwrap(), Some(first));
        assert_eq!(queue.pop(timeout).await.unwrap(), Some(second));
    }

    #[tokio::test]
    async fn pop_times_out_when_empty() {
        let queue = InMemoryDispatchQueue::new();
        let start = Instant::now();
        let popped = queue.pop(Duration::from_millis(100)).await.unwrap();
        assert_eq!(popped, None);
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_entry_waits_for_its_turn() {
        let queue = InMemoryDispatchQueue::new();
        let delayed = entry().retry();
        queue
            .push_after(delayed, Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(queue.pop(Duration::from_secs(1)).await.unwrap(), None);
        assert_eq!(queue.len().await, 1);

        let popped = queue.pop(Duration::from_secs(10)).await.unwrap();
        assert_eq!(popped, Some(delayed));
        assert_eq!(popped.map(|e| e.attempt), Some(1));
    }

    #[tokio::test]
    async fn push_wakes_waiting_pop() {
        let queue = Arc::new(InMemoryDispatchQueue::new());
        let expected = entry();

        let waiter = tokio::spawn({
            let queue = queue.clone();
            async move { queue.pop(Duration::from_secs(5)).await.unwrap() }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        queue.push(expected).await.unwrap();

        assert_eq!(waiter.await.unwrap(), Some(expected));
    }

    #[tokio::test]
    async fn closed_queue_rejects_pushes() {
        let queue = InMemoryDispatchQueue::new();
        queue.close().await;
        assert_eq!(queue.push(entry()).await, Err(QueueError::Closed));
        assert_eq!(
            queue.pop(Duration::from_millis(10)).await,
            Err(QueueError::Closed)
        );
    }
}
